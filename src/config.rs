//! Configuration module for Axon.
//!
//! Loads configuration from TOML files with environment variable substitution.
//!
//! # Example
//!
//! ```toml
//! [orchestrator]
//! max_concurrency = 10
//! strict_validation = false
//!
//! [scheduler.ratios]
//! critical = 0.5
//!
//! [handlers.log.audit]
//! prefix = "audit"
//!
//! [[routes]]
//! pattern = "user.*"
//! handlers = ["log:audit"]
//! priority = "high"
//!
//! [schemas."user.created"]
//! required = ["user_id"]
//!
//! [worker]
//! name = "${AXON_WORKER_NAME}"
//! ```

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{BusConfig, SignalBus};
use crate::dlq::DeadLetterConfig;
use crate::handlers::{HandlerRegistry, LogHandler};
use crate::orchestrator::OrchestratorConfig;
use crate::pipeline::{Pipeline, SchemaRule, SchemaStage};
use crate::router::{RouteOptions, RouterError, Strategy};
use crate::scheduler::SchedulerConfig;
use crate::signal::{Category, Priority};

/// Handler id of the built-in log handler every config gets.
pub const DEFAULT_LOG_HANDLER: &str = "log";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Route registration failed: {0}")]
    Route(#[from] RouterError),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AxonConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    #[serde(default)]
    pub router: RouterSection,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub dead_letter: DeadLetterSection,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub handlers: HandlersConfig,

    /// Required data keys per signal type pattern
    #[serde(default)]
    pub schemas: HashMap<String, SchemaConfig>,
}

/// Orchestrator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub strict_validation: bool,

    #[serde(default = "default_true")]
    pub security_enabled: bool,

    #[serde(default = "default_enrichment_ttl_secs")]
    pub enrichment_ttl_secs: u64,

    #[serde(default = "default_true")]
    pub emit_telemetry: bool,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            strict_validation: false,
            security_enabled: true,
            enrichment_ttl_secs: default_enrichment_ttl_secs(),
            emit_telemetry: true,
            chunk_size: default_chunk_size(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    10
}

fn default_enrichment_ttl_secs() -> u64 {
    300
}

fn default_chunk_size() -> usize {
    50
}

fn default_chunk_timeout_ms() -> u64 {
    5000
}

fn default_batch_timeout_ms() -> u64 {
    30000
}

impl OrchestratorSection {
    pub fn to_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrency: self.max_concurrency,
            strict_validation: self.strict_validation,
            security_enabled: self.security_enabled,
            enrichment_ttl: Duration::from_secs(self.enrichment_ttl_secs),
            emit_telemetry: self.emit_telemetry,
            chunk_size: self.chunk_size,
            chunk_timeout: Duration::from_millis(self.chunk_timeout_ms),
            batch_timeout: Duration::from_millis(self.batch_timeout_ms),
        }
    }
}

/// Router configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RouterSection {
    #[serde(default)]
    pub strategy: Strategy,
}

/// Dead-letter store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeadLetterSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_dead_letter_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for DeadLetterSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            ttl_secs: default_dead_letter_ttl_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_timeout_ms: default_retry_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_dead_letter_ttl_secs() -> u64 {
    86_400
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_timeout_ms() -> u64 {
    5000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl DeadLetterSection {
    pub fn to_config(&self) -> DeadLetterConfig {
        DeadLetterConfig {
            max_retries: self.max_retries,
            ttl: Duration::from_secs(self.ttl_secs),
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_timeout: Duration::from_millis(self.retry_timeout_ms),
        }
    }
}

/// Worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSection {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,

    /// Discard queued signals older than this
    #[serde(default)]
    pub queue_ttl_secs: Option<u64>,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            name: None,
            drain_batch: default_drain_batch(),
            poll_interval_ms: default_poll_interval_ms(),
            handler_timeout_ms: default_handler_timeout_ms(),
            queue_ttl_secs: None,
        }
    }
}

fn default_drain_batch() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_handler_timeout_ms() -> u64 {
    5000
}

/// A `[[routes]]` entry. Exactly one of `pattern` and `regex` is set.
#[derive(Debug, Deserialize, Clone)]
pub struct RouteConfig {
    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub regex: Option<String>,

    /// Handler ids: `"log"` or `"log:<name>"`
    pub handlers: Vec<String>,

    #[serde(default)]
    pub category: Option<Category>,

    #[serde(default)]
    pub priority: Option<Priority>,

    #[serde(default)]
    pub strategy: Option<Strategy>,
}

impl RouteConfig {
    fn label(&self) -> &str {
        self.pattern
            .as_deref()
            .or(self.regex.as_deref())
            .unwrap_or("<unnamed>")
    }

    fn options(&self) -> RouteOptions {
        RouteOptions {
            category: self.category,
            priority: self.priority,
            strategy: self.strategy,
            ..RouteOptions::default()
        }
    }
}

/// Handler configurations
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HandlersConfig {
    #[serde(default)]
    pub log: HashMap<String, LogHandlerConfig>,
}

/// Log handler configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogHandlerConfig {
    #[serde(default = "default_log_prefix")]
    pub prefix: String,
}

fn default_log_prefix() -> String {
    "axon".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemaConfig {
    #[serde(default)]
    pub required: Vec<String>,
}

impl AxonConfig {
    /// Load configuration from the default path or AXON_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = env::var("AXON_CONFIG").unwrap_or_else(|_| "config/axon.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        let config: AxonConfig = toml::from_str(&content)?;

        config.validate()?;

        info!(
            routes = config.routes.len(),
            log_handlers = config.handlers.log.len(),
            schemas = config.schemas.len(),
            strategy = %config.router.strategy,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.orchestrator.max_concurrency == 0 {
            return fail("orchestrator.max_concurrency must be at least 1".into());
        }
        if self.orchestrator.chunk_size == 0 {
            return fail("orchestrator.chunk_size must be at least 1".into());
        }
        if self.scheduler.max_queue_size == 0 {
            return fail("scheduler.max_queue_size must be at least 1".into());
        }

        let ratios = &self.scheduler.ratios;
        let values = [ratios.critical, ratios.high, ratios.normal, ratios.low];
        if values.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return fail("scheduler.ratios must be finite and non-negative".into());
        }
        if values.iter().sum::<f64>() <= 0.0 {
            return fail("scheduler.ratios must not all be zero".into());
        }

        if self.dead_letter.max_retries == 0 {
            return fail("dead_letter.max_retries must be at least 1".into());
        }
        if self.worker.drain_batch == 0 {
            return fail("worker.drain_batch must be at least 1".into());
        }

        if let Some(name) = &self.worker.name {
            if name.contains("${") {
                warn!(
                    name = %name,
                    "Worker name contains unsubstituted environment variable"
                );
            }
        }

        for route in &self.routes {
            match (&route.pattern, &route.regex) {
                (Some(_), Some(_)) => {
                    return fail(format!(
                        "Route '{}' sets both pattern and regex",
                        route.label()
                    ));
                }
                (None, None) => return fail("Route needs a pattern or a regex".into()),
                (None, Some(re)) => {
                    Regex::new(re).map_err(|source| ConfigError::InvalidRegex {
                        pattern: re.clone(),
                        source,
                    })?;
                }
                (Some(_), None) => {}
            }

            if route.handlers.is_empty() {
                return fail(format!("Route '{}' has no handlers", route.label()));
            }
            for handler in &route.handlers {
                if !self.handler_exists(handler) {
                    return fail(format!(
                        "Route '{}' references undefined handler '{}'",
                        route.label(),
                        handler
                    ));
                }
            }
        }

        for (pattern, schema) in &self.schemas {
            if schema.required.is_empty() {
                warn!(pattern = %pattern, "Schema lists no required fields");
            }
        }

        Ok(())
    }

    /// Check if a handler reference exists in configuration
    fn handler_exists(&self, handler_ref: &str) -> bool {
        if let Some((handler_type, name)) = handler_ref.split_once(':') {
            match handler_type {
                "log" => self.handlers.log.contains_key(name),
                _ => false,
            }
        } else {
            handler_ref == DEFAULT_LOG_HANDLER
        }
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            drain_batch: self.worker.drain_batch,
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            sweep_interval: Duration::from_secs(self.dead_letter.sweep_interval_secs),
            handler_timeout: Duration::from_millis(self.worker.handler_timeout_ms),
            queue_ttl: self.worker.queue_ttl_secs.map(Duration::from_secs),
        }
    }

    /// Build the schema-validation stage from `[schemas]`.
    pub fn schema_stage(&self) -> Result<SchemaStage, ConfigError> {
        let mut patterns: Vec<&String> = self.schemas.keys().collect();
        patterns.sort();

        let mut stage = SchemaStage::new();
        for pattern in patterns {
            let rule = SchemaRule::new(pattern, self.schemas[pattern].required.iter().cloned())
                .map_err(|source| ConfigError::InvalidRegex {
                    pattern: pattern.clone(),
                    source,
                })?;
            stage = stage.with_rule(rule);
        }
        Ok(stage)
    }

    /// Build a handler registry holding the default log handler plus every
    /// `[handlers.log.<name>]` entry as `log:<name>`.
    pub fn build_registry(&self) -> HandlerRegistry {
        let registry = HandlerRegistry::new();
        registry.register(DEFAULT_LOG_HANDLER, Arc::new(LogHandler::new()));
        for (name, config) in &self.handlers.log {
            registry.register(
                format!("log:{}", name),
                Arc::new(LogHandler::with_prefix(&config.prefix)),
            );
        }
        registry
    }

    /// Build a ready [`SignalBus`] from the configuration.
    ///
    /// Spawns the scheduler task, so this must run inside a tokio runtime.
    pub fn build_bus(&self) -> Result<Arc<SignalBus>, ConfigError> {
        let pipeline = Pipeline::standard(self.schema_stage()?);

        let bus = SignalBus::builder()
            .pipeline(pipeline)
            .registry(Arc::new(self.build_registry()))
            .strategy(self.router.strategy)
            .orchestrator_config(self.orchestrator.to_config())
            .scheduler_config(self.scheduler.clone())
            .dead_letter_config(self.dead_letter.to_config())
            .bus_config(self.bus_config())
            .build();

        for route in &self.routes {
            for handler in &route.handlers {
                match (&route.pattern, &route.regex) {
                    (Some(pattern), _) => {
                        bus.router().register(pattern, handler, route.options())?;
                    }
                    (None, Some(re)) => {
                        let regex = Regex::new(re).map_err(|source| ConfigError::InvalidRegex {
                            pattern: re.clone(),
                            source,
                        })?;
                        bus.router().register_regex(regex, handler, route.options())?;
                    }
                    (None, None) => {
                        return Err(ConfigError::ValidationError(
                            "Route needs a pattern or a regex".into(),
                        ));
                    }
                }
            }
        }

        info!(
            routes = bus.router().pattern_count(),
            handlers = bus.registry().len(),
            "Signal bus configured"
        );

        Ok(bus)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let re = match Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(e) => {
            warn!(error = %e, "Env substitution pattern failed to compile");
            return content.to_string();
        }
    };

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}
