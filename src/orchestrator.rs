//! Orchestrator: validation, transform pipeline and observer fan-out.
//!
//! `process` is the single-signal path:
//!
//! ```text
//! validate (lenient | strict) → pipeline → observers
//! ```
//!
//! A stage failure hands the producer's original signal to the dead-letter
//! store (stamped with the id validation assigned) and returns
//! [`OrchestratorError::PipelineStage`]. Validation failures are returned as
//! they are; those signals never reach the pipeline.
//!
//! `process_batch` splits its input into chunks that run as separate tasks,
//! at most `max_concurrency` at a time. A batch either fully succeeds or
//! fails; chunks already running are left to finish.

use crate::dlq::{DeadLetterOptions, DeadLetterStore};
use crate::observer::{HealthReport, HealthStatus, ObservationMeta, Observer, ProcessStatus};
use crate::pipeline::{Pipeline, PipelineError, PipelineRun, StageOptions};
use crate::signal::Signal;
use crate::validator::{self, ValidationError};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Error rate above which health is degraded.
const DEGRADED_ERROR_RATE: f64 = 0.05;

/// Error rate above which health is unhealthy.
const UNHEALTHY_ERROR_RATE: f64 = 0.10;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    InvalidEnvelope(#[from] ValidationError),

    #[error(transparent)]
    PipelineStage(#[from] PipelineError),

    #[error("batch item {index} failed: {source}")]
    BatchItem {
        index: usize,
        source: Box<OrchestratorError>,
    },

    #[error("batch chunk {chunk} timed out after {timeout_ms}ms")]
    ChunkTimeout { chunk: usize, timeout_ms: u64 },

    #[error("batch timed out after {0}ms")]
    BatchTimeout(u64),

    #[error("batch worker failed: {0}")]
    Worker(String),

    #[error("invalid orchestrator config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Chunks processed at once by `process_batch`
    pub max_concurrency: usize,
    pub strict_validation: bool,
    pub security_enabled: bool,
    pub enrichment_ttl: Duration,
    pub emit_telemetry: bool,
    pub chunk_size: usize,
    pub chunk_timeout: Duration,
    pub batch_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            strict_validation: false,
            security_enabled: true,
            enrichment_ttl: Duration::from_secs(300),
            emit_telemetry: true,
            chunk_size: 50,
            chunk_timeout: Duration::from_secs(5),
            batch_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    pub fn stage_options(&self) -> StageOptions {
        StageOptions {
            security_enabled: self.security_enabled,
            enrichment_ttl: self.enrichment_ttl,
            emit_telemetry: self.emit_telemetry,
        }
    }

    fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_concurrency == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial update for [`Orchestrator::update_config`]; `None` keeps the
/// current value.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub max_concurrency: Option<usize>,
    pub strict_validation: Option<bool>,
    pub security_enabled: Option<bool>,
    pub enrichment_ttl: Option<Duration>,
    pub emit_telemetry: Option<bool>,
    pub chunk_size: Option<usize>,
    pub chunk_timeout: Option<Duration>,
    pub batch_timeout: Option<Duration>,
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Overrides `strict_validation` for this call
    pub strict: Option<bool>,
    /// Hand stage failures to the dead-letter store
    pub dead_letter_on_failure: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            strict: None,
            dead_letter_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorMetrics {
    pub processed: u64,
    pub errors: u64,
    pub error_rate: f64,
    pub avg_latency_us: u64,
    pub uptime_secs: u64,
    pub observers: Map<String, Value>,
}

pub struct Orchestrator {
    pipeline: Pipeline,
    dead_letters: Arc<DeadLetterStore>,
    observers: RwLock<Vec<Arc<dyn Observer>>>,
    config: RwLock<OrchestratorConfig>,
    processed: AtomicU64,
    errors: AtomicU64,
    total_latency_us: AtomicU64,
    started_at: Instant,
}

impl Orchestrator {
    pub fn new(
        pipeline: Pipeline,
        dead_letters: Arc<DeadLetterStore>,
        config: OrchestratorConfig,
    ) -> Self {
        info!(
            stages = ?pipeline.stage_names(),
            max_concurrency = config.max_concurrency,
            strict_validation = config.strict_validation,
            "Orchestrator initialized"
        );
        Self {
            pipeline,
            dead_letters,
            observers: RwLock::new(Vec::new()),
            config: RwLock::new(config),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn Observer>) {
        debug!(observer = %observer.name(), "Observer registered");
        self.observers.write().push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        &self.dead_letters
    }

    pub fn config(&self) -> OrchestratorConfig {
        self.config.read().clone()
    }

    /// Apply a partial update. Rejected updates leave the config unchanged.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<OrchestratorConfig, OrchestratorError> {
        let mut next = self.config();
        if let Some(v) = update.max_concurrency {
            next.max_concurrency = v;
        }
        if let Some(v) = update.strict_validation {
            next.strict_validation = v;
        }
        if let Some(v) = update.security_enabled {
            next.security_enabled = v;
        }
        if let Some(v) = update.enrichment_ttl {
            next.enrichment_ttl = v;
        }
        if let Some(v) = update.emit_telemetry {
            next.emit_telemetry = v;
        }
        if let Some(v) = update.chunk_size {
            next.chunk_size = v;
        }
        if let Some(v) = update.chunk_timeout {
            next.chunk_timeout = v;
        }
        if let Some(v) = update.batch_timeout {
            next.batch_timeout = v;
        }
        next.validate()?;

        *self.config.write() = next.clone();
        info!(config = ?next, "Orchestrator config updated");
        Ok(next)
    }

    /// Validate, transform and observe one signal.
    pub async fn process(&self, signal: &Signal, opts: &ProcessOptions) -> Result<Signal, OrchestratorError> {
        self.process_with_report(signal, opts).await.map(|run| run.signal)
    }

    /// Like [`process`](Self::process), returning per-stage timings too.
    pub async fn process_with_report(
        &self,
        signal: &Signal,
        opts: &ProcessOptions,
    ) -> Result<PipelineRun, OrchestratorError> {
        let started = Instant::now();
        let config = self.config();
        let strict = opts.strict.unwrap_or(config.strict_validation);

        let checked = if strict {
            validator::validate_strict(signal)
        } else {
            validator::validate(signal)
        };
        let validated = match checked {
            Ok(validated) => validated,
            Err(e) => {
                debug!(
                    signal_type = %signal.signal_type,
                    source = %signal.source,
                    error = %e,
                    "Signal rejected by validation"
                );
                self.finish(signal, started, Some(e.to_string())).await;
                return Err(e.into());
            }
        };

        match self.pipeline.run(&validated, &config.stage_options()) {
            Ok(run) => {
                self.finish(&run.signal, started, None).await;
                Ok(run)
            }
            Err(e) => {
                warn!(
                    signal_id = %validated.id_str(),
                    signal_type = %validated.signal_type,
                    stage = %e.stage,
                    reason = %e.reason,
                    "Pipeline stage failed"
                );
                if opts.dead_letter_on_failure {
                    let mut original = signal.clone();
                    original.id = validated.id.clone();
                    if let Err(dlq_err) =
                        self.dead_letters
                            .enqueue(original, e.to_string(), DeadLetterOptions::default())
                    {
                        warn!(
                            signal_id = %validated.id_str(),
                            error = %dlq_err,
                            "Could not dead-letter failed signal"
                        );
                    }
                }
                self.finish(&validated, started, Some(e.to_string())).await;
                Err(e.into())
            }
        }
    }

    async fn finish(&self, signal: &Signal, started: Instant, error: Option<String>) {
        let elapsed = started.elapsed();
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(
            elapsed.as_micros().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
        let status = if error.is_some() {
            self.errors.fetch_add(1, Ordering::Relaxed);
            ProcessStatus::Failure
        } else {
            ProcessStatus::Success
        };

        let meta = ObservationMeta {
            status,
            timestamp: Utc::now(),
            processing_time: elapsed,
            error,
        };
        let observers = self.observers.read().clone();
        for observer in observers {
            if let Err(e) = observer.observe(signal, &meta).await {
                warn!(
                    observer = %observer.name(),
                    signal_id = %signal.id_str(),
                    error = %e,
                    "Observer failed"
                );
            }
        }
    }

    /// Process many signals; any failure fails the whole batch.
    ///
    /// Output order matches input order.
    pub async fn process_batch(
        self: &Arc<Self>,
        signals: Vec<Signal>,
        opts: ProcessOptions,
    ) -> Result<Vec<Signal>, OrchestratorError> {
        let config = self.config();
        let total = signals.len();
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let chunk_timeout = config.chunk_timeout;

        let mut handles = Vec::new();
        let mut offset = 0;
        for (chunk_index, chunk) in signals.chunks(config.chunk_size.max(1)).enumerate() {
            let chunk = chunk.to_vec();
            let base = offset;
            offset += chunk.len();

            let orchestrator = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let opts = opts.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| OrchestratorError::Worker(e.to_string()))?;

                let work = join_all(chunk.iter().map(|s| orchestrator.process(s, &opts)));
                let results = tokio::time::timeout(chunk_timeout, work).await.map_err(|_| {
                    OrchestratorError::ChunkTimeout {
                        chunk: chunk_index,
                        timeout_ms: chunk_timeout.as_millis() as u64,
                    }
                })?;

                results
                    .into_iter()
                    .enumerate()
                    .map(|(i, result)| {
                        result.map_err(|e| OrchestratorError::BatchItem {
                            index: base + i,
                            source: Box::new(e),
                        })
                    })
                    .collect::<Result<Vec<Signal>, OrchestratorError>>()
            }));
        }

        let joined = tokio::time::timeout(config.batch_timeout, join_all(handles))
            .await
            .map_err(|_| OrchestratorError::BatchTimeout(config.batch_timeout.as_millis() as u64))?;

        let mut processed = Vec::with_capacity(total);
        for handle in joined {
            let chunk = handle.map_err(|e| OrchestratorError::Worker(e.to_string()))??;
            processed.extend(chunk);
        }

        debug!(count = processed.len(), "Batch processed");
        Ok(processed)
    }

    pub fn error_rate(&self) -> f64 {
        let processed = self.processed.load(Ordering::Relaxed);
        if processed == 0 {
            return 0.0;
        }
        self.errors.load(Ordering::Relaxed) as f64 / processed as f64
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_latency = self.total_latency_us.load(Ordering::Relaxed);

        let mut observers = Map::new();
        for observer in self.observers.read().iter() {
            observers.insert(observer.name().to_string(), Value::Object(observer.metrics()));
        }

        OrchestratorMetrics {
            processed,
            errors: self.errors.load(Ordering::Relaxed),
            error_rate: self.error_rate(),
            avg_latency_us: if processed == 0 { 0 } else { total_latency / processed },
            uptime_secs: self.started_at.elapsed().as_secs(),
            observers,
        }
    }

    /// Combine the error-rate thresholds with each observer's own report.
    ///
    /// The result is the worst status seen.
    pub async fn health_check(&self) -> HealthReport {
        let rate = self.error_rate();
        let mut status = if rate > UNHEALTHY_ERROR_RATE {
            HealthStatus::Unhealthy
        } else if rate > DEGRADED_ERROR_RATE {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let mut observer_health = Map::new();
        let observers = self.observers.read().clone();
        for observer in observers {
            if let Some(report) = observer.health_check().await {
                status = status.max(report.status);
                observer_health.insert(
                    observer.name().to_string(),
                    json!({ "status": report.status, "details": report.details }),
                );
            }
        }

        HealthReport::new(status)
            .with_detail("error_rate", rate)
            .with_detail("processed", self.processed.load(Ordering::Relaxed))
            .with_detail("errors", self.errors.load(Ordering::Relaxed))
            .with_detail("dead_letters", self.dead_letters.len())
            .with_detail("observers", Value::Object(observer_health))
    }
}
