//! Log Handler - writes delivered signal envelopes to the tracing log.
//!
//! Critical signals are logged at `warn`, everything else at `info`, so a
//! catch-all `*` route stays readable under a default filter. Redelivered
//! signals carry their dead-letter attempt count in the log line.
//!
//! ```rust,ignore
//! use axon::handlers::LogHandler;
//!
//! registry.register("log", Arc::new(LogHandler::new()));
//! registry.register("log:audit", Arc::new(LogHandler::with_prefix("audit")));
//! ```

use super::{Handler, HandlerError, HandlerOutcome};
use crate::dlq::ATTEMPTS_EXTENSION;
use crate::signal::{Priority, Signal};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LogHandler {
    prefix: String,
}

impl LogHandler {
    pub fn new() -> Self {
        Self::with_prefix("signal")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for LogHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, signal: &Signal) -> Result<HandlerOutcome, HandlerError> {
        let priority = signal.effective_priority();
        let category = signal.category.map(|c| c.to_string()).unwrap_or_default();
        let routing_key = signal.routing_key.as_deref().unwrap_or("-");
        let correlation_id = signal.correlation_id().unwrap_or("-");
        let redelivery = signal.extension(ATTEMPTS_EXTENSION).and_then(Value::as_u64);

        if priority == Priority::Critical {
            warn!(
                signal_id = %signal.id_str(),
                signal_type = %signal.signal_type,
                source = %signal.source,
                category = %category,
                routing_key = %routing_key,
                correlation_id = %correlation_id,
                redelivery = ?redelivery,
                data = %signal.data,
                "[{}] critical {}",
                self.prefix,
                signal.signal_type
            );
        } else {
            info!(
                signal_id = %signal.id_str(),
                signal_type = %signal.signal_type,
                source = %signal.source,
                category = %category,
                priority = %priority,
                routing_key = %routing_key,
                correlation_id = %correlation_id,
                redelivery = ?redelivery,
                "[{}] {}",
                self.prefix,
                signal.signal_type
            );
        }

        Ok(HandlerOutcome::with_metadata(
            self.name(),
            format!("[{}] logged {} from {}", self.prefix, signal.signal_type, signal.source),
            json!({
                "category": category,
                "priority": priority,
                "routing_key": routing_key,
                "redelivery": redelivery,
            }),
        ))
    }
}
