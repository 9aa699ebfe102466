//! Crate-level error type.
//!
//! Each module keeps its own error enum; [`BusError`] is what the signal bus
//! returns, with the routing and dead-letter outcomes producers need to tell
//! apart lifted into their own variants.

use crate::dlq::DeadLetterError;
use crate::handlers::HandlerError;
use crate::orchestrator::OrchestratorError;
use crate::pipeline::PipelineError;
use crate::router::RouterError;
use crate::scheduler::SchedulerError;
use crate::validator::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// Structural validation failed; the signal never entered the pipeline
    #[error(transparent)]
    InvalidEnvelope(#[from] ValidationError),

    /// A transform stage failed; the signal was dead-lettered
    #[error(transparent)]
    PipelineStage(#[from] PipelineError),

    #[error("no matching routes for signal type '{0}'")]
    NoMatchingRoute(String),

    #[error("no available handler for signal type '{signal_type}'")]
    HandlerUnavailable {
        signal_type: String,
        patterns: Vec<String>,
    },

    #[error("signal {id} exceeded max retries ({attempts} > {max_retries})")]
    MaxRetriesExceeded {
        id: String,
        attempts: u32,
        max_retries: u32,
    },

    #[error("signal {id} permanently failed after {attempts} attempts: {reason}")]
    PermanentlyFailed {
        id: String,
        attempts: u32,
        reason: String,
    },

    #[error(transparent)]
    Router(RouterError),

    #[error(transparent)]
    DeadLetter(DeadLetterError),

    #[error(transparent)]
    Orchestrator(OrchestratorError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("signal bus is shutting down")]
    ShuttingDown,
}

impl BusError {
    /// Whether retrying the same call can never succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BusError::InvalidEnvelope(_)
                | BusError::NoMatchingRoute(_)
                | BusError::MaxRetriesExceeded { .. }
                | BusError::PermanentlyFailed { .. }
        )
    }
}

impl From<RouterError> for BusError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NoMatchingRoute(signal_type) => BusError::NoMatchingRoute(signal_type),
            RouterError::HandlerUnavailable {
                signal_type,
                patterns,
            } => BusError::HandlerUnavailable {
                signal_type,
                patterns,
            },
            other => BusError::Router(other),
        }
    }
}

impl From<DeadLetterError> for BusError {
    fn from(err: DeadLetterError) -> Self {
        match err {
            DeadLetterError::MaxRetriesExceeded {
                id,
                attempts,
                max_retries,
            } => BusError::MaxRetriesExceeded {
                id,
                attempts,
                max_retries,
            },
            DeadLetterError::PermanentlyFailed {
                id,
                attempts,
                reason,
            } => BusError::PermanentlyFailed {
                id,
                attempts,
                reason,
            },
            other => BusError::DeadLetter(other),
        }
    }
}

impl From<OrchestratorError> for BusError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidEnvelope(e) => BusError::InvalidEnvelope(e),
            OrchestratorError::PipelineStage(e) => BusError::PipelineStage(e),
            other => BusError::Orchestrator(other),
        }
    }
}
