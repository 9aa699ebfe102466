//! Signal handlers.
//!
//! Handlers are the consumers the router delivers signals to. The [`Handler`]
//! trait defines the interface; the [`HandlerRegistry`] resolves the opaque
//! handler ids used in route registrations to concrete instances and keeps
//! the load counters the `least_loaded` strategy reads.
//!
//! ## Built-in Handlers
//!
//! - [`LogHandler`]: Structured logging of delivered signals
//!
//! ## Creating Custom Handlers
//!
//! ```rust,ignore
//! use axon::{Handler, HandlerError, HandlerOutcome, Signal};
//! use async_trait::async_trait;
//!
//! struct Indexer;
//!
//! #[async_trait]
//! impl Handler for Indexer {
//!     fn name(&self) -> &str {
//!         "indexer"
//!     }
//!
//!     async fn handle(&self, signal: &Signal) -> Result<HandlerOutcome, HandlerError> {
//!         Ok(HandlerOutcome::success("indexer", "indexed"))
//!     }
//! }
//! ```

pub mod log;

use crate::signal::Signal;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

pub use log::LogHandler;

/// Errors that can occur while a handler processes a signal.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler did not finish in time
    #[error("handler timed out after {0}ms")]
    Timeout(u64),

    /// Generic handler failure
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Result of a successful delivery.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    /// Name of the handler that produced this outcome
    pub handler_name: String,

    /// Human-readable message describing what happened
    pub message: String,

    /// Optional metadata from the handler
    pub metadata: Option<serde_json::Value>,
}

impl HandlerOutcome {
    /// Create a success outcome with a message
    pub fn success(handler_name: &str, message: impl Into<String>) -> Self {
        Self {
            handler_name: handler_name.to_string(),
            message: message.into(),
            metadata: None,
        }
    }

    /// Create a success outcome with metadata
    pub fn with_metadata(
        handler_name: &str,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            handler_name: handler_name.to_string(),
            message: message.into(),
            metadata: Some(metadata),
        }
    }
}

/// The core Handler trait.
///
/// Handlers must be `Send + Sync`; they are shared across delivery tasks.
/// Delivery is at-least-once, so handlers should be idempotent.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Returns the name of this handler (e.g., "log", "indexer")
    fn name(&self) -> &str;

    /// Whether the handler can currently accept signals.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Process a delivered signal.
    async fn handle(&self, signal: &Signal) -> Result<HandlerOutcome, HandlerError>;
}

/// Registry resolving handler ids to instances.
///
/// Lookups vastly outnumber registrations, so entries live in concurrent
/// maps that readers never block on.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn Handler>>,
    loads: DashMap<String, u64>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            loads: DashMap::new(),
        }
    }

    /// Register a handler instance under an id, replacing any previous one.
    pub fn register(&self, id: impl Into<String>, handler: Arc<dyn Handler>) {
        let id = id.into();
        self.loads.entry(id.clone()).or_insert(0);
        self.handlers.insert(id, handler);
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.loads.remove(id);
        self.handlers.remove(id).is_some()
    }

    /// Get a handler by id
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    /// Resolvable and reporting healthy.
    pub fn is_available(&self, id: &str) -> bool {
        self.handlers
            .get(id)
            .map(|entry| entry.value().is_healthy())
            .unwrap_or(false)
    }

    /// Record an externally observed load figure for a handler.
    pub fn report_load(&self, id: &str, load: u64) {
        self.loads.insert(id.to_string(), load);
    }

    /// Last reported load; unknown handlers read as idle.
    pub fn load(&self, id: &str) -> u64 {
        self.loads.get(id).map(|entry| *entry.value()).unwrap_or(0)
    }

    /// List all registered handler ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
