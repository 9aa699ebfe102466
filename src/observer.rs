//! Observers: passive consumers of processing outcomes.
//!
//! The orchestrator notifies every registered [`Observer`] after each
//! `process` call. Observer errors are logged and never change the outcome
//! of the call being observed.

use crate::signal::Signal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Success,
    Failure,
}

/// What the orchestrator reports alongside each observed signal.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationMeta {
    pub status: ProcessStatus,
    pub timestamp: DateTime<Utc>,
    pub processing_time: Duration,
    /// Failure reason, for `Failure`
    pub error: Option<String>,
}

/// Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub details: Map<String, Value>,
}

impl HealthReport {
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

#[async_trait]
pub trait Observer: Send + Sync {
    fn name(&self) -> &str;

    async fn observe(&self, signal: &Signal, meta: &ObservationMeta) -> Result<(), ObserverError>;

    /// Observer-specific counters for the orchestrator's metrics view.
    fn metrics(&self) -> Map<String, Value> {
        Map::new()
    }

    /// `None` when the observer does not report health.
    async fn health_check(&self) -> Option<HealthReport> {
        None
    }
}

/// Counts outcomes and processing time per signal type.
#[derive(Default)]
pub struct MetricsObserver {
    succeeded: AtomicU64,
    failed: AtomicU64,
    total_micros: AtomicU64,
    by_type: DashMap<String, u64>,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observed(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn count_for(&self, signal_type: &str) -> u64 {
        self.by_type.get(signal_type).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl Observer for MetricsObserver {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn observe(&self, signal: &Signal, meta: &ObservationMeta) -> Result<(), ObserverError> {
        match meta.status {
            ProcessStatus::Success => self.succeeded.fetch_add(1, Ordering::Relaxed),
            ProcessStatus::Failure => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        let micros = meta.processing_time.as_micros().min(u64::MAX as u128) as u64;
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        *self.by_type.entry(signal.signal_type.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn metrics(&self) -> Map<String, Value> {
        let observed = self.observed();
        let total = self.total_micros.load(Ordering::Relaxed);
        let mut by_type = Map::new();
        for entry in self.by_type.iter() {
            by_type.insert(entry.key().clone(), json!(*entry.value()));
        }

        let mut metrics = Map::new();
        metrics.insert("observed".into(), json!(observed));
        metrics.insert("succeeded".into(), json!(self.succeeded.load(Ordering::Relaxed)));
        metrics.insert("failed".into(), json!(self.failed()));
        metrics.insert(
            "avg_processing_us".into(),
            json!(if observed == 0 { 0 } else { total / observed }),
        );
        metrics.insert("by_type".into(), Value::Object(by_type));
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(status: ProcessStatus, micros: u64) -> ObservationMeta {
        ObservationMeta {
            status,
            timestamp: Utc::now(),
            processing_time: Duration::from_micros(micros),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_metrics_observer_counts() {
        let observer = MetricsObserver::new();
        let created = Signal::new("user.created", "svc", json!({}));
        let deleted = Signal::new("user.deleted", "svc", json!({}));

        observer.observe(&created, &meta(ProcessStatus::Success, 100)).await.unwrap();
        observer.observe(&created, &meta(ProcessStatus::Success, 300)).await.unwrap();
        observer.observe(&deleted, &meta(ProcessStatus::Failure, 200)).await.unwrap();

        assert_eq!(observer.observed(), 3);
        assert_eq!(observer.failed(), 1);
        assert_eq!(observer.count_for("user.created"), 2);

        let metrics = observer.metrics();
        assert_eq!(metrics["avg_processing_us"], json!(200));
        assert_eq!(metrics["by_type"]["user.deleted"], json!(1));
        assert!(observer.health_check().await.is_none());
    }

    #[test]
    fn test_health_status_ordering() {
        assert!(HealthStatus::Unhealthy > HealthStatus::Degraded);
        assert!(HealthStatus::Degraded > HealthStatus::Healthy);
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
    }
}
