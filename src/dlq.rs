//! Dead-letter store for signals that failed processing or delivery.
//!
//! Entries are keyed by signal id. A repeat failure of the same signal bumps
//! the existing entry's attempt counter instead of adding a second entry.
//! Entries leave the store when a retry succeeds, when retries run out
//! (reported as [`DeadLetterError::PermanentlyFailed`]), or when they outlive
//! their TTL and the sweep removes them.
//!
//! # Example
//!
//! ```rust,ignore
//! use axon::dlq::{DeadLetterStore, DeadLetterConfig, DeadLetterOptions};
//!
//! let store = DeadLetterStore::new(DeadLetterConfig::default());
//! store.enqueue(signal, "indexer: connection refused", DeadLetterOptions::default())?;
//!
//! // Later
//! let stuck = store.list(&ListOptions { limit: Some(10), ..Default::default() });
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::signal::Signal;

/// Extension carrying how many dead-letter attempts a signal has used.
pub const ATTEMPTS_EXTENSION: &str = "dead_letter_attempts";

/// Backoff doubling stops after this many attempts.
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Re-submits a dead-lettered signal somewhere it can succeed.
#[async_trait]
pub trait Redeliver: Send + Sync {
    /// Returns the failure reason when redelivery did not go through.
    async fn redeliver(&self, signal: Signal) -> Result<(), String>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeadLetterError {
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

    #[error("redelivery of {id} failed (attempt {attempts}): {reason}")]
    RedeliveryFailed {
        id: String,
        attempts: u32,
        reason: String,
    },

    #[error("dead-letter entry not found: {0}")]
    NotFound(String),

    #[error("retry already in progress for {0}")]
    RetryInProgress(String),

    #[error("no redelivery target configured")]
    NoRedeliverer,
}

/// Store tuning.
#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    pub max_retries: u32,
    /// Default entry lifetime, measured from the first failure
    pub ttl: Duration,
    pub retry_base_delay: Duration,
    /// Upper bound on a single redelivery call
    pub retry_timeout: Duration,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ttl: Duration::from_secs(86_400),
            retry_base_delay: Duration::from_millis(1000),
            retry_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeadLetterOptions {
    /// Overrides the store-wide TTL for a new entry
    pub ttl: Option<Duration>,
    /// Merged into the entry's metadata
    pub metadata: Map<String, Value>,
}

/// A failed signal held for retry or inspection.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub id: String,
    pub signal: Signal,
    pub reason: String,
    pub attempts: u32,
    pub first_failure: DateTime<Utc>,
    pub last_failure: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    pub ttl: Duration,
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    in_flight: bool,
}

impl DeadLetterEntry {
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.first_failure).to_std().unwrap_or_default()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.age_at(now) > self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Most recent failure first
    #[default]
    LastFailure,
    /// Most attempts first
    Attempts,
    /// Oldest first failure first
    FirstFailure,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    /// Keep entries whose reason contains this text
    pub reason_filter: Option<String>,
    pub sort_by: SortBy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeadLetterStats {
    pub current: usize,
    pub enqueued: u64,
    pub retried: u64,
    pub recovered: u64,
    pub exhausted: u64,
    pub expired: u64,
    pub by_reason: HashMap<String, usize>,
    pub oldest_failure: Option<DateTime<Utc>>,
}

/// Result of one [`DeadLetterStore::retry_due`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub attempted: usize,
    pub recovered: usize,
    pub failed: usize,
    pub exhausted: usize,
}

#[derive(Default)]
struct Counters {
    enqueued: u64,
    retried: u64,
    recovered: u64,
    exhausted: u64,
    expired: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, DeadLetterEntry>,
    counters: Counters,
}

/// Clears an entry's `in_flight` flag if a retry is dropped mid-redelivery.
struct InFlight<'a> {
    inner: &'a Mutex<Inner>,
    id: &'a str,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(entry) = self.inner.lock().entries.get_mut(self.id) {
            entry.in_flight = false;
            debug!(signal_id = %self.id, "Retry cancelled, entry released");
        }
    }
}

pub struct DeadLetterStore {
    inner: Mutex<Inner>,
    redeliver: RwLock<Option<Arc<dyn Redeliver>>>,
    config: DeadLetterConfig,
}

impl DeadLetterStore {
    pub fn new(config: DeadLetterConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            redeliver: RwLock::new(None),
            config,
        }
    }

    pub fn with_redeliver(self, redeliver: Arc<dyn Redeliver>) -> Self {
        self.set_redeliver(redeliver);
        self
    }

    pub fn set_redeliver(&self, redeliver: Arc<dyn Redeliver>) {
        *self.redeliver.write() = Some(redeliver);
    }

    pub fn config(&self) -> &DeadLetterConfig {
        &self.config
    }

    fn backoff(&self, attempts: u32) -> chrono::Duration {
        let base = self.config.retry_base_delay.as_millis().min(i64::MAX as u128) as i64;
        let factor = 1i64 << attempts.min(MAX_BACKOFF_EXPONENT);
        chrono::Duration::milliseconds(base.saturating_mul(factor))
    }

    /// Record a failure of `signal`.
    ///
    /// Returns the entry id (the signal id). Fails with
    /// [`DeadLetterError::MaxRetriesExceeded`] when this failure would push
    /// the entry past `max_retries`; the stored entry is then left as it was.
    pub fn enqueue(
        &self,
        signal: Signal,
        reason: impl Into<String>,
        opts: DeadLetterOptions,
    ) -> Result<String, DeadLetterError> {
        self.enqueue_at(signal, reason, opts, Utc::now())
    }

    pub fn enqueue_at(
        &self,
        mut signal: Signal,
        reason: impl Into<String>,
        opts: DeadLetterOptions,
        now: DateTime<Utc>,
    ) -> Result<String, DeadLetterError> {
        let reason = reason.into();
        let id = match &signal.id {
            Some(id) => id.clone(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                signal.id = Some(id.clone());
                id
            }
        };
        let max_retries = self.config.max_retries;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(entry) = inner.entries.get_mut(&id) {
            let attempts = entry.attempts + 1;
            if attempts > max_retries {
                warn!(
                    signal_id = %id,
                    attempts = attempts,
                    max_retries = max_retries,
                    reason = %reason,
                    "Dead-letter entry exceeded max retries"
                );
                return Err(DeadLetterError::MaxRetriesExceeded {
                    id,
                    attempts,
                    max_retries,
                });
            }
            entry.attempts = attempts;
            entry.reason = reason;
            entry.last_failure = now;
            entry.next_retry_at = now + self.backoff(attempts);
            entry.metadata.extend(opts.metadata);
            inner.counters.enqueued += 1;
            debug!(signal_id = %id, attempts = attempts, "Dead-letter entry updated");
            return Ok(id);
        }

        // A redelivered signal keeps counting from where its last entry stopped.
        let prior = signal
            .extension(ATTEMPTS_EXTENSION)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .min(u32::MAX as u64) as u32;
        let attempts = prior.saturating_add(1);
        if attempts > max_retries {
            warn!(
                signal_id = %id,
                attempts = attempts,
                max_retries = max_retries,
                "Redelivered signal failed again past max retries"
            );
            return Err(DeadLetterError::MaxRetriesExceeded {
                id,
                attempts,
                max_retries,
            });
        }

        info!(
            signal_id = %id,
            signal_type = %signal.signal_type,
            attempts = attempts,
            reason = %reason,
            "Signal moved to dead-letter store"
        );

        let entry = DeadLetterEntry {
            id: id.clone(),
            signal,
            reason,
            attempts,
            first_failure: now,
            last_failure: now,
            next_retry_at: now + self.backoff(attempts),
            ttl: opts.ttl.unwrap_or(self.config.ttl),
            metadata: opts.metadata,
            in_flight: false,
        };
        inner.entries.insert(id.clone(), entry);
        inner.counters.enqueued += 1;
        Ok(id)
    }

    /// Redeliver one entry.
    ///
    /// On success the entry is removed and the redelivered signal returned.
    /// On failure the attempt counter increments; past `max_retries` the
    /// entry is deleted and [`DeadLetterError::PermanentlyFailed`] returned.
    pub async fn retry(&self, id: &str) -> Result<Signal, DeadLetterError> {
        let redeliver = self
            .redeliver
            .read()
            .clone()
            .ok_or(DeadLetterError::NoRedeliverer)?;

        let signal = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let entry = inner
                .entries
                .get_mut(id)
                .ok_or_else(|| DeadLetterError::NotFound(id.to_string()))?;
            if entry.in_flight {
                return Err(DeadLetterError::RetryInProgress(id.to_string()));
            }
            entry.in_flight = true;
            let mut signal = entry.signal.clone();
            signal
                .extensions
                .insert(ATTEMPTS_EXTENSION.to_string(), json!(entry.attempts));
            inner.counters.retried += 1;
            signal
        };
        let in_flight = InFlight {
            inner: &self.inner,
            id,
            armed: true,
        };

        let timeout = self.config.retry_timeout;
        let outcome = match tokio::time::timeout(timeout, redeliver.redeliver(signal.clone())).await {
            Ok(result) => result,
            Err(_) => Err(format!("redelivery timed out after {}ms", timeout.as_millis())),
        };
        // Both outcomes below settle the entry under the lock.
        in_flight.disarm();

        let now = Utc::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let reason = match outcome {
            Ok(()) => {
                inner.entries.remove(id);
                inner.counters.recovered += 1;
                info!(signal_id = %id, "Dead-letter entry redelivered");
                return Ok(signal);
            }
            Err(reason) => reason,
        };

        // Removed by a sweep while the redelivery was running.
        let Some(entry) = inner.entries.get_mut(id) else {
            return Err(DeadLetterError::NotFound(id.to_string()));
        };
        entry.in_flight = false;
        entry.attempts += 1;
        entry.reason = reason.clone();
        entry.last_failure = now;
        entry.next_retry_at = now + self.backoff(entry.attempts);
        let attempts = entry.attempts;

        if attempts > self.config.max_retries {
            inner.entries.remove(id);
            inner.counters.exhausted += 1;
            warn!(
                signal_id = %id,
                attempts = attempts,
                reason = %reason,
                "Dead-letter entry permanently failed"
            );
            return Err(DeadLetterError::PermanentlyFailed {
                id: id.to_string(),
                attempts,
                reason,
            });
        }

        debug!(signal_id = %id, attempts = attempts, reason = %reason, "Redelivery failed");
        Err(DeadLetterError::RedeliveryFailed {
            id: id.to_string(),
            attempts,
            reason,
        })
    }

    /// Retire an entry whose owner stopped retrying it.
    ///
    /// Counted as exhausted, like a retry that ran out of attempts.
    pub fn give_up(&self, id: &str, reason: &str) -> Option<DeadLetterEntry> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let entry = inner.entries.remove(id)?;
        inner.counters.exhausted += 1;
        warn!(
            signal_id = %id,
            attempts = entry.attempts,
            reason = %reason,
            "Dead-letter entry given up"
        );
        Some(entry)
    }

    /// Retry every entry whose backoff has elapsed.
    pub async fn retry_due(&self) -> RetrySummary {
        let now = Utc::now();
        let due: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .entries
                .values()
                .filter(|e| !e.in_flight && e.next_retry_at <= now)
                .map(|e| e.id.clone())
                .collect()
        };

        let mut summary = RetrySummary::default();
        for id in due {
            summary.attempted += 1;
            match self.retry(&id).await {
                Ok(_) => summary.recovered += 1,
                Err(DeadLetterError::PermanentlyFailed { .. }) => summary.exhausted += 1,
                Err(_) => summary.failed += 1,
            }
        }
        if summary.attempted > 0 {
            debug!(?summary, "Dead-letter retry pass complete");
        }
        summary
    }

    /// Remove entries older than their TTL; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired_at(now));
        let expired = before - inner.entries.len();
        inner.counters.expired += expired as u64;
        if expired > 0 {
            info!(expired = expired, "Expired dead-letter entries removed");
        }
        expired
    }

    pub fn get(&self, id: &str) -> Option<DeadLetterEntry> {
        self.inner.lock().entries.get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.inner.lock().entries.remove(id).is_some();
        if removed {
            info!(signal_id = %id, "Removed dead-letter entry");
        }
        removed
    }

    pub fn list(&self, opts: &ListOptions) -> Vec<DeadLetterEntry> {
        let inner = self.inner.lock();
        let mut entries: Vec<DeadLetterEntry> = inner
            .entries
            .values()
            .filter(|e| {
                opts.reason_filter
                    .as_deref()
                    .map_or(true, |needle| e.reason.contains(needle))
            })
            .cloned()
            .collect();
        drop(inner);

        match opts.sort_by {
            SortBy::LastFailure => entries.sort_by(|a, b| b.last_failure.cmp(&a.last_failure)),
            SortBy::Attempts => entries.sort_by(|a, b| b.attempts.cmp(&a.attempts)),
            SortBy::FirstFailure => entries.sort_by(|a, b| a.first_failure.cmp(&b.first_failure)),
        }
        if let Some(limit) = opts.limit {
            entries.truncate(limit);
        }
        entries
    }

    /// Entry with the earliest first failure.
    pub fn oldest(&self) -> Option<DeadLetterEntry> {
        self.inner
            .lock()
            .entries
            .values()
            .min_by_key(|e| e.first_failure)
            .cloned()
    }

    /// Entry with the latest first failure.
    pub fn newest(&self) -> Option<DeadLetterEntry> {
        self.inner
            .lock()
            .entries
            .values()
            .max_by_key(|e| e.first_failure)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn stats(&self) -> DeadLetterStats {
        let inner = self.inner.lock();
        let mut by_reason = HashMap::new();
        for entry in inner.entries.values() {
            *by_reason.entry(entry.reason.clone()).or_insert(0) += 1;
        }
        DeadLetterStats {
            current: inner.entries.len(),
            enqueued: inner.counters.enqueued,
            retried: inner.counters.retried,
            recovered: inner.counters.recovered,
            exhausted: inner.counters.exhausted,
            expired: inner.counters.expired,
            by_reason,
            oldest_failure: inner.entries.values().map(|e| e.first_failure).min(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn signal(id: &str) -> Signal {
        Signal::new("job.execute", "svc", json!({"n": 1})).with_id(id)
    }

    fn store() -> DeadLetterStore {
        DeadLetterStore::new(DeadLetterConfig::default())
    }

    /// Fails the first `failures` redeliveries, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Redeliver for Flaky {
        async fn redeliver(&self, _signal: Signal) -> Result<(), String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(format!("boom {}", call))
            } else {
                Ok(())
            }
        }
    }

    struct Hangs;

    #[async_trait]
    impl Redeliver for Hangs {
        async fn redeliver(&self, _signal: Signal) -> Result<(), String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    /// Stalls on the first redelivery only.
    struct StallsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Redeliver for StallsOnce {
        async fn redeliver(&self, _signal: Signal) -> Result<(), String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(())
        }
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    #[test]
    fn test_fourth_enqueue_exceeds_max_retries() {
        let store = store();
        for attempt in 1..=3 {
            store
                .enqueue(signal("s1"), format!("failure {}", attempt), DeadLetterOptions::default())
                .unwrap();
            assert_eq!(store.get("s1").unwrap().attempts, attempt);
        }

        let err = store
            .enqueue(signal("s1"), "failure 4", DeadLetterOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            DeadLetterError::MaxRetriesExceeded {
                id: "s1".to_string(),
                attempts: 4,
                max_retries: 3,
            }
        );
        let entry = store.get("s1").unwrap();
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.reason, "failure 3");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_enqueue_assigns_id_when_missing() {
        let store = store();
        let id = store
            .enqueue(
                Signal::new("job.execute", "svc", json!({})),
                "oops",
                DeadLetterOptions::default(),
            )
            .unwrap();
        assert_eq!(store.get(&id).unwrap().signal.id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_attempt_lineage_from_extension() {
        let store = store();
        let resubmitted = signal("s2").with_extension(ATTEMPTS_EXTENSION, 2);
        store
            .enqueue(resubmitted.clone(), "again", DeadLetterOptions::default())
            .unwrap();
        assert_eq!(store.get("s2").unwrap().attempts, 3);

        store.remove("s2");
        let exhausted = signal("s2").with_extension(ATTEMPTS_EXTENSION, 3);
        assert!(matches!(
            store.enqueue(exhausted, "again", DeadLetterOptions::default()),
            Err(DeadLetterError::MaxRetriesExceeded { attempts: 4, .. })
        ));
    }

    #[test]
    fn test_cleanup_removes_expired_once() {
        let store = store();
        let start = Utc::now();
        let short = DeadLetterOptions {
            ttl: Some(Duration::from_secs(60)),
            ..DeadLetterOptions::default()
        };
        store.enqueue_at(signal("old"), "x", short, start).unwrap();
        store
            .enqueue_at(signal("fresh"), "y", DeadLetterOptions::default(), start)
            .unwrap();

        let later = start + chrono::Duration::seconds(120);
        assert_eq!(store.cleanup_at(later), 1);
        assert_eq!(store.cleanup_at(later), 0);
        assert!(store.get("old").is_none());
        assert!(store.get("fresh").is_some());

        let stats = store.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.exhausted, 0);
    }

    #[test]
    fn test_list_filter_sort_and_limit() {
        let store = store();
        let t0 = Utc::now();
        store
            .enqueue_at(signal("a"), "timeout: indexer", DeadLetterOptions::default(), t0)
            .unwrap();
        store
            .enqueue_at(
                signal("b"),
                "schema: missing user_id",
                DeadLetterOptions::default(),
                t0 + chrono::Duration::seconds(1),
            )
            .unwrap();
        store
            .enqueue_at(
                signal("c"),
                "timeout: mailer",
                DeadLetterOptions::default(),
                t0 + chrono::Duration::seconds(2),
            )
            .unwrap();
        store
            .enqueue_at(
                signal("a"),
                "timeout: indexer",
                DeadLetterOptions::default(),
                t0 + chrono::Duration::seconds(3),
            )
            .unwrap();

        let recent: Vec<String> = store
            .list(&ListOptions::default())
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(recent, vec!["a", "c", "b"]);

        let timeouts = store.list(&ListOptions {
            reason_filter: Some("timeout".to_string()),
            sort_by: SortBy::FirstFailure,
            limit: None,
        });
        assert_eq!(timeouts.len(), 2);
        assert_eq!(timeouts[0].id, "a");

        let top = store.list(&ListOptions {
            sort_by: SortBy::Attempts,
            limit: Some(1),
            ..ListOptions::default()
        });
        assert_eq!(top[0].id, "a");
        assert_eq!(top[0].attempts, 2);

        assert_eq!(store.oldest().unwrap().id, "a");
        assert_eq!(store.newest().unwrap().id, "c");
        assert_eq!(store.stats().by_reason["timeout: indexer"], 1);
    }

    #[tokio::test]
    async fn test_retry_success_removes_entry() {
        let redeliver = flaky(0);
        let store = store().with_redeliver(redeliver.clone());
        store.enqueue(signal("s"), "x", DeadLetterOptions::default()).unwrap();

        let delivered = store.retry("s").await.unwrap();
        assert_eq!(delivered.extension(ATTEMPTS_EXTENSION), Some(&json!(1)));
        assert!(store.is_empty());
        assert_eq!(store.stats().recovered, 1);
        assert_eq!(redeliver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_failures_become_permanent() {
        let store = store().with_redeliver(flaky(10));
        store.enqueue(signal("s"), "x", DeadLetterOptions::default()).unwrap();

        assert!(matches!(
            store.retry("s").await,
            Err(DeadLetterError::RedeliveryFailed { attempts: 2, .. })
        ));
        assert!(matches!(
            store.retry("s").await,
            Err(DeadLetterError::RedeliveryFailed { attempts: 3, .. })
        ));
        assert!(matches!(
            store.retry("s").await,
            Err(DeadLetterError::PermanentlyFailed { attempts: 4, .. })
        ));
        assert!(store.get("s").is_none());

        let stats = store.stats();
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.expired, 0);
    }

    #[tokio::test]
    async fn test_retry_without_redeliverer_or_entry() {
        let store = store();
        assert_eq!(
            store.retry("missing").await.unwrap_err(),
            DeadLetterError::NoRedeliverer
        );

        store.set_redeliver(flaky(0));
        assert_eq!(
            store.retry("missing").await.unwrap_err(),
            DeadLetterError::NotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_retry_timeout_counts_as_failure() {
        let config = DeadLetterConfig {
            retry_timeout: Duration::from_millis(20),
            ..DeadLetterConfig::default()
        };
        let store = DeadLetterStore::new(config).with_redeliver(Arc::new(Hangs));
        store.enqueue(signal("s"), "x", DeadLetterOptions::default()).unwrap();

        match store.retry("s").await {
            Err(DeadLetterError::RedeliveryFailed { reason, attempts, .. }) => {
                assert!(reason.contains("timed out"));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_give_up_counts_as_exhausted() {
        let store = store();
        store.enqueue(signal("s"), "x", DeadLetterOptions::default()).unwrap();

        let entry = store.give_up("s", "handler kept failing").unwrap();
        assert_eq!(entry.attempts, 1);
        assert!(store.give_up("s", "again").is_none());
        assert!(store.is_empty());

        let stats = store.stats();
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.expired, 0);
    }

    #[tokio::test]
    async fn test_cancelled_retry_releases_entry() {
        let redeliver = Arc::new(StallsOnce {
            calls: AtomicU32::new(0),
        });
        let store = store().with_redeliver(redeliver.clone());
        store.enqueue(signal("s"), "x", DeadLetterOptions::default()).unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(10), store.retry("s")).await;
        assert!(cancelled.is_err());
        assert!(!store.get("s").unwrap().in_flight);

        let delivered = store.retry("s").await.unwrap();
        assert_eq!(delivered.id.as_deref(), Some("s"));
        assert!(store.is_empty());
        assert_eq!(redeliver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_due_respects_backoff() {
        let config = DeadLetterConfig {
            retry_base_delay: Duration::from_secs(3600),
            ..DeadLetterConfig::default()
        };
        let store = DeadLetterStore::new(config).with_redeliver(flaky(0));
        store.enqueue(signal("later"), "x", DeadLetterOptions::default()).unwrap();
        store
            .enqueue_at(
                signal("due"),
                "x",
                DeadLetterOptions::default(),
                Utc::now() - chrono::Duration::days(1),
            )
            .unwrap();

        let summary = store.retry_due().await;
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.recovered, 1);
        assert!(store.get("due").is_none());
        assert!(store.get("later").is_some());
    }
}
