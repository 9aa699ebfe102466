//! Weighted-fair multi-class queue.
//!
//! Four FIFO queues, one per [`Priority`]. Dequeue draws a class at random,
//! weighting each non-empty class by
//!
//! ```text
//! ratio * (1 + min(seconds_since_last_served, 10) / 10)
//! ```
//!
//! so a class that has waited gains up to double its base weight. On top of
//! the draw, a non-empty class passed over `starvation_limit` times in a row
//! is served next unconditionally.
//!
//! Non-critical queues are bounded: when full, the oldest entry is dropped to
//! admit the new one and the drop is counted. The critical queue never drops.

use crate::signal::{Priority, Signal};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::warn;

/// Seconds of waiting after which the anti-starvation boost stops growing.
const MAX_BOOST_SECS: f64 = 10.0;

/// Base selection ratios per class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ratios {
    #[serde(default = "default_critical")]
    pub critical: f64,
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_normal")]
    pub normal: f64,
    #[serde(default = "default_low")]
    pub low: f64,
}

fn default_critical() -> f64 {
    0.4
}

fn default_high() -> f64 {
    0.3
}

fn default_normal() -> f64 {
    0.2
}

fn default_low() -> f64 {
    0.1
}

impl Default for Ratios {
    fn default() -> Self {
        Self {
            critical: default_critical(),
            high: default_high(),
            normal: default_normal(),
            low: default_low(),
        }
    }
}

impl Ratios {
    pub fn get(&self, priority: Priority) -> f64 {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }

    pub fn set(&mut self, priority: Priority, value: f64) {
        match priority {
            Priority::Critical => self.critical = value,
            Priority::High => self.high = value,
            Priority::Normal => self.normal = value,
            Priority::Low => self.low = value,
        }
    }
}

/// Scheduler tuning; the `[scheduler]` config section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Capacity of each non-critical class
    pub max_queue_size: usize,
    pub ratios: Ratios,
    /// Consecutive pass-overs after which a waiting class is served
    pub starvation_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            ratios: Ratios::default(),
            starvation_limit: 32,
        }
    }
}

/// Per-enqueue options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Discard the entry if it is still queued after this long
    pub ttl: Option<Duration>,
    pub metadata: Map<String, Value>,
}

/// A queued signal.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: String,
    pub signal: Signal,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub expires_at: Option<Instant>,
    pub metadata: Map<String, Value>,
}

impl QueueEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Receipt for an accepted enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub entry_id: String,
    /// Entry evicted to make room, if the class was full
    pub dropped: Option<String>,
}

/// Counters for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    pub expired: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub critical: ClassStats,
    pub high: ClassStats,
    pub normal: ClassStats,
    pub low: ClassStats,
}

impl SchedulerStats {
    pub fn class(&self, priority: Priority) -> &ClassStats {
        match priority {
            Priority::Critical => &self.critical,
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
            Priority::Low => &self.low,
        }
    }

    pub fn total_dropped(&self) -> u64 {
        Priority::ALL.iter().map(|p| self.class(*p).dropped).sum()
    }
}

struct ClassQueue {
    entries: VecDeque<QueueEntry>,
    last_served: Instant,
    passed_over: u32,
    stats: ClassStats,
}

impl ClassQueue {
    fn new(now: Instant) -> Self {
        Self {
            entries: VecDeque::new(),
            last_served: now,
            passed_over: 0,
            stats: ClassStats::default(),
        }
    }
}

fn slot(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

/// The four class queues and their selection state.
pub struct PriorityQueues {
    classes: [ClassQueue; 4],
    config: SchedulerConfig,
}

impl PriorityQueues {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: SchedulerConfig, now: Instant) -> Self {
        Self {
            classes: [
                ClassQueue::new(now),
                ClassQueue::new(now),
                ClassQueue::new(now),
                ClassQueue::new(now),
            ],
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn enqueue(&mut self, signal: Signal, priority: Priority, opts: EnqueueOptions) -> Enqueued {
        self.enqueue_at(signal, priority, opts, Instant::now())
    }

    pub fn enqueue_at(
        &mut self,
        signal: Signal,
        priority: Priority,
        opts: EnqueueOptions,
        now: Instant,
    ) -> Enqueued {
        let max = self.config.max_queue_size;
        let class = &mut self.classes[slot(priority)];

        let mut dropped = None;
        if priority != Priority::Critical && class.entries.len() >= max {
            if let Some(oldest) = class.entries.pop_front() {
                class.stats.dropped += 1;
                warn!(
                    priority = %priority,
                    dropped_signal = %oldest.signal.id_str(),
                    max_queue_size = max,
                    "Queue full, dropped oldest entry"
                );
                dropped = Some(oldest.id);
            }
        }

        let entry = QueueEntry {
            id: uuid::Uuid::new_v4().to_string(),
            signal,
            priority,
            enqueued_at: now,
            expires_at: opts.ttl.map(|ttl| now + ttl),
            metadata: opts.metadata,
        };
        let entry_id = entry.id.clone();
        class.entries.push_back(entry);
        class.stats.enqueued += 1;

        Enqueued { entry_id, dropped }
    }

    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        self.dequeue_with(Instant::now(), &mut rand::thread_rng())
    }

    /// Take one entry using `rng` for the weighted draw.
    ///
    /// Returns `None` when every class is empty (or holds only expired
    /// entries). Never waits.
    pub fn dequeue_with<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> Option<QueueEntry> {
        loop {
            let chosen = self.choose_class(now, rng)?;

            for (i, class) in self.classes.iter_mut().enumerate() {
                if i == chosen {
                    class.last_served = now;
                    class.passed_over = 0;
                } else if !class.entries.is_empty() {
                    class.passed_over = class.passed_over.saturating_add(1);
                }
            }

            let class = &mut self.classes[chosen];
            let entry = class.entries.pop_front()?;
            if entry.is_expired(now) {
                class.stats.expired += 1;
                continue;
            }
            class.stats.dequeued += 1;
            return Some(entry);
        }
    }

    /// Up to `max` dequeues; stops early once everything is empty.
    pub fn dequeue_batch_with<R: Rng + ?Sized>(
        &mut self,
        max: usize,
        now: Instant,
        rng: &mut R,
    ) -> Vec<QueueEntry> {
        let mut batch = Vec::with_capacity(max.min(self.len()));
        while batch.len() < max {
            match self.dequeue_with(now, rng) {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        batch
    }

    fn choose_class<R: Rng + ?Sized>(&self, now: Instant, rng: &mut R) -> Option<usize> {
        let candidates: Vec<usize> = (0..self.classes.len())
            .filter(|i| !self.classes[*i].entries.is_empty())
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // Hard bound: longest-waiting starved class first, urgency breaks ties.
        let limit = self.config.starvation_limit;
        if limit > 0 {
            let starved = candidates
                .iter()
                .copied()
                .filter(|i| self.classes[*i].passed_over >= limit)
                .max_by(|a, b| {
                    self.classes[*a]
                        .passed_over
                        .cmp(&self.classes[*b].passed_over)
                        .then(b.cmp(a))
                });
            if starved.is_some() {
                return starved;
            }
        }

        let weights: Vec<(usize, f64)> = candidates
            .iter()
            .map(|&i| {
                let waited = now
                    .saturating_duration_since(self.classes[i].last_served)
                    .as_secs_f64()
                    .min(MAX_BOOST_SECS);
                let ratio = self.config.ratios.get(Priority::ALL[i]).max(0.0);
                (i, ratio * (1.0 + waited / MAX_BOOST_SECS))
            })
            .collect();

        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 || !total.is_finite() {
            return candidates.first().copied();
        }

        let mut draw = rng.gen::<f64>() * total;
        for (i, weight) in &weights {
            if draw < *weight {
                return Some(*i);
            }
            draw -= weight;
        }
        weights.last().map(|(i, _)| *i)
    }

    pub fn sizes(&self) -> HashMap<Priority, usize> {
        Priority::ALL
            .iter()
            .map(|p| (*p, self.classes[slot(*p)].entries.len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.classes.iter().map(|c| c.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.iter().all(|c| c.entries.is_empty())
    }

    /// Replace the ratios of the listed classes.
    pub fn update_ratios(&mut self, ratios: &HashMap<Priority, f64>) -> Result<(), (Priority, f64)> {
        if let Some((p, v)) = ratios.iter().find(|(_, v)| !v.is_finite() || **v < 0.0) {
            return Err((*p, *v));
        }
        for (priority, value) in ratios {
            self.config.ratios.set(*priority, *value);
        }
        Ok(())
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            critical: self.classes[0].stats,
            high: self.classes[1].stats,
            normal: self.classes[2].stats,
            low: self.classes[3].stats,
        }
    }
}
