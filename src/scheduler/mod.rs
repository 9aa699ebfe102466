//! Priority scheduler.
//!
//! [`PriorityQueues`] holds the queues and the selection logic. [`Scheduler`]
//! runs it as a tokio task that owns the queues outright; callers talk to it
//! through a cloneable [`SchedulerHandle`], so enqueue and dequeue from any
//! number of tasks are serialized without locks.
//!
//! The task exits once every handle has been dropped.

mod queues;

pub use queues::{
    ClassStats, EnqueueOptions, Enqueued, PriorityQueues, QueueEntry, Ratios, SchedulerConfig,
    SchedulerStats,
};

use crate::signal::{Priority, Signal};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

const COMMAND_BUFFER: usize = 256;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("scheduler task has stopped")]
    Closed,

    #[error("invalid ratio {value} for {priority} (must be finite and >= 0)")]
    InvalidRatio { priority: Priority, value: f64 },
}

enum Command {
    Enqueue {
        signal: Signal,
        priority: Priority,
        opts: EnqueueOptions,
        reply: oneshot::Sender<Enqueued>,
    },
    Dequeue {
        reply: oneshot::Sender<Option<QueueEntry>>,
    },
    DequeueBatch {
        max: usize,
        reply: oneshot::Sender<Vec<QueueEntry>>,
    },
    Sizes {
        reply: oneshot::Sender<HashMap<Priority, usize>>,
    },
    UpdateRatios {
        ratios: HashMap<Priority, f64>,
        reply: oneshot::Sender<Result<(), SchedulerError>>,
    },
    Stats {
        reply: oneshot::Sender<SchedulerStats>,
    },
}

pub struct Scheduler {
    queues: PriorityQueues,
    rng: StdRng,
    rx: mpsc::Receiver<Command>,
}

impl Scheduler {
    /// Start the scheduler task. Must be called inside a tokio runtime.
    pub fn spawn(config: SchedulerConfig) -> SchedulerHandle {
        Self::spawn_with_rng(config, StdRng::from_entropy())
    }

    /// Start with a fixed random source, for reproducible selection.
    pub fn spawn_with_rng(config: SchedulerConfig, rng: StdRng) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        info!(
            max_queue_size = config.max_queue_size,
            starvation_limit = config.starvation_limit,
            "Scheduler started"
        );
        let scheduler = Scheduler {
            queues: PriorityQueues::new(config),
            rng,
            rx,
        };
        tokio::spawn(scheduler.run());
        SchedulerHandle { tx }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            // A dropped reply receiver just means the caller gave up waiting.
            match command {
                Command::Enqueue {
                    signal,
                    priority,
                    opts,
                    reply,
                } => {
                    let _ = reply.send(self.queues.enqueue(signal, priority, opts));
                }
                Command::Dequeue { reply } => {
                    let entry = self.queues.dequeue_with(Instant::now(), &mut self.rng);
                    let _ = reply.send(entry);
                }
                Command::DequeueBatch { max, reply } => {
                    let batch = self
                        .queues
                        .dequeue_batch_with(max, Instant::now(), &mut self.rng);
                    let _ = reply.send(batch);
                }
                Command::Sizes { reply } => {
                    let _ = reply.send(self.queues.sizes());
                }
                Command::UpdateRatios { ratios, reply } => {
                    let result = self
                        .queues
                        .update_ratios(&ratios)
                        .map_err(|(priority, value)| SchedulerError::InvalidRatio { priority, value });
                    if result.is_ok() {
                        debug!(ratios = ?self.queues.config().ratios, "Scheduler ratios updated");
                    }
                    let _ = reply.send(result);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.queues.stats());
                }
            }
        }
        debug!("Scheduler handles dropped, task exiting");
    }
}

/// Cloneable handle to a running [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| SchedulerError::Closed)?;
        rx.await.map_err(|_| SchedulerError::Closed)
    }

    pub async fn enqueue(
        &self,
        signal: Signal,
        priority: Priority,
        opts: EnqueueOptions,
    ) -> Result<Enqueued, SchedulerError> {
        self.call(|reply| Command::Enqueue {
            signal,
            priority,
            opts,
            reply,
        })
        .await
    }

    /// Next entry by weighted-fair selection; `None` when all queues are empty.
    pub async fn dequeue(&self) -> Result<Option<QueueEntry>, SchedulerError> {
        self.call(|reply| Command::Dequeue { reply }).await
    }

    pub async fn dequeue_batch(&self, max: usize) -> Result<Vec<QueueEntry>, SchedulerError> {
        self.call(|reply| Command::DequeueBatch { max, reply }).await
    }

    pub async fn queue_sizes(&self) -> Result<HashMap<Priority, usize>, SchedulerError> {
        self.call(|reply| Command::Sizes { reply }).await
    }

    /// Change the base ratio of the listed classes; others are untouched.
    pub async fn update_ratios(&self, ratios: HashMap<Priority, f64>) -> Result<(), SchedulerError> {
        self.call(|reply| Command::UpdateRatios { ratios, reply })
            .await?
    }

    pub async fn stats(&self) -> Result<SchedulerStats, SchedulerError> {
        self.call(|reply| Command::Stats { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signal(id: &str) -> Signal {
        Signal::new("job.execute", "svc", json!({})).with_id(id)
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_roundtrip() {
        let handle = Scheduler::spawn_with_rng(SchedulerConfig::default(), StdRng::seed_from_u64(1));

        handle
            .enqueue(signal("a"), Priority::High, EnqueueOptions::default())
            .await
            .unwrap();
        let sizes = handle.queue_sizes().await.unwrap();
        assert_eq!(sizes[&Priority::High], 1);
        assert_eq!(sizes[&Priority::Low], 0);

        let entry = handle.dequeue().await.unwrap().unwrap();
        assert_eq!(entry.signal.id_str(), "a");
        assert_eq!(entry.priority, Priority::High);
        assert!(handle.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_batch_and_stats() {
        let handle = Scheduler::spawn(SchedulerConfig::default());
        for (i, priority) in Priority::ALL.iter().enumerate() {
            handle
                .enqueue(signal(&format!("s{}", i)), *priority, EnqueueOptions::default())
                .await
                .unwrap();
        }

        let batch = handle.dequeue_batch(10).await.unwrap();
        assert_eq!(batch.len(), 4);

        let stats = handle.stats().await.unwrap();
        for priority in Priority::ALL {
            assert_eq!(stats.class(priority).enqueued, 1);
            assert_eq!(stats.class(priority).dequeued, 1);
        }
    }

    #[tokio::test]
    async fn test_update_ratios_validation() {
        let handle = Scheduler::spawn(SchedulerConfig::default());

        let mut bad = HashMap::new();
        bad.insert(Priority::High, f64::NAN);
        assert!(matches!(
            handle.update_ratios(bad).await,
            Err(SchedulerError::InvalidRatio { priority: Priority::High, .. })
        ));

        let mut good = HashMap::new();
        good.insert(Priority::High, 0.6);
        handle.update_ratios(good).await.unwrap();
    }

    #[tokio::test]
    async fn test_handles_share_one_queue() {
        let handle = Scheduler::spawn(SchedulerConfig::default());
        let producer = handle.clone();

        let task = tokio::spawn(async move {
            for i in 0..20 {
                producer
                    .enqueue(signal(&format!("p{}", i)), Priority::Normal, EnqueueOptions::default())
                    .await
                    .unwrap();
            }
        });
        task.await.unwrap();

        assert_eq!(handle.dequeue_batch(100).await.unwrap().len(), 20);
    }
}
