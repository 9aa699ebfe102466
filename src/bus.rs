//! The signal bus: orchestrator, router, scheduler and dead-letter store
//! wired into one delivery path.
//!
//! ```text
//! emit → Orchestrator → Router → Scheduler ⇢ dispatch → Handlers
//!            │                                  │
//!            └──────────→ DeadLetterStore ←─────┘
//! ```
//!
//! Producers see validation and routing failures synchronously from
//! [`SignalBus::emit`]. Stage and delivery failures go to the dead-letter
//! store; the store's default redelivery target is the bus itself.

use crate::dlq::{
    DeadLetterConfig, DeadLetterError, DeadLetterOptions, DeadLetterStats, DeadLetterStore, Redeliver,
};
use crate::error::BusError;
use crate::handlers::{Handler, HandlerError, HandlerOutcome, HandlerRegistry};
use crate::observer::Observer;
use crate::orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, OrchestratorMetrics, ProcessOptions,
};
use crate::pipeline::{Pipeline, SchemaStage};
use crate::router::{Router, RouterMetrics, Strategy};
use crate::scheduler::{EnqueueOptions, QueueEntry, Scheduler, SchedulerConfig, SchedulerHandle, SchedulerStats};
use crate::shutdown::ShutdownSignal;
use crate::signal::{Priority, Signal};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Queue-entry metadata key listing the handler ids chosen at routing time.
const HANDLERS_KEY: &str = "handlers";

/// Queue-entry metadata key listing the matched route patterns.
const PATTERNS_KEY: &str = "matched_patterns";

/// Worker-loop and delivery settings.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Entries delivered per poll
    pub drain_batch: usize,
    pub poll_interval: Duration,
    /// How often expired dead letters are swept
    pub sweep_interval: Duration,
    /// Upper bound on one handler call
    pub handler_timeout: Duration,
    /// Discard queued signals not delivered within this long
    pub queue_ttl: Option<Duration>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            drain_batch: 10,
            poll_interval: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(5),
            queue_ttl: None,
        }
    }
}

/// What happened to an emitted signal.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitOutcome {
    /// Queued for delivery
    Emitted {
        signal_id: String,
        entry_id: String,
        priority: Priority,
        handlers: Vec<String>,
    },
    /// A transform stage rejected the signal
    DeadLettered { signal_id: String, reason: String },
}

impl EmitOutcome {
    pub fn signal_id(&self) -> &str {
        match self {
            EmitOutcome::Emitted { signal_id, .. } => signal_id,
            EmitOutcome::DeadLettered { signal_id, .. } => signal_id,
        }
    }

    pub fn is_emitted(&self) -> bool {
        matches!(self, EmitOutcome::Emitted { .. })
    }
}

/// Result of delivering one queued signal.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub signal_id: String,
    pub priority: Priority,
    pub succeeded: Vec<HandlerOutcome>,
    /// `(handler id, reason)`
    pub failed: Vec<(String, String)>,
    /// Set when the failure could not be kept for retry
    pub dead_letter: Option<DeadLetterError>,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// The signal failed and will not be retried.
    pub fn is_terminal(&self) -> bool {
        self.dead_letter.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub delivered: u64,
    pub delivery_failures: u64,
    /// Signals dropped after running out of dead-letter attempts
    pub gave_up: u64,
    pub orchestrator: OrchestratorMetrics,
    pub router: RouterMetrics,
    pub scheduler: SchedulerStats,
    pub dead_letters: DeadLetterStats,
}

pub struct SignalBus {
    orchestrator: Arc<Orchestrator>,
    router: Arc<Router>,
    scheduler: SchedulerHandle,
    dead_letters: Arc<DeadLetterStore>,
    config: BusConfig,
    delivered: AtomicU64,
    delivery_failures: AtomicU64,
    gave_up: AtomicU64,
}

/// Re-submits dead letters to the bus without dead-lettering them again.
struct BusRedeliver {
    bus: Weak<SignalBus>,
}

#[async_trait]
impl Redeliver for BusRedeliver {
    async fn redeliver(&self, signal: Signal) -> Result<(), String> {
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| BusError::ShuttingDown.to_string())?;
        bus.submit(signal, false)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

impl SignalBus {
    pub fn builder() -> SignalBusBuilder {
        SignalBusBuilder::default()
    }

    /// Assemble a bus from running parts.
    ///
    /// Installs the bus as the dead-letter store's redelivery target.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        router: Arc<Router>,
        scheduler: SchedulerHandle,
        config: BusConfig,
    ) -> Arc<Self> {
        let dead_letters = Arc::clone(orchestrator.dead_letters());
        Arc::new_cyclic(|bus| {
            dead_letters.set_redeliver(Arc::new(BusRedeliver { bus: bus.clone() }));
            SignalBus {
                orchestrator,
                router,
                scheduler,
                dead_letters,
                config,
                delivered: AtomicU64::new(0),
                delivery_failures: AtomicU64::new(0),
                gave_up: AtomicU64::new(0),
            }
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.router.registry()
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        &self.dead_letters
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn register_handler(&self, id: impl Into<String>, handler: Arc<dyn Handler>) {
        self.registry().register(id, handler);
    }

    /// Process, route and queue a signal.
    pub async fn emit(&self, signal: Signal) -> Result<EmitOutcome, BusError> {
        self.submit(signal, true).await
    }

    async fn submit(&self, mut signal: Signal, dead_letter_on_failure: bool) -> Result<EmitOutcome, BusError> {
        if signal.id.as_deref().map_or(true, str::is_empty) {
            signal.id = Some(uuid::Uuid::new_v4().to_string());
        }
        let signal_id = signal.id_str().to_string();

        let opts = ProcessOptions {
            dead_letter_on_failure,
            ..ProcessOptions::default()
        };
        let mut processed = match self.orchestrator.process(&signal, &opts).await {
            Ok(processed) => processed,
            Err(OrchestratorError::PipelineStage(e)) if dead_letter_on_failure => {
                return Ok(EmitOutcome::DeadLettered {
                    signal_id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let decision = self.router.route(&processed)?;
        let handlers: Vec<String> = decision.handler_ids().iter().map(|id| id.to_string()).collect();
        processed.priority = Some(decision.priority);

        let mut metadata = Map::new();
        metadata.insert(HANDLERS_KEY.to_string(), json!(handlers));
        metadata.insert(PATTERNS_KEY.to_string(), json!(decision.matched_patterns));
        let enqueued = self
            .scheduler
            .enqueue(
                processed,
                decision.priority,
                EnqueueOptions {
                    ttl: self.config.queue_ttl,
                    metadata,
                },
            )
            .await?;

        debug!(
            signal_id = %signal_id,
            priority = %decision.priority,
            handlers = ?handlers,
            "Signal queued"
        );

        Ok(EmitOutcome::Emitted {
            signal_id,
            entry_id: enqueued.entry_id,
            priority: decision.priority,
            handlers,
        })
    }

    /// Deliver the next queued signal, if any.
    ///
    /// Handler failures are dead-lettered, not returned.
    pub async fn dispatch_next(&self) -> Result<Option<Delivery>, BusError> {
        match self.scheduler.dequeue().await? {
            Some(entry) => Ok(Some(self.deliver(entry).await)),
            None => Ok(None),
        }
    }

    /// Deliver up to `max` queued signals.
    pub async fn drain(&self, max: usize) -> Result<DrainSummary, BusError> {
        let mut summary = DrainSummary::default();
        for entry in self.scheduler.dequeue_batch(max).await? {
            if self.deliver(entry).await.is_success() {
                summary.delivered += 1;
            } else {
                summary.failed += 1;
            }
        }
        Ok(summary)
    }

    async fn deliver(&self, entry: QueueEntry) -> Delivery {
        let signal = entry.signal;
        let handler_ids: Vec<String> = entry
            .metadata
            .get(HANDLERS_KEY)
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(|id| id.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let timeout = self.config.handler_timeout;
        let calls = handler_ids.iter().map(|id| {
            let handler = self.registry().resolve(id);
            let signal = &signal;
            async move {
                let result = match handler {
                    Some(handler) => match tokio::time::timeout(timeout, handler.handle(signal)).await {
                        Ok(result) => result,
                        Err(_) => Err(HandlerError::Timeout(timeout.as_millis() as u64)),
                    },
                    None => Err(HandlerError::Failed(format!("handler '{}' is not registered", id))),
                };
                (id.clone(), result)
            }
        });

        let mut delivery = Delivery {
            signal_id: signal.id_str().to_string(),
            priority: entry.priority,
            succeeded: Vec::new(),
            failed: Vec::new(),
            dead_letter: None,
        };
        for (id, result) in join_all(calls).await {
            match result {
                Ok(outcome) => delivery.succeeded.push(outcome),
                Err(e) => {
                    warn!(
                        signal_id = %delivery.signal_id,
                        handler = %id,
                        error = %e,
                        "Handler failed"
                    );
                    delivery.failed.push((id, e.to_string()));
                }
            }
        }

        if delivery.is_success() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            return delivery;
        }

        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        self.router.record_failure();

        let reason = delivery
            .failed
            .iter()
            .map(|(id, e)| format!("{}: {}", id, e))
            .collect::<Vec<_>>()
            .join("; ");
        let mut metadata = Map::new();
        metadata.insert(
            "failed_handlers".to_string(),
            json!(delivery.failed.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>()),
        );
        let opts = DeadLetterOptions {
            ttl: None,
            metadata,
        };
        if let Err(e) = self.dead_letters.enqueue(signal, reason.as_str(), opts) {
            self.dead_letters.give_up(&delivery.signal_id, &reason);
            self.gave_up.fetch_add(1, Ordering::Relaxed);
            error!(
                signal_id = %delivery.signal_id,
                error = %e,
                "Dropping signal that can no longer be retried"
            );
            delivery.dead_letter = Some(e);
        }
        delivery
    }

    /// Redeliver one dead-lettered signal through the bus.
    pub async fn retry_dead_letter(&self, id: &str) -> Result<Signal, BusError> {
        Ok(self.dead_letters.retry(id).await?)
    }

    pub async fn stats(&self) -> Result<BusStats, BusError> {
        Ok(BusStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            gave_up: self.gave_up.load(Ordering::Relaxed),
            orchestrator: self.orchestrator.metrics(),
            router: self.router.metrics(),
            scheduler: self.scheduler.stats().await?,
            dead_letters: self.dead_letters.stats(),
        })
    }

    /// Worker loop: drain the queues, retry due dead letters and sweep
    /// expired ones until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: ShutdownSignal) {
        let mut shutdown_receiver = shutdown.subscribe();
        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut sweep = tokio::time::interval(self.config.sweep_interval);

        info!(
            drain_batch = self.config.drain_batch,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Signal bus worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received, stopping worker loop");
                    break;
                }
                _ = poll.tick() => {
                    match self.drain(self.config.drain_batch).await {
                        Ok(summary) if summary.delivered + summary.failed > 0 => {
                            debug!(
                                delivered = summary.delivered,
                                failed = summary.failed,
                                "Drained queued signals"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Drain failed");
                        }
                    }
                    self.dead_letters.retry_due().await;
                }
                _ = sweep.tick() => {
                    self.dead_letters.cleanup();
                }
            }
        }

        info!(
            delivered = self.delivered.load(Ordering::Relaxed),
            delivery_failures = self.delivery_failures.load(Ordering::Relaxed),
            dead_letters = self.dead_letters.len(),
            "Signal bus worker stopped"
        );
    }
}

/// Builds a [`SignalBus`] with default parts where none are given.
#[derive(Default)]
pub struct SignalBusBuilder {
    pipeline: Option<Pipeline>,
    registry: Option<Arc<HandlerRegistry>>,
    strategy: Strategy,
    orchestrator: OrchestratorConfig,
    scheduler: SchedulerConfig,
    dead_letter: DeadLetterConfig,
    bus: BusConfig,
    observers: Vec<Arc<dyn Observer>>,
}

impl SignalBusBuilder {
    /// Defaults to the standard chain with no schema rules.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn dead_letter_config(mut self, config: DeadLetterConfig) -> Self {
        self.dead_letter = config;
        self
    }

    pub fn bus_config(mut self, config: BusConfig) -> Self {
        self.bus = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Spawns the scheduler task, so this must run inside a tokio runtime.
    pub fn build(self) -> Arc<SignalBus> {
        let registry = self.registry.unwrap_or_default();
        let router = Arc::new(Router::new(registry).with_strategy(self.strategy));
        let dead_letters = Arc::new(DeadLetterStore::new(self.dead_letter));
        let pipeline = self
            .pipeline
            .unwrap_or_else(|| Pipeline::standard(SchemaStage::new()));

        let orchestrator = Arc::new(Orchestrator::new(pipeline, dead_letters, self.orchestrator));
        for observer in self.observers {
            orchestrator.add_observer(observer);
        }

        let scheduler = Scheduler::spawn(self.scheduler);
        SignalBus::new(orchestrator, router, scheduler, self.bus)
    }
}
