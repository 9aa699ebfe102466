//! Transform pipeline.
//!
//! A [`Pipeline`] is an ordered chain of [`Stage`]s. Stages run from the
//! highest priority number to the lowest; the built-in chain is
//!
//! ```text
//! normalize(100) → enrich(90) → schema(80) → security(70)
//! ```
//!
//! Each stage returns a [`StageOutcome`]:
//!
//! - `Continue(signal)`: the rewritten signal is handed to the next stage
//! - `Skip(reason)`: the stage's *input* passes through unchanged
//! - `Fail(reason)`: the chain halts with a [`PipelineError`]
//!
//! Stages take the previous signal by reference and return a new value, so a
//! stage can be tested in isolation and never observes another stage's
//! in-place edits.
//!
//! # Creating Custom Stages
//!
//! ```rust,ignore
//! use axon::pipeline::{Stage, StageOptions, StageOutcome};
//! use axon::Signal;
//!
//! struct TagStage;
//!
//! impl Stage for TagStage {
//!     fn name(&self) -> &str { "tag" }
//!     fn priority(&self) -> u32 { 85 }
//!
//!     fn transform(&self, signal: &Signal, _opts: &StageOptions) -> StageOutcome {
//!         StageOutcome::Continue(signal.clone().with_extension("tagged", true))
//!     }
//! }
//! ```

pub mod enrich;
pub mod normalize;
pub mod schema;
pub mod security;

use crate::signal::Signal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub use enrich::EnrichStage;
pub use normalize::NormalizeStage;
pub use schema::{SchemaRule, SchemaStage};
pub use security::SecurityFilterStage;

/// Options every stage sees for a single run.
#[derive(Debug, Clone)]
pub struct StageOptions {
    /// Run the security filter
    pub security_enabled: bool,

    /// Cooldown before a signal may be enriched again
    pub enrichment_ttl: Duration,

    /// Emit per-stage timing events
    pub emit_telemetry: bool,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            security_enabled: true,
            enrichment_ttl: Duration::from_secs(300),
            emit_telemetry: true,
        }
    }
}

/// Result of a single stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Continue(Signal),
    Skip(String),
    Fail(String),
}

/// A pluggable pipeline step.
///
/// `should_apply` defaults to `true`; stages only need `name`, `priority` and
/// `transform`.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Ordering key; higher runs first.
    fn priority(&self) -> u32;

    fn should_apply(&self, _signal: &Signal, _opts: &StageOptions) -> bool {
        true
    }

    fn transform(&self, signal: &Signal, opts: &StageOptions) -> StageOutcome;
}

/// The pipeline halted on a failing stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stage '{stage}' failed: {reason}")]
pub struct PipelineError {
    pub stage: String,
    pub reason: String,
}

/// What happened at one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Applied,
    Skipped(String),
    NotApplicable,
}

/// Timing record for one stage.
#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: String,
    pub duration: Duration,
    pub status: StageStatus,
}

/// A successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub signal: Signal,
    pub timings: Vec<StageTiming>,
}

impl PipelineRun {
    /// Names of stages that returned `Skip`.
    pub fn skipped(&self) -> Vec<&str> {
        self.timings
            .iter()
            .filter(|t| matches!(t.status, StageStatus::Skipped(_)))
            .map(|t| t.stage.as_str())
            .collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.timings.iter().map(|t| t.duration).sum()
    }
}

/// Ordered chain of stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// The built-in chain: normalize, enrich, schema, security filter.
    pub fn standard(schema: SchemaStage) -> Self {
        Self::new()
            .with_stage(Arc::new(NormalizeStage))
            .with_stage(Arc::new(EnrichStage))
            .with_stage(Arc::new(schema))
            .with_stage(Arc::new(SecurityFilterStage::new()))
    }

    /// Add a stage. Order is fixed by priority at insertion time; equal
    /// priorities keep insertion order.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self.stages
            .sort_by_key(|stage| std::cmp::Reverse(stage.priority()));
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order.
    pub fn run(&self, signal: &Signal, opts: &StageOptions) -> Result<PipelineRun, PipelineError> {
        let mut current = signal.clone();
        let mut timings = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let started = Instant::now();

            if !stage.should_apply(&current, opts) {
                record(&mut timings, stage.name(), started, StageStatus::NotApplicable, opts);
                continue;
            }

            match stage.transform(&current, opts) {
                StageOutcome::Continue(next) => {
                    current = next;
                    record(&mut timings, stage.name(), started, StageStatus::Applied, opts);
                }
                StageOutcome::Skip(reason) => {
                    record(
                        &mut timings,
                        stage.name(),
                        started,
                        StageStatus::Skipped(reason),
                        opts,
                    );
                }
                StageOutcome::Fail(reason) => {
                    warn!(
                        stage = %stage.name(),
                        signal_id = %signal.id_str(),
                        signal_type = %signal.signal_type,
                        reason = %reason,
                        "Pipeline stage failed"
                    );
                    return Err(PipelineError {
                        stage: stage.name().to_string(),
                        reason,
                    });
                }
            }
        }

        Ok(PipelineRun {
            signal: current,
            timings,
        })
    }
}

fn record(
    timings: &mut Vec<StageTiming>,
    stage: &str,
    started: Instant,
    status: StageStatus,
    opts: &StageOptions,
) {
    let duration = started.elapsed();
    if opts.emit_telemetry {
        debug!(
            stage = %stage,
            duration_us = duration.as_micros() as u64,
            status = ?status,
            "Pipeline stage finished"
        );
    }
    timings.push(StageTiming {
        stage: stage.to_string(),
        duration,
        status,
    });
}
