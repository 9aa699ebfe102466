//! Enrich stage: derived fields and tracing metadata.
//!
//! Fills category, priority and routing key when still absent, defaults the
//! correlation id to the signal id, stamps a schema version and records when
//! enrichment happened. A signal enriched less than `enrichment_ttl` ago is
//! skipped.

use super::{Stage, StageOptions, StageOutcome};
use crate::signal::{Signal, CORRELATION_ID, SCHEMA_VERSION};
use crate::taxonomy;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Extension key holding the RFC 3339 enrichment timestamp.
pub const ENRICHED_AT: &str = "enriched_at";

/// Schema version stamped on signals that carry none.
pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichStage;

impl EnrichStage {
    fn recently_enriched(signal: &Signal, opts: &StageOptions, now: DateTime<Utc>) -> bool {
        let Some(stamp) = signal.extension(ENRICHED_AT).and_then(Value::as_str) else {
            return false;
        };
        let Ok(at) = DateTime::parse_from_rfc3339(stamp) else {
            return false;
        };
        match (now - at.with_timezone(&Utc)).to_std() {
            Ok(age) => age < opts.enrichment_ttl,
            // Stamp in the future: treat as fresh.
            Err(_) => true,
        }
    }
}

impl Stage for EnrichStage {
    fn name(&self) -> &str {
        "enrich"
    }

    fn priority(&self) -> u32 {
        90
    }

    fn transform(&self, signal: &Signal, opts: &StageOptions) -> StageOutcome {
        let now = Utc::now();
        if Self::recently_enriched(signal, opts, now) {
            return StageOutcome::Skip("enriched within cooldown".to_string());
        }

        let mut enriched = signal.clone();

        if enriched.category.is_none() {
            enriched.category = taxonomy::infer_category(&enriched.signal_type).ok();
        }
        if enriched.priority.is_none() {
            enriched.priority = enriched.category.map(taxonomy::default_priority);
        }
        if enriched.routing_key.is_none() {
            enriched.routing_key = enriched.derive_routing_key();
        }

        if enriched.correlation_id().is_none() {
            if let Some(id) = enriched.id.clone() {
                enriched
                    .extensions
                    .insert(CORRELATION_ID.to_string(), Value::String(id));
            }
        }
        enriched
            .extensions
            .entry(SCHEMA_VERSION.to_string())
            .or_insert_with(|| Value::String(DEFAULT_SCHEMA_VERSION.to_string()));
        enriched
            .extensions
            .insert(ENRICHED_AT.to_string(), Value::String(now.to_rfc3339()));

        StageOutcome::Continue(enriched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{Category, Priority};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[test]
    fn test_enrich_fills_derived_fields() {
        let signal = Signal::new("job.execute", "svc", json!({})).with_id("sig-9");
        let out = match EnrichStage.transform(&signal, &StageOptions::default()) {
            StageOutcome::Continue(s) => s,
            other => panic!("unexpected outcome: {:?}", other),
        };

        assert_eq!(out.category, Some(Category::Command));
        assert_eq!(out.priority, Some(Priority::High));
        assert_eq!(out.routing_key.as_deref(), Some("job.command"));
        assert_eq!(out.correlation_id(), Some("sig-9"));
        assert_eq!(out.extension(SCHEMA_VERSION), Some(&json!("1.0")));
        assert!(out.extension(ENRICHED_AT).is_some());
    }

    #[test]
    fn test_existing_correlation_id_kept() {
        let signal = Signal::new("job.execute", "svc", json!({}))
            .with_id("sig-9")
            .with_extension(CORRELATION_ID, "upstream");
        let out = match EnrichStage.transform(&signal, &StageOptions::default()) {
            StageOutcome::Continue(s) => s,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(out.correlation_id(), Some("upstream"));
    }

    #[test]
    fn test_recent_enrichment_is_skipped() {
        let signal = Signal::new("job.execute", "svc", json!({}))
            .with_extension(ENRICHED_AT, Utc::now().to_rfc3339());

        assert!(matches!(
            EnrichStage.transform(&signal, &StageOptions::default()),
            StageOutcome::Skip(_)
        ));
    }

    #[test]
    fn test_stale_enrichment_is_redone() {
        let old = Utc::now() - ChronoDuration::minutes(10);
        let signal = Signal::new("job.execute", "svc", json!({}))
            .with_extension(ENRICHED_AT, old.to_rfc3339());

        assert!(matches!(
            EnrichStage.transform(&signal, &StageOptions::default()),
            StageOutcome::Continue(_)
        ));
    }
}
