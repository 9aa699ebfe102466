//! Normalize stage: canonical casing and key shapes.
//!
//! - type is trimmed and lowercased
//! - source is trimmed
//! - a null payload becomes an empty map
//! - extension keys become `snake_case` (`correlationId`, `Correlation-Id`
//!   and `correlation_id` all end up as `correlation_id`)
//! - the routing key is re-derived from the normalized type

use super::{Stage, StageOptions, StageOutcome};
use crate::signal::Signal;
use serde_json::{Map, Value};

/// Extension marker set once a signal has been normalized.
pub const NORMALIZED: &str = "normalized";

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeStage;

impl Stage for NormalizeStage {
    fn name(&self) -> &str {
        "normalize"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn should_apply(&self, signal: &Signal, _opts: &StageOptions) -> bool {
        !signal.has_marker(NORMALIZED)
    }

    fn transform(&self, signal: &Signal, _opts: &StageOptions) -> StageOutcome {
        let mut normalized = signal.clone();

        normalized.signal_type = signal.signal_type.trim().to_ascii_lowercase();
        normalized.source = signal.source.trim().to_string();

        if normalized.data.is_null() {
            normalized.data = Value::Object(Map::new());
        }

        normalized.extensions = signal
            .extensions
            .iter()
            .map(|(key, value)| (snake_case(key), value.clone()))
            .collect();

        if normalized.category.is_some() {
            normalized.routing_key = normalized.derive_routing_key();
        }

        normalized
            .extensions
            .insert(NORMALIZED.to_string(), Value::Bool(true));

        StageOutcome::Continue(normalized)
    }
}

/// Convert `camelCase`, `kebab-case` and spaced keys to `snake_case`.
pub fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;

    for ch in key.trim().chars() {
        if ch == '-' || ch == ' ' || ch == '_' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Category;
    use serde_json::json;

    fn run(signal: &Signal) -> Signal {
        match NormalizeStage.transform(signal, &StageOptions::default()) {
            StageOutcome::Continue(s) => s,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("correlationId"), "correlation_id");
        assert_eq!(snake_case("X-Trace-Id"), "x_trace_id");
        assert_eq!(snake_case("schema version"), "schema_version");
        assert_eq!(snake_case("already_snake"), "already_snake");
        assert_eq!(snake_case("v2Field"), "v2_field");
    }

    #[test]
    fn test_normalizes_type_source_and_keys() {
        let signal = Signal::new("  User.Created ", " svc:1 ", json!({"a": 1}))
            .with_extension("correlationId", "abc");

        let out = run(&signal);
        assert_eq!(out.signal_type, "user.created");
        assert_eq!(out.source, "svc:1");
        assert_eq!(out.correlation_id(), Some("abc"));
        assert!(out.extension("correlationId").is_none());
        assert!(out.has_marker(NORMALIZED));
    }

    #[test]
    fn test_null_data_becomes_map() {
        let signal = Signal::new("user.created", "svc", Value::Null);
        assert_eq!(run(&signal).data, json!({}));
    }

    #[test]
    fn test_routing_key_rederived() {
        let mut signal =
            Signal::new("User.Created", "svc", json!({})).with_category(Category::Event);
        signal.routing_key = Some("User.event".to_string());

        assert_eq!(run(&signal).routing_key.as_deref(), Some("user.event"));
    }

    #[test]
    fn test_skips_already_normalized() {
        let signal = run(&Signal::new("a.created", "svc", json!({})));
        assert!(!NormalizeStage.should_apply(&signal, &StageOptions::default()));
    }
}
