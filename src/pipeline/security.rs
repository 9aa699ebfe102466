//! Security filter stage: redacts credentials from payloads.
//!
//! Keys are compared after lowercasing and mapping `-` to `_`; a key is
//! sensitive when it equals a listed name or ends in `_<name>`
//! (`password`, `user_password`, `access_token`; not `max_tokens`).
//!
//! The scrubber walks any payload `serde_json` can parse. If it fails anyway
//! (a value built in code, nested past [`MAX_DEPTH`]) the whole payload is
//! replaced with a placeholder. Either way the signal is tagged
//! `security_filtered` so the stage does not run on it again.

use super::{Stage, StageOptions, StageOutcome};
use crate::signal::Signal;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Extension marker set once the filter has run.
pub const SECURITY_FILTERED: &str = "security_filtered";

/// Extension recording which filter mode produced the payload.
pub const SECURITY_MODE: &str = "security_mode";

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Maximum payload nesting the scrubber walks; matches `serde_json`'s
/// parser recursion limit, so every parsed payload fits.
pub const MAX_DEPTH: usize = 128;

const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "credentials",
    "private_key",
];

#[derive(Debug)]
struct TooDeep;

#[derive(Debug, Clone)]
pub struct SecurityFilterStage {
    sensitive_keys: Vec<String>,
}

impl SecurityFilterStage {
    pub fn new() -> Self {
        Self {
            sensitive_keys: DEFAULT_SENSITIVE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Treat an additional key name as sensitive.
    pub fn with_sensitive_key(mut self, key: impl Into<String>) -> Self {
        self.sensitive_keys.push(key.into().to_ascii_lowercase());
        self
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase().replace('-', "_");
        self.sensitive_keys
            .iter()
            .any(|s| key == *s || key.ends_with(&format!("_{}", s)))
    }

    fn scrub(&self, value: &Value, depth: usize, redacted: &mut usize) -> Result<Value, TooDeep> {
        if depth > MAX_DEPTH {
            return Err(TooDeep);
        }
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    if self.is_sensitive(key) {
                        *redacted += 1;
                        out.insert(key.clone(), Value::String(REDACTED.to_string()));
                    } else {
                        out.insert(key.clone(), self.scrub(inner, depth + 1, redacted)?);
                    }
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.scrub(item, depth + 1, redacted))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}

impl Default for SecurityFilterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for SecurityFilterStage {
    fn name(&self) -> &str {
        "security_filter"
    }

    fn priority(&self) -> u32 {
        70
    }

    fn should_apply(&self, signal: &Signal, opts: &StageOptions) -> bool {
        opts.security_enabled && !signal.has_marker(SECURITY_FILTERED)
    }

    fn transform(&self, signal: &Signal, _opts: &StageOptions) -> StageOutcome {
        let mut filtered = signal.clone();
        let mut redacted = 0usize;

        match self.scrub(&signal.data, 0, &mut redacted) {
            Ok(data) => {
                filtered.data = data;
                filtered
                    .extensions
                    .insert(SECURITY_MODE.to_string(), json!("standard"));
                filtered
                    .extensions
                    .insert("redacted_fields".to_string(), json!(redacted));
            }
            Err(TooDeep) => {
                warn!(
                    signal_id = %signal.id_str(),
                    signal_type = %signal.signal_type,
                    max_depth = MAX_DEPTH,
                    "Scrubber failed, withholding entire payload"
                );
                filtered.data = json!({ "_filtered": "[PAYLOAD WITHHELD]" });
                filtered
                    .extensions
                    .insert(SECURITY_MODE.to_string(), json!("aggressive"));
            }
        }

        filtered
            .extensions
            .insert(SECURITY_FILTERED.to_string(), Value::Bool(true));
        StageOutcome::Continue(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(signal: &Signal) -> Signal {
        match SecurityFilterStage::new().transform(signal, &StageOptions::default()) {
            StageOutcome::Continue(s) => s,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_redacts_nested_credentials() {
        let signal = Signal::new(
            "user.created",
            "svc",
            json!({
                "name": "ada",
                "password": "hunter2",
                "auth": {"access_token": "t0k", "max_tokens": 4096},
                "keys": [{"api-key": "k"}]
            }),
        );

        let out = run(&signal);
        assert_eq!(out.data["name"], "ada");
        assert_eq!(out.data["password"], REDACTED);
        assert_eq!(out.data["auth"]["access_token"], REDACTED);
        assert_eq!(out.data["auth"]["max_tokens"], 4096);
        assert_eq!(out.data["keys"][0]["api-key"], REDACTED);
        assert_eq!(out.extension("redacted_fields"), Some(&json!(3)));
        assert_eq!(out.extension(SECURITY_MODE), Some(&json!("standard")));
        assert!(out.has_marker(SECURITY_FILTERED));
    }

    #[test]
    fn test_ordinary_payload_untouched() {
        let signal = Signal::new("user.created", "svc", json!({"user_id": 7}));
        let out = run(&signal);
        assert_eq!(out.data, signal.data);
        assert_eq!(out.extension(SECURITY_MODE), Some(&json!("standard")));
    }

    #[test]
    fn test_deeply_nested_parsed_payload_is_scrubbed() {
        let depth = 120;
        let text = format!(
            "{}{{\"password\":\"hunter2\"}}{}",
            "{\"inner\":".repeat(depth),
            "}".repeat(depth)
        );
        let data: Value = serde_json::from_str(&text).unwrap();
        let out = run(&Signal::new("user.created", "svc", data));

        let mut leaf = &out.data;
        for _ in 0..depth {
            leaf = &leaf["inner"];
        }
        assert_eq!(leaf["password"], REDACTED);
        assert_eq!(out.extension(SECURITY_MODE), Some(&json!("standard")));
    }

    #[test]
    fn test_scrubber_failure_uses_placeholder() {
        let mut data = json!("leaf");
        for _ in 0..(MAX_DEPTH + 5) {
            data = json!({ "inner": data });
        }
        let signal = Signal::new("user.created", "svc", data);

        let out = run(&signal);
        assert_eq!(out.data, json!({ "_filtered": "[PAYLOAD WITHHELD]" }));
        assert_eq!(out.extension(SECURITY_MODE), Some(&json!("aggressive")));
        assert!(out.has_marker(SECURITY_FILTERED));
    }

    #[test]
    fn test_not_reapplied_and_respects_toggle() {
        let stage = SecurityFilterStage::new();
        let filtered = run(&Signal::new("user.created", "svc", json!({})));
        assert!(!stage.should_apply(&filtered, &StageOptions::default()));

        let disabled = StageOptions {
            security_enabled: false,
            ..StageOptions::default()
        };
        let fresh = Signal::new("user.created", "svc", json!({}));
        assert!(!stage.should_apply(&fresh, &disabled));
    }

    #[test]
    fn test_custom_sensitive_key() {
        let stage = SecurityFilterStage::new().with_sensitive_key("ssn");
        let signal = Signal::new("user.created", "svc", json!({"ssn": "123", "user_ssn": "4"}));
        match stage.transform(&signal, &StageOptions::default()) {
            StageOutcome::Continue(out) => {
                assert_eq!(out.data["ssn"], REDACTED);
                assert_eq!(out.data["user_ssn"], REDACTED);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
