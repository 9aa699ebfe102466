//! Schema stage: required payload keys per signal type.
//!
//! Rules are keyed by a type pattern using the same wildcard syntax as routes
//! (`"user.created"`, `"analysis.*"`). Every matching rule is checked. A
//! signal that no rule covers is skipped.

use super::{Stage, StageOptions, StageOutcome};
use crate::router::wildcard_regex;
use crate::signal::Signal;
use regex::Regex;

/// Required payload keys for signals whose type matches `pattern`.
#[derive(Debug, Clone)]
pub struct SchemaRule {
    pattern: String,
    matcher: Regex,
    required: Vec<String>,
}

impl SchemaRule {
    pub fn new<I, S>(pattern: &str, required: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            pattern: pattern.to_string(),
            matcher: wildcard_regex(pattern)?,
            required: required.into_iter().map(Into::into).collect(),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn applies_to(&self, signal_type: &str) -> bool {
        self.matcher.is_match(signal_type)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaStage {
    rules: Vec<SchemaRule>,
}

impl SchemaStage {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: SchemaRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Stage for SchemaStage {
    fn name(&self) -> &str {
        "schema"
    }

    fn priority(&self) -> u32 {
        80
    }

    fn transform(&self, signal: &Signal, _opts: &StageOptions) -> StageOutcome {
        let rules: Vec<&SchemaRule> = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(&signal.signal_type))
            .collect();

        if rules.is_empty() {
            return StageOutcome::Skip(format!(
                "no schema registered for '{}'",
                signal.signal_type
            ));
        }

        let Some(data) = signal.data.as_object() else {
            return StageOutcome::Fail("data must be a map".to_string());
        };

        let mut missing: Vec<&str> = rules
            .iter()
            .flat_map(|rule| rule.required.iter())
            .filter(|key| !data.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();
        missing.sort_unstable();
        missing.dedup();

        if missing.is_empty() {
            StageOutcome::Continue(signal.clone())
        } else {
            StageOutcome::Fail(format!(
                "missing required data fields: {}",
                missing.join(", ")
            ))
        }
    }
}
