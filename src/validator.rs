//! Envelope validation.
//!
//! [`validate`] checks a signal against the structural rules of the envelope
//! and returns an enriched copy with id, time, category, priority and routing
//! key filled in. Problems are accumulated so the caller sees all of them at
//! once rather than one per round trip.
//!
//! [`validate_strict`] additionally requires the producer to have supplied the
//! full envelope (`id`, `time` and `category`).

use crate::signal::Signal;
use crate::taxonomy::{self, TaxonomyError};
use chrono::Utc;
use std::fmt;
use thiserror::Error;

/// Minimum length of a signal type.
pub const MIN_TYPE_LEN: usize = 3;

/// A single structural problem found in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingField(&'static str),
    TypeTooShort { len: usize },
    TypeMissingSeparator,
    MalformedSource(String),
    DataNotMap,
    UnknownCategory(String),
    CategoryMismatch { declared: String, inferred: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField(field) => write!(f, "missing required field '{}'", field),
            ValidationIssue::TypeTooShort { len } => write!(
                f,
                "type must be at least {} characters long (got {})",
                MIN_TYPE_LEN, len
            ),
            ValidationIssue::TypeMissingSeparator => {
                write!(f, "type must contain at least one '.' separator")
            }
            ValidationIssue::MalformedSource(source) => {
                write!(f, "source '{}' must not contain whitespace", source)
            }
            ValidationIssue::DataNotMap => write!(f, "data must be a map"),
            ValidationIssue::UnknownCategory(ty) => {
                write!(f, "unknown category for type '{}'", ty)
            }
            ValidationIssue::CategoryMismatch { declared, inferred } => write!(
                f,
                "declared category '{}' does not match type naming (inferred '{}')",
                declared, inferred
            ),
        }
    }
}

/// Validation failure carrying every issue found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid envelope: {}", format_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn contains(&self, issue: &ValidationIssue) -> bool {
        self.issues.contains(issue)
    }
}

/// Validate and enrich a signal.
pub fn validate(signal: &Signal) -> Result<Signal, ValidationError> {
    let issues = structural_issues(signal);
    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }
    Ok(enrich(signal))
}

/// Validate a signal that must carry the complete envelope.
pub fn validate_strict(signal: &Signal) -> Result<Signal, ValidationError> {
    let mut issues = Vec::new();
    if signal.id.as_deref().map_or(true, str::is_empty) {
        issues.push(ValidationIssue::MissingField("id"));
    }
    if signal.time.is_none() {
        issues.push(ValidationIssue::MissingField("time"));
    }
    if signal.category.is_none() {
        issues.push(ValidationIssue::MissingField("category"));
    }
    issues.extend(structural_issues(signal));

    if !issues.is_empty() {
        return Err(ValidationError { issues });
    }
    Ok(enrich(signal))
}

fn structural_issues(signal: &Signal) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let ty = signal.signal_type.trim();

    let type_well_formed = if ty.is_empty() {
        issues.push(ValidationIssue::MissingField("type"));
        false
    } else {
        let mut ok = true;
        if ty.chars().count() < MIN_TYPE_LEN {
            issues.push(ValidationIssue::TypeTooShort {
                len: ty.chars().count(),
            });
            ok = false;
        }
        if !ty.contains('.') {
            issues.push(ValidationIssue::TypeMissingSeparator);
            ok = false;
        }
        ok
    };

    let source = signal.source.trim();
    if source.is_empty() {
        issues.push(ValidationIssue::MissingField("source"));
    } else if source.chars().any(char::is_whitespace) {
        issues.push(ValidationIssue::MalformedSource(signal.source.clone()));
    }

    if signal.data.is_null() {
        issues.push(ValidationIssue::MissingField("data"));
    } else if !signal.data.is_object() {
        issues.push(ValidationIssue::DataNotMap);
    }

    if type_well_formed {
        match taxonomy::infer_category(ty) {
            Ok(inferred) => {
                if let Some(declared) = signal.category {
                    if declared != inferred {
                        issues.push(ValidationIssue::CategoryMismatch {
                            declared: declared.to_string(),
                            inferred: inferred.to_string(),
                        });
                    }
                }
            }
            Err(TaxonomyError::UnknownCategory(ty)) => {
                issues.push(ValidationIssue::UnknownCategory(ty));
            }
        }
    }

    issues
}

/// Fill derived fields on a structurally valid signal.
fn enrich(signal: &Signal) -> Signal {
    let mut enriched = signal.clone();

    if enriched.id.as_deref().map_or(true, str::is_empty) {
        enriched.id = Some(uuid::Uuid::new_v4().to_string());
    }
    if enriched.time.is_none() {
        enriched.time = Some(Utc::now());
    }
    if enriched.category.is_none() {
        enriched.category = taxonomy::infer_category(&enriched.signal_type).ok();
    }
    if enriched.priority.is_none() {
        enriched.priority = enriched.category.map(taxonomy::default_priority);
    }
    if enriched.routing_key.is_none() {
        enriched.routing_key = enriched.derive_routing_key();
    }

    enriched
}
