//! Signal taxonomy: maps a dotted type string to one of five categories.
//!
//! Classification looks at the final segment of the lowercased type and checks
//! it against each category's naming conventions in a fixed order. The first
//! category that claims the segment wins.
//!
//! ```text
//! Category      | Final segment examples                | Default priority
//! --------------|---------------------------------------|-----------------
//! request       | request, initiate, start, submit      | normal
//! event         | created, updated, failed, complete    | normal
//! command       | execute, run, stop, cancel, restart   | high
//! query         | query, get, fetch, list, search       | normal
//! notification  | notify, alert, warning, broadcast     | low
//! ```

use crate::signal::{Category, Priority};
use thiserror::Error;

/// Errors produced by classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonomyError {
    #[error("unknown category for signal type '{0}'")]
    UnknownCategory(String),
}

const REQUEST_SUFFIXES: &[&str] = &["request", "initiate", "start", "begin", "submit", "trigger"];

const EVENT_SUFFIXES: &[&str] = &[
    "created",
    "updated",
    "deleted",
    "changed",
    "started",
    "completed",
    "complete",
    "finished",
    "failed",
    "succeeded",
    "received",
    "progress",
];

const COMMAND_SUFFIXES: &[&str] = &[
    "execute", "run", "stop", "cancel", "abort", "restart", "pause", "resume", "apply",
];

const QUERY_SUFFIXES: &[&str] = &[
    "query", "get", "fetch", "list", "search", "find", "lookup", "status",
];

const NOTIFICATION_SUFFIXES: &[&str] = &[
    "notify",
    "notification",
    "alert",
    "warning",
    "broadcast",
    "announce",
    "info",
];

/// Naming conventions (accepted final segments) for a category.
pub fn naming_conventions(category: Category) -> &'static [&'static str] {
    match category {
        Category::Request => REQUEST_SUFFIXES,
        Category::Event => EVENT_SUFFIXES,
        Category::Command => COMMAND_SUFFIXES,
        Category::Query => QUERY_SUFFIXES,
        Category::Notification => NOTIFICATION_SUFFIXES,
    }
}

/// Default delivery priority for a category.
pub fn default_priority(category: Category) -> Priority {
    match category {
        Category::Command => Priority::High,
        Category::Notification => Priority::Low,
        Category::Request | Category::Event | Category::Query => Priority::Normal,
    }
}

/// Classify a signal type.
///
/// # Examples
///
/// ```
/// use axon::taxonomy::infer_category;
/// use axon::Category;
///
/// assert_eq!(infer_category("analysis.request"), Ok(Category::Request));
/// assert_eq!(infer_category("User.Created"), Ok(Category::Event));
/// assert!(infer_category("user.frobnicated").is_err());
/// ```
pub fn infer_category(signal_type: &str) -> Result<Category, TaxonomyError> {
    let lowered = signal_type.trim().to_ascii_lowercase();
    let last = lowered.rsplit('.').next().unwrap_or("");

    Category::ALL
        .into_iter()
        .find(|category| naming_conventions(*category).contains(&last))
        .ok_or_else(|| TaxonomyError::UnknownCategory(signal_type.to_string()))
}

/// Category implied by a route pattern.
///
/// Patterns ending in a wildcard segment (`"user.*"`, `"*"`) are
/// category-agnostic and return `None`, as do patterns whose final segment
/// follows no naming convention.
pub fn category_of_pattern(pattern: &str) -> Option<Category> {
    let last = pattern.rsplit('.').next().unwrap_or("");
    if last.contains('*') {
        return None;
    }
    infer_category(pattern).ok()
}

/// True when the type's final segment follows the category's conventions.
pub fn category_matches(category: Category, signal_type: &str) -> bool {
    infer_category(signal_type) == Ok(category)
}

/// Human readable summary of a category's naming rules.
pub fn describe(category: Category) -> String {
    format!(
        "{} signals end in one of: {} (default priority {})",
        category,
        naming_conventions(category).join(", "),
        default_priority(category)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_each_category() {
        assert_eq!(infer_category("analysis.request"), Ok(Category::Request));
        assert_eq!(infer_category("user.created"), Ok(Category::Event));
        assert_eq!(infer_category("analysis.complete"), Ok(Category::Event));
        assert_eq!(infer_category("job.execute"), Ok(Category::Command));
        assert_eq!(infer_category("repo.search"), Ok(Category::Query));
        assert_eq!(infer_category("budget.alert"), Ok(Category::Notification));
    }

    #[test]
    fn test_infer_is_case_insensitive() {
        assert_eq!(infer_category("Analysis.REQUEST"), Ok(Category::Request));
    }

    #[test]
    fn test_infer_uses_final_segment() {
        assert_eq!(
            infer_category("analysis.request.failed"),
            Ok(Category::Event)
        );
        // "restart" is a command, not a request ending in "start"
        assert_eq!(infer_category("service.restart"), Ok(Category::Command));
    }

    #[test]
    fn test_unknown_category() {
        assert_eq!(
            infer_category("user.frobnicated"),
            Err(TaxonomyError::UnknownCategory("user.frobnicated".to_string()))
        );
        assert!(infer_category("").is_err());
    }

    #[test]
    fn test_suffix_sets_are_disjoint() {
        // Every convention resolves to exactly its own category
        for category in Category::ALL {
            for suffix in naming_conventions(category) {
                let ty = format!("x.{}", suffix);
                assert_eq!(infer_category(&ty), Ok(category), "suffix {}", suffix);
            }
        }
    }

    #[test]
    fn test_default_priorities() {
        assert_eq!(default_priority(Category::Event), Priority::Normal);
        assert_eq!(default_priority(Category::Command), Priority::High);
        assert_eq!(default_priority(Category::Notification), Priority::Low);
    }

    #[test]
    fn test_category_of_pattern() {
        assert_eq!(category_of_pattern("user.*"), None);
        assert_eq!(category_of_pattern("*"), None);
        assert_eq!(
            category_of_pattern("analysis.request"),
            Some(Category::Request)
        );
        assert_eq!(category_of_pattern("*.created"), Some(Category::Event));
        assert_eq!(category_of_pattern("user.frobnicated"), None);
    }

    #[test]
    fn test_category_matches() {
        assert!(category_matches(Category::Query, "repo.list"));
        assert!(!category_matches(Category::Command, "repo.list"));
    }

    #[test]
    fn test_describe_mentions_priority() {
        let text = describe(Category::Command);
        assert!(text.contains("execute"));
        assert!(text.contains("high"));
    }
}
