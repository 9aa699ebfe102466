//! Core signal types for Axon.
//!
//! The [`Signal`] struct is the envelope that flows through the bus. Producers
//! usually fill in only `type`, `source` and `data`; the validator derives the
//! remaining fields (id, time, category, priority, routing key).
//!
//! # Wire shape
//!
//! ```json
//! {
//!   "id": "5b8f...",
//!   "type": "analysis.request",
//!   "source": "svc:indexer",
//!   "data": { "file": "lib.rs" },
//!   "time": "2025-12-11T10:00:00Z",
//!   "category": "request",
//!   "priority": "normal",
//!   "routing_key": "analysis.request",
//!   "extensions": { "correlation_id": "abc-123" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Extension key carrying the correlation id.
pub const CORRELATION_ID: &str = "correlation_id";

/// Extension key carrying the trace id.
pub const TRACE_ID: &str = "trace_id";

/// Extension key carrying the payload schema version.
pub const SCHEMA_VERSION: &str = "schema_version";

/// Semantic category of a signal, derived from its type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Request,
    Event,
    Command,
    Query,
    Notification,
}

impl Category {
    /// All categories, in inference order.
    pub const ALL: [Category; 5] = [
        Category::Request,
        Category::Event,
        Category::Command,
        Category::Query,
        Category::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Request => "request",
            Category::Event => "event",
            Category::Command => "command",
            Category::Query => "query",
            Category::Notification => "notification",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(Category::Request),
            "event" => Ok(Category::Event),
            "command" => Ok(Category::Command),
            "query" => Ok(Category::Query),
            "notification" => Ok(Category::Notification),
            other => Err(format!(
                "unknown category '{}' (expected request, event, command, query or notification)",
                other
            )),
        }
    }
}

/// Delivery priority class.
///
/// Ordering follows urgency: `Critical > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// All classes, most urgent first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Numeric weight used when ordering routes (`critical=4` .. `low=1`).
    pub fn weight(&self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!(
                "unknown priority '{}' (expected critical, high, normal or low)",
                other
            )),
        }
    }
}

/// A signal flowing through the Axon bus.
///
/// # Fields
///
/// - `id`: Opaque identifier, generated during validation when absent
/// - `signal_type`: Hierarchical dotted type used for routing (`"user.created"`)
/// - `source`: Origin identifier (`"svc:indexer"`)
/// - `data`: Structured payload, must be a JSON object
/// - `time`: Creation timestamp, defaulted during validation
/// - `category` / `priority` / `routing_key`: Derived during validation
/// - `extensions`: Cross-cutting metadata (correlation id, trace id, markers)
///
/// Pipeline stages never mutate a signal in place; each returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", default)]
    pub signal_type: String,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl Signal {
    /// Create a new signal with the producer-supplied fields.
    pub fn new(signal_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            signal_type: signal_type.into(),
            source: source.into(),
            data,
            time: None,
            category: None,
            priority: None,
            routing_key: None,
            extensions: Map::new(),
        }
    }

    /// Set the id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the creation time
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Set an explicit category
    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Set an explicit priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Attach an extension value
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// The id, or an empty string before validation assigned one.
    pub fn id_str(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// First segment of the type (`"analysis"` for `"analysis.request"`).
    pub fn domain(&self) -> &str {
        self.signal_type.split('.').next().unwrap_or("")
    }

    /// Routing key `"<domain>.<category>"`, if the category is known.
    pub fn derive_routing_key(&self) -> Option<String> {
        self.category
            .map(|category| format!("{}.{}", self.domain(), category))
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// Boolean extension marker; missing or non-bool values read as `false`.
    pub fn has_marker(&self, key: &str) -> bool {
        self.extensions
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.extensions.get(CORRELATION_ID).and_then(Value::as_str)
    }

    /// Priority, falling back to `normal` before validation.
    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_deserialize_minimal() {
        let json_str = r#"{
            "type": "user.created",
            "source": "svc:1",
            "data": {"user_id": 123}
        }"#;

        let signal: Signal = serde_json::from_str(json_str).unwrap();
        assert_eq!(signal.signal_type, "user.created");
        assert_eq!(signal.source, "svc:1");
        assert_eq!(signal.data["user_id"], 123);
        assert!(signal.id.is_none());
        assert!(signal.time.is_none());
        assert!(signal.category.is_none());
        assert!(signal.extensions.is_empty());
    }

    #[test]
    fn test_signal_deserialize_full_envelope() {
        let json_str = r#"{
            "id": "sig-1",
            "type": "deploy.execute",
            "source": "svc:ops",
            "data": {},
            "time": "2025-12-11T10:00:00Z",
            "category": "command",
            "priority": "high",
            "routing_key": "deploy.command",
            "extensions": {"correlation_id": "abc-123"}
        }"#;

        let signal: Signal = serde_json::from_str(json_str).unwrap();
        assert_eq!(signal.id.as_deref(), Some("sig-1"));
        assert_eq!(signal.category, Some(Category::Command));
        assert_eq!(signal.priority, Some(Priority::High));
        assert_eq!(signal.correlation_id(), Some("abc-123"));
    }

    #[test]
    fn test_signal_serialize_omits_unset_fields() {
        let signal = Signal::new("user.created", "svc:1", json!({}));
        let json_str = serde_json::to_string(&signal).unwrap();

        assert!(json_str.contains("\"type\":\"user.created\""));
        assert!(!json_str.contains("routing_key"));
        assert!(!json_str.contains("extensions"));
        assert!(!json_str.contains("\"id\""));
    }

    #[test]
    fn test_missing_data_deserializes_as_null() {
        let signal: Signal =
            serde_json::from_str(r#"{"type": "a.b", "source": "x"}"#).unwrap();
        assert!(signal.data.is_null());
    }

    #[test]
    fn test_domain_and_routing_key() {
        let signal = Signal::new("analysis.request", "svc", json!({}))
            .with_category(Category::Request);
        assert_eq!(signal.domain(), "analysis");
        assert_eq!(
            signal.derive_routing_key(),
            Some("analysis.request".to_string())
        );

        let uncategorized = Signal::new("analysis.request", "svc", json!({}));
        assert_eq!(uncategorized.derive_routing_key(), None);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::Critical.weight(), 4);
        assert_eq!(Priority::Low.weight(), 1);
    }

    #[test]
    fn test_parse_category_and_priority() {
        assert_eq!("Event".parse::<Category>(), Ok(Category::Event));
        assert!("bogus".parse::<Category>().is_err());
        assert_eq!(" HIGH ".parse::<Priority>(), Ok(Priority::High));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_markers() {
        let signal = Signal::new("a.b", "x", json!({}))
            .with_extension("normalized", true)
            .with_extension("weird", "yes");
        assert!(signal.has_marker("normalized"));
        assert!(!signal.has_marker("weird"));
        assert!(!signal.has_marker("missing"));
    }
}
