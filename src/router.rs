//! Signal Router - decides who receives a signal.
//!
//! The [`Router`] keeps a table of pattern → handler routes. For each signal
//! it collects every route whose pattern matches the signal type, picks one
//! concrete handler per matching pattern with the configured load-balancing
//! [`Strategy`], and orders the result by route priority.
//!
//! # Pattern Matching
//!
//! ```text
//! Pattern          | Matches
//! -----------------|------------------------------------------
//! user.created     | user.created (exact only)
//! analysis.*       | analysis.request, analysis.complete, analysis.a.b
//! *.failed         | job.failed, build.step.failed
//! *                | everything (catch-all)
//! ^repo\.(get|list)$  (regex route, registered with register_regex)
//! ```
//!
//! Wildcard patterns compile to anchored regular expressions, `*` standing for
//! any sequence of characters.
//!
//! # Architecture
//!
//! ```text
//! Signal (type: "analysis.request")
//!     │
//!     ▼
//! ┌──────────────────────────────────────────────┐
//! │                   ROUTER                     │
//! │                                              │
//! │  1. Match: "analysis.*", "*" → 2 patterns    │
//! │  2. Select: one healthy handler per pattern  │
//! │     (round_robin | random | least_loaded |   │
//! │      sticky)                                 │
//! │  3. Order: by route priority, highest first  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! "Nothing listens" ([`RouterError::NoMatchingRoute`]) is reported separately
//! from "listeners exist but none is available"
//! ([`RouterError::HandlerUnavailable`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use axon::{HandlerRegistry, Router, RouteOptions, Priority};
//! use axon::handlers::LogHandler;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register("audit", Arc::new(LogHandler::with_prefix("audit")));
//!
//! let router = Router::new(registry);
//! router.register("user.*", "audit", RouteOptions::default().priority(Priority::High))?;
//! ```

use crate::handlers::{Handler, HandlerRegistry};
use crate::signal::{Category, Priority, Signal};
use crate::taxonomy;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while registering routes or routing a signal.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("invalid route pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("handler '{0}' is not registered")]
    HandlerNotFound(String),

    #[error("cannot infer a category for pattern '{0}'; pass one explicitly")]
    UnknownCategory(String),

    #[error("handler '{handler}' is already routed for pattern '{pattern}'")]
    DuplicateRoute { pattern: String, handler: String },

    #[error("no route registered for pattern '{0}'")]
    RouteNotFound(String),

    #[error("no matching routes for signal type '{0}'")]
    NoMatchingRoute(String),

    #[error("no available handler for signal type '{signal_type}' (patterns: {})", .patterns.join(", "))]
    HandlerUnavailable {
        signal_type: String,
        patterns: Vec<String>,
    },
}

/// Load-balancing strategy used to pick one handler per matching pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Cycle through the pattern's handlers
    #[default]
    RoundRobin,
    /// Uniform random choice
    Random,
    /// Lowest externally reported load
    LeastLoaded,
    /// Always the first-registered handler
    Sticky,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::Random => "random",
            Strategy::LeastLoaded => "least_loaded",
            Strategy::Sticky => "sticky",
        })
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            "least_loaded" => Ok(Strategy::LeastLoaded),
            "sticky" => Ok(Strategy::Sticky),
            other => Err(format!("unknown strategy '{}'", other)),
        }
    }
}

/// Options accepted by [`Router::register`].
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub category: Option<Category>,
    pub priority: Option<Priority>,
    pub strategy: Option<Strategy>,
    pub options: Map<String, Value>,
}

impl RouteOptions {
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// A registered route.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    /// Wildcard pattern, or the regex source for regex routes
    pub pattern: String,
    pub is_regex: bool,
    /// Handler id resolved through the [`HandlerRegistry`]
    pub handler: String,
    /// `None` for category-agnostic routes
    pub category: Option<Category>,
    pub priority: Priority,
    /// Whether `priority` was given at registration (and so overrides the
    /// signal's own priority)
    pub explicit_priority: bool,
    pub strategy: Option<Strategy>,
    pub options: Map<String, Value>,
}

struct RouteEntry {
    route: Route,
    matcher: Regex,
}

/// A concrete handler chosen for a signal.
#[derive(Clone)]
pub struct HandlerRef {
    pub id: String,
    pub pattern: String,
    pub priority: Priority,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRef")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Result of routing one signal.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// Selected handlers, highest route priority first
    pub handlers: Vec<HandlerRef>,
    /// Priority the signal should be scheduled with
    pub priority: Priority,
    pub category: Option<Category>,
    /// Every pattern that matched, in registration order
    pub matched_patterns: Vec<String>,
}

impl RouteDecision {
    pub fn handler_ids(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.id.as_str()).collect()
    }
}

/// Routing counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterMetrics {
    pub routed: u64,
    pub no_route: u64,
    pub failed: u64,
    pub by_category: HashMap<String, u64>,
}

/// Signal router.
///
/// # Thread Safety
///
/// The route table sits behind a read-write lock: routing takes the read side,
/// registration the write side. Round-robin cursors and counters are
/// concurrent maps/atomics, so the router can be shared through an `Arc`.
pub struct Router {
    registry: Arc<HandlerRegistry>,
    routes: RwLock<Vec<RouteEntry>>,
    cursors: DashMap<String, usize>,
    strategy: Strategy,
    routed: AtomicU64,
    no_route: AtomicU64,
    failed: AtomicU64,
    by_category: DashMap<Category, u64>,
}

impl Router {
    /// Create a router resolving handlers through `registry`.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            routes: RwLock::new(Vec::new()),
            cursors: DashMap::new(),
            strategy: Strategy::default(),
            routed: AtomicU64::new(0),
            no_route: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            by_category: DashMap::new(),
        }
    }

    /// Set the default load-balancing strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Register a handler for a wildcard pattern.
    ///
    /// # Patterns
    ///
    /// - Exact: `"user.created"` matches only `user.created`
    /// - Wildcard: `"game.*"` matches `game.started`, `game.ended`, etc.
    /// - Catch-all: `"*"` matches all signals
    ///
    /// A pattern without wildcards must name a classifiable type unless a
    /// category is passed explicitly.
    pub fn register(
        &self,
        pattern: &str,
        handler: &str,
        opts: RouteOptions,
    ) -> Result<(), RouterError> {
        let matcher = wildcard_regex(pattern).map_err(|source| RouterError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let category = match opts.category {
            Some(category) => Some(category),
            None if pattern.contains('*') => taxonomy::category_of_pattern(pattern),
            None => Some(
                taxonomy::infer_category(pattern)
                    .map_err(|_| RouterError::UnknownCategory(pattern.to_string()))?,
            ),
        };

        self.insert(pattern.to_string(), false, matcher, handler, category, opts)
    }

    /// Register a handler for a regular-expression pattern.
    ///
    /// Regex routes are category-agnostic unless one is passed explicitly.
    pub fn register_regex(
        &self,
        pattern: Regex,
        handler: &str,
        opts: RouteOptions,
    ) -> Result<(), RouterError> {
        let key = pattern.as_str().to_string();
        let category = opts.category;
        self.insert(key, true, pattern, handler, category, opts)
    }

    fn insert(
        &self,
        pattern: String,
        is_regex: bool,
        matcher: Regex,
        handler: &str,
        category: Option<Category>,
        opts: RouteOptions,
    ) -> Result<(), RouterError> {
        if !self.registry.contains(handler) {
            return Err(RouterError::HandlerNotFound(handler.to_string()));
        }

        let priority = opts
            .priority
            .or_else(|| category.map(taxonomy::default_priority))
            .unwrap_or_default();

        let mut routes = self.routes.write();
        if routes
            .iter()
            .any(|e| e.route.pattern == pattern && e.route.handler == handler)
        {
            return Err(RouterError::DuplicateRoute {
                pattern,
                handler: handler.to_string(),
            });
        }

        debug!(
            pattern = %pattern,
            handler = %handler,
            category = ?category,
            priority = %priority,
            "Registering route"
        );

        routes.push(RouteEntry {
            route: Route {
                pattern,
                is_regex,
                handler: handler.to_string(),
                category,
                priority,
                explicit_priority: opts.priority.is_some(),
                strategy: opts.strategy,
                options: opts.options,
            },
            matcher,
        });
        Ok(())
    }

    /// Remove every route registered under `pattern`.
    ///
    /// Returns the number of routes removed.
    pub fn unregister(&self, pattern: &str) -> Result<usize, RouterError> {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|e| e.route.pattern != pattern);
        let removed = before - routes.len();
        drop(routes);

        if removed == 0 {
            return Err(RouterError::RouteNotFound(pattern.to_string()));
        }
        self.cursors.remove(pattern);
        info!(pattern = %pattern, removed = removed, "Unregistered routes");
        Ok(removed)
    }

    /// Snapshot of all routes in registration order.
    pub fn list_routes(&self) -> Vec<Route> {
        self.routes.read().iter().map(|e| e.route.clone()).collect()
    }

    /// Number of distinct registered patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns().len()
    }

    /// Distinct registered patterns in registration order.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = Vec::new();
        for entry in self.routes.read().iter() {
            if !patterns.contains(&entry.route.pattern) {
                patterns.push(entry.route.pattern.clone());
            }
        }
        patterns
    }

    /// Check whether any route matches the given signal type.
    pub fn has_routes(&self, signal_type: &str) -> bool {
        self.routes
            .read()
            .iter()
            .any(|e| e.matcher.is_match(signal_type))
    }

    /// Resolve the handlers that should receive `signal`.
    pub fn route(&self, signal: &Signal) -> Result<RouteDecision, RouterError> {
        let signal_type = signal.signal_type.as_str();

        // Group matching routes by pattern, keeping registration order.
        let mut groups: Vec<(String, Vec<Route>)> = Vec::new();
        for entry in self.routes.read().iter() {
            if !entry.matcher.is_match(signal_type) {
                continue;
            }
            match groups.iter_mut().find(|(p, _)| *p == entry.route.pattern) {
                Some((_, routes)) => routes.push(entry.route.clone()),
                None => groups.push((entry.route.pattern.clone(), vec![entry.route.clone()])),
            }
        }

        if groups.is_empty() {
            self.no_route.fetch_add(1, Ordering::Relaxed);
            warn!(
                signal_type = %signal_type,
                source = %signal.source,
                "No routes registered for signal type"
            );
            return Err(RouterError::NoMatchingRoute(signal_type.to_string()));
        }

        let matched_patterns: Vec<String> = groups.iter().map(|(p, _)| p.clone()).collect();
        let mut selected: Vec<(HandlerRef, bool)> = Vec::with_capacity(groups.len());

        for (pattern, routes) in &groups {
            let candidates: Vec<&Route> = routes
                .iter()
                .filter(|r| self.registry.is_available(&r.handler))
                .collect();

            if candidates.is_empty() {
                debug!(pattern = %pattern, "No available handler for pattern");
                continue;
            }

            let strategy = routes
                .iter()
                .find_map(|r| r.strategy)
                .unwrap_or(self.strategy);
            let chosen = candidates[self.select(pattern, strategy, &candidates)];

            let Some(handler) = self.registry.resolve(&chosen.handler) else {
                continue;
            };
            selected.push((
                HandlerRef {
                    id: chosen.handler.clone(),
                    pattern: pattern.clone(),
                    priority: routes.iter().map(|r| r.priority).max().unwrap_or_default(),
                    handler,
                },
                routes.iter().any(|r| r.explicit_priority),
            ));
        }

        if selected.is_empty() {
            self.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                signal_type = %signal_type,
                patterns = ?matched_patterns,
                "Routes matched but no handler is available"
            );
            return Err(RouterError::HandlerUnavailable {
                signal_type: signal_type.to_string(),
                patterns: matched_patterns,
            });
        }

        // Stable: equal priorities keep registration order.
        selected.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));

        let priority = selected
            .iter()
            .filter(|(_, explicit)| *explicit)
            .map(|(h, _)| h.priority)
            .max()
            .unwrap_or_else(|| signal.effective_priority());

        let category = signal
            .category
            .or_else(|| taxonomy::infer_category(signal_type).ok());

        self.routed.fetch_add(1, Ordering::Relaxed);
        if let Some(category) = category {
            *self.by_category.entry(category).or_insert(0) += 1;
        }

        let handlers: Vec<HandlerRef> = selected.into_iter().map(|(h, _)| h).collect();
        debug!(
            signal_type = %signal_type,
            handlers = ?handlers.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(),
            priority = %priority,
            "Signal routed"
        );

        Ok(RouteDecision {
            handlers,
            priority,
            category,
            matched_patterns,
        })
    }

    /// Pick an index into `candidates` (never empty).
    fn select(&self, pattern: &str, strategy: Strategy, candidates: &[&Route]) -> usize {
        match strategy {
            Strategy::RoundRobin => {
                let mut cursor = self.cursors.entry(pattern.to_string()).or_insert(0);
                let index = *cursor % candidates.len();
                *cursor = cursor.wrapping_add(1);
                index
            }
            Strategy::Random => rand::thread_rng().gen_range(0..candidates.len()),
            Strategy::LeastLoaded => candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, r)| self.registry.load(&r.handler))
                .map(|(i, _)| i)
                .unwrap_or(0),
            Strategy::Sticky => 0,
        }
    }

    /// Count a delivery failure against the routing metrics.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> RouterMetrics {
        RouterMetrics {
            routed: self.routed.load(Ordering::Relaxed),
            no_route: self.no_route.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            by_category: self
                .by_category
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect(),
        }
    }
}

/// Compile a wildcard pattern into an anchored regular expression.
///
/// `*` matches any (possibly empty) sequence; everything else is literal.
///
/// ```
/// let re = axon::router::wildcard_regex("analysis.*").unwrap();
/// assert!(re.is_match("analysis.request"));
/// assert!(!re.is_match("other.request"));
/// ```
pub fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{HandlerError, HandlerOutcome, LogHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    struct Toggle {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl Handler for Toggle {
        fn name(&self) -> &str {
            "toggle"
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn handle(&self, _signal: &Signal) -> Result<HandlerOutcome, HandlerError> {
            Ok(HandlerOutcome::success("toggle", "ok"))
        }
    }

    fn signal(signal_type: &str) -> Signal {
        Signal::new(signal_type, "svc:1", json!({}))
    }

    fn router_with(handlers: &[&str]) -> Router {
        let registry = Arc::new(HandlerRegistry::new());
        for id in handlers {
            registry.register(*id, Arc::new(LogHandler::with_prefix(*id)));
        }
        Router::new(registry)
    }

    // Pattern compilation

    #[test]
    fn test_wildcard_exact() {
        let re = wildcard_regex("user.created").unwrap();
        assert!(re.is_match("user.created"));
        assert!(!re.is_match("user.updated"));
        assert!(!re.is_match("userXcreated"));
    }

    #[test]
    fn test_wildcard_suffix() {
        let re = wildcard_regex("analysis.*").unwrap();
        assert!(re.is_match("analysis.request"));
        assert!(re.is_match("analysis.complete"));
        assert!(!re.is_match("other.request"));
        assert!(!re.is_match("analysisx.request"));
    }

    #[test]
    fn test_wildcard_prefix_and_catch_all() {
        let re = wildcard_regex("*.failed").unwrap();
        assert!(re.is_match("job.failed"));
        assert!(re.is_match("build.step.failed"));
        assert!(!re.is_match("job.failed.twice"));

        let all = wildcard_regex("*").unwrap();
        assert!(all.is_match("anything"));
        assert!(all.is_match(""));
    }

    // Registration

    #[test]
    fn test_register_requires_resolvable_handler() {
        let router = router_with(&[]);
        let err = router
            .register("user.*", "ghost", RouteOptions::default())
            .unwrap_err();
        assert!(matches!(err, RouterError::HandlerNotFound(_)));
    }

    #[test]
    fn test_register_literal_needs_category() {
        let router = router_with(&["a"]);
        let err = router
            .register("user.frobnicated", "a", RouteOptions::default())
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownCategory(_)));

        router
            .register(
                "user.frobnicated",
                "a",
                RouteOptions::default().category(Category::Event),
            )
            .unwrap();
        router
            .register("user.created", "a", RouteOptions::default())
            .unwrap();

        let routes = router.list_routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[1].category, Some(Category::Event));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let router = router_with(&["a"]);
        router.register("user.*", "a", RouteOptions::default()).unwrap();
        assert!(matches!(
            router.register("user.*", "a", RouteOptions::default()),
            Err(RouterError::DuplicateRoute { .. })
        ));
    }

    #[test]
    fn test_unregister() {
        let router = router_with(&["a", "b"]);
        router.register("user.*", "a", RouteOptions::default()).unwrap();
        router.register("user.*", "b", RouteOptions::default()).unwrap();
        router.register("game.*", "a", RouteOptions::default()).unwrap();

        assert_eq!(router.unregister("user.*").unwrap(), 2);
        assert_eq!(router.patterns(), vec!["game.*".to_string()]);
        assert!(matches!(
            router.unregister("user.*"),
            Err(RouterError::RouteNotFound(_))
        ));
    }

    // Routing

    #[test]
    fn test_route_wildcard_matches() {
        let router = router_with(&["a"]);
        router.register("analysis.*", "a", RouteOptions::default()).unwrap();

        assert!(router.route(&signal("analysis.request")).is_ok());
        assert!(router.route(&signal("analysis.complete")).is_ok());
        assert!(matches!(
            router.route(&signal("other.request")),
            Err(RouterError::NoMatchingRoute(_))
        ));
        assert!(router.has_routes("analysis.request"));
        assert!(!router.has_routes("other.request"));
    }

    #[test]
    fn test_route_priority_override() {
        let router = router_with(&["handler_a"]);
        router
            .register(
                "user.*",
                "handler_a",
                RouteOptions::default().priority(Priority::High),
            )
            .unwrap();

        let decision = router.route(&signal("user.created")).unwrap();
        assert_eq!(decision.handler_ids(), vec!["handler_a"]);
        assert_eq!(decision.category, Some(Category::Event));
        assert_eq!(decision.priority, Priority::High);
    }

    #[test]
    fn test_route_without_explicit_priority_keeps_signal_priority() {
        let router = router_with(&["a"]);
        router.register("user.*", "a", RouteOptions::default()).unwrap();

        let decision = router
            .route(&signal("user.created").with_priority(Priority::Critical))
            .unwrap();
        assert_eq!(decision.priority, Priority::Critical);
    }

    #[test]
    fn test_matches_ordered_by_priority() {
        let router = router_with(&["low", "crit", "mid"]);
        router
            .register("*", "low", RouteOptions::default().priority(Priority::Low))
            .unwrap();
        router
            .register(
                "job.*",
                "crit",
                RouteOptions::default().priority(Priority::Critical),
            )
            .unwrap();
        router.register("job.execute", "mid", RouteOptions::default()).unwrap();

        let decision = router.route(&signal("job.execute")).unwrap();
        assert_eq!(decision.handler_ids(), vec!["crit", "mid", "low"]);
        assert_eq!(decision.matched_patterns.len(), 3);
    }

    #[test]
    fn test_round_robin_cycles() {
        let router = router_with(&["a", "b", "c"]);
        for id in ["a", "b", "c"] {
            router.register("job.*", id, RouteOptions::default()).unwrap();
        }

        let picks: Vec<String> = (0..6)
            .map(|_| router.route(&signal("job.run")).unwrap().handlers[0].id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_sticky_always_first() {
        let router = router_with(&["a", "b"]).with_strategy(Strategy::Sticky);
        router.register("job.*", "a", RouteOptions::default()).unwrap();
        router.register("job.*", "b", RouteOptions::default()).unwrap();

        for _ in 0..5 {
            assert_eq!(router.route(&signal("job.run")).unwrap().handler_ids(), vec!["a"]);
        }
    }

    #[test]
    fn test_least_loaded() {
        let router = router_with(&["a", "b", "c"]);
        for id in ["a", "b", "c"] {
            router
                .register(
                    "job.*",
                    id,
                    RouteOptions::default().strategy(Strategy::LeastLoaded),
                )
                .unwrap();
        }
        router.registry().report_load("a", 10);
        router.registry().report_load("b", 2);
        router.registry().report_load("c", 7);

        assert_eq!(router.route(&signal("job.run")).unwrap().handler_ids(), vec!["b"]);
    }

    #[test]
    fn test_random_stays_within_pool() {
        let router = router_with(&["a", "b"]).with_strategy(Strategy::Random);
        router.register("job.*", "a", RouteOptions::default()).unwrap();
        router.register("job.*", "b", RouteOptions::default()).unwrap();

        for _ in 0..20 {
            let id = router.route(&signal("job.run")).unwrap().handlers[0].id.clone();
            assert!(id == "a" || id == "b");
        }
    }

    #[test]
    fn test_unhealthy_handlers_skipped() {
        let registry = Arc::new(HandlerRegistry::new());
        let sick = Arc::new(Toggle {
            healthy: AtomicBool::new(false),
        });
        registry.register("sick", sick.clone());
        registry.register("well", Arc::new(LogHandler::new()));
        let router = Router::new(registry).with_strategy(Strategy::Sticky);
        router.register("job.*", "sick", RouteOptions::default()).unwrap();
        router.register("job.*", "well", RouteOptions::default()).unwrap();

        assert_eq!(router.route(&signal("job.run")).unwrap().handler_ids(), vec!["well"]);

        sick.healthy.store(true, Ordering::SeqCst);
        assert_eq!(router.route(&signal("job.run")).unwrap().handler_ids(), vec!["sick"]);
    }

    #[test]
    fn test_handler_unavailable_distinct_from_no_route() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(
            "sick",
            Arc::new(Toggle {
                healthy: AtomicBool::new(false),
            }),
        );
        let router = Router::new(registry);
        router.register("job.*", "sick", RouteOptions::default()).unwrap();

        assert!(matches!(
            router.route(&signal("job.run")),
            Err(RouterError::HandlerUnavailable { .. })
        ));
        assert!(matches!(
            router.route(&signal("user.created")),
            Err(RouterError::NoMatchingRoute(_))
        ));

        let metrics = router.metrics();
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.no_route, 1);
        assert_eq!(metrics.routed, 0);
    }

    #[test]
    fn test_regex_route() {
        let router = router_with(&["q"]);
        router
            .register_regex(
                Regex::new(r"^repo\.(get|list)$").unwrap(),
                "q",
                RouteOptions::default(),
            )
            .unwrap();

        assert!(router.route(&signal("repo.list")).is_ok());
        assert!(router.route(&signal("repo.search")).is_err());
        assert!(router.list_routes()[0].is_regex);
    }

    #[test]
    fn test_metrics_by_category() {
        let router = router_with(&["a"]);
        router.register("*", "a", RouteOptions::default()).unwrap();
        router.route(&signal("user.created")).unwrap();
        router.route(&signal("user.updated")).unwrap();
        router.route(&signal("repo.list")).unwrap();

        let metrics = router.metrics();
        assert_eq!(metrics.routed, 3);
        assert_eq!(metrics.by_category.get("event"), Some(&2));
        assert_eq!(metrics.by_category.get("query"), Some(&1));
    }
}
