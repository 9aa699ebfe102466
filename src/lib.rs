//! # Axon Signal Bus
//!
//! An in-process bus that validates, transforms, routes and schedules
//! structured signals, with a dead-letter store for anything that fails.
//!
//! ## Architecture
//!
//! ```text
//! Producer -> Validator -> Pipeline -> Router -> Scheduler -> Handlers
//!                              |                                 |
//!                              +-------> Dead-letter store <-----+
//! ```
//!
//! ## Modules
//!
//! - [`signal`]: The signal envelope, categories and priorities
//! - [`taxonomy`]: Category inference from signal types
//! - [`validator`]: Envelope validation
//! - [`pipeline`]: Transform stages
//! - [`router`]: Pattern routing and handler selection
//! - [`scheduler`]: Weighted-fair priority queues
//! - [`dlq`]: Dead-letter store
//! - [`orchestrator`]: Validation, pipeline and observer fan-out
//! - [`observer`]: Outcome observers and health reporting
//! - [`handlers`]: Handler trait, registry and built-in handlers
//! - [`bus`]: The assembled signal bus and its worker loop
//! - [`config`]: TOML configuration
//! - [`shutdown`]: Graceful shutdown coordination

pub mod bus;
pub mod config;
pub mod dlq;
pub mod error;
pub mod handlers;
pub mod observer;
pub mod orchestrator;
pub mod pipeline;
pub mod router;
pub mod scheduler;
pub mod shutdown;
pub mod signal;
pub mod taxonomy;
pub mod validator;

// Re-export commonly used types at crate root
pub use bus::{EmitOutcome, SignalBus};
pub use error::BusError;
pub use handlers::{Handler, HandlerError, HandlerOutcome, HandlerRegistry};
pub use router::{RouteOptions, Router, Strategy};
pub use signal::{Category, Priority, Signal};
