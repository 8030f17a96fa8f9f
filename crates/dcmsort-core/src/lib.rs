pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod grouping;
pub mod heuristic;
pub mod plan;
pub mod progress;
pub mod record;
pub mod scratch;
pub mod session;
pub mod template;

pub use config::AppConfig;
pub use engine::{RunResult, SessionListing, SortEngine};
pub use error::Error;
pub use heuristic::{Heuristic, RuleHeuristic, SessionIdentifier, SessionIds};
pub use progress::{ProgressReporter, SilentReporter};
