//! Load-driving engine: per-session state machines, the shared
//! concurrency tracker, staged ramp-up, and run-level aggregation.

pub mod classify;
pub mod ramp;
pub mod session;
pub mod stats;
pub mod tracker;

pub use classify::{ErrorCategory, FailureKind, FailureSignal, classify};
pub use ramp::{LoadRunner, RampConfig, RampSchedule, RampStage};
pub use session::{SessionContext, SessionEngine, SessionResult, SessionState};
pub use stats::{LoadTestSummary, aggregate};
pub use tracker::{ConcurrencyTracker, TrackerSnapshot, monitor_tracker};
