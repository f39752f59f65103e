//! Orchestrator - Job management and task distribution

mod orchestrator;
mod progress;
mod rate_limiter;

pub use orchestrator::{Orchestrator, DEFAULT_FINGERPRINTER};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use rate_limiter::RateLimiter;
