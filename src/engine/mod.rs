//! Scoring engine: round execution, scoring, state and scheduling

pub mod diagnostics;
pub mod executor;
pub mod pipeline;
pub mod scheduler;
pub mod scoring;
pub mod store;

pub use diagnostics::{Diagnostics, SchedulerStatus};
pub use executor::Executor;
pub use pipeline::RoundPipeline;
pub use scheduler::{Scheduler, Tick};
pub use store::{ScoreStore, Snapshot};
