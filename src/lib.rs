//! Synthetic CPU load generator.
//!
//! A [`LoadController`] repeatedly spawns a cohort of [`DutyCycleWorker`]s for a
//! work window, cancels them, idles for a wait window, and starts over until its
//! application [`CancelToken`] is cancelled.

pub mod cancel;
pub mod config;
pub mod cpu_stress;
pub mod error;
pub mod lifecycle;

pub use cancel::CancelToken;
pub use config::{DutyPercent, LoadConfig, CYCLE, MAX_COHORT_SIZE, MAX_WORKER_FRACTION};
pub use cpu_stress::{DutyCycleStats, DutyCycleWorker};
pub use error::ConfigError;
pub use lifecycle::{LoadController, Phase, ProcessorCount, SystemProcessors};
