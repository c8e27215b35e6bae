use thiserror::Error;

/// Errors raised while validating load parameters, always before any worker starts.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The busy percentage of a duty cycle must lie in 0..=100.
    #[error("duty percent {value} is out of range, expected 0..=100")]
    DutyPercentOutOfRange { value: i64 },

    /// The fraction of processors to load must be a finite, non-negative number.
    #[error("worker fraction {value} is invalid, expected a finite value >= 0")]
    InvalidWorkerFraction { value: f64 },

    /// More than `max` workers per logical processor is refused.
    #[error("worker fraction {value} exceeds the maximum of {max}")]
    WorkerFractionTooLarge { value: f64, max: f64 },

    /// A work window of zero length would spawn and cancel cohorts in a tight loop.
    #[error("work duration must be greater than zero")]
    ZeroWorkDuration,

    /// A window length given in minutes could not be turned into a duration.
    #[error("{name} of {minutes} minutes is invalid, expected a finite value >= 0")]
    InvalidMinutes { name: &'static str, minutes: f64 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
