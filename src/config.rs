use std::time::Duration;

use serde::Serialize;

use crate::error::{ConfigError, Result};

/// Nominal length of one busy/idle cycle.
pub const CYCLE: Duration = Duration::from_millis(100);

/// Largest accepted worker fraction, i.e. workers per logical processor.
pub const MAX_WORKER_FRACTION: f64 = 16.0;

/// Upper bound on the workers of one window, whatever the processor count.
pub const MAX_COHORT_SIZE: usize = 4096;

/// Share of each 100 ms cycle a worker spends spinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DutyPercent(u8);

impl DutyPercent {
    pub const MAX: u8 = 100;

    pub fn new(percent: u8) -> Result<Self> {
        if percent > Self::MAX {
            return Err(ConfigError::DutyPercentOutOfRange {
                value: i64::from(percent),
            });
        }
        Ok(Self(percent))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Milliseconds of each cycle spent spinning.
    pub fn busy_millis(self) -> u64 {
        u64::from(self.0)
    }

    /// Part of each cycle spent parked.
    pub fn idle(self) -> Duration {
        CYCLE.saturating_sub(Duration::from_millis(self.busy_millis()))
    }
}

impl TryFrom<u8> for DutyPercent {
    type Error = ConfigError;

    fn try_from(percent: u8) -> Result<Self> {
        Self::new(percent)
    }
}

impl TryFrom<i64> for DutyPercent {
    type Error = ConfigError;

    fn try_from(percent: i64) -> Result<Self> {
        u8::try_from(percent)
            .map_err(|_| ConfigError::DutyPercentOutOfRange { value: percent })
            .and_then(Self::new)
    }
}

/// Immutable parameters of one load run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadConfig {
    worker_fraction: f64,
    duty: DutyPercent,
    work_duration: Duration,
    wait_duration: Duration,
    join_workers: bool,
}

impl LoadConfig {
    pub fn new(
        worker_fraction: f64,
        duty: DutyPercent,
        work_duration: Duration,
        wait_duration: Duration,
    ) -> Result<Self> {
        if !worker_fraction.is_finite() || worker_fraction < 0.0 {
            return Err(ConfigError::InvalidWorkerFraction {
                value: worker_fraction,
            });
        }
        if worker_fraction > MAX_WORKER_FRACTION {
            return Err(ConfigError::WorkerFractionTooLarge {
                value: worker_fraction,
                max: MAX_WORKER_FRACTION,
            });
        }
        if work_duration.is_zero() {
            return Err(ConfigError::ZeroWorkDuration);
        }

        Ok(Self {
            worker_fraction,
            duty,
            work_duration,
            wait_duration,
            join_workers: false,
        })
    }

    /// Makes every drain wait for the cohort's workers to exit before the
    /// wait window starts, so consecutive cohorts never overlap.
    pub fn with_join_workers(mut self, join_workers: bool) -> Self {
        self.join_workers = join_workers;
        self
    }

    pub fn worker_fraction(&self) -> f64 {
        self.worker_fraction
    }

    pub fn duty(&self) -> DutyPercent {
        self.duty
    }

    pub fn work_duration(&self) -> Duration {
        self.work_duration
    }

    pub fn wait_duration(&self) -> Duration {
        self.wait_duration
    }

    pub fn join_workers(&self) -> bool {
        self.join_workers
    }

    /// Number of workers for one window given `processors` logical CPUs,
    /// capped at [`MAX_COHORT_SIZE`].
    pub fn cohort_size(&self, processors: usize) -> usize {
        // Finite and within 0..=MAX_WORKER_FRACTION by construction.
        let size = (processors as f64 * self.worker_fraction).round() as usize;
        size.min(MAX_COHORT_SIZE)
    }
}

/// Converts a window length given in (possibly fractional) minutes.
pub fn minutes(name: &'static str, minutes: f64) -> Result<Duration> {
    if !minutes.is_finite() || minutes < 0.0 {
        return Err(ConfigError::InvalidMinutes { name, minutes });
    }
    Duration::try_from_secs_f64(minutes * 60.0)
        .map_err(|_| ConfigError::InvalidMinutes { name, minutes })
}
