use std::hint::black_box;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::DutyPercent;
use crate::error::Result;

/// What a worker did before it observed cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DutyCycleStats {
    pub cycles: u64,
    pub busy: Duration,
    pub idle: Duration,
}

impl DutyCycleStats {
    /// Share of the measured time spent spinning, in 0.0..=1.0.
    pub fn busy_ratio(&self) -> f64 {
        let total = self.busy + self.idle;
        if total.is_zero() {
            return 0.0;
        }
        self.busy.as_secs_f64() / total.as_secs_f64()
    }
}

/// Spins for `duty` milliseconds of every 100 ms cycle and parks for the rest.
#[derive(Debug, Clone, Copy)]
pub struct DutyCycleWorker {
    duty: DutyPercent,
}

impl DutyCycleWorker {
    pub fn new(duty: DutyPercent) -> Self {
        Self { duty }
    }

    pub fn try_from_percent(percent: i64) -> Result<Self> {
        DutyPercent::try_from(percent).map(Self::new)
    }

    pub fn duty(&self) -> DutyPercent {
        self.duty
    }

    /// Runs duty cycles on the calling thread until `cancel` fires.
    ///
    /// Cancellation is checked on every spin iteration and wakes the idle
    /// phase early, so the worker returns within one spin step or right after
    /// being woken.
    pub fn run(&self, cancel: &CancelToken) -> DutyCycleStats {
        let busy_millis = u128::from(self.duty.busy_millis());
        let idle = self.duty.idle();
        let mut stats = DutyCycleStats::default();
        let mut clock = Instant::now();

        loop {
            while !cancel.is_cancelled() && clock.elapsed().as_millis() <= busy_millis {
                burn();
            }

            let parked_at = Instant::now();
            stats.busy += parked_at - clock;

            if cancel.is_cancelled() {
                break;
            }

            let cancelled = cancel.wait_timeout(idle);
            stats.idle += parked_at.elapsed();
            stats.cycles += 1;

            if cancelled {
                break;
            }

            clock = Instant::now();
        }

        stats
    }
}

/// Starts a worker on its own OS thread.
pub fn spawn_worker(
    index: usize,
    duty: DutyPercent,
    cancel: CancelToken,
) -> io::Result<JoinHandle<DutyCycleStats>> {
    thread::Builder::new()
        .name(format!("cpu-load-{index}"))
        .spawn(move || {
            debug!(worker = index, "started worker");
            let stats = DutyCycleWorker::new(duty).run(&cancel);
            debug!(
                worker = index,
                cycles = stats.cycles,
                busy_ms = stats.busy.as_millis() as u64,
                idle_ms = stats.idle.as_millis() as u64,
                "stopped worker"
            );
            stats
        })
}

// One short slice of arithmetic between cancellation checks.
fn burn() {
    black_box((0..1_000u64).fold(0u64, |acc, x| acc.wrapping_add(x)));
}
