//! Repeating work/wait windows.
//!
//! Each work window gets a fresh cohort of duty-cycle workers tied to a child
//! of the application token. At the end of the window the cohort token is
//! cancelled, which also wakes workers parked in their idle phase, and the
//! controller idles for the wait window before starting over. Cancelling the
//! application token cuts whichever window is running short and stops the
//! loop; no cohort is spawned after that.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::LoadConfig;
use crate::cpu_stress::{spawn_worker, DutyCycleStats};

/// Source of the logical processor count, read once per work window.
pub trait ProcessorCount: Send + Sync {
    fn available(&self) -> usize;
}

/// The processors visible to this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessors;

impl ProcessorCount for SystemProcessors {
    fn available(&self) -> usize {
        num_cpus::get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Spawning,
    Working,
    Draining,
    Waiting,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Spawning => "spawning",
            Phase::Working => "working",
            Phase::Draining => "draining",
            Phase::Waiting => "waiting",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct LoadController<P = SystemProcessors> {
    config: LoadConfig,
    processors: P,
    windows_started: AtomicU64,
}

impl LoadController<SystemProcessors> {
    pub fn new(config: LoadConfig) -> Self {
        Self::with_processors(config, SystemProcessors)
    }
}

impl<P: ProcessorCount> LoadController<P> {
    pub fn with_processors(config: LoadConfig, processors: P) -> Self {
        Self {
            config,
            processors,
            windows_started: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    pub fn processors(&self) -> &P {
        &self.processors
    }

    /// Number of cohorts spawned so far.
    pub fn windows_started(&self) -> u64 {
        self.windows_started.load(Ordering::SeqCst)
    }

    /// Alternates work and wait windows until `app_cancel` fires.
    pub async fn run(&self, app_cancel: &CancelToken) {
        while !app_cancel.is_cancelled() {
            let window = self.windows_started.fetch_add(1, Ordering::SeqCst) + 1;

            let cohort = self.start_window(window, app_cancel);

            enter(window, Phase::Working);
            let completed = sleep_unless_cancelled(self.config.work_duration(), app_cancel).await;

            enter(window, Phase::Draining);
            cohort.drain();
            if self.config.join_workers() {
                let stats = cohort.join().await;
                debug!(
                    window,
                    cycles = stats.cycles,
                    busy_ms = stats.busy.as_millis() as u64,
                    "cohort exited"
                );
            }

            if !completed {
                break;
            }

            enter(window, Phase::Waiting);
            info!(
                window,
                wait_secs = self.config.wait_duration().as_secs_f64(),
                "waiting before next load window"
            );
            if !sleep_unless_cancelled(self.config.wait_duration(), app_cancel).await {
                break;
            }
        }

        info!(windows = self.windows_started(), phase = %Phase::Stopped, "load run cancelled");
    }

    /// Spawning phase: sizes the cohort from a fresh processor count.
    fn start_window(&self, window: u64, app_cancel: &CancelToken) -> WorkerCohort {
        enter(window, Phase::Spawning);
        let processors = self.processors.available();
        let size = self.config.cohort_size(processors);
        info!(
            window,
            workers = size,
            processors,
            duty = self.config.duty().get(),
            work_secs = self.config.work_duration().as_secs_f64(),
            "starting load window"
        );
        WorkerCohort::spawn(size, &self.config, app_cancel)
    }
}

fn enter(window: u64, phase: Phase) {
    debug!(window, %phase, "entering phase");
}

/// Returns `true` if the full duration elapsed and `false` if cancelled first.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Workers of one window and the token they share. Never reused.
struct WorkerCohort {
    cancel: CancelToken,
    workers: Vec<JoinHandle<DutyCycleStats>>,
}

impl WorkerCohort {
    fn spawn(size: usize, config: &LoadConfig, app_cancel: &CancelToken) -> Self {
        let cancel = app_cancel.child();
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            match spawn_worker(index, config.duty(), cancel.clone()) {
                Ok(handle) => workers.push(handle),
                Err(err) => error!(worker = index, error = %err, "failed to start worker"),
            }
        }

        Self { cancel, workers }
    }

    /// Cancels the cohort token. Parked workers are woken by the cancel itself;
    /// spinning workers see the flag on their next check.
    fn drain(&self) {
        self.cancel.cancel();
    }

    /// Waits for every worker to exit and sums what they report.
    async fn join(self) -> DutyCycleStats {
        let workers = self.workers;
        let joined = tokio::task::spawn_blocking(move || {
            workers
                .into_iter()
                .map(JoinHandle::join)
                .collect::<Vec<_>>()
        })
        .await;

        let mut total = DutyCycleStats::default();
        match joined {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(stats) => {
                            total.cycles += stats.cycles;
                            total.busy += stats.busy;
                            total.idle += stats.idle;
                        }
                        Err(_) => warn!("worker panicked"),
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to join cohort"),
        }
        total
    }
}
