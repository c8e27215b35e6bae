use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpu_loader::{
    CancelToken, ConfigError, DutyCycleWorker, DutyPercent, LoadConfig, LoadController,
    ProcessorCount,
};

struct FixedProcessors {
    count: usize,
    reads: AtomicUsize,
}

impl FixedProcessors {
    fn new(count: usize) -> Self {
        Self {
            count,
            reads: AtomicUsize::new(0),
        }
    }
}

impl ProcessorCount for FixedProcessors {
    fn available(&self) -> usize {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.count
    }
}

fn duty(percent: u8) -> DutyPercent {
    DutyPercent::new(percent).unwrap()
}

#[test]
fn invalid_parameters_fail_before_any_work() {
    assert!(matches!(
        DutyCycleWorker::try_from_percent(150),
        Err(ConfigError::DutyPercentOutOfRange { value: 150 })
    ));
    assert!(LoadConfig::new(
        1.0,
        duty(50),
        Duration::ZERO,
        Duration::from_millis(10)
    )
    .is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_load_windows_run_back_to_back() {
    let config = LoadConfig::new(
        1.0,
        duty(100),
        Duration::from_millis(200),
        Duration::ZERO,
    )
    .unwrap();
    let controller = Arc::new(LoadController::with_processors(
        config,
        FixedProcessors::new(2),
    ));
    let app = CancelToken::new();

    let run = tokio::spawn({
        let controller = Arc::clone(&controller);
        let app = app.clone();
        async move { controller.run(&app).await }
    });

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    app.cancel();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("controller should stop after cancel")
        .unwrap();

    // Five windows fit into 1.1 s when no idle gap separates them.
    let windows = controller.windows_started();
    assert!((5..=6).contains(&windows), "{windows} windows");
    assert_eq!(
        controller.processors().reads.load(Ordering::SeqCst) as u64,
        windows
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn app_cancel_stops_controller_and_spawns_nothing_more() {
    let config = LoadConfig::new(
        0.5,
        duty(20),
        Duration::from_secs(30),
        Duration::from_secs(30),
    )
    .unwrap();
    let controller = Arc::new(LoadController::with_processors(
        config,
        FixedProcessors::new(4),
    ));
    let app = CancelToken::new();

    let run = tokio::spawn({
        let controller = Arc::clone(&controller);
        let app = app.clone();
        async move { controller.run(&app).await }
    });

    tokio::time::sleep(Duration::from_millis(150)).await;
    let cancelled_at = Instant::now();
    app.cancel();
    run.await.unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
    assert_eq!(controller.windows_started(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.windows_started(), 1);
}

#[test]
fn zero_duty_worker_barely_spins() {
    let app = CancelToken::new();
    let cohort = app.child();
    let worker = DutyCycleWorker::new(duty(0));

    let handle = thread::spawn({
        let cohort = cohort.clone();
        move || worker.run(&cohort)
    });

    thread::sleep(Duration::from_millis(600));
    app.cancel();
    let stats = handle.join().unwrap();

    assert!(stats.cycles >= 3);
    assert!(stats.busy_ratio() < 0.1, "busy ratio {}", stats.busy_ratio());
}
