use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cpu_loader::config::minutes;
use cpu_loader::{CancelToken, DutyPercent, LoadConfig, LoadController};

/// How long to give workers to observe cancellation before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Keeps a share of the processors busy at a fixed duty cycle, in repeating
/// work and wait windows, until interrupted.
#[derive(Parser, Debug)]
#[command(name = "cpu-loader", version, about)]
struct Cli {
    /// Fraction of logical processors to load
    #[arg(long, default_value_t = 0.8)]
    cpu_fraction: f64,

    /// Busy percentage of every 100 ms cycle (0-100)
    #[arg(long, default_value_t = 40)]
    load: u8,

    /// Length of each load window in minutes
    #[arg(long, default_value_t = 10.0)]
    work_minutes: f64,

    /// Idle time between load windows in minutes
    #[arg(long, default_value_t = 50.0)]
    wait_minutes: f64,

    /// Wait for every worker to exit before the next window begins
    #[arg(long)]
    join_workers: bool,

    /// Log every phase change and worker start/stop
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct StartupParams {
    cpu_fraction: f64,
    load: DutyPercent,
    work_minutes: f64,
    wait_minutes: f64,
    join_workers: bool,
    processors: usize,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "cpu_loader=debug" } else { "cpu_loader=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

fn build_config(cli: &Cli) -> Result<LoadConfig> {
    let duty = DutyPercent::new(cli.load).context("invalid --load")?;
    let work = minutes("work duration", cli.work_minutes).context("invalid --work-minutes")?;
    let wait = minutes("wait duration", cli.wait_minutes).context("invalid --wait-minutes")?;

    let config = LoadConfig::new(cli.cpu_fraction, duty, work, wait)
        .context("invalid load parameters")?
        .with_join_workers(cli.join_workers);
    Ok(config)
}

/// Detached workers get a grace period to notice their cohort was cancelled.
/// A controller that joins its workers and has stopped left none behind.
fn workers_need_grace(join_workers: bool, controller_stopped: bool) -> bool {
    !(join_workers && controller_stopped)
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = build_config(&cli)?;

    let params = StartupParams {
        cpu_fraction: config.worker_fraction(),
        load: config.duty(),
        work_minutes: cli.work_minutes,
        wait_minutes: cli.wait_minutes,
        join_workers: config.join_workers(),
        processors: num_cpus::get(),
    };
    let params = serde_json::to_string_pretty(&params).context("failed to encode parameters")?;
    println!("Starting with parameters: {params}");
    println!("Press Ctrl-C to finish the process.");

    let app_cancel = CancelToken::new();
    let controller = Arc::new(LoadController::new(config));

    let mut run = tokio::spawn({
        let controller = Arc::clone(&controller);
        let app_cancel = app_cancel.clone();
        async move { controller.run(&app_cancel).await }
    });

    tokio::select! {
        result = shutdown_signal() => result?,
        result = &mut run => {
            result.context("load controller task failed")?;
        }
    }

    app_cancel.cancel();
    info!("Stopping loader threads...");

    let mut controller_stopped = run.is_finished();
    if !controller_stopped {
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut run).await {
            Ok(result) => {
                result.context("load controller task failed")?;
                controller_stopped = true;
            }
            Err(_) => warn!("load controller did not stop within {SHUTDOWN_GRACE:?}"),
        }
    }
    if workers_need_grace(controller.config().join_workers(), controller_stopped) {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    }

    info!(windows = controller.windows_started(), "load run finished");
    println!("Exited");
    Ok(())
}
