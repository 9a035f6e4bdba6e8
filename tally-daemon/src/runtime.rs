use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};

use tally_core::config;
use tally_sync::http::HttpClient;
use tally_sync::pipeline::{self, DatasetStatus, RunOptions, RunReport};
use tally_sync::sink;

use crate::error::{io_err, DaemonError};

/// How the daemon runs.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    /// Overrides `schedule.interval_secs` from the config.
    pub interval: Option<Duration>,
    /// Run a single pass and exit.
    pub once: bool,
    pub dry_run: bool,
    /// Emit logs as JSON lines.
    pub json_logs: bool,
}

/// Per-run line logged by the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub success: bool,
    pub dry_run: bool,
    pub synced: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub duration_ms: u128,
}

impl SyncSummary {
    pub fn from_report(report: &RunReport, duration: Duration) -> Self {
        let mut summary = SyncSummary {
            success: report.is_success(),
            dry_run: report.dry_run,
            synced: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            duration_ms: duration.as_millis(),
        };
        for outcome in &report.outcomes {
            let kind = outcome.kind.to_string();
            match outcome.status {
                DatasetStatus::Synced(_) => summary.synced.push(kind),
                DatasetStatus::Failed(_) => summary.failed.push(kind),
                DatasetStatus::Skipped => summary.skipped.push(kind),
            }
        }
        summary
    }
}

/// Start the daemon and block the current thread until it exits.
pub fn start_blocking(config_path: &Path, options: DaemonOptions) -> Result<(), DaemonError> {
    init_tracing(options.json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config_path.to_path_buf(), options))
}

/// Run the daemon until ctrl-c, or for one pass with `options.once`.
pub async fn run(config_path: PathBuf, options: DaemonOptions) -> Result<(), DaemonError> {
    // Fail on a broken config before the first tick rather than on every tick.
    let config = config::load_from(&config_path)?;
    let interval = options.interval.unwrap_or_else(|| config.schedule.interval());
    let dry_run = options.dry_run;

    let job = move || {
        let path = config_path.clone();
        async move {
            tokio::task::spawn_blocking(move || sync_once(&path, dry_run))
                .await
                .map_err(|err| DaemonError::Join(format!("sync: {err}")))?
        }
    };

    if options.once {
        let summary = job().await?;
        log_summary(&summary)?;
        if !summary.success {
            return Err(DaemonError::DatasetsFailed {
                failed: summary.failed.len(),
                total: summary.synced.len() + summary.failed.len() + summary.skipped.len(),
            });
        }
        return Ok(());
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = schedule(interval, job, shutdown.subscribe()).await.map(|_| ());
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(io_err("ctrl-c handler", err)),
                    }
                }
            }
        })
    };

    let (scheduler_result, signal_result) = tokio::join!(scheduler_handle, signal_handle);
    handle_join("scheduler", scheduler_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Run `job` every `interval` until `shutdown_rx` fires, starting immediately.
///
/// Runs never overlap: a run that outlasts the interval delays the next tick.
/// A failing run is logged and the schedule continues. An in-flight run is
/// awaited before shutdown. Returns the number of runs started.
pub async fn schedule<F, Fut>(
    interval: Duration,
    mut job: F,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<usize, DaemonError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<SyncSummary, DaemonError>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(interval_secs = interval.as_secs(), "scheduler started");

    let mut runs = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                runs += 1;
                let started = Instant::now();
                match job().await {
                    Ok(summary) => log_summary(&summary)?,
                    Err(err) => tracing::error!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "sync run did not complete: {err}"
                    ),
                }
            }
        }
    }

    tracing::info!(runs, "scheduler stopped");
    Ok(runs)
}

/// One blocking pass: reload config, run every dataset, summarise.
pub fn sync_once(config_path: &Path, dry_run: bool) -> Result<SyncSummary, DaemonError> {
    let started = std::time::Instant::now();
    let config = config::load_from(config_path)?;
    let http = HttpClient::new(config.http.timeout(), &config.github.user_agent);
    let sink = sink::error_sink(&http, &config.reporting)?;
    let options = RunOptions {
        dry_run,
        ..RunOptions::default()
    };
    let report = pipeline::run(&config, options, sink.as_ref())?;
    Ok(SyncSummary::from_report(&report, started.elapsed()))
}

fn log_summary(summary: &SyncSummary) -> Result<(), DaemonError> {
    let line = serde_json::to_string(summary)?;
    if summary.success {
        tracing::info!(summary = %line, "sync run complete");
    } else {
        tracing::warn!(summary = %line, "sync run finished with failures");
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join(format!("{task}: {err}"))),
    }
}

/// Install the global `tracing` subscriber on stderr. `RUST_LOG` overrides
/// the default `info` filter. Safe to call more than once.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;

    fn ok_summary() -> SyncSummary {
        SyncSummary {
            success: true,
            dry_run: false,
            synced: vec!["applications".into(), "themes".into()],
            failed: Vec::new(),
            skipped: Vec::new(),
            duration_ms: 1,
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn runs_immediately_then_every_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let counter = calls.clone();
        let handle = tokio::spawn(schedule(
            Duration::from_secs(60),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(ok_summary()) }
            },
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3, "t=0, t=60, t=120");

        shutdown_tx.send(()).expect("send shutdown");
        let runs = handle.await.expect("join").expect("schedule");
        assert_eq!(runs, 3);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn failing_run_does_not_stop_the_schedule() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let counter = calls.clone();
        let handle = tokio::spawn(schedule(
            Duration::from_secs(10),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(DaemonError::Join("simulated".into())) }
            },
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown_tx.send(()).expect("send shutdown");
        let runs = handle.await.expect("join").expect("schedule");
        assert_eq!(runs, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn slow_run_delays_the_next_tick_instead_of_overlapping() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

        let (current, max) = (in_flight.clone(), max_in_flight.clone());
        let handle = tokio::spawn(schedule(
            Duration::from_secs(10),
            move || {
                let (current, max) = (current.clone(), max.clone());
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(25)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(ok_summary())
                }
            },
            shutdown_rx,
        ));

        // Runs start at t=0 and t=25; the t=10 and t=20 ticks are not replayed.
        tokio::time::sleep(Duration::from_secs(40)).await;
        shutdown_tx.send(()).expect("send shutdown");
        let runs = handle.await.expect("join").expect("schedule");
        assert_eq!(runs, 2);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_once_without_config_is_a_config_error() {
        let home = TempDir::new().expect("home");
        let err = sync_once(&config::config_path_at(home.path()), true).unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)), "got: {err:?}");
    }

    #[test]
    fn summary_serializes_dataset_lists() {
        let json = serde_json::to_value(ok_summary()).expect("json");
        assert_eq!(json["synced"][1], "themes");
        assert_eq!(json["success"], true);
    }
}
