use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::MissedTickBehavior;

use tasklink_core::config::{self, Config};
use tasklink_sync::{PassMode, PassReport, PassSummary, SyncError};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse, CMD_STATUS, CMD_STOP, CMD_SYNC};

/// Runs one live pass on the blocking pool.
pub type PassRunner = Arc<dyn Fn() -> Result<PassReport, SyncError> + Send + Sync>;

pub const LOG_FORMAT_ENV: &str = "TASKLINK_LOG_FORMAT";

struct PassJob {
    trigger: &'static str,
    respond_to: oneshot::Sender<Result<PassSummary, String>>,
}

#[derive(Debug, Clone, Default)]
struct DaemonState {
    passes_run: u64,
    last_pass_at: Option<DateTime<Utc>>,
    last_summary: Option<PassSummary>,
    last_error: Option<String>,
}

type SharedState = Arc<RwLock<DaemonState>>;

/// Load the effective config and run the daemon until it stops.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing("info");
    let config = config::load_effective_at(home)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon against the configured remote stores.
pub async fn run(home: PathBuf, config: Config) -> Result<(), DaemonError> {
    let interval = config.daemon.interval();
    let pass_home = home.clone();
    let runner: PassRunner =
        Arc::new(move || tasklink_stores::run_pass(&pass_home, &config, PassMode::Live));
    run_with(home, interval, runner).await
}

/// Run the daemon with an explicit pass runner.
pub async fn run_with(
    home: PathBuf,
    interval: Duration,
    runner: PassRunner,
) -> Result<(), DaemonError> {
    config::ensure_root_at(&home)?;

    let state: SharedState = Arc::new(RwLock::new(DaemonState::default()));
    let started_at = Utc::now();

    let (job_tx, job_rx) = mpsc::channel::<PassJob>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let job_tx = job_tx.clone();
        tokio::spawn(async move {
            let result = scheduler_task(interval, job_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = processor_task(runner, state, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let state = state.clone();
        let status = StatusContext {
            started_at,
            interval,
        };
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                state,
                status,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
            )
            .await;
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
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    tracing::info!(
        interval_secs = interval.as_secs(),
        socket = %socket_path(&home).display(),
        "daemon started"
    );

    let (scheduler_result, processor_result, socket_result, signal_result) = tokio::join!(
        scheduler_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("pass_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

async fn scheduler_task(
    interval: Duration,
    job_tx: mpsc::Sender<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // The first tick fires immediately.
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match enqueue_pass(&job_tx, "schedule").await {
                    Ok(summary) => tracing::info!(
                        created = summary.created,
                        updated = summary.updated,
                        skipped = summary.skipped,
                        failed = summary.failed,
                        duration_ms = summary.duration_ms,
                        "scheduled pass completed",
                    ),
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::error!(error = %err, "scheduled pass failed"),
                }
            }
        }
    }
    Ok(())
}

async fn processor_task(
    runner: PassRunner,
    state: SharedState,
    mut job_rx: mpsc::Receiver<PassJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(job) = maybe_job else { break };
                tracing::debug!(trigger = job.trigger, "pass starting");

                let runner = runner.clone();
                let result = match tokio::task::spawn_blocking(move || (*runner)()).await {
                    Ok(result) => result.map_err(|err| err.to_string()),
                    Err(err) => Err(format!("pass task join error: {err}")),
                };
                let outcome = record_outcome(&state, result, Utc::now()).await;
                let _ = job.respond_to.send(outcome);
            }
        }
    }
    Ok(())
}

async fn record_outcome(
    state: &SharedState,
    result: Result<PassReport, String>,
    finished_at: DateTime<Utc>,
) -> Result<PassSummary, String> {
    let mut state = state.write().await;
    state.passes_run += 1;
    state.last_pass_at = Some(finished_at);
    match result {
        Ok(report) => {
            let summary = report.summary(finished_at);
            state.last_summary = Some(summary.clone());
            state.last_error = None;
            Ok(summary)
        }
        Err(message) => {
            state.last_error = Some(message.clone());
            Err(message)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StatusContext {
    started_at: DateTime<Utc>,
    interval: Duration,
}

async fn socket_server_task(
    home: PathBuf,
    state: SharedState,
    status: StatusContext,
    job_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let state = state.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, home, state, status, job_tx, shutdown_tx).await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    state: SharedState,
    status: StatusContext,
    job_tx: mpsc::Sender<PassJob>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            CMD_STATUS => DaemonResponse::ok(build_status_payload(&home, &state, status).await),
            CMD_SYNC => match enqueue_pass(&job_tx, "socket").await {
                Ok(summary) => DaemonResponse::ok(json!(summary)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            CMD_STOP => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == CMD_STOP {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(home: &Path, state: &SharedState, status: StatusContext) -> Value {
    let snapshot = state.read().await.clone();
    json!({
        "running": true,
        "started_at": status.started_at,
        "interval_secs": status.interval.as_secs(),
        "passes_run": snapshot.passes_run,
        "last_pass_at": snapshot.last_pass_at,
        "last_pass": snapshot.last_summary,
        "last_error": snapshot.last_error,
        "socket": socket_path(home).display().to_string(),
    })
}

async fn enqueue_pass(
    job_tx: &mpsc::Sender<PassJob>,
    trigger: &'static str,
) -> Result<PassSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    job_tx
        .send(PassJob {
            trigger,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("pass response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the stderr fmt subscriber. `RUST_LOG` overrides `default_level`;
/// `TASKLINK_LOG_FORMAT=json` switches to JSON lines. Records from the `log`
/// facade used by the library crates are forwarded.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let json = std::env::var(LOG_FORMAT_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
