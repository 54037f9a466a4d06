pub mod utils;

use std::net::SocketAddr;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

use crate::bot::{run_worker, updates};
use crate::http_server;
use crate::{ServiceConfig, ServiceState};

/// Handle for gracefully shutting down the bot service.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the service shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.handles).await;
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
fn init_logging(
    service_config: &ServiceConfig,
) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    // Stdout layer
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(service_config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    // File layer (if log_dir is set)
    if let Some(log_dir) = &service_config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "filelink.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(service_config.log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Create service state from config, exiting on error.
async fn create_state(service_config: &ServiceConfig) -> (ServiceState, common::jobs::JobReceiver) {
    match ServiceState::from_config(service_config).await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!("error creating server state: {}", e);
            std::process::exit(3);
        }
    }
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

/// Create state and spawn the update loop, the job worker and, if a port is
///  configured, the keepalive server.
///
/// The returned `ShutdownHandle` must be kept alive; dropping it does not stop the service.
pub async fn start_service(service_config: &ServiceConfig) -> (ServiceState, ShutdownHandle) {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker();
    let (state, job_receiver) = create_state(service_config).await;

    // Share links need the bot username; a failure here is retried lazily
    match state.engine().bot_identity().await {
        Ok(identity) => tracing::info!(username = %identity.username, "authenticated with bot api"),
        Err(e) => tracing::warn!("could not resolve bot identity at startup: {}", e),
    }

    let mut handles = Vec::new();

    // Spawn background job worker
    let worker_engine = state.engine().clone();
    let worker_rx = shutdown_rx.clone();
    let worker_handle = tokio::spawn(async move {
        run_worker(worker_engine, job_receiver.into_async(), worker_rx).await;
    });
    handles.push(worker_handle);

    // Spawn update loop
    let client = state.client().clone();
    let dispatcher = state.dispatcher().clone();
    let poll_timeout = service_config.poll_timeout;
    let updates_rx = shutdown_rx.clone();
    let updates_handle = tokio::spawn(async move {
        updates::run(client, dispatcher, poll_timeout, updates_rx).await;
    });
    handles.push(updates_handle);

    // Spawn keepalive server
    match service_config.http_port {
        Some(port) => {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let http_state = state.clone();
            let http_config = http_server::Config::new(addr, service_config.log_level);
            let http_rx = shutdown_rx.clone();
            let http_handle = tokio::spawn(async move {
                if let Err(e) = http_server::run(http_config, http_state, http_rx).await {
                    tracing::error!("HTTP server error: {}", e);
                }
            });
            handles.push(http_handle);
            tracing::info!("Running: update loop + job worker + keepalive on port {}", port);
        }
        None => tracing::info!("Running: update loop + job worker"),
    }

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
    };

    (state, handle)
}

/// Spawns the bot service and blocks until a shutdown signal is received.
pub async fn spawn_service(service_config: &ServiceConfig) {
    let _guards = init_logging(service_config);
    let (_, handle) = start_service(service_config).await;
    handle.wait().await;
}
