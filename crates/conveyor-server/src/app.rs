//! Process run loop: wire the pool to HTTP, wait for a stop trigger, shut down in order.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use conveyor_core::{
    DispatchService, ShutdownReport, ShutdownTrigger, SimulatedExecutor, StatusGc, Supervisor,
    TaskExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::http::{AppState, build_router};
use crate::server::HttpServer;

/// Bind the configured port and run until SIGINT/SIGTERM.
pub async fn run(settings: Settings) -> anyhow::Result<ShutdownReport> {
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(
        settings,
        listener,
        Arc::new(SimulatedExecutor::default()),
        shutdown_signal(),
    )
    .await
}

/// Run on an already bound listener until `signal` resolves (with the signal
/// name) or the HTTP server fails, then run the shutdown sequence.
pub async fn serve<S>(
    settings: Settings,
    listener: TcpListener,
    executor: Arc<dyn TaskExecutor>,
    signal: S,
) -> anyhow::Result<ShutdownReport>
where
    S: Future<Output = String>,
{
    let service = DispatchService::with_worker_pool(settings.pool_config(), executor)
        .context("failed to build worker pool")?;

    let router = build_router(
        AppState::new(service.clone(), settings.http_read_timeout),
        settings.http_write_timeout,
    );
    let server = HttpServer::spawn(listener, router).context("failed to start http server")?;
    info!(
        addr = %server.local_addr(),
        workers = settings.workers,
        queue_size = settings.queue_size,
        "listening"
    );

    run_until_stopped(&settings, service, server, signal).await
}

/// Wait for `signal` or a server failure, then shut down `server` and drain
/// `service`. Runs the status gc meanwhile if a ttl is configured.
pub async fn run_until_stopped<S>(
    settings: &Settings,
    service: DispatchService,
    server: HttpServer,
    signal: S,
) -> anyhow::Result<ShutdownReport>
where
    S: Future<Output = String>,
{
    let (gc_stop, gc_stopped) = watch::channel(false);
    let gc = settings.status_ttl.map(|ttl| {
        info!(ttl_ms = ttl.as_millis() as u64, "status gc enabled");
        tokio::spawn(StatusGc::new(ttl).run(service.clone(), gc_stopped))
    });

    let trigger = tokio::select! {
        name = signal => {
            info!(signal = %name, "received shutdown signal");
            ShutdownTrigger::Signal(name)
        }
        cause = server.failed() => {
            error!(error = %cause, "http server failed, shutting down");
            ShutdownTrigger::TransportFailed(cause)
        }
    };

    let supervisor = Supervisor::new(settings.shutdown_config());
    let report = supervisor
        .graceful_shutdown(trigger, &server, Arc::new(service.clone()))
        .await
        .context("shutdown sequence already ran")?;

    gc_stop.send_replace(true);
    if let Some(gc) = gc {
        if let Err(err) = gc.await {
            warn!(error = %err, "status gc task ended abnormally");
        }
    }

    let counts = service.counts().await;
    info!(
        queued = counts.queued,
        running = counts.running,
        done = counts.done,
        failed = counts.failed,
        "final task statuses"
    );
    Ok(report)
}

/// Resolves with the name of the first SIGINT or SIGTERM received.
pub async fn shutdown_signal() -> String {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT".to_string(),
        _ = terminate => "SIGTERM".to_string(),
    }
}
