//! The HTTP server as a `Transport` the supervisor can stop.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use axum::Router;
use conveyor_core::{Transport, TransportError};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

type Exit = Option<Result<(), TransportError>>;

/// Resolves once the server has been asked to stop.
pub type StopSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A serve loop running on its own task.
pub struct HttpServer {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    exit: watch::Receiver<Exit>,
}

impl HttpServer {
    /// Start serving `router` on an already bound listener.
    pub fn spawn(listener: TcpListener, router: Router) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self::spawn_with(local_addr, move |stop| async move {
            axum::serve(listener, router).with_graceful_shutdown(stop).await
        }))
    }

    /// Run an arbitrary serve loop. `serve` gets a future that resolves when
    /// `stop` is called and should return once in-flight work is finished.
    pub fn spawn_with<F, Fut>(local_addr: SocketAddr, serve: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        let (stop, mut stop_rx) = watch::channel(false);
        let (exit_tx, exit) = watch::channel::<Exit>(None);

        let serving = serve(Box::pin(async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        }));
        tokio::spawn(async move {
            let result = serving.await.map_err(TransportError::from);
            match &result {
                Ok(()) => info!("http server stopped"),
                Err(err) => error!(error = %err, "http server failed"),
            }
            exit_tx.send_replace(Some(result));
        });

        Self {
            local_addr,
            stop,
            exit,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves with the cause if the server exits without being asked to stop.
    /// Pending forever otherwise.
    pub async fn failed(&self) -> TransportError {
        let mut exit = self.exit.clone();
        let cause = match exit.wait_for(Option::is_some).await {
            Ok(current) => match current.as_ref() {
                Some(Err(err)) => err.clone(),
                _ => TransportError::Exited,
            },
            Err(_) => TransportError::TaskLost,
        };

        if *self.stop.borrow() {
            return std::future::pending().await;
        }
        cause
    }
}

#[async_trait]
impl Transport for HttpServer {
    async fn stop(&self) -> Result<(), TransportError> {
        info!(addr = %self.local_addr, "stopping http server");
        self.stop.send_replace(true);

        let mut exit = self.exit.clone();
        match exit.wait_for(Option::is_some).await {
            Ok(current) => match current.as_ref() {
                Some(Err(err)) => Err(err.clone()),
                _ => Ok(()),
            },
            Err(_) => Err(TransportError::TaskLost),
        }
    }
}
