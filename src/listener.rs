// ABOUTME: TCP listener — accepts connections, bounds concurrency, drains sessions on shutdown
// ABOUTME: Spawns one tokio task per accepted connection, mirroring the gateway's one-session-per-task model

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener as TokioListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::GatewayError;
use crate::fsm::Timers;
use crate::session::Session;

pub struct Listener {
    listener: TokioListener,
    dispatcher: Arc<Dispatcher>,
    timers: Timers,
    buffer_cap: usize,
    semaphore: Arc<Semaphore>,
    shutdown_grace: Duration,
}

impl Listener {
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Dispatcher,
        timers: Timers,
        buffer_cap: usize,
        max_sessions: usize,
        shutdown_grace: Duration,
    ) -> Result<Self, GatewayError> {
        let listener = TokioListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind { addr: addr.to_string(), source })?;
        Ok(Listener {
            listener,
            dispatcher: Arc::new(dispatcher),
            timers,
            buffer_cap,
            semaphore: Arc::new(Semaphore::new(max_sessions)),
            shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a shutdown signal arrives, then stop
    /// accepting and give in-flight sessions `shutdown_grace` to finish.
    pub async fn run(self) -> Result<(), GatewayError> {
        let mut handles = Vec::new();

        info!(addr = ?self.local_addr(), "listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let permit = match self.semaphore.clone().try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            warn!(%peer, "max sessions reached, rejecting connection");
                            drop(stream);
                            continue;
                        }
                    };

                    let dispatcher = self.dispatcher.clone();
                    let timers = self.timers;
                    let buffer_cap = self.buffer_cap;
                    let handle = tokio::spawn(async move {
                        let _permit = permit;
                        let session = Session::new(stream, peer, timers, buffer_cap);
                        if let Err(e) = session.run(&dispatcher).await {
                            error!(%peer, error = %e, "session ended with error");
                        }
                    });
                    handles.push(handle);
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received, draining sessions");
                    break;
                }
            }
        }

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!("shutdown grace period elapsed with sessions still in flight");
        }
        Ok(())
    }
}

/// Resolves on SIGINT (all platforms) or SIGTERM (unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
