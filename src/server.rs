// ABOUTME: Acceptor: owns the listening socket and hands each accepted connection to the dispatcher
// ABOUTME: Graceful shutdown is a CancellationToken observed by the accept loop and every session task

use crate::dispatcher::dispatch;
use crate::error::ServerError;
use crate::registry::Registry;
use crate::session::Session;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Process-wide fan-out engine: one registry, one shutdown signal, shared by
/// every accepted connection's session tasks.
pub struct Server {
    registry: Arc<Registry>,
    max_frame_size: u32,
    shutdown: CancellationToken,
    next_session_id: AtomicU64,
}

impl Server {
    pub fn new(max_frame_size: u32) -> Self {
        Server {
            registry: Arc::new(Registry::new()),
            max_frame_size,
            shutdown: CancellationToken::new(),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// A clone of the shutdown signal. Cancelling it is the trigger half of
    /// `stop()`; the accept loop and every in-flight session task observe it.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests shutdown. Idempotent (cancelling an already-cancelled token
    /// is a no-op). Does not itself wait for anything to finish: callers
    /// await the `run()` future to know every session task has exited —
    /// the tokio analogue of "closes the listener, drains the reactor, and
    /// joins all workers" from a single blocking call (see DESIGN.md).
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Binds `0.0.0.0:port` and accepts connections until `stop()` is
    /// called, then waits for every spawned session task to finish before
    /// returning. Listener errors observed after shutdown was requested are
    /// suppressed; any other listener error is logged.
    pub async fn run(self: Arc<Self>, port: u16) -> Result<(), ServerError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ServerError::Bind { port, source })?;
        info!(port, "stream relay listening");

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, accept loop exiting");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
                            let registry = self.registry.clone();
                            let max_frame_size = self.max_frame_size;
                            let shutdown = self.shutdown.clone();
                            sessions.spawn(async move {
                                debug!(session = id, peer = %peer, "accepted");
                                let session = Session::new(id, socket, max_frame_size);
                                dispatch(session, registry, shutdown).await;
                            });
                        }
                        Err(e) => {
                            if self.shutdown.is_cancelled() {
                                continue;
                            }
                            error!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }

        while sessions.join_next().await.is_some() {}
        info!("all session tasks finished, stream relay stopped");
        Ok(())
    }
}
