//! Signal-driven shutdown.
//!
//! On SIGINT or SIGTERM the coordinator cancels the root token, so running
//! analyses are aborted and the control loop stops at its next check, then
//! runs the registered callbacks in registration order.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type ShutdownCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    callbacks: Arc<Mutex<Vec<(String, ShutdownCallback)>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled together with the root token.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register an async callback to run once on shutdown.
    pub fn on_shutdown<F>(&self, name: impl Into<String>, callback: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.into(), Box::new(callback)));
    }

    /// Cancel the root token and run every registered callback.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let callbacks = std::mem::take(&mut *self.callbacks.lock().unwrap_or_else(|e| e.into_inner()));
        for (name, callback) in callbacks {
            info!(callback = %name, "Running shutdown callback");
            callback().await;
        }
    }

    /// Spawn a task that waits for SIGINT/SIGTERM and then shuts down.
    pub fn listen(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = wait_for_signal() => {
                    warn!("Shutdown signal received");
                    coordinator.shutdown().await;
                }
                _ = coordinator.token.cancelled() => {}
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
