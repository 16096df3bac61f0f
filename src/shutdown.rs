//! Graceful shutdown coordination.
//!
//! The dispatcher registers every accepted connection; `shutdown` flips
//! the drain flag, stops new registrations and waits for the active
//! count to reach zero before the caller force-closes what is left.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

/// Default time to wait for active connections to drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Inner {
    active: usize,
    shutting_down: bool,
}

/// Tracks active connections and the drain state.
///
/// All operations are safe under concurrent callers. Once shutting down,
/// [`increment_active_connections`] refuses further registrations.
///
/// [`increment_active_connections`]: GracefulShutdown::increment_active_connections
#[derive(Debug)]
pub struct GracefulShutdown {
    inner: Mutex<Inner>,
    drained: Notify,
    signal: watch::Sender<bool>,
}

impl GracefulShutdown {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                active: 0,
                shutting_down: false,
            }),
            drained: Notify::new(),
            signal,
        }
    }

    /// Register one more active connection.
    ///
    /// Returns `false` without touching the counter when the server is
    /// shutting down; the caller must refuse the connection.
    pub fn increment_active_connections(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return false;
        }
        inner.active += 1;
        true
    }

    /// Unregister a connection previously registered with
    /// [`increment_active_connections`](Self::increment_active_connections).
    pub fn decrement_active_connections(&self) {
        let drained = {
            let mut inner = self.inner.lock();
            inner.active = inner.active.saturating_sub(1);
            inner.active == 0
        };
        if drained {
            self.drained.notify_waiters();
        }
    }

    #[must_use]
    pub fn active_connection_count(&self) -> usize {
        self.inner.lock().active
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }

    /// Receiver resolving to `true` once shutdown begins. Used by accept
    /// loops and long-lived connection tasks as their drain signal.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Begin the drain and wait up to `timeout` for active connections
    /// to finish. Returns `true` when the count reached zero in time;
    /// on `false` the caller force-closes the remainder.
    ///
    /// Idempotent: later calls do not restart the drain, they only wait.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.shutting_down {
                inner.shutting_down = true;
                tracing::info!(active = inner.active, "shutdown initiated; draining");
                let _ = self.signal.send(true);
            }
        }

        let drain = async {
            loop {
                let notified = self.drained.notified();
                if self.active_connection_count() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    active = self.active_connection_count(),
                    "drain timeout elapsed; force closing"
                );
                false
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}
