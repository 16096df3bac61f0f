//! One SSE client connection and its sender task.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{Notify, mpsc};

use crate::metrics::Metrics;

use super::event::{KEEPALIVE, SseEvent};

/// Tunables for one connection; defaults per the admission and
/// backpressure policy.
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// Bounded event queue depth.
    pub queue_capacity: usize,
    /// How long a publisher waits for queue space before the event is
    /// dropped.
    pub offer_timeout: Duration,
    /// Quiet time before a `: keepalive` comment is written.
    pub keepalive_interval: Duration,
    /// Time without events after which the connection closes itself.
    pub inactivity_timeout: Duration,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            offer_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(20),
            inactivity_timeout: Duration::from_secs(60),
        }
    }
}

/// Connection lifecycle: `Connecting` → `Open` → `Closed`, one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SseState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

/// Lifecycle misuse, surfaced to the local caller only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseError {
    /// `send_event` on a connection that is not OPEN.
    NotOpen,
    /// `open` on a connection that is not CONNECTING.
    InvalidState,
}

impl std::fmt::Display for SseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen => f.write_str("connection is not open"),
            Self::InvalidState => f.write_str("connection already opened or closed"),
        }
    }
}

impl std::error::Error for SseError {}

/// Connection callbacks; the unit type is the no-op implementation.
pub trait SseHandler: Send + Sync + 'static {
    fn on_close(&self, conn: &SseConnection) {
        let _ = conn;
    }

    fn on_error(&self, conn: &SseConnection, error: &io::Error) {
        let _ = (conn, error);
    }
}

impl SseHandler for () {}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One registered SSE client.
///
/// Publishers enqueue through [`send_event`]; a dedicated sender task
/// owns the socket and is the only writer, so events leave in enqueue
/// order. A slow client fills its bounded queue and starts losing
/// events rather than blocking publishers.
///
/// [`send_event`]: SseConnection::send_event
pub struct SseConnection {
    id: u64,
    client_ip: IpAddr,
    last_event_id: Option<String>,
    state: AtomicU8,
    tx: mpsc::Sender<SseEvent>,
    rx: Mutex<Option<mpsc::Receiver<SseEvent>>>,
    writer: Mutex<Option<BoxWriter>>,
    close_notify: Arc<Notify>,
    created_at: Instant,
    last_event_at: Mutex<Instant>,
    events_sent: AtomicU64,
    bytes_transmitted: AtomicU64,
    config: SseConfig,
    metrics: Arc<Metrics>,
    handler: Arc<dyn SseHandler>,
}

impl SseConnection {
    pub fn new<W>(
        id: u64,
        client_ip: IpAddr,
        last_event_id: Option<String>,
        writer: W,
        config: SseConfig,
        metrics: Arc<Metrics>,
        handler: Arc<dyn SseHandler>,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        metrics.sse_active_connections.inc();
        Arc::new(Self {
            id,
            client_ip,
            last_event_id,
            state: AtomicU8::new(SseState::Connecting as u8),
            tx,
            rx: Mutex::new(Some(rx)),
            writer: Mutex::new(Some(Box::new(writer))),
            close_notify: Arc::new(Notify::new()),
            created_at: Instant::now(),
            last_event_at: Mutex::new(Instant::now()),
            events_sent: AtomicU64::new(0),
            bytes_transmitted: AtomicU64::new(0),
            config,
            metrics,
            handler,
        })
    }

    /// Transition CONNECTING → OPEN and start the sender task.
    pub fn open(self: &Arc<Self>) -> Result<(), SseError> {
        self.state
            .compare_exchange(
                SseState::Connecting as u8,
                SseState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| SseError::InvalidState)?;

        let rx = self.rx.lock().take().expect("receiver present until open");
        let writer = self.writer.lock().take().expect("writer present until open");
        *self.last_event_at.lock() = Instant::now();

        tracing::debug!(id = self.id, ip = %self.client_ip, "sse connection open");
        tokio::spawn(sender_loop(self.clone(), rx, writer));
        Ok(())
    }

    /// Queue an event for delivery.
    ///
    /// Returns `Ok(false)` when the queue stayed full for the offer
    /// timeout: the event is dropped, counted, and the publisher moves
    /// on.
    pub async fn send_event(&self, event: SseEvent) -> Result<bool, SseError> {
        if self.state() != SseState::Open {
            return Err(SseError::NotOpen);
        }
        match self.tx.send_timeout(event, self.config.offer_timeout).await {
            Ok(()) => Ok(true),
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(id = self.id, "sse queue full; dropping event");
                self.metrics.sse_events_dropped_total.inc();
                Ok(false)
            }
            Err(SendTimeoutError::Closed(_)) => Err(SseError::NotOpen),
        }
    }

    /// Close the connection. Idempotent: the first call transitions to
    /// CLOSED, stops the sender and fires `on_close`; the rest are
    /// no-ops.
    pub fn close(&self) {
        let prev = self.state.swap(SseState::Closed as u8, Ordering::AcqRel);
        if prev == SseState::Closed as u8 {
            return;
        }
        tracing::debug!(id = self.id, "sse connection closed");
        self.metrics.sse_active_connections.dec();
        self.close_notify.notify_waiters();
        self.handler.on_close(self);
    }

    #[must_use]
    pub fn state(&self) -> SseState {
        match self.state.load(Ordering::Acquire) {
            0 => SseState::Connecting,
            1 => SseState::Open,
            _ => SseState::Closed,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == SseState::Open
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    /// The `Last-Event-ID` the client reconnected with, if any.
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    #[must_use]
    pub fn events_sent(&self) -> u64 {
        self.events_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_transmitted(&self) -> u64 {
        self.bytes_transmitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the last event write (keepalives do not count).
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_event_at.lock().elapsed()
    }
}

impl std::fmt::Debug for SseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseConnection")
            .field("id", &self.id)
            .field("client_ip", &self.client_ip)
            .field("state", &self.state())
            .field("events_sent", &self.events_sent())
            .finish()
    }
}

/// The per-connection writer loop.
///
/// Waits on the queue with a deadline derived from the keepalive
/// interval (minimum 100 ms); a quiet interval emits a keepalive
/// comment, a long quiet spell closes the connection, and any write
/// error fires `on_error` and closes.
async fn sender_loop(conn: Arc<SseConnection>, mut rx: mpsc::Receiver<SseEvent>, mut writer: BoxWriter) {
    const MIN_POLL: Duration = Duration::from_millis(100);

    let mut last_write = Instant::now();

    loop {
        if conn.state() == SseState::Closed {
            break;
        }

        let wait = conn
            .config
            .keepalive_interval
            .saturating_sub(last_write.elapsed())
            .max(MIN_POLL);

        tokio::select! {
            _ = conn.close_notify.notified() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                let bytes = event.serialize();
                if let Err(err) = write_flush(&mut writer, &bytes).await {
                    tracing::debug!(id = conn.id, "sse write failed: {err}");
                    conn.handler.on_error(&conn, &err);
                    break;
                }
                last_write = Instant::now();
                *conn.last_event_at.lock() = last_write;
                conn.events_sent.fetch_add(1, Ordering::Relaxed);
                conn.bytes_transmitted
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                conn.metrics.sse_events_sent_total.inc();
            }
            _ = tokio::time::sleep(wait) => {
                if conn.idle_time() > conn.config.inactivity_timeout {
                    tracing::debug!(id = conn.id, "sse connection idle; closing");
                    break;
                }
                if let Err(err) = write_flush(&mut writer, KEEPALIVE).await {
                    tracing::debug!(id = conn.id, "sse keepalive failed: {err}");
                    conn.handler.on_error(&conn, &err);
                    break;
                }
                last_write = Instant::now();
            }
        }
    }

    conn.close();
    let _ = writer.shutdown().await;
}

async fn write_flush(writer: &mut BoxWriter, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}
