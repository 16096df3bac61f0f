//! Per-stream state machine.
//!
//! ```not_rust
//!                          +--------+
//!                  send PP |        | recv PP
//!                 ,--------|  idle  |--------.
//!                /         |        |         \
//!               v          +--------+          v
//!        +----------+          |           +----------+
//!        |          |          | send H /  |          |
//! ,------| reserved |          | recv H    | reserved |------.
//! |      | (local)  |          |           | (remote) |      |
//! |      +----------+          v           +----------+      |
//! |          |             +--------+             |          |
//! |          |     recv ES |        | send ES     |          |
//! |   send H |     ,-------|  open  |-------.     | recv H   |
//! |          |    /        |        |        \    |          |
//! |          v   v         +--------+         v   v          |
//! |      +----------+          |           +----------+      |
//! |      |   half   |          |           |   half   |      |
//! |      |  closed  |          | send R /  |  closed  |      |
//! |      | (remote) |          | recv R    | (local)  |      |
//! |      +----------+          |           +----------+      |
//! |           |                |                 |           |
//! |           | send ES /      |       recv ES / |           |
//! |           | send R /       v        send R / |           |
//! |           | recv R     +--------+   recv R   |           |
//! | send R /  `----------->|        |<-----------'  send R / |
//! | recv R                 | closed |               recv R   |
//! `----------------------->|        |<----------------------'
//!                          +--------+
//! ```

use super::frame::Reason;

/// The state of one HTTP/2 stream, driven by frames and their
/// direction.
#[derive(Debug, Clone)]
pub struct State {
    inner: Inner,
}

// Server push is disabled on every connection, so the reserved(local)
// and reserved(remote) states of the RFC diagram are unreachable here.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Inner {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed(Cause),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cause {
    EndStream,
    LocalReset(Reason),
    RemoteReset(Reason),
}

/// Outcome of an illegal transition: some violations reset the stream,
/// others kill the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    Stream(Reason),
    Connection(Reason),
}

impl State {
    /// Opens the receive-half of the stream when a HEADERS frame is
    /// received.
    pub fn recv_open(&mut self, end_stream: bool) -> Result<(), StateError> {
        self.inner = match self.inner {
            Inner::Idle => {
                if end_stream {
                    Inner::HalfClosedRemote
                } else {
                    Inner::Open
                }
            }
            ref state => {
                tracing::debug!("recv_open: in unexpected state {:?}", state);
                return Err(StateError::Connection(Reason::PROTOCOL_ERROR));
            }
        };
        Ok(())
    }

    /// Indicates that the remote side will not send more data
    /// (END_STREAM received).
    pub fn recv_close(&mut self) -> Result<(), StateError> {
        match self.inner {
            Inner::Open => {
                tracing::trace!("recv_close: Open => HalfClosedRemote");
                self.inner = Inner::HalfClosedRemote;
                Ok(())
            }
            Inner::HalfClosedLocal => {
                tracing::trace!("recv_close: HalfClosedLocal => Closed");
                self.inner = Inner::Closed(Cause::EndStream);
                Ok(())
            }
            ref state => {
                tracing::debug!("recv_close: in unexpected state {:?}", state);
                Err(StateError::Connection(Reason::PROTOCOL_ERROR))
            }
        }
    }

    /// Checks whether a DATA frame is acceptable in the current state.
    pub fn ensure_recv_data(&self) -> Result<(), StateError> {
        match self.inner {
            Inner::Open | Inner::HalfClosedLocal => Ok(()),
            Inner::HalfClosedRemote | Inner::Closed(Cause::EndStream) => {
                Err(StateError::Stream(Reason::STREAM_CLOSED))
            }
            Inner::Closed(Cause::LocalReset(_)) => {
                // We reset the stream; frames already in flight are not
                // the peer's fault.
                Err(StateError::Stream(Reason::STREAM_CLOSED))
            }
            _ => Err(StateError::Connection(Reason::PROTOCOL_ERROR)),
        }
    }

    /// Opens the send-half when the response HEADERS go out.
    pub fn send_open(&mut self, end_stream: bool) {
        self.inner = match self.inner {
            Inner::Open => {
                if end_stream {
                    Inner::HalfClosedLocal
                } else {
                    Inner::Open
                }
            }
            Inner::HalfClosedRemote => {
                if end_stream {
                    Inner::Closed(Cause::EndStream)
                } else {
                    Inner::HalfClosedRemote
                }
            }
            ref state => {
                debug_assert!(false, "send_open: unexpected state {state:?}");
                return;
            }
        };
    }

    /// Indicates that the local side will not send more data
    /// (END_STREAM sent).
    pub fn send_close(&mut self) {
        self.inner = match self.inner {
            Inner::Open => {
                tracing::trace!("send_close: Open => HalfClosedLocal");
                Inner::HalfClosedLocal
            }
            Inner::HalfClosedRemote => {
                tracing::trace!("send_close: HalfClosedRemote => Closed");
                Inner::Closed(Cause::EndStream)
            }
            ref state => {
                debug_assert!(false, "send_close: unexpected state {state:?}");
                return;
            }
        };
    }

    /// The remote explicitly sent a RST_STREAM.
    pub fn recv_reset(&mut self, reason: Reason) {
        match self.inner {
            Inner::Closed(..) => {}
            ref state => {
                tracing::trace!("recv_reset: {:?} => Closed({:?})", state, reason);
                self.inner = Inner::Closed(Cause::RemoteReset(reason));
            }
        }
    }

    /// A RST_STREAM is sent by us.
    pub fn send_reset(&mut self, reason: Reason) {
        self.inner = Inner::Closed(Cause::LocalReset(reason));
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner == Inner::Idle
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.inner, Inner::Closed(..))
    }

    #[must_use]
    pub fn is_reset(&self) -> bool {
        matches!(
            self.inner,
            Inner::Closed(Cause::LocalReset(..) | Cause::RemoteReset(..))
        )
    }

    /// True while END_STREAM has not yet been received.
    #[must_use]
    pub fn is_recv_streaming(&self) -> bool {
        matches!(self.inner, Inner::Open | Inner::HalfClosedLocal)
    }

    /// True while the local side may still send frames.
    #[must_use]
    pub fn is_send_streaming(&self) -> bool {
        matches!(self.inner, Inner::Open | Inner::HalfClosedRemote)
    }
}

impl Default for State {
    fn default() -> Self {
        Self { inner: Inner::Idle }
    }
}
