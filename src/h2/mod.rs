//! The HTTP/2 frame engine.
//!
//! Layered bottom-up: [`frame`] holds the typed frames, [`hpack`] the
//! header compression codec, [`codec`] the length-delimited framing,
//! [`flow`]/[`state`] the per-stream bookkeeping and [`Connection`] the
//! server connection loop that ties them together.

use std::{fmt, io};

pub mod codec;
pub mod frame;
pub mod hpack;

mod connection;
mod flow;
mod state;

pub use self::connection::{Connection, H2Config};
pub use self::flow::FlowControl;
pub use self::state::{State, StateError};

use self::frame::{Reason, StreamId};

/// The 24-octet client connection preface.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Connection-task level error: either the whole connection dies with a
/// GOAWAY code, a single stream is reset, or I/O failed outright.
#[derive(Debug)]
pub enum Error {
    /// Fatal for the connection; GOAWAY carries the reason.
    Connection(Reason),

    /// Fatal for one stream; RST_STREAM carries the reason.
    Stream { id: StreamId, reason: Reason },

    /// The socket went away.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(reason) => write!(f, "connection error: {reason}"),
            Self::Stream { id, reason } => {
                write!(f, "stream {} error: {reason}", u32::from(*id))
            }
            Self::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Self {
        Self::Io(src)
    }
}

impl From<frame::Error> for Error {
    fn from(src: frame::Error) -> Self {
        Self::Connection(src.reason())
    }
}
