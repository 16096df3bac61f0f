//! WebSocket support (RFC 6455): handshake validation, the frame codec
//! with client-to-server masking, fragmentation reassembly and the
//! per-connection message loop.

use std::{fmt, io};

mod connection;
mod frame;
mod handshake;

pub use self::connection::{Message, WsConfig, WsHandler, WsSender, serve};
pub use self::frame::{CloseFrame, OpCode, WsFrame};
pub use self::handshake::{HandshakeError, WsHandshake, derive_accept_key, validate};

/// Close codes the server uses.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
}

/// Violations of the framing layer. Each maps to a close frame with
/// status 1002 (or 1007/1009 where noted) before the connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// RSV bits were set without a negotiated extension.
    ReservedBitsSet,

    /// An unknown or reserved opcode.
    InvalidOpcode(u8),

    /// A control frame carried more than 125 payload octets.
    ControlFrameTooLong,

    /// A control frame without FIN.
    FragmentedControlFrame,

    /// A client-to-server frame arrived unmasked.
    UnmaskedClientFrame,

    /// A 64-bit payload length with the most significant bit set.
    InvalidLength,

    /// A CONTINUATION frame with no message in progress.
    ContinuationWithoutStart,

    /// A new data frame interleaved into an unfinished message.
    UnexpectedDataFrame,

    /// A close frame with an illegal status code or a 1-octet payload.
    InvalidCloseFrame,

    /// A text message (or close reason) that is not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReservedBitsSet => f.write_str("RSV bits set without negotiated extension"),
            Self::InvalidOpcode(code) => write!(f, "invalid opcode {code:#x}"),
            Self::ControlFrameTooLong => f.write_str("control frame payload exceeds 125 bytes"),
            Self::FragmentedControlFrame => f.write_str("control frames must not be fragmented"),
            Self::UnmaskedClientFrame => f.write_str("client frames must be masked"),
            Self::InvalidLength => f.write_str("payload length high bit set"),
            Self::ContinuationWithoutStart => {
                f.write_str("continuation frame without a message in progress")
            }
            Self::UnexpectedDataFrame => {
                f.write_str("data frame interleaved into a fragmented message")
            }
            Self::InvalidCloseFrame => f.write_str("malformed close frame"),
            Self::InvalidUtf8 => f.write_str("payload is not valid utf-8"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Errors terminating a WebSocket connection task.
#[derive(Debug)]
pub enum WsError {
    Protocol(ProtocolError),

    /// A message outgrew the configured limit; closed with 1009.
    MessageTooLong { size: usize, max_size: usize },

    Io(io::Error),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(err) => write!(f, "protocol violation: {err}"),
            Self::MessageTooLong { size, max_size } => {
                write!(f, "message of {size} bytes exceeds limit of {max_size}")
            }
            Self::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WsError {}

impl From<ProtocolError> for WsError {
    fn from(src: ProtocolError) -> Self {
        Self::Protocol(src)
    }
}

impl From<io::Error> for WsError {
    fn from(src: io::Error) -> Self {
        Self::Io(src)
    }
}
