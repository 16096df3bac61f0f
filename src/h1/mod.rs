//! HTTP/1.1 request reading and response writing.
//!
//! The reader parses heads with `httparse` into `http` types and
//! drains bodies (identity or chunked) into memory; the writer emits
//! full responses with keep-alive semantics. Connection steering
//! (upgrades, SSE switchover, routing) happens in `server::conn`.

use std::{fmt, io};

mod chunked;
mod request;
mod response;

pub use self::chunked::{ChunkedDecoder, encode_chunk, encode_last_chunk};
pub use self::request::{RequestHead, read_body, read_head};
pub use self::response::write_response;

/// Errors while reading an HTTP/1.1 request.
#[derive(Debug)]
pub enum H1Error {
    /// Malformed head.
    Parse(httparse::Error),

    /// The request head exceeded its size limit.
    HeadTooLarge,

    /// The request body exceeded its size limit.
    BodyTooLarge,

    /// Content-Length was not a number (or conflicted).
    InvalidContentLength,

    /// Malformed chunked transfer coding.
    InvalidChunk,

    /// A header carried a name or value the `http` types reject.
    BadHeader,

    /// The peer went away mid-request.
    UnexpectedEof,

    Io(io::Error),
}

impl fmt::Display for H1Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "malformed request head: {err}"),
            Self::HeadTooLarge => f.write_str("request head too large"),
            Self::BodyTooLarge => f.write_str("request body too large"),
            Self::InvalidContentLength => f.write_str("invalid content-length"),
            Self::InvalidChunk => f.write_str("malformed chunked encoding"),
            Self::BadHeader => f.write_str("invalid header name or value"),
            Self::UnexpectedEof => f.write_str("connection closed mid-request"),
            Self::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for H1Error {}

impl From<io::Error> for H1Error {
    fn from(src: io::Error) -> Self {
        Self::Io(src)
    }
}

impl From<httparse::Error> for H1Error {
    fn from(src: httparse::Error) -> Self {
        Self::Parse(src)
    }
}
