//! switchyard: a concurrent multi-protocol HTTP server.
//!
//! The crate terminates client connections and speaks:
//!
//! - **HTTP/1.1** with keep-alive and chunked transfer coding;
//! - **HTTP/2** over cleartext (h2c): frame codec, HPACK header
//!   compression, multiplexed streams and flow control;
//! - **WebSocket** (RFC 6455) via HTTP/1.1 upgrade;
//! - **Server-Sent Events** with per-topic broadcast fan-out.
//!
//! A single accept loop hands every socket to its own task. The first
//! bytes of a connection decide the protocol: the 24-byte HTTP/2 client
//! preface selects the h2 engine, anything else is parsed as HTTP/1.1
//! and may upgrade to WebSocket or switch into an SSE stream.
//!
//! # Quick start
//!
//! ```no_run
//! use switchyard::server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), switchyard::BoxError> {
//!     let server = Server::new(ServerConfig::from_env()?);
//!     server.run().await
//! }
//! ```
//!
//! Resource use is bounded everywhere: the buffer pool caps idle direct
//! buffers, SSE queues are bounded with drop-on-timeout backpressure,
//! and graceful shutdown drains active connections before closing.

pub mod buffer;
pub mod h1;
pub mod h2;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod sse;
pub mod trace;
pub mod ws;

mod error;

pub use error::BoxError;
