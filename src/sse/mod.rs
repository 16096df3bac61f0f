//! Server-Sent Events: event serialization, the per-connection sender
//! with bounded-queue backpressure, and the topic registry with
//! admission limits.

mod connection;
mod event;
mod manager;

pub use self::connection::{SseConfig, SseConnection, SseError, SseHandler, SseState};
pub use self::event::{KEEPALIVE, SseEvent};
pub use self::manager::{
    DEFAULT_MAX_PER_IP, DEFAULT_MAX_PER_TOPIC, SseManager, SseStatistics,
};
