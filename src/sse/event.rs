//! Server-sent event serialization.

use bytes::{BufMut, Bytes, BytesMut};

/// The comment line written when a connection has been quiet for a
/// keepalive interval.
pub const KEEPALIVE: &[u8] = b": keepalive\n\n";

/// One server-sent event.
///
/// `data` is mandatory and non-empty; `event`, `id` and `retry` are
/// optional. Multi-line data is split across `data:` fields on
/// serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    data: String,
    event: Option<String>,
    id: Option<String>,
    retry_ms: Option<u64>,
}

impl SseEvent {
    /// Create an event carrying `data`.
    ///
    /// # Panics
    ///
    /// Panics when `data` is empty; empty events are ignored by
    /// browsers and always indicate a publisher bug.
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        let data = data.into();
        assert!(!data.is_empty(), "SSE event data must be non-empty");
        Self {
            data,
            event: None,
            id: None,
            retry_ms: None,
        }
    }

    /// Set the event type (`event:<type>`).
    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Set the event id (`id:<id>`).
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the client reconnect delay (`retry:<ms>`).
    #[must_use]
    pub fn with_retry_ms(mut self, retry_ms: u64) -> Self {
        self.retry_ms = Some(retry_ms);
        self
    }

    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Wire form: optional `event:`/`id:`/`retry:` lines, one `data:`
    /// line per line of data, then a blank line.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 48);

        if let Some(event) = &self.event {
            buf.put_slice(b"event:");
            buf.put_slice(event.as_bytes());
            buf.put_u8(b'\n');
        }
        if let Some(id) = &self.id {
            buf.put_slice(b"id:");
            buf.put_slice(id.as_bytes());
            buf.put_u8(b'\n');
        }
        if let Some(retry_ms) = self.retry_ms {
            let mut digits = itoa::Buffer::new();
            buf.put_slice(b"retry:");
            buf.put_slice(digits.format(retry_ms).as_bytes());
            buf.put_u8(b'\n');
        }
        for line in self.data.split('\n') {
            buf.put_slice(b"data:");
            buf.put_slice(line.as_bytes());
            buf.put_u8(b'\n');
        }
        buf.put_u8(b'\n');

        buf.freeze()
    }
}
