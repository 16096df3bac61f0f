use super::StreamId;

use bytes::BufMut;

/// The 9-octet header every HTTP/2 frame starts with: 24-bit payload
/// length, 8-bit type, 8-bit flags and the 31-bit stream identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Head {
    kind: Kind,
    flag: u8,
    stream_id: StreamId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Kind {
    Data,
    Headers,
    Priority,
    Reset,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

// ===== impl Head =====

impl Head {
    #[must_use]
    pub fn new(kind: Kind, flag: u8, stream_id: StreamId) -> Self {
        Self {
            kind,
            flag,
            stream_id,
        }
    }

    /// Parse an HTTP/2 frame header.
    #[must_use]
    pub fn parse(header: &[u8]) -> Self {
        Self {
            kind: Kind::new(header[3]),
            flag: header[4],
            stream_id: StreamId::read(&header[5..]),
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn flag(&self) -> u8 {
        self.flag
    }

    pub fn encode<T: BufMut>(&self, payload_len: usize, dst: &mut T) {
        debug_assert!(super::HEADER_LEN <= dst.remaining_mut());

        dst.put_uint(payload_len as u64, 3);
        dst.put_u8(self.kind.byte());
        dst.put_u8(self.flag);
        dst.put_u32(self.stream_id.into());
    }
}

// ===== impl Kind =====

impl Kind {
    #[must_use]
    pub fn new(byte: u8) -> Self {
        match byte {
            0 => Self::Data,
            1 => Self::Headers,
            2 => Self::Priority,
            3 => Self::Reset,
            4 => Self::Settings,
            5 => Self::PushPromise,
            6 => Self::Ping,
            7 => Self::GoAway,
            8 => Self::WindowUpdate,
            9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Headers => 1,
            Self::Priority => 2,
            Self::Reset => 3,
            Self::Settings => 4,
            Self::PushPromise => 5,
            Self::Ping => 6,
            Self::GoAway => 7,
            Self::WindowUpdate => 8,
            Self::Continuation => 9,
            Self::Unknown(other) => other,
        }
    }
}
