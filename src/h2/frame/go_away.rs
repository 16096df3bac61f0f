use std::fmt;

use bytes::{BufMut, Bytes};

use super::{Error, Frame, Head, Kind, Reason, StreamId, util};

/// GOAWAY frame: initiates connection shutdown, naming the highest
/// stream identifier the sender may still process.
#[derive(Clone, Eq, PartialEq)]
pub struct GoAway {
    last_stream_id: StreamId,
    error_code: Reason,
    debug_data: Bytes,
}

impl GoAway {
    #[must_use]
    pub fn new(last_stream_id: StreamId, reason: Reason) -> Self {
        Self {
            last_stream_id,
            error_code: reason,
            debug_data: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_debug_data(last_stream_id: StreamId, reason: Reason, debug_data: Bytes) -> Self {
        Self {
            last_stream_id,
            error_code: reason,
            debug_data,
        }
    }

    #[must_use]
    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    #[must_use]
    pub fn reason(&self) -> Reason {
        self.error_code
    }

    #[must_use]
    pub fn debug_data(&self) -> &Bytes {
        &self.debug_data
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Self, Error> {
        debug_assert_eq!(head.kind(), Kind::GoAway);

        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }
        if payload.len() < 8 {
            return Err(Error::BadFrameSize);
        }

        let last_stream_id = StreamId::read(&payload[..4]);
        let error_code = util::unpack_octets_as_u32(payload, 4);
        let debug_data = Bytes::copy_from_slice(&payload[8..]);

        Ok(Self {
            last_stream_id,
            error_code: error_code.into(),
            debug_data,
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        tracing::trace!("encoding GO_AWAY; code={:?}", self.error_code);
        let head = Head::new(Kind::GoAway, 0, StreamId::ZERO);
        head.encode(8 + self.debug_data.len(), dst);
        dst.put_u32(self.last_stream_id.into());
        dst.put_u32(self.error_code.into());
        dst.put(self.debug_data.slice(..));
    }
}

impl From<GoAway> for Frame {
    fn from(src: GoAway) -> Self {
        Self::GoAway(src)
    }
}

impl fmt::Debug for GoAway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("GoAway");
        builder.field("error_code", &self.error_code);
        builder.field("last_stream_id", &self.last_stream_id);

        if !self.debug_data.is_empty() {
            builder.field("debug_data", &self.debug_data);
        }

        builder.finish()
    }
}
