use bytes::BufMut;

use super::{Error, Frame, Head, Kind, Reason, StreamId};

/// RST_STREAM: abrupt termination of a single stream.
///
/// The payload is exactly one 32-bit error code; the frame carries no
/// flags and is never sent on stream zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reset {
    pub stream_id: StreamId,
    pub reason: Reason,
}

impl Reset {
    #[must_use]
    pub fn new(stream_id: StreamId, reason: Reason) -> Self {
        Self { stream_id, reason }
    }

    /// Decode the payload of a received RST_STREAM frame.
    pub fn load(head: Head, payload: &[u8]) -> Result<Self, Error> {
        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }
        let code: [u8; 4] = payload
            .try_into()
            .map_err(|_| Error::InvalidPayloadLength)?;
        Ok(Self {
            stream_id: head.stream_id(),
            reason: u32::from_be_bytes(code).into(),
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        tracing::trace!(
            stream = u32::from(self.stream_id),
            code = ?self.reason,
            "encoding RST_STREAM"
        );
        Head::new(Kind::Reset, 0, self.stream_id).encode(4, dst);
        dst.put_u32(self.reason.into());
    }
}

impl From<Reset> for Frame {
    fn from(src: Reset) -> Self {
        Self::Reset(src)
    }
}
