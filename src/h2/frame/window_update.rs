use bytes::BufMut;

use super::{Error, Frame, Head, Kind, StreamId};

/// WINDOW_UPDATE: grants `increment` octets of flow-control credit,
/// connection-wide when sent on stream zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdate {
    pub stream_id: StreamId,
    pub increment: u32,
}

impl WindowUpdate {
    #[must_use]
    pub fn new(stream_id: StreamId, increment: u32) -> Self {
        Self {
            stream_id,
            increment,
        }
    }

    /// Decode the 4-octet payload. A wrong payload length and a zero
    /// increment are both protocol violations.
    pub fn load(head: Head, payload: &[u8]) -> Result<Self, Error> {
        let raw: [u8; 4] = payload
            .try_into()
            .map_err(|_| Error::InvalidWindowUpdateValue)?;
        // The top bit mirrors the reserved bit of the stream id field
        // and carries no meaning.
        match u32::from_be_bytes(raw) & u32::from(StreamId::MAX) {
            0 => Err(Error::InvalidWindowUpdateValue),
            increment => Ok(Self {
                stream_id: head.stream_id(),
                increment,
            }),
        }
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        tracing::trace!(
            stream = u32::from(self.stream_id),
            increment = self.increment,
            "encoding WINDOW_UPDATE"
        );
        Head::new(Kind::WindowUpdate, 0, self.stream_id).encode(4, dst);
        dst.put_u32(self.increment);
    }
}

impl From<WindowUpdate> for Frame {
    fn from(src: WindowUpdate) -> Self {
        Self::WindowUpdate(src)
    }
}
