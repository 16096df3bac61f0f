use bytes::BufMut;

use super::{Error, Frame, Head, Kind, StreamId};

const ACK: u8 = 0x1;

/// PING frame: liveness check with an opaque 8-octet payload the peer
/// echoes back with the ACK flag set.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Ping {
    ack: bool,
    payload: [u8; 8],
}

impl Ping {
    pub const PAYLOAD_LEN: usize = 8;

    #[must_use]
    pub fn new(payload: [u8; 8]) -> Self {
        Self {
            ack: false,
            payload,
        }
    }

    /// The ACK reply to a received ping.
    #[must_use]
    pub fn pong(payload: [u8; 8]) -> Self {
        Self { ack: true, payload }
    }

    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.ack
    }

    #[must_use]
    pub fn payload(&self) -> &[u8; 8] {
        &self.payload
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Self, Error> {
        debug_assert_eq!(head.kind(), Kind::Ping);

        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }
        if payload.len() != Self::PAYLOAD_LEN {
            return Err(Error::BadFrameSize);
        }

        let mut bytes = [0; Self::PAYLOAD_LEN];
        bytes.copy_from_slice(payload);

        Ok(Self {
            ack: head.flag() & ACK == ACK,
            payload: bytes,
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let flag = if self.ack { ACK } else { 0 };
        tracing::trace!("encoding PING; ack={}", self.ack);
        let head = Head::new(Kind::Ping, flag, StreamId::ZERO);
        head.encode(Self::PAYLOAD_LEN, dst);
        dst.put_slice(&self.payload);
    }
}

impl From<Ping> for Frame {
    fn from(src: Ping) -> Self {
        Self::Ping(src)
    }
}
