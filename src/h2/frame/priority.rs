use bytes::BufMut;

use super::{Error, Frame, Head, Kind, StreamId};

/// PRIORITY frame. RFC 9113 deprecates the prioritization scheme; the
/// frame is decoded for validity and then discarded by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub stream_id: StreamId,
    pub dependency: StreamDependency,
}

/// The 5-octet dependency section: an exclusivity bit folded into the
/// dependency id, followed by one weight octet. HEADERS frames with
/// the PRIORITY flag carry the same section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDependency {
    pub dependency_id: StreamId,
    /// Stored as 0..=255; the protocol weight is this value plus one.
    pub weight: u8,
    pub exclusive: bool,
}

// ===== impl Priority =====

impl Priority {
    pub fn load(head: Head, payload: &[u8]) -> Result<Self, Error> {
        let stream_id = head.stream_id();
        if stream_id.is_zero() {
            return Err(Error::InvalidStreamId);
        }
        Ok(Self {
            stream_id,
            dependency: StreamDependency::load(payload, stream_id)?,
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        Head::new(Kind::Priority, 0, self.stream_id).encode(5, dst);
        self.dependency.encode(dst);
    }
}

impl From<Priority> for Frame {
    fn from(src: Priority) -> Self {
        Self::Priority(src)
    }
}

// ===== impl StreamDependency =====

impl StreamDependency {
    /// Decode a dependency section belonging to stream `on`. A stream
    /// may not depend on itself.
    pub fn load(section: &[u8], on: StreamId) -> Result<Self, Error> {
        let section: &[u8; 5] = section
            .try_into()
            .map_err(|_| Error::InvalidPayloadLength)?;

        let raw = u32::from_be_bytes([section[0], section[1], section[2], section[3]]);
        let dependency_id = StreamId::from(raw & u32::from(StreamId::MAX));
        if dependency_id == on {
            return Err(Error::InvalidDependencyId);
        }

        Ok(Self {
            dependency_id,
            weight: section[4],
            exclusive: raw >> 31 == 1,
        })
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let flag = u32::from(self.exclusive) << 31;
        dst.put_u32(flag | u32::from(self.dependency_id));
        dst.put_u8(self.weight);
    }
}
