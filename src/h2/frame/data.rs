use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::{Error, Frame, Head, Kind, StreamId, util};

/// DATA frame: a chunk of a request or response body.
#[derive(Clone, Eq, PartialEq)]
pub struct Data {
    stream_id: StreamId,
    data: Bytes,
    flags: DataFlags,
}

#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct DataFlags(u8);

const END_STREAM: u8 = 0x1;
const PADDED: u8 = 0x8;
const ALL: u8 = END_STREAM | PADDED;

// ===== impl Data =====

impl Data {
    #[must_use]
    pub fn new(stream_id: StreamId, data: Bytes) -> Self {
        Self {
            stream_id,
            data,
            flags: DataFlags::default(),
        }
    }

    /// Builds a `Data` frame from a raw frame, stripping padding.
    pub fn load(head: Head, mut payload: BytesMut) -> Result<Self, Error> {
        debug_assert_eq!(head.kind(), Kind::Data);

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        let flags = DataFlags::load(head.flag());

        if flags.is_padded() {
            util::strip_padding(&mut payload)?;
        }

        Ok(Self {
            stream_id: head.stream_id(),
            data: payload.freeze(),
            flags,
        })
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[must_use]
    pub fn is_end_stream(&self) -> bool {
        self.flags.is_end_stream()
    }

    pub fn set_end_stream(&mut self, val: bool) {
        if val {
            self.flags.set_end_stream();
        } else {
            self.flags.unset_end_stream();
        }
    }

    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.data
    }

    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.data
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        tracing::trace!(
            "encoding DATA; id={:?} len={}",
            self.stream_id,
            self.data.len()
        );
        let head = Head::new(Kind::Data, self.flags.into(), self.stream_id);
        head.encode(self.data.len(), dst);
        dst.put_slice(&self.data);
    }
}

impl From<Data> for Frame {
    fn from(src: Data) -> Self {
        Self::Data(src)
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Data")
            .field("stream_id", &self.stream_id)
            .field("len", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}

// ===== impl DataFlags =====

impl DataFlags {
    fn load(bits: u8) -> Self {
        Self(bits & ALL)
    }

    fn is_end_stream(self) -> bool {
        self.0 & END_STREAM == END_STREAM
    }

    fn set_end_stream(&mut self) {
        self.0 |= END_STREAM;
    }

    fn unset_end_stream(&mut self) {
        self.0 &= !END_STREAM;
    }

    fn is_padded(self) -> bool {
        self.0 & PADDED == PADDED
    }
}

impl From<DataFlags> for u8 {
    fn from(src: DataFlags) -> Self {
        src.0
    }
}

impl fmt::Debug for DataFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        util::debug_flags(f, self.0)
            .flag_if(self.is_end_stream(), "END_STREAM")
            .flag_if(self.is_padded(), "PADDED")
            .finish()
    }
}
