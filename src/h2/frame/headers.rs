use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::{Error, Frame, Head, Kind, StreamId, StreamDependency, util};

/// HEADERS frame.
///
/// Carries a header-block fragment; HPACK decoding happens at the
/// connection layer once the full block (HEADERS plus any CONTINUATION
/// frames) has been assembled.
#[derive(Clone, Eq, PartialEq)]
pub struct Headers {
    stream_id: StreamId,
    fragment: Bytes,
    flags: HeadersFlag,
}

#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct HeadersFlag(u8);

/// CONTINUATION frame: the tail of a header block started by a HEADERS
/// frame without END_HEADERS.
#[derive(Clone, Eq, PartialEq)]
pub struct Continuation {
    stream_id: StreamId,
    fragment: Bytes,
    end_headers: bool,
}

const END_STREAM: u8 = 0x1;
const END_HEADERS: u8 = 0x4;
const PADDED: u8 = 0x8;
const PRIORITY: u8 = 0x20;
const ALL: u8 = END_STREAM | END_HEADERS | PADDED | PRIORITY;

// ===== impl Headers =====

impl Headers {
    /// Create a HEADERS frame around an already-encoded HPACK fragment.
    #[must_use]
    pub fn new(stream_id: StreamId, fragment: Bytes, end_stream: bool, end_headers: bool) -> Self {
        let mut flags = HeadersFlag::default();
        if end_stream {
            flags.set_end_stream();
        }
        if end_headers {
            flags.set_end_headers();
        }
        Self {
            stream_id,
            fragment,
            flags,
        }
    }

    /// Builds a `Headers` frame from a raw frame, stripping padding and
    /// the optional priority section. The header-block fragment is kept
    /// opaque.
    pub fn load(head: Head, mut payload: BytesMut) -> Result<Self, Error> {
        debug_assert_eq!(head.kind(), Kind::Headers);

        let flags = HeadersFlag(head.flag() & ALL);

        tracing::trace!("loading headers; flags={:?}", flags);

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if flags.is_padded() {
            util::strip_padding(&mut payload)?;
        }

        if flags.is_priority() {
            if payload.len() < 5 {
                return Err(Error::MalformedMessage);
            }
            // The dependency section is validated and discarded.
            StreamDependency::load(&payload[..5], head.stream_id())?;
            let _ = payload.split_to(5);
        }

        Ok(Self {
            stream_id: head.stream_id(),
            fragment: payload.freeze(),
            flags,
        })
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[must_use]
    pub fn is_end_headers(&self) -> bool {
        self.flags.is_end_headers()
    }

    #[must_use]
    pub fn is_end_stream(&self) -> bool {
        self.flags.is_end_stream()
    }

    #[must_use]
    pub fn fragment(&self) -> &Bytes {
        &self.fragment
    }

    #[must_use]
    pub fn into_fragment(self) -> Bytes {
        self.fragment
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        tracing::trace!(
            "encoding HEADERS; id={:?} len={}",
            self.stream_id,
            self.fragment.len()
        );
        let head = Head::new(Kind::Headers, self.flags.into(), self.stream_id);
        head.encode(self.fragment.len(), dst);
        dst.put_slice(&self.fragment);
    }
}

impl From<Headers> for Frame {
    fn from(src: Headers) -> Self {
        Self::Headers(src)
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Headers")
            .field("stream_id", &self.stream_id)
            .field("fragment_len", &self.fragment.len())
            .field("flags", &self.flags)
            .finish()
    }
}

// ===== impl HeadersFlag =====

impl HeadersFlag {
    #[must_use]
    pub fn is_end_stream(self) -> bool {
        self.0 & END_STREAM == END_STREAM
    }

    pub fn set_end_stream(&mut self) {
        self.0 |= END_STREAM;
    }

    #[must_use]
    pub fn is_end_headers(self) -> bool {
        self.0 & END_HEADERS == END_HEADERS
    }

    pub fn set_end_headers(&mut self) {
        self.0 |= END_HEADERS;
    }

    #[must_use]
    pub fn is_padded(self) -> bool {
        self.0 & PADDED == PADDED
    }

    #[must_use]
    pub fn is_priority(self) -> bool {
        self.0 & PRIORITY == PRIORITY
    }
}

impl From<HeadersFlag> for u8 {
    fn from(src: HeadersFlag) -> Self {
        src.0
    }
}

impl fmt::Debug for HeadersFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        util::debug_flags(f, self.0)
            .flag_if(self.is_end_headers(), "END_HEADERS")
            .flag_if(self.is_end_stream(), "END_STREAM")
            .flag_if(self.is_padded(), "PADDED")
            .flag_if(self.is_priority(), "PRIORITY")
            .finish()
    }
}

// ===== impl Continuation =====

impl Continuation {
    #[must_use]
    pub fn new(stream_id: StreamId, fragment: Bytes, end_headers: bool) -> Self {
        Self {
            stream_id,
            fragment,
            end_headers,
        }
    }

    pub fn load(head: Head, payload: BytesMut) -> Result<Self, Error> {
        debug_assert_eq!(head.kind(), Kind::Continuation);

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        Ok(Self {
            stream_id: head.stream_id(),
            fragment: payload.freeze(),
            end_headers: head.flag() & END_HEADERS == END_HEADERS,
        })
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    #[must_use]
    pub fn is_end_headers(&self) -> bool {
        self.end_headers
    }

    #[must_use]
    pub fn fragment(&self) -> &Bytes {
        &self.fragment
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let flag = if self.end_headers { END_HEADERS } else { 0 };
        let head = Head::new(Kind::Continuation, flag, self.stream_id);
        head.encode(self.fragment.len(), dst);
        dst.put_slice(&self.fragment);
    }
}

impl From<Continuation> for Frame {
    fn from(src: Continuation) -> Self {
        Self::Continuation(src)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("stream_id", &self.stream_id)
            .field("fragment_len", &self.fragment.len())
            .field("end_headers", &self.end_headers)
            .finish()
    }
}
