//! Length-delimited frame parsing and header-block segmentation.

use bytes::{Buf, Bytes, BytesMut};

use super::frame::{
    self, Continuation, Data, Frame, GoAway, HEADER_LEN, Head, Headers, Kind, Ping, Priority,
    Reset, Settings, StreamId, UnknownFrame, WindowUpdate,
};

/// Decodes complete frames out of a read buffer.
#[derive(Debug)]
pub struct FrameCodec {
    max_recv_frame_size: u32,
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recv_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Update the limit advertised via SETTINGS_MAX_FRAME_SIZE.
    pub fn set_max_recv_frame_size(&mut self, val: u32) {
        self.max_recv_frame_size = val;
    }

    /// Parse one frame out of `src`, or `None` when fewer than
    /// `9 + length` octets are buffered.
    ///
    /// The payload is split off `src`, so repeated calls walk the
    /// buffer frame by frame.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, frame::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = (u32::from(src[0]) << 16) | (u32::from(src[1]) << 8) | u32::from(src[2]);
        if len > self.max_recv_frame_size {
            tracing::debug!(len, max = self.max_recv_frame_size, "frame too big");
            return Err(frame::Error::FrameTooBig);
        }

        let len = len as usize;
        if src.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let head = Head::parse(&src[..HEADER_LEN]);
        src.advance(HEADER_LEN);
        let payload = src.split_to(len);

        tracing::trace!("decoded frame; kind={:?} len={}", head.kind(), len);

        let frame = match head.kind() {
            Kind::Data => Data::load(head, payload)?.into(),
            Kind::Headers => Headers::load(head, payload)?.into(),
            Kind::Priority => Priority::load(head, &payload)?.into(),
            Kind::Reset => Reset::load(head, &payload)?.into(),
            Kind::Settings => Settings::load(head, &payload)?.into(),
            Kind::PushPromise => {
                // Clients cannot promise streams; a server never
                // receives PUSH_PROMISE.
                return Err(frame::Error::UnexpectedPushPromise);
            }
            Kind::Ping => Ping::load(head, &payload)?.into(),
            Kind::GoAway => GoAway::load(head, &payload)?.into(),
            Kind::WindowUpdate => WindowUpdate::load(head, &payload)?.into(),
            Kind::Continuation => Continuation::load(head, payload)?.into(),
            Kind::Unknown(kind) => Frame::Unknown(UnknownFrame {
                kind,
                stream_id: head.stream_id(),
            }),
        };

        Ok(Some(frame))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a header block as one HEADERS frame, segmented into
/// CONTINUATION frames when the fragment exceeds the peer's
/// SETTINGS_MAX_FRAME_SIZE.
pub fn encode_header_block(
    stream_id: StreamId,
    fragment: Bytes,
    end_stream: bool,
    max_frame_size: usize,
    dst: &mut BytesMut,
) {
    if fragment.len() <= max_frame_size {
        Headers::new(stream_id, fragment, end_stream, true).encode(dst);
        return;
    }

    let mut fragment = fragment;
    let first = fragment.split_to(max_frame_size);
    Headers::new(stream_id, first, end_stream, false).encode(dst);

    while fragment.len() > max_frame_size {
        let chunk = fragment.split_to(max_frame_size);
        Continuation::new(stream_id, chunk, false).encode(dst);
    }
    Continuation::new(stream_id, fragment, true).encode(dst);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &FrameCodec, src: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(src).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn short_buffer_yields_none() {
        let codec = FrameCodec::new();
        let mut src = BytesMut::from(&[0u8, 0, 8, 6, 0, 0, 0, 0, 0][..]);
        // PING header promises 8 payload octets that are not there yet.
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), 9);
    }

    #[test]
    fn data_frame_roundtrip() {
        let codec = FrameCodec::new();
        let frame = Data::new(1.into(), Bytes::from_static(b"hello"));

        let mut wire = BytesMut::new();
        frame.encode(&mut wire);
        let decoded = codec.decode(&mut wire).unwrap().unwrap();

        assert_eq!(decoded, Frame::Data(frame));
        assert!(wire.is_empty());
    }

    #[test]
    fn settings_and_ping_roundtrip() {
        let codec = FrameCodec::new();
        let mut wire = BytesMut::new();

        let mut settings = Settings::default();
        settings.max_frame_size = Some(16_384);
        settings.initial_window_size = Some(1 << 20);
        settings.encode(&mut wire);
        Ping::new(*b"12345678").encode(&mut wire);

        let frames = decode_all(&codec, &mut wire);
        assert_eq!(frames[0], Frame::Settings(settings));
        assert_eq!(frames[1], Frame::Ping(Ping::new(*b"12345678")));
    }

    #[test]
    fn window_update_payload_is_parsed_big_endian() {
        let codec = FrameCodec::new();
        let mut wire = BytesMut::from(&[0u8, 0, 4, 8, 0, 0, 0, 0, 1, 0x00, 0x00, 0x80, 0x00][..]);
        match codec.decode(&mut wire).unwrap().unwrap() {
            Frame::WindowUpdate(frame) => {
                assert_eq!(frame.stream_id, StreamId::from(1));
                assert_eq!(frame.increment, 0x8000);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn zero_window_update_is_rejected() {
        let codec = FrameCodec::new();
        let mut wire = BytesMut::from(&[0u8, 0, 4, 8, 0, 0, 0, 0, 1, 0, 0, 0, 0][..]);
        assert_eq!(
            codec.decode(&mut wire),
            Err(frame::Error::InvalidWindowUpdateValue)
        );
    }

    #[test]
    fn window_update_with_wrong_length_is_a_protocol_error() {
        let codec = FrameCodec::new();
        // A 3-octet payload on a WINDOW_UPDATE frame.
        let mut wire = BytesMut::from(&[0u8, 0, 3, 8, 0, 0, 0, 0, 1, 0, 0, 1][..]);
        let err = codec.decode(&mut wire).unwrap_err();
        assert_eq!(err, frame::Error::InvalidWindowUpdateValue);
        assert_eq!(err.reason(), frame::Reason::PROTOCOL_ERROR);
    }

    #[test]
    fn ping_with_wrong_payload_length_is_rejected() {
        let codec = FrameCodec::new();
        let mut wire = BytesMut::from(&[0u8, 0, 4, 6, 0, 0, 0, 0, 0, 1, 2, 3, 4][..]);
        assert_eq!(codec.decode(&mut wire), Err(frame::Error::BadFrameSize));
    }

    #[test]
    fn settings_on_a_stream_is_rejected() {
        let codec = FrameCodec::new();
        let mut wire = BytesMut::from(&[0u8, 0, 0, 4, 0, 0, 0, 0, 1][..]);
        assert_eq!(codec.decode(&mut wire), Err(frame::Error::InvalidStreamId));
    }

    #[test]
    fn data_on_stream_zero_is_rejected() {
        let codec = FrameCodec::new();
        let mut wire = BytesMut::from(&[0u8, 0, 1, 0, 0, 0, 0, 0, 0, b'x'][..]);
        assert_eq!(codec.decode(&mut wire), Err(frame::Error::InvalidStreamId));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let codec = FrameCodec::new();
        // Header announces 16385 octets with the default 16384 limit.
        let mut wire = BytesMut::from(&[0u8, 0x40, 0x01, 0, 0, 0, 0, 0, 1][..]);
        assert_eq!(codec.decode(&mut wire), Err(frame::Error::FrameTooBig));
    }

    #[test]
    fn unknown_frame_type_is_surfaced_not_fatal() {
        let codec = FrameCodec::new();
        let mut wire = BytesMut::from(&[0u8, 0, 1, 0xab, 0, 0, 0, 0, 3, 0xff][..]);
        match codec.decode(&mut wire).unwrap().unwrap() {
            Frame::Unknown(frame) => {
                assert_eq!(frame.kind, 0xab);
                assert_eq!(frame.stream_id, StreamId::from(3));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn large_header_blocks_are_segmented() {
        let block = Bytes::from(vec![0x42; 40_000]);
        let mut dst = BytesMut::new();
        encode_header_block(1.into(), block, true, 16_384, &mut dst);

        let codec = FrameCodec::new();
        let frames = decode_all(&codec, &mut dst);
        assert_eq!(frames.len(), 3);
        match (&frames[0], &frames[2]) {
            (Frame::Headers(h), Frame::Continuation(c)) => {
                assert!(!h.is_end_headers());
                assert!(h.is_end_stream());
                assert!(c.is_end_headers());
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }
}
