//! WebSocket frame codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::ProtocolError;

const FIN: u8 = 0x80;
const RSV_MASK: u8 = 0x70;
const OPCODE_MASK: u8 = 0x0f;
const MASKED: u8 = 0x80;
const LEN_MASK: u8 = 0x7f;

/// Maximum payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xa => Ok(Self::Pong),
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }

    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xa,
        }
    }

    /// Control frames are opcodes 0x8 and above.
    #[must_use]
    pub fn is_control(self) -> bool {
        self.byte() >= 0x8
    }
}

/// A single WebSocket frame.
///
/// Construction enforces the masking contract at the type level: a
/// frame carries either a complete 4-octet key or none at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: Bytes,
}

/// Parsed payload of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl WsFrame {
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, mask: Option<[u8; 4]>, payload: Bytes) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload,
        }
    }

    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, None, payload.into())
    }

    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, None, payload.into())
    }

    #[must_use]
    pub fn pong(payload: Bytes) -> Self {
        Self::new(true, OpCode::Pong, None, payload)
    }

    #[must_use]
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        // Close reasons must fit the control-frame limit.
        let reason = &reason.as_bytes()[..reason.len().min(MAX_CONTROL_PAYLOAD - 2)];
        payload.extend_from_slice(reason);
        Self::new(true, OpCode::Close, None, payload.freeze())
    }

    /// Parse one frame out of `src`, unmasking the payload in place.
    /// Returns `None` when the buffer does not yet hold a full frame.
    pub fn parse(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let b0 = src[0];
        let b1 = src[1];

        if b0 & RSV_MASK != 0 {
            return Err(ProtocolError::ReservedBitsSet);
        }

        let fin = b0 & FIN == FIN;
        let opcode = OpCode::from_u8(b0 & OPCODE_MASK)?;
        let masked = b1 & MASKED == MASKED;

        let (payload_len, len_octets) = match b1 & LEN_MASK {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 2)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(ProtocolError::InvalidLength);
                }
                (len, 8)
            }
            small => (u64::from(small), 0),
        };

        if opcode.is_control() {
            if !fin {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(ProtocolError::ControlFrameTooLong);
            }
        }

        let header_len = 2 + len_octets + if masked { 4 } else { 0 };
        let total = header_len + payload_len as usize;
        if src.len() < total {
            return Ok(None);
        }

        src.advance(2 + len_octets);
        let mask = if masked {
            let mut key = [0u8; 4];
            key.copy_from_slice(&src[..4]);
            src.advance(4);
            Some(key)
        } else {
            None
        };

        let mut payload = src.split_to(payload_len as usize);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Self {
            fin,
            opcode,
            mask,
            payload: payload.freeze(),
        }))
    }

    /// Serialize with the smallest possible length encoding, masking
    /// the payload when a key is present.
    pub fn encode(&self, dst: &mut BytesMut) {
        let b0 = if self.fin { FIN } else { 0 } | self.opcode.byte();
        dst.put_u8(b0);

        let mask_bit = if self.mask.is_some() { MASKED } else { 0 };
        let len = self.payload.len();
        if len <= 125 {
            dst.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match self.mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    /// Interpret a close frame's payload.
    pub fn parse_close(&self) -> Result<Option<CloseFrame>, ProtocolError> {
        debug_assert_eq!(self.opcode, OpCode::Close);
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(ProtocolError::InvalidCloseFrame),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                if !is_valid_close_code(code) {
                    return Err(ProtocolError::InvalidCloseFrame);
                }
                let reason = std::str::from_utf8(&self.payload[2..])
                    .map_err(|_| ProtocolError::InvalidUtf8)?
                    .to_owned();
                Ok(Some(CloseFrame { code, reason }))
            }
        }
    }
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: WsFrame) {
        let mut wire = BytesMut::new();
        frame.encode(&mut wire);
        let parsed = WsFrame::parse(&mut wire).unwrap().unwrap();
        assert_eq!(parsed, frame);
        assert!(wire.is_empty());
    }

    #[test]
    fn text_frame_wire_layout() {
        let mut wire = BytesMut::new();
        WsFrame::text("Hi").encode(&mut wire);
        assert_eq!(&wire[..], &[0x81, 0x02, b'H', b'i']);
    }

    #[test]
    fn extended_16_bit_length() {
        let mut wire = BytesMut::new();
        WsFrame::binary(vec![0u8; 200]).encode(&mut wire);
        assert_eq!(wire[1], 126);
        assert_eq!(&wire[2..4], &[0x00, 0xc8]);
    }

    #[test]
    fn extended_64_bit_length() {
        let mut wire = BytesMut::new();
        WsFrame::binary(vec![0u8; 70_000]).encode(&mut wire);
        assert_eq!(wire[1], 127);
        assert_eq!(&wire[2..10], &70_000u64.to_be_bytes());
    }

    #[test]
    fn masked_frame_roundtrips() {
        roundtrip(WsFrame::new(
            true,
            OpCode::Text,
            Some([0x37, 0xfa, 0x21, 0x3d]),
            Bytes::from_static(b"Hello"),
        ));
    }

    #[test]
    fn unmasking_uses_xor_with_key_rotation() {
        // The RFC 6455 §5.7 masked "Hello" example.
        let mut wire = BytesMut::from(
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58][..],
        );
        let frame = WsFrame::parse(&mut wire).unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"Hello");
        assert_eq!(frame.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
    }

    #[test]
    fn fragmented_unmasked_roundtrips() {
        roundtrip(WsFrame::new(
            false,
            OpCode::Binary,
            None,
            Bytes::from_static(&[1, 2, 3]),
        ));
        roundtrip(WsFrame::new(
            true,
            OpCode::Continuation,
            None,
            Bytes::from_static(&[4, 5, 6]),
        ));
    }

    #[test]
    fn short_buffer_returns_none() {
        let mut wire = BytesMut::new();
        WsFrame::text("hello world").encode(&mut wire);
        let mut partial = BytesMut::from(&wire[..wire.len() - 3]);
        assert!(WsFrame::parse(&mut partial).unwrap().is_none());
    }

    #[test]
    fn rsv_bits_are_rejected() {
        let mut wire = BytesMut::from(&[0xc1, 0x01, b'x'][..]);
        assert_eq!(
            WsFrame::parse(&mut wire),
            Err(ProtocolError::ReservedBitsSet)
        );
        assert!(ProtocolError::ReservedBitsSet.to_string().contains("RSV bits"));
    }

    #[test]
    fn reserved_opcodes_are_rejected() {
        let mut wire = BytesMut::from(&[0x83, 0x00][..]);
        assert_eq!(
            WsFrame::parse(&mut wire),
            Err(ProtocolError::InvalidOpcode(0x3))
        );
    }

    #[test]
    fn oversized_control_frames_are_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u8(0x89);
        wire.put_u8(126);
        wire.put_u16(200);
        wire.extend_from_slice(&[0u8; 200]);
        assert_eq!(
            WsFrame::parse(&mut wire),
            Err(ProtocolError::ControlFrameTooLong)
        );
    }

    #[test]
    fn fragmented_control_frames_are_rejected() {
        let mut wire = BytesMut::from(&[0x09, 0x00][..]);
        assert_eq!(
            WsFrame::parse(&mut wire),
            Err(ProtocolError::FragmentedControlFrame)
        );
    }

    #[test]
    fn close_frame_payload_parses() {
        let frame = WsFrame::close(1000, "done");
        let close = frame.parse_close().unwrap().unwrap();
        assert_eq!(close.code, 1000);
        assert_eq!(close.reason, "done");
    }

    #[test]
    fn close_with_one_octet_payload_is_invalid() {
        let frame = WsFrame::new(true, OpCode::Close, None, Bytes::from_static(&[0x03]));
        assert_eq!(frame.parse_close(), Err(ProtocolError::InvalidCloseFrame));
    }

    #[test]
    fn close_with_reserved_code_is_invalid() {
        let mut payload = BytesMut::new();
        payload.put_u16(1005);
        let frame = WsFrame::new(true, OpCode::Close, None, payload.freeze());
        assert_eq!(frame.parse_close(), Err(ProtocolError::InvalidCloseFrame));
    }
}
