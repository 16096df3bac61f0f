use std::fmt;

use bytes::{Buf, BytesMut};

use super::Error;

#[inline]
pub(crate) fn unpack_octets_as_u32(src: &[u8], offset: usize) -> u32 {
    let mut buf = [0; 4];
    buf.copy_from_slice(&src[offset..offset + 4]);
    u32::from_be_bytes(buf)
}

/// Strip padding from a padded payload: the first octet is the pad
/// length, the trailing `pad` octets are dropped.
pub(crate) fn strip_padding(payload: &mut BytesMut) -> Result<u8, Error> {
    if payload.is_empty() {
        return Err(Error::MalformedMessage);
    }
    let pad_len = payload[0] as usize;
    payload.advance(1);
    if pad_len > payload.len() {
        return Err(Error::TooMuchPadding);
    }
    payload.truncate(payload.len() - pad_len);
    Ok(pad_len as u8)
}

pub(crate) struct DebugFlags<'a, 'f> {
    fmt: &'a mut fmt::Formatter<'f>,
    result: fmt::Result,
    started: bool,
}

/// Render frame flags as a `(FLAG_A | FLAG_B)` suffix in Debug impls.
pub(crate) fn debug_flags<'a, 'f>(
    fmt: &'a mut fmt::Formatter<'f>,
    bits: u8,
) -> DebugFlags<'a, 'f> {
    let result = write!(fmt, "({bits:#x}");
    DebugFlags {
        fmt,
        result,
        started: false,
    }
}

impl DebugFlags<'_, '_> {
    pub(crate) fn flag_if(&mut self, enabled: bool, name: &str) -> &mut Self {
        if enabled {
            self.result = self.result.and_then(|()| {
                let sep = if self.started { " | " } else { ": " };
                self.started = true;
                write!(self.fmt, "{sep}{name}")
            });
        }
        self
    }

    pub(crate) fn finish(&mut self) -> fmt::Result {
        self.result.and_then(|()| write!(self.fmt, ")"))
    }
}
