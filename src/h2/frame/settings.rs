use std::fmt;

use bytes::BufMut;

use super::{Error, Frame, Head, Kind, StreamId, util};

/// The default value of SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_SETTINGS_HEADER_TABLE_SIZE: usize = 4_096;

/// The default value of SETTINGS_INITIAL_WINDOW_SIZE.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// The default value of SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// INITIAL_WINDOW_SIZE upper bound.
pub const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// MAX_FRAME_SIZE upper bound.
pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;

const ACK: u8 = 0x1;

/// SETTINGS frame: configuration parameters for the whole connection.
///
/// Unset parameters keep their previous (or initial) value; a frame with
/// the ACK flag carries no payload at all.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Settings {
    ack: bool,
    pub header_table_size: Option<u32>,
    pub enable_push: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SettingId {
    HeaderTableSize = 1,
    EnablePush = 2,
    MaxConcurrentStreams = 3,
    InitialWindowSize = 4,
    MaxFrameSize = 5,
    MaxHeaderListSize = 6,
}

// ===== impl Settings =====

impl Settings {
    #[must_use]
    pub fn ack() -> Self {
        Self {
            ack: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Self, Error> {
        debug_assert_eq!(head.kind(), Kind::Settings);

        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if head.flag() & ACK == ACK {
            // Ensure that the payload is empty
            if !payload.is_empty() {
                return Err(Error::InvalidPayloadLength);
            }
            return Ok(Self::ack());
        }

        // Each setting is a 16-bit identifier and a 32-bit value.
        if payload.len() % 6 != 0 {
            tracing::debug!("invalid settings payload length; len={:?}", payload.len());
            return Err(Error::BadFrameSize);
        }

        let mut settings = Self::default();

        for raw in payload.chunks(6) {
            let id = u16::from_be_bytes([raw[0], raw[1]]);
            let value = util::unpack_octets_as_u32(raw, 2);
            match id {
                1 => settings.header_table_size = Some(value),
                2 => match value {
                    0 | 1 => settings.enable_push = Some(value),
                    _ => return Err(Error::InvalidSettingValue),
                },
                3 => settings.max_concurrent_streams = Some(value),
                4 => {
                    if value > MAX_INITIAL_WINDOW_SIZE {
                        return Err(Error::WindowOverflow);
                    }
                    settings.initial_window_size = Some(value);
                }
                5 => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                        return Err(Error::InvalidSettingValue);
                    }
                    settings.max_frame_size = Some(value);
                }
                6 => settings.max_header_list_size = Some(value),
                other => {
                    // Unknown settings MUST be ignored.
                    tracing::trace!("ignore unknown h2 setting w/ id {other}: value = {value}");
                }
            }
        }

        Ok(settings)
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let payload_len = self.payload_len();
        let flag = if self.ack { ACK } else { 0 };

        tracing::trace!("encoding SETTINGS; len={}", payload_len);

        let head = Head::new(Kind::Settings, flag, StreamId::ZERO);
        head.encode(payload_len, dst);

        self.for_each(|id, value| {
            dst.put_u16(id as u16);
            dst.put_u32(value);
        });
    }

    fn payload_len(&self) -> usize {
        let mut len = 0;
        self.for_each(|_, _| len += 6);
        len
    }

    fn for_each<F: FnMut(SettingId, u32)>(&self, mut f: F) {
        if let Some(v) = self.header_table_size {
            f(SettingId::HeaderTableSize, v);
        }
        if let Some(v) = self.enable_push {
            f(SettingId::EnablePush, v);
        }
        if let Some(v) = self.max_concurrent_streams {
            f(SettingId::MaxConcurrentStreams, v);
        }
        if let Some(v) = self.initial_window_size {
            f(SettingId::InitialWindowSize, v);
        }
        if let Some(v) = self.max_frame_size {
            f(SettingId::MaxFrameSize, v);
        }
        if let Some(v) = self.max_header_list_size {
            f(SettingId::MaxHeaderListSize, v);
        }
    }
}

impl From<Settings> for Frame {
    fn from(src: Settings) -> Self {
        Self::Settings(src)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Settings");
        if self.ack {
            builder.field("ack", &true);
        }
        self.for_each(|id, value| {
            builder.field(
                match id {
                    SettingId::HeaderTableSize => "header_table_size",
                    SettingId::EnablePush => "enable_push",
                    SettingId::MaxConcurrentStreams => "max_concurrent_streams",
                    SettingId::InitialWindowSize => "initial_window_size",
                    SettingId::MaxFrameSize => "max_frame_size",
                    SettingId::MaxHeaderListSize => "max_header_list_size",
                },
                &value,
            );
        });
        builder.finish()
    }
}
