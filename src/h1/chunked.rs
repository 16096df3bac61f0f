//! Chunked transfer coding (RFC 9112 §7.1).

use bytes::{Buf, BufMut, BytesMut};

use super::H1Error;

/// Incremental decoder for a chunked message body.
///
/// Feed it buffers as they arrive; decoded payload octets accumulate in
/// `out` and `decode` reports completion once the terminating chunk and
/// trailer section have been consumed.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    remaining: u64,
    size_digits: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    Trailer,
    TrailerLine,
    TrailerEndLf,
    End,
}

impl ChunkedDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Size,
            remaining: 0,
            size_digits: 0,
        }
    }

    /// True once the final chunk and trailers have been consumed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == State::End
    }

    /// Consume as much of `src` as possible. Returns `true` when the
    /// body is complete; `false` means more input is needed.
    pub fn decode(&mut self, src: &mut BytesMut, out: &mut BytesMut) -> Result<bool, H1Error> {
        while !src.is_empty() {
            match self.state {
                State::Size => {
                    let byte = src[0];
                    match byte {
                        b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                            src.advance(1);
                            self.size_digits += 1;
                            if self.size_digits > 16 {
                                return Err(H1Error::InvalidChunk);
                            }
                            let digit = (byte as char).to_digit(16).expect("hex digit");
                            self.remaining = (self.remaining << 4) | u64::from(digit);
                        }
                        b';' => {
                            src.advance(1);
                            self.state = State::Extension;
                        }
                        b'\r' => {
                            if self.size_digits == 0 {
                                return Err(H1Error::InvalidChunk);
                            }
                            src.advance(1);
                            self.state = State::SizeLf;
                        }
                        _ => return Err(H1Error::InvalidChunk),
                    }
                }
                State::Extension => {
                    // Chunk extensions are tolerated and ignored.
                    if src[0] == b'\r' {
                        self.state = State::SizeLf;
                    }
                    src.advance(1);
                }
                State::SizeLf => {
                    if src[0] != b'\n' {
                        return Err(H1Error::InvalidChunk);
                    }
                    src.advance(1);
                    self.size_digits = 0;
                    self.state = if self.remaining == 0 {
                        State::Trailer
                    } else {
                        State::Data
                    };
                }
                State::Data => {
                    let take = src.len().min(self.remaining as usize);
                    out.extend_from_slice(&src[..take]);
                    src.advance(take);
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.state = State::DataCr;
                    }
                }
                State::DataCr => {
                    if src[0] != b'\r' {
                        return Err(H1Error::InvalidChunk);
                    }
                    src.advance(1);
                    self.state = State::DataLf;
                }
                State::DataLf => {
                    if src[0] != b'\n' {
                        return Err(H1Error::InvalidChunk);
                    }
                    src.advance(1);
                    self.state = State::Size;
                }
                State::Trailer => {
                    if src[0] == b'\r' {
                        src.advance(1);
                        self.state = State::TrailerEndLf;
                    } else {
                        // A trailer field; skipped up to its newline.
                        self.state = State::TrailerLine;
                    }
                }
                State::TrailerLine => {
                    let lf = src.iter().position(|&b| b == b'\n');
                    match lf {
                        Some(pos) => {
                            src.advance(pos + 1);
                            self.state = State::Trailer;
                        }
                        None => {
                            src.clear();
                        }
                    }
                }
                State::TrailerEndLf => {
                    if src[0] != b'\n' {
                        return Err(H1Error::InvalidChunk);
                    }
                    src.advance(1);
                    self.state = State::End;
                    return Ok(true);
                }
                State::End => return Ok(true),
            }
        }
        Ok(self.state == State::End)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one chunk of a chunked response body.
pub fn encode_chunk(data: &[u8], dst: &mut BytesMut) {
    debug_assert!(!data.is_empty(), "zero-length chunk terminates the body");
    dst.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    dst.extend_from_slice(data);
    dst.put_slice(b"\r\n");
}

/// Write the terminating chunk.
pub fn encode_last_chunk(dst: &mut BytesMut) {
    dst.put_slice(b"0\r\n\r\n");
}
