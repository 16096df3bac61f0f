use std::fmt;

use bytes::Bytes;

use super::huffman;
use super::table::{DynamicTable, static_entry};

/// Errors raised while decoding a header block. All of them are fatal
/// for the connection (COMPRESSION_ERROR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderError {
    /// An index pointed outside the static and dynamic tables.
    InvalidIndex,

    /// A variable-length integer exceeded the implementation limit.
    IntegerOverflow,

    /// The block ended in the middle of a representation.
    UnexpectedEndOfBlock,

    /// A Huffman-coded string was malformed.
    InvalidHuffmanCode,

    /// A dynamic table size update exceeded the limit negotiated via
    /// SETTINGS_HEADER_TABLE_SIZE.
    SizeUpdateTooLarge,
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIndex => f.write_str("index out of table bounds"),
            Self::IntegerOverflow => f.write_str("integer representation overflow"),
            Self::UnexpectedEndOfBlock => f.write_str("truncated header block"),
            Self::InvalidHuffmanCode => f.write_str("invalid huffman coded string"),
            Self::SizeUpdateTooLarge => f.write_str("dynamic table size update above limit"),
        }
    }
}

impl std::error::Error for DecoderError {}

/// Stateful HPACK decoder: one per connection, per direction.
#[derive(Debug)]
pub struct Decoder {
    table: DynamicTable,
    /// Upper bound for size updates, from SETTINGS_HEADER_TABLE_SIZE.
    max_size_limit: usize,
}

impl Decoder {
    #[must_use]
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            max_size_limit: max_table_size,
        }
    }

    /// Raise (or lower) the limit advertised via SETTINGS.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_size_limit = size;
        if self.table.max_size() > size {
            self.table.set_max_size(size);
        }
    }

    #[must_use]
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Decode one complete header block into an ordered header list.
    pub fn decode(&mut self, src: &[u8]) -> Result<Vec<(Bytes, Bytes)>, DecoderError> {
        let mut headers = Vec::new();
        let mut pos = 0;

        while pos < src.len() {
            let byte = src[pos];

            if byte & 0x80 == 0x80 {
                // Indexed header field.
                let index = decode_int(src, &mut pos, 7)?;
                headers.push(self.lookup(index)?);
            } else if byte & 0xc0 == 0x40 {
                // Literal with incremental indexing.
                let (name, value) = self.read_literal(src, &mut pos, 6)?;
                self.table.insert(name.clone(), value.clone());
                headers.push((name, value));
            } else if byte & 0xe0 == 0x20 {
                // Dynamic table size update.
                let size = decode_int(src, &mut pos, 5)?;
                if size > self.max_size_limit {
                    return Err(DecoderError::SizeUpdateTooLarge);
                }
                tracing::trace!(size, "dynamic table size update");
                self.table.set_max_size(size);
            } else {
                // Literal without indexing (0x0) or never indexed (0x10);
                // both leave the table untouched.
                let (name, value) = self.read_literal(src, &mut pos, 4)?;
                headers.push((name, value));
            }
        }

        Ok(headers)
    }

    fn lookup(&self, index: usize) -> Result<(Bytes, Bytes), DecoderError> {
        if index == 0 {
            return Err(DecoderError::InvalidIndex);
        }
        if let Some((name, value)) = static_entry(index) {
            return Ok((
                Bytes::from_static(name.as_bytes()),
                Bytes::from_static(value.as_bytes()),
            ));
        }
        let entry = self
            .table
            .get(index - static_len() - 1)
            .ok_or(DecoderError::InvalidIndex)?;
        Ok((entry.name.clone(), entry.value.clone()))
    }

    fn read_literal(
        &self,
        src: &[u8],
        pos: &mut usize,
        prefix: u8,
    ) -> Result<(Bytes, Bytes), DecoderError> {
        let name_index = decode_int(src, pos, prefix)?;
        let name = if name_index == 0 {
            read_string(src, pos)?
        } else {
            self.lookup(name_index)?.0
        };
        let value = read_string(src, pos)?;
        Ok((name, value))
    }
}

fn static_len() -> usize {
    super::table::STATIC_TABLE.len()
}

/// N-prefix variable length integer, RFC 7541 §5.1.
fn decode_int(src: &[u8], pos: &mut usize, prefix: u8) -> Result<usize, DecoderError> {
    let mask = ((1u16 << prefix) - 1) as u8;

    let first = *src.get(*pos).ok_or(DecoderError::UnexpectedEndOfBlock)?;
    *pos += 1;

    let mut value = (first & mask) as usize;
    if value < mask as usize {
        return Ok(value);
    }

    let mut shift = 0u32;
    loop {
        let byte = *src.get(*pos).ok_or(DecoderError::UnexpectedEndOfBlock)?;
        *pos += 1;

        if shift > 28 {
            return Err(DecoderError::IntegerOverflow);
        }
        value = value
            .checked_add(((byte & 0x7f) as usize) << shift)
            .ok_or(DecoderError::IntegerOverflow)?;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_string(src: &[u8], pos: &mut usize) -> Result<Bytes, DecoderError> {
    let first = *src.get(*pos).ok_or(DecoderError::UnexpectedEndOfBlock)?;
    let huffman_coded = first & 0x80 == 0x80;
    let len = decode_int(src, pos, 7)?;

    if src.len() - *pos < len {
        return Err(DecoderError::UnexpectedEndOfBlock);
    }
    let raw = &src[*pos..*pos + len];
    *pos += len;

    if huffman_coded {
        Ok(Bytes::from(huffman::decode(raw)?))
    } else {
        Ok(Bytes::copy_from_slice(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_indexed_static_fields() {
        let mut decoder = Decoder::new(4096);
        // 0x82 = :method GET, 0x86 = :scheme http, 0x84 = :path /
        let headers = decoder.decode(&[0x82, 0x86, 0x84]).unwrap();
        assert_eq!(
            headers,
            vec![
                (Bytes::from_static(b":method"), Bytes::from_static(b"GET")),
                (Bytes::from_static(b":scheme"), Bytes::from_static(b"http")),
                (Bytes::from_static(b":path"), Bytes::from_static(b"/")),
            ]
        );
    }

    #[test]
    fn rfc7541_c_2_1_literal_with_indexing() {
        let mut decoder = Decoder::new(4096);
        let block = [
            0x40, 0x0a, b'c', b'u', b's', b't', b'o', b'm', b'-', b'k', b'e', b'y', 0x0d, b'c',
            b'u', b's', b't', b'o', b'm', b'-', b'h', b'e', b'a', b'd', b'e', b'r',
        ];
        let headers = decoder.decode(&block).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(&headers[0].0[..], b"custom-key");
        assert_eq!(&headers[0].1[..], b"custom-header");
        assert_eq!(decoder.table_size(), 55);

        // Entry is now addressable as index 62.
        let headers = decoder.decode(&[0xbe]).unwrap();
        assert_eq!(&headers[0].0[..], b"custom-key");
    }

    #[test]
    fn rfc7541_c_4_1_huffman_request() {
        let mut decoder = Decoder::new(4096);
        let block = [
            0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab,
            0x90, 0xf4, 0xff,
        ];
        let headers = decoder.decode(&block).unwrap();
        assert_eq!(headers.len(), 4);
        assert_eq!(&headers[3].0[..], b":authority");
        assert_eq!(&headers[3].1[..], b"www.example.com");
    }

    #[test]
    fn invalid_index_is_fatal() {
        let mut decoder = Decoder::new(4096);
        // Index 70 with an empty dynamic table.
        assert_eq!(decoder.decode(&[0xc6]), Err(DecoderError::InvalidIndex));
        // Index 0 is never valid.
        assert_eq!(decoder.decode(&[0x80]), Err(DecoderError::InvalidIndex));
    }

    #[test]
    fn truncated_block_is_rejected() {
        let mut decoder = Decoder::new(4096);
        assert_eq!(
            decoder.decode(&[0x40, 0x0a, b'c']),
            Err(DecoderError::UnexpectedEndOfBlock)
        );
    }

    #[test]
    fn size_update_above_settings_limit_is_rejected() {
        let mut decoder = Decoder::new(100);
        // 0x3f + varint continuation: update to 4096.
        assert_eq!(
            decoder.decode(&[0x3f, 0xe1, 0x1f]),
            Err(DecoderError::SizeUpdateTooLarge)
        );
    }
}
