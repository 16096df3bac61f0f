use bytes::{BufMut, Bytes, BytesMut};

use super::huffman;
use super::table::{DynamicTable, STATIC_TABLE};

/// Stateful HPACK encoder: one per connection, per direction.
///
/// Indexing policy: a field found in either table is emitted as an
/// indexed representation; otherwise it is emitted as a literal with
/// incremental indexing and added to the dynamic table. Sensitive
/// fields are emitted never-indexed. Strings use the Huffman coding
/// whenever it is strictly shorter.
#[derive(Debug)]
pub struct Encoder {
    table: DynamicTable,
    /// Size update to emit at the start of the next header block,
    /// after the peer lowered SETTINGS_HEADER_TABLE_SIZE.
    pending_resize: Option<usize>,
}

impl Encoder {
    #[must_use]
    pub fn new(max_table_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_table_size),
            pending_resize: None,
        }
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE. The resize is
    /// signaled in-band at the start of the next encoded block.
    pub fn set_max_table_size(&mut self, size: usize) {
        if size != self.table.max_size() {
            self.table.set_max_size(size);
            self.pending_resize = Some(size);
        }
    }

    #[must_use]
    pub fn table_size(&self) -> usize {
        self.table.size()
    }

    /// Encode an ordered header list into a header block fragment.
    pub fn encode<'a, I>(&mut self, headers: I) -> Bytes
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let mut dst = BytesMut::new();

        if let Some(size) = self.pending_resize.take() {
            encode_int(size, 5, 0x20, &mut dst);
        }

        for (name, value) in headers {
            self.encode_field(name, value, &mut dst);
        }

        dst.freeze()
    }

    fn encode_field(&mut self, name: &[u8], value: &[u8], dst: &mut BytesMut) {
        let (static_full, static_name) = find_static(name, value);
        if let Some(index) = static_full {
            encode_int(index, 7, 0x80, dst);
            return;
        }

        let (dynamic_full, dynamic_name) = self.table.find(name, value);
        if let Some(offset) = dynamic_full {
            encode_int(STATIC_TABLE.len() + 1 + offset, 7, 0x80, dst);
            return;
        }

        let name_index = static_name.or(dynamic_name.map(|o| STATIC_TABLE.len() + 1 + o));

        if is_sensitive(name) {
            // Never indexed: protects the value from being recoverable
            // out of a shared compression context.
            match name_index {
                Some(index) => encode_int(index, 4, 0x10, dst),
                None => {
                    encode_int(0, 4, 0x10, dst);
                    encode_string(name, dst);
                }
            }
            encode_string(value, dst);
            return;
        }

        // Literal with incremental indexing.
        match name_index {
            Some(index) => encode_int(index, 6, 0x40, dst),
            None => {
                encode_int(0, 6, 0x40, dst);
                encode_string(name, dst);
            }
        }
        encode_string(value, dst);

        self.table
            .insert(Bytes::copy_from_slice(name), Bytes::copy_from_slice(value));
    }
}

/// Exact and name-only matches in the static table, as 1-based indices.
fn find_static(name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
    let mut name_only = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.as_bytes() == name {
            if v.as_bytes() == value {
                return (Some(i + 1), Some(i + 1));
            }
            if name_only.is_none() {
                name_only = Some(i + 1);
            }
        }
    }
    (None, name_only)
}

fn is_sensitive(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"authorization") || name.eq_ignore_ascii_case(b"proxy-authorization")
}

/// N-prefix variable length integer, RFC 7541 §5.1.
fn encode_int(value: usize, prefix: u8, flags: u8, dst: &mut BytesMut) {
    let mask = ((1u16 << prefix) - 1) as usize;

    if value < mask {
        dst.put_u8(flags | value as u8);
        return;
    }

    dst.put_u8(flags | mask as u8);
    let mut rem = value - mask;
    while rem >= 128 {
        dst.put_u8((rem as u8 & 0x7f) | 0x80);
        rem >>= 7;
    }
    dst.put_u8(rem as u8);
}

fn encode_string(src: &[u8], dst: &mut BytesMut) {
    let coded_len = huffman::encoded_len(src);
    if coded_len < src.len() {
        encode_int(coded_len, 7, 0x80, dst);
        huffman::encode(src, dst);
    } else {
        encode_int(src.len(), 7, 0x00, dst);
        dst.put_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::super::decoder::Decoder;
    use super::*;

    fn roundtrip(headers: &[(&[u8], &[u8])]) {
        let mut encoder = Encoder::new(4096);
        let mut decoder = Decoder::new(4096);
        let block = encoder.encode(headers.iter().copied());
        let decoded = decoder.decode(&block).unwrap();
        let expected: Vec<(Bytes, Bytes)> = headers
            .iter()
            .map(|(n, v)| (Bytes::copy_from_slice(n), Bytes::copy_from_slice(v)))
            .collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn static_matches_become_single_octets() {
        let mut encoder = Encoder::new(4096);
        let block = encoder.encode([
            (b":method".as_slice(), b"GET".as_slice()),
            (b":path".as_slice(), b"/".as_slice()),
        ]);
        assert_eq!(&block[..], &[0x82, 0x84]);
    }

    #[test]
    fn repeated_custom_field_uses_dynamic_index() {
        let mut encoder = Encoder::new(4096);
        let first = encoder.encode([(b"x-request-id".as_slice(), b"abc123".as_slice())]);
        assert!(first.len() > 2);
        let second = encoder.encode([(b"x-request-id".as_slice(), b"abc123".as_slice())]);
        // Second occurrence hits the dynamic table: index 62 = 0xbe.
        assert_eq!(&second[..], &[0xbe]);
    }

    #[test]
    fn ordering_is_preserved_through_roundtrip() {
        roundtrip(&[
            (b":method", b"POST"),
            (b":scheme", b"https"),
            (b":path", b"/submit"),
            (b"content-type", b"application/json"),
            (b"content-length", b"42"),
            (b"x-custom", b"one"),
            (b"x-custom", b"two"),
        ]);
    }

    #[test]
    fn sensitive_fields_roundtrip_without_indexing() {
        let mut encoder = Encoder::new(4096);
        let mut decoder = Decoder::new(4096);

        let block = encoder.encode([(b"authorization".as_slice(), b"Bearer tok".as_slice())]);
        // Never-indexed representation with static name index 23.
        assert_eq!(block[0], 0x1f);
        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(&decoded[0].1[..], b"Bearer tok");
        assert_eq!(encoder.table_size(), 0);
        assert_eq!(decoder.table_size(), 0);
    }

    #[test]
    fn resize_is_signaled_in_band() {
        let mut encoder = Encoder::new(4096);
        let mut decoder = Decoder::new(4096);

        let block = encoder.encode([(b"x-a".as_slice(), b"1".as_slice())]);
        decoder.decode(&block).unwrap();

        encoder.set_max_table_size(0);
        let block = encoder.encode([(b"x-a".as_slice(), b"1".as_slice())]);
        // Block starts with a size update to zero.
        assert_eq!(block[0], 0x20);
        decoder.decode(&block).unwrap();
        assert_eq!(decoder.table_size(), 0);
    }

    #[test]
    fn binary_values_roundtrip() {
        let value: Vec<u8> = (0u8..200).collect();
        roundtrip(&[(b"x-blob", &value)]);
    }
}
