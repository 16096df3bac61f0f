use std::collections::VecDeque;

use bytes::Bytes;

/// Per-entry overhead accounting for the table size estimate, per RFC
/// 7541 §4.1.
const ENTRY_OVERHEAD: usize = 32;

/// The 61 predefined entries of RFC 7541 Appendix A.
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Look up a static table entry by 1-based HPACK index.
#[must_use]
pub fn static_entry(index: usize) -> Option<(&'static str, &'static str)> {
    if (1..=STATIC_TABLE.len()).contains(&index) {
        Some(STATIC_TABLE[index - 1])
    } else {
        None
    }
}

/// A dynamic HPACK table with FIFO eviction.
///
/// Entries are addressed newest-first: HPACK index 62 is the most
/// recently inserted entry. The table belongs to exactly one endpoint
/// direction of one connection.
#[derive(Debug)]
pub struct DynamicTable {
    entries: VecDeque<Entry>,
    size: usize,
    max_size: usize,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: Bytes,
    pub value: Bytes,
}

impl Entry {
    fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

impl DynamicTable {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Estimated size in octets, per the RFC 7541 accounting.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get an entry by 0-based offset (0 = newest).
    #[must_use]
    pub fn get(&self, offset: usize) -> Option<&Entry> {
        self.entries.get(offset)
    }

    /// Find the 0-based offset of a full (name, value) match, or of a
    /// name-only match.
    #[must_use]
    pub fn find(&self, name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
        let mut name_only = None;
        for (offset, entry) in self.entries.iter().enumerate() {
            if entry.name == name {
                if entry.value == value {
                    return (Some(offset), Some(offset));
                }
                if name_only.is_none() {
                    name_only = Some(offset);
                }
            }
        }
        (None, name_only)
    }

    /// Insert an entry, evicting oldest entries until it fits.
    ///
    /// An entry larger than the whole table clears the table and is not
    /// added, per RFC 7541 §4.4.
    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry = Entry { name, value };
        let entry_size = entry.size();

        if entry_size > self.max_size {
            tracing::trace!(entry_size, max = self.max_size, "oversized entry clears table");
            self.entries.clear();
            self.size = 0;
            return;
        }

        while self.size + entry_size > self.max_size {
            let evicted = self.entries.pop_back().expect("size accounting broken");
            self.size -= evicted.size();
        }

        self.size += entry_size;
        self.entries.push_front(entry);
    }

    /// Change the maximum size, evicting as needed.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            let evicted = self.entries.pop_back().expect("size accounting broken");
            self.size -= evicted.size();
        }
    }
}
