//! HPACK static table (RFC 7541 Appendix A)
//!
//! Built once per process and handed out as `&'static StaticTable`.

use super::header_table::HpackEntry;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Number of static table entries; the dynamic table starts right after.
pub const STATIC_TABLE_LEN: usize = 61;

static STATIC_ENTRIES: [(&[u8], &[u8]); STATIC_TABLE_LEN] = [
    (b":authority", b""),
    (b":method", b"GET"),
    (b":method", b"POST"),
    (b":path", b"/"),
    (b":path", b"/index.html"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"200"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"304"),
    (b":status", b"400"),
    (b":status", b"404"),
    (b":status", b"500"),
    (b"accept-charset", b""),
    (b"accept-encoding", b"gzip, deflate"),
    (b"accept-language", b""),
    (b"accept-ranges", b""),
    (b"accept", b""),
    (b"access-control-allow-origin", b""),
    (b"age", b""),
    (b"allow", b""),
    (b"authorization", b""),
    (b"cache-control", b""),
    (b"content-disposition", b""),
    (b"content-encoding", b""),
    (b"content-language", b""),
    (b"content-length", b""),
    (b"content-location", b""),
    (b"content-range", b""),
    (b"content-type", b""),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"expect", b""),
    (b"expires", b""),
    (b"from", b""),
    (b"host", b""),
    (b"if-match", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"if-range", b""),
    (b"if-unmodified-since", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"max-forwards", b""),
    (b"proxy-authenticate", b""),
    (b"proxy-authorization", b""),
    (b"range", b""),
    (b"referer", b""),
    (b"refresh", b""),
    (b"retry-after", b""),
    (b"server", b""),
    (b"set-cookie", b""),
    (b"strict-transport-security", b""),
    (b"transfer-encoding", b""),
    (b"user-agent", b""),
    (b"vary", b""),
    (b"via", b""),
    (b"www-authenticate", b""),
];

/// The read-only half of the HPACK index space
#[derive(Debug)]
pub struct StaticTable {
    entries: Vec<HpackEntry>,
    // Lowest index for each name; entries sharing a name are contiguous.
    by_name: HashMap<&'static [u8], usize>,
}

impl StaticTable {
    fn build() -> Self {
        let mut entries = Vec::with_capacity(STATIC_TABLE_LEN);
        let mut by_name = HashMap::with_capacity(STATIC_TABLE_LEN);
        for (i, &(name, value)) in STATIC_ENTRIES.iter().enumerate() {
            let index = i + 1;
            entries.push(HpackEntry::new(
                Bytes::from_static(name),
                Bytes::from_static(value),
                index as u64,
            ));
            by_name.entry(name).or_insert(index);
        }
        StaticTable { entries, by_name }
    }

    /// Entry at a 1-based static index
    pub fn get(&self, index: usize) -> Option<&HpackEntry> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Lowest static index whose name matches
    pub fn index_of_name(&self, name: &[u8]) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Static index of an exact name/value match
    pub fn index_of(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        let first = self.index_of_name(name)?;
        self.entries[first - 1..]
            .iter()
            .take_while(|e| e.name() == name)
            .position(|e| e.value() == value)
            .map(|offset| first + offset)
    }

    /// Number of entries (always 61)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Never empty; provided for API symmetry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide static table
pub fn static_table() -> &'static StaticTable {
    static TABLE: OnceLock<StaticTable> = OnceLock::new();
    TABLE.get_or_init(StaticTable::build)
}
