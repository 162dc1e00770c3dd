//! HPACK header compression (RFC 7541)
//!
//! The dynamic half of the index space lives in [`HpackHeaderTable`]; the
//! static half is a process-wide read-only table shared by every connection.
//! [`HpackEncoder`] and [`HpackDecoder`] each own one table and keep it in
//! lock-step with the peer's copy.

pub mod decoder;
pub mod encoder;
pub mod header_table;
pub mod huffman;
pub mod static_table;
pub mod wire;

pub use decoder::HpackDecoder;
pub use encoder::HpackEncoder;
pub use header_table::{HpackEntry, HpackHeaderTable};

use bytes::Bytes;

/// Per-entry overhead added to `name.len() + value.len()` (RFC 7541 Section 4.1)
pub const ENTRY_OVERHEAD: usize = 32;

/// A single header field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Header {
    /// Header name (lowercase on the wire)
    pub name: Bytes,
    /// Header value
    pub value: Bytes,
}

impl Header {
    /// Create a new header field
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether this is a pseudo-header (`:method`, `:status`, ...)
    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }

    /// Size counted against the header table
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

/// Convenience for building header lists from string pairs
pub fn headers<'a, I>(pairs: I) -> Vec<Header>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(name, value)| Header::new(Bytes::copy_from_slice(name.as_bytes()), Bytes::copy_from_slice(value.as_bytes())))
        .collect()
}
