//! HPACK encoder

use super::header_table::HpackHeaderTable;
use super::wire::{encode_integer, encode_string};
use super::Header;
use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Compresses header lists into header blocks, indexing into its own
/// dynamic table as the peer's decoder will.
#[derive(Debug)]
pub struct HpackEncoder {
    table: HpackHeaderTable,
    // Smallest and final table size announced since the last block.
    pending_size_update: Option<(usize, usize)>,
    use_huffman: bool,
}

impl HpackEncoder {
    pub fn new() -> Self {
        HpackEncoder {
            table: HpackHeaderTable::new(),
            pending_size_update: None,
            use_huffman: true,
        }
    }

    /// Disable Huffman coding of string literals
    pub fn disable_huffman(&mut self) {
        self.use_huffman = false;
    }

    pub fn table(&self) -> &HpackHeaderTable {
        &self.table
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE.
    ///
    /// The table is resized immediately; the matching dynamic table size
    /// update goes out at the start of the next header block.
    pub fn apply_header_table_size_setting(&mut self, size: usize) {
        if size == self.table.max_size() && size == self.table.settings_size_bound() {
            return;
        }
        self.table.set_settings_header_table_size(size);
        if self.table.set_max_size(size).is_err() {
            return;
        }
        let smallest = match self.pending_size_update {
            Some((smallest, _)) => smallest.min(size),
            None => size,
        };
        self.pending_size_update = Some((smallest, size));
        trace!(size, "hpack encoder table size changed");
    }

    /// Encode a complete header block
    pub fn encode(&mut self, headers: &[Header]) -> Bytes {
        let mut out = BytesMut::with_capacity(headers.len() * 16);

        if let Some((smallest, last)) = self.pending_size_update.take() {
            if smallest < last {
                encode_integer(&mut out, smallest, 5, 0x20);
            }
            encode_integer(&mut out, last, 5, 0x20);
        }

        for header in headers {
            self.encode_header(&mut out, header);
        }
        out.freeze()
    }

    fn encode_header(&mut self, out: &mut BytesMut, header: &Header) {
        if is_sensitive(header) {
            self.encode_literal(out, header, 4, 0x10);
            return;
        }

        if let Some(index) = self.table.get_by_name_and_value(&header.name, &header.value) {
            encode_integer(out, index, 7, 0x80);
            return;
        }

        self.encode_literal(out, header, 6, 0x40);
        self.table
            .try_add_entry(header.name.clone(), header.value.clone());
    }

    fn encode_literal(&self, out: &mut BytesMut, header: &Header, prefix_bits: u8, pattern: u8) {
        match self.table.get_by_name(&header.name) {
            Some(index) => encode_integer(out, index, prefix_bits, pattern),
            None => {
                encode_integer(out, 0, prefix_bits, pattern);
                encode_string(out, &header.name, self.use_huffman);
            }
        }
        encode_string(out, &header.value, self.use_huffman);
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_sensitive(header: &Header) -> bool {
    match &header.name[..] {
        b"authorization" | b"proxy-authorization" => true,
        b"cookie" => header.value.len() < 20,
        _ => false,
    }
}
