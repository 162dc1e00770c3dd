//! HPACK decoder
//!
//! Header blocks may be split across HEADERS and CONTINUATION frames, so the
//! decoder works one fragment at a time: every complete representation in a
//! fragment is decoded and reported immediately, and a trailing partial
//! representation is held until the next fragment arrives.

use super::header_table::HpackHeaderTable;
use super::static_table::STATIC_TABLE_LEN;
use super::wire::{decode_integer, decode_string};
use crate::h2::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use tracing::trace;

enum Representation {
    Header { name: Bytes, value: Bytes },
    SizeUpdate(usize),
}

/// Decompresses header blocks against its own copy of the peer's table
#[derive(Debug)]
pub struct HpackDecoder {
    table: HpackHeaderTable,
    // Bytes of a representation cut off at the end of the last fragment.
    partial: BytesMut,
    // A header field has been decoded in the current block.
    seen_header: bool,
}

impl HpackDecoder {
    pub fn new() -> Self {
        HpackDecoder {
            table: HpackHeaderTable::new(),
            partial: BytesMut::new(),
            seen_header: false,
        }
    }

    pub fn table(&self) -> &HpackHeaderTable {
        &self.table
    }

    /// Apply our own SETTINGS_HEADER_TABLE_SIZE once the peer acknowledged it
    pub fn apply_header_table_size_setting(&mut self, size: usize) {
        self.table.set_settings_header_table_size(size);
    }

    /// Decode one header block fragment, calling `on_header` for each field
    /// in order.
    pub fn decode_fragment<F>(&mut self, fragment: &[u8], mut on_header: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let owned;
        let input: &[u8] = if self.partial.is_empty() {
            fragment
        } else {
            self.partial.extend_from_slice(fragment);
            owned = self.partial.split().freeze();
            &owned
        };

        let mut pos = 0;
        while pos < input.len() {
            let Some((repr, used)) = self.decode_representation(&input[pos..])? else {
                break;
            };
            pos += used;
            match repr {
                Representation::Header { name, value } => {
                    self.seen_header = true;
                    on_header(&name, &value);
                }
                Representation::SizeUpdate(size) => {
                    if self.seen_header {
                        return Err(Error::Compression(
                            "dynamic table size update after header field".to_string(),
                        ));
                    }
                    self.table.set_max_size(size)?;
                    trace!(size, "hpack decoder table size update");
                }
            }
        }

        self.partial.extend_from_slice(&input[pos..]);
        Ok(())
    }

    /// Finish the current header block
    pub fn end_block(&mut self) -> Result<()> {
        self.seen_header = false;
        if !self.partial.is_empty() {
            let left = self.partial.len();
            self.partial.clear();
            return Err(Error::Compression(format!(
                "header block ended inside a representation ({} bytes left)",
                left
            )));
        }
        Ok(())
    }

    fn decode_representation(&mut self, buf: &[u8]) -> Result<Option<(Representation, usize)>> {
        let first = buf[0];

        if first & 0x80 != 0 {
            let Some((index, used)) = decode_integer(buf, 7)? else {
                return Ok(None);
            };
            let entry = self.lookup(index)?;
            let repr = Representation::Header {
                name: entry.name_bytes(),
                value: entry.value_bytes(),
            };
            return Ok(Some((repr, used)));
        }

        if first & 0xe0 == 0x20 {
            let Some((size, used)) = decode_integer(buf, 5)? else {
                return Ok(None);
            };
            return Ok(Some((Representation::SizeUpdate(size), used)));
        }

        // Literal: with incremental indexing (01), never indexed (0001) or
        // without indexing (0000).
        let (prefix_bits, index_it) = if first & 0xc0 == 0x40 { (6, true) } else { (4, false) };

        let Some((name_index, mut used)) = decode_integer(buf, prefix_bits)? else {
            return Ok(None);
        };
        let name = if name_index == 0 {
            let Some((name, n)) = decode_string(&buf[used..])? else {
                return Ok(None);
            };
            used += n;
            name
        } else {
            self.lookup(name_index)?.name_bytes()
        };
        let Some((value, n)) = decode_string(&buf[used..])? else {
            return Ok(None);
        };
        used += n;

        if index_it {
            self.table.try_add_entry(name.clone(), value.clone());
        }
        Ok(Some((Representation::Header { name, value }, used)))
    }

    fn lookup(&self, index: usize) -> Result<&super::HpackEntry> {
        self.table.get_by_index(index).ok_or_else(|| {
            Error::Compression(format!(
                "invalid index {} (static {} + dynamic {})",
                index,
                STATIC_TABLE_LEN,
                self.table.len()
            ))
        })
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut HpackDecoder, block: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        decoder.decode_fragment(block, |n, v| out.push((n.to_vec(), v.to_vec())))?;
        decoder.end_block()?;
        Ok(out)
    }

    #[test]
    fn test_rfc7541_c4_requests_with_huffman() {
        let mut decoder = HpackDecoder::new();

        let first = [
            0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ];
        let headers = decode_all(&mut decoder, &first).unwrap();
        assert_eq!(headers[3], (b":authority".to_vec(), b"www.example.com".to_vec()));
        assert_eq!(decoder.table().size(), 57);

        let second = [0x82, 0x86, 0x84, 0xbe, 0x58, 0x86, 0xa8, 0xeb, 0x10, 0x64, 0x9c, 0xbf];
        let headers = decode_all(&mut decoder, &second).unwrap();
        assert_eq!(headers[3].1, b"www.example.com".to_vec());
        assert_eq!(headers[4], (b"cache-control".to_vec(), b"no-cache".to_vec()));
        assert_eq!(decoder.table().size(), 110);
    }

    #[test]
    fn test_fragments_split_mid_representation() {
        let block = [
            0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff,
        ];
        for split in 1..block.len() {
            let mut decoder = HpackDecoder::new();
            let mut names = Vec::new();
            decoder
                .decode_fragment(&block[..split], |n, _| names.push(n.to_vec()))
                .unwrap();
            decoder
                .decode_fragment(&block[split..], |n, _| names.push(n.to_vec()))
                .unwrap();
            decoder.end_block().unwrap();
            assert_eq!(names.len(), 4, "split at {}", split);
        }
    }

    #[test]
    fn test_truncated_block_is_error() {
        let mut decoder = HpackDecoder::new();
        decoder.decode_fragment(&[0x82, 0x41, 0x8c, 0xf1], |_, _| {}).unwrap();
        assert!(matches!(decoder.end_block(), Err(Error::Compression(_))));
    }

    #[test]
    fn test_invalid_index_is_error() {
        let mut decoder = HpackDecoder::new();
        assert!(decode_all(&mut decoder, &[0x80]).is_err());

        let mut decoder = HpackDecoder::new();
        assert!(decode_all(&mut decoder, &[0xbe]).is_err());
    }

    #[test]
    fn test_size_update_rules() {
        let mut decoder = HpackDecoder::new();
        // Above the default 4096 bound.
        assert!(decode_all(&mut decoder, &[0x3f, 0xe2, 0x1f]).is_err());

        let mut decoder = HpackDecoder::new();
        assert!(decode_all(&mut decoder, &[0x82, 0x20]).is_err());

        let mut decoder = HpackDecoder::new();
        let headers = decode_all(&mut decoder, &[0x20, 0x82]).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(decoder.table().max_size(), 0);
    }
}
