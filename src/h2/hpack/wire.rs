//! HPACK primitive representations: prefix integers and string literals
//! (RFC 7541 Sections 5.1 and 5.2).
//!
//! Decoders return `Ok(None)` when the input ends before the value does, so
//! callers can wait for the next fragment.

use super::huffman;
use crate::h2::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest string literal accepted from the peer
pub const MAX_STRING_LITERAL_SIZE: usize = 1 << 20;

/// Encode `value` with an N-bit prefix; `pattern` supplies the high bits of
/// the first byte.
pub fn encode_integer(out: &mut BytesMut, value: usize, prefix_bits: u8, pattern: u8) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        out.put_u8(pattern | value as u8);
        return;
    }
    out.put_u8(pattern | max as u8);
    let mut rest = value - max;
    while rest >= 0x80 {
        out.put_u8(0x80 | (rest & 0x7f) as u8);
        rest >>= 7;
    }
    out.put_u8(rest as u8);
}

/// Decode an N-bit prefix integer, returning the value and bytes consumed.
pub fn decode_integer(buf: &[u8], prefix_bits: u8) -> Result<Option<(usize, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let max = (1usize << prefix_bits) - 1;
    let mut value = first as usize & max;
    if value < max {
        return Ok(Some((value, 1)));
    }

    let mut shift = 0u32;
    for (i, &byte) in buf[1..].iter().enumerate() {
        let chunk = (byte & 0x7f) as usize;
        if shift > 28 {
            return Err(Error::Compression("integer overflow".to_string()));
        }
        value += chunk << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 2)));
        }
    }
    Ok(None)
}

/// Encode a string literal, Huffman-coded when that is shorter.
pub fn encode_string(out: &mut BytesMut, data: &[u8], allow_huffman: bool) {
    let huffman_len = huffman::encoded_len(data);
    if allow_huffman && huffman_len < data.len() {
        encode_integer(out, huffman_len, 7, 0x80);
        huffman::encode(data, out);
    } else {
        encode_integer(out, data.len(), 7, 0x00);
        out.put_slice(data);
    }
}

/// Decode a string literal, returning the decoded bytes and bytes consumed.
pub fn decode_string(buf: &[u8]) -> Result<Option<(Bytes, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    let Some((len, header_len)) = decode_integer(buf, 7)? else {
        return Ok(None);
    };
    if len > MAX_STRING_LITERAL_SIZE {
        return Err(Error::Compression(format!("string literal of {} bytes", len)));
    }
    let end = header_len + len;
    if buf.len() < end {
        return Ok(None);
    }
    let raw = &buf[header_len..end];
    let decoded = if first & 0x80 != 0 {
        huffman::decode(raw)?
    } else {
        Bytes::copy_from_slice(raw)
    };
    Ok(Some((decoded, end)))
}
