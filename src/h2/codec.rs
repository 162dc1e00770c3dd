//! Frame wire format
//!
//! Encoding is a set of stateless functions, one per frame type. Decoding is
//! incremental: bytes are fed in as they arrive and complete frames are
//! split off the front of the read buffer.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::CONNECTION_PREFACE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const FRAME_HEADER_SIZE: usize = 9;

/// Clears the reserved high bit of stream ids and increments
const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;

/// Incremental frame reader plus the stateless frame encoders
#[derive(Debug)]
pub struct FrameCodec {
    /// Received bytes not yet split into frames
    read_buffer: BytesMut,
}

impl FrameCodec {
    pub fn new() -> Self {
        FrameCodec {
            read_buffer: BytesMut::with_capacity(16 * 1024),
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.read_buffer.extend_from_slice(data);
    }

    /// Bytes held back because they do not yet form a whole frame
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }

    /// Consume the client connection preface.
    ///
    /// Returns `Ok(false)` while the buffered bytes are a correct but
    /// incomplete prefix of the preface.
    pub fn take_preface(&mut self) -> Result<bool> {
        let n = self.read_buffer.len().min(CONNECTION_PREFACE.len());
        if self.read_buffer[..n] != CONNECTION_PREFACE[..n] {
            return Err(Error::MissingPreface);
        }
        if n < CONNECTION_PREFACE.len() {
            return Ok(false);
        }
        self.read_buffer.advance(CONNECTION_PREFACE.len());
        Ok(true)
    }

    /// Split the next complete frame off the read buffer.
    ///
    /// A declared length above `max_frame_size` is a FRAME_SIZE_ERROR even
    /// before the payload has arrived.
    pub fn next_frame(&mut self, max_frame_size: u32) -> Result<Option<(FrameHeader, Bytes)>> {
        if self.read_buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&self.read_buffer[..FRAME_HEADER_SIZE]);
        let header = Self::decode_header(&raw);

        if header.length > max_frame_size as usize {
            return Err(Error::FrameSize(format!(
                "{} byte frame exceeds limit of {}",
                header.length, max_frame_size
            )));
        }
        if self.read_buffer.len() < FRAME_HEADER_SIZE + header.length {
            return Ok(None);
        }

        self.read_buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.read_buffer.split_to(header.length).freeze();
        Ok(Some((header, payload)))
    }

    pub fn encode_header(frame_type: FrameType, flags: FrameFlags, stream_id: u32, length: usize) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[..4].copy_from_slice(&(((length as u32) << 8) | u32::from(frame_type.as_u8())).to_be_bytes());
        out[4] = flags.as_u8();
        out[5..].copy_from_slice(&(stream_id & STREAM_ID_MASK).to_be_bytes());
        out
    }

    /// The reserved bit of the stream id is dropped
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> FrameHeader {
        let mut buf = &bytes[..];
        let length = buf.get_uint(3) as usize;
        let frame_type = buf.get_u8();
        let flags = FrameFlags::from_u8(buf.get_u8());
        FrameHeader {
            length,
            frame_type,
            flags,
            stream_id: buf.get_u32() & STREAM_ID_MASK,
        }
    }

    /// Parse a frame payload according to its header.
    ///
    /// Errors returned here are connection errors.
    pub fn decode_payload(header: &FrameHeader, mut payload: Bytes) -> Result<Frame> {
        let Some(kind) = header.kind() else {
            return Ok(Frame::Unknown {
                header: *header,
                payload,
            });
        };
        let flags = header.flags;
        let stream_id = header.stream_id;

        let frame = match kind {
            FrameType::Data => {
                require_stream(kind, stream_id)?;
                let padding = strip_padding(kind, flags, &mut payload)?;
                Frame::Data(DataFrame {
                    stream_id,
                    data: payload,
                    end_stream: flags.is_end_stream(),
                    padding,
                })
            }
            FrameType::Headers => {
                require_stream(kind, stream_id)?;
                let padding = strip_padding(kind, flags, &mut payload)?;
                let priority = if flags.is_priority() {
                    if payload.len() < 5 {
                        return Err(Error::FrameSize("HEADERS priority fields truncated".to_string()));
                    }
                    Some(read_priority(&mut payload))
                } else {
                    None
                };
                Frame::Headers(HeadersFrame {
                    stream_id,
                    header_block: payload,
                    end_stream: flags.is_end_stream(),
                    end_headers: flags.is_end_headers(),
                    priority,
                    padding,
                })
            }
            FrameType::Priority => {
                require_stream(kind, stream_id)?;
                require_len(kind, &payload, 5)?;
                Frame::Priority(PriorityFrame {
                    stream_id,
                    priority: read_priority(&mut payload),
                })
            }
            FrameType::RstStream => {
                require_stream(kind, stream_id)?;
                require_len(kind, &payload, 4)?;
                Frame::RstStream(RstStreamFrame {
                    stream_id,
                    error_code: ErrorCode::from_wire(payload.get_u32()),
                })
            }
            FrameType::Settings => {
                require_connection(kind, stream_id)?;
                if flags.is_ack() {
                    require_len(kind, &payload, 0)?;
                    Frame::Settings(SettingsFrame::ack())
                } else {
                    if payload.len() % 6 != 0 {
                        return Err(Error::FrameSize(format!("SETTINGS length {}", payload.len())));
                    }
                    let mut entries = Vec::with_capacity(payload.len() / 6);
                    while payload.has_remaining() {
                        entries.push((payload.get_u16(), payload.get_u32()));
                    }
                    Frame::Settings(SettingsFrame::new(entries))
                }
            }
            FrameType::PushPromise => {
                require_stream(kind, stream_id)?;
                strip_padding(kind, flags, &mut payload)?;
                if payload.len() < 4 {
                    return Err(Error::FrameSize("PUSH_PROMISE truncated".to_string()));
                }
                let promised_stream_id = payload.get_u32() & STREAM_ID_MASK;
                Frame::PushPromise(PushPromiseFrame {
                    stream_id,
                    promised_stream_id,
                    header_block: payload,
                    end_headers: flags.is_end_headers(),
                })
            }
            FrameType::Ping => {
                require_connection(kind, stream_id)?;
                require_len(kind, &payload, 8)?;
                let mut data = [0u8; 8];
                payload.copy_to_slice(&mut data);
                Frame::Ping(PingFrame {
                    ack: flags.is_ack(),
                    data,
                })
            }
            FrameType::Goaway => {
                require_connection(kind, stream_id)?;
                if payload.len() < 8 {
                    return Err(Error::FrameSize("GOAWAY truncated".to_string()));
                }
                let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
                let error_code = ErrorCode::from_wire(payload.get_u32());
                Frame::Goaway(GoawayFrame::new(last_stream_id, error_code, payload))
            }
            FrameType::WindowUpdate => {
                require_len(kind, &payload, 4)?;
                Frame::WindowUpdate(WindowUpdateFrame::new(stream_id, payload.get_u32() & STREAM_ID_MASK))
            }
            FrameType::Continuation => {
                require_stream(kind, stream_id)?;
                Frame::Continuation(ContinuationFrame {
                    stream_id,
                    header_block: payload,
                    end_headers: flags.is_end_headers(),
                })
            }
        };
        Ok(frame)
    }

    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.padding.is_some() {
            flags.set(FrameFlags::PADDED);
        }
        let mut out = start_frame(FrameType::Data, flags, frame.stream_id, frame.flow_controlled_len());
        put_padded(&mut out, frame.padding, |out| out.put_slice(&frame.data));
        out.freeze()
    }

    /// HEADERS with the first block fragment; PRIORITY and PADDED are set
    /// from the optional fields.
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let mut flags = FrameFlags::empty();
        let mut len = frame.header_block.len();
        for (on, flag) in [
            (frame.end_stream, FrameFlags::END_STREAM),
            (frame.end_headers, FrameFlags::END_HEADERS),
            (frame.priority.is_some(), FrameFlags::PRIORITY),
            (frame.padding.is_some(), FrameFlags::PADDED),
        ] {
            if on {
                flags.set(flag);
            }
        }
        if frame.priority.is_some() {
            len += 5;
        }
        len += frame.padding.map_or(0, |pad| 1 + pad as usize);

        let mut out = start_frame(FrameType::Headers, flags, frame.stream_id, len);
        put_padded(&mut out, frame.padding, |out| {
            if let Some(priority) = &frame.priority {
                put_priority(out, priority);
            }
            out.put_slice(&frame.header_block);
        });
        out.freeze()
    }

    pub fn encode_continuation_frame(frame: &ContinuationFrame) -> Bytes {
        let flags = flag_if(frame.end_headers, FrameFlags::END_HEADERS);
        let mut out = start_frame(FrameType::Continuation, flags, frame.stream_id, frame.header_block.len());
        out.put_slice(&frame.header_block);
        out.freeze()
    }

    /// Entries go out in the order given, 6 bytes each
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let entries: &[(u16, u32)] = if frame.ack { &[] } else { &frame.entries };
        let flags = flag_if(frame.ack, FrameFlags::ACK);
        let mut out = start_frame(FrameType::Settings, flags, 0, entries.len() * 6);
        for &(id, value) in entries {
            out.put_u16(id);
            out.put_u32(value);
        }
        out.freeze()
    }

    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let mut out = start_frame(FrameType::Ping, flag_if(frame.ack, FrameFlags::ACK), 0, 8);
        out.put_slice(&frame.data);
        out.freeze()
    }

    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let mut out = start_frame(FrameType::Goaway, FrameFlags::empty(), 0, 8 + frame.debug_data.len());
        out.put_u32(frame.last_stream_id & STREAM_ID_MASK);
        out.put_u32(frame.error_code.as_u32());
        out.put_slice(&frame.debug_data);
        out.freeze()
    }

    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut out = start_frame(FrameType::WindowUpdate, FrameFlags::empty(), frame.stream_id, 4);
        out.put_u32(frame.size_increment & STREAM_ID_MASK);
        out.freeze()
    }

    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut out = start_frame(FrameType::RstStream, FrameFlags::empty(), frame.stream_id, 4);
        out.put_u32(frame.error_code.as_u32());
        out.freeze()
    }

    pub fn encode_priority_frame(frame: &PriorityFrame) -> Bytes {
        let mut out = start_frame(FrameType::Priority, FrameFlags::empty(), frame.stream_id, 5);
        put_priority(&mut out, &frame.priority);
        out.freeze()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Buffer sized for the whole frame with the 9-byte header already written
fn start_frame(kind: FrameType, flags: FrameFlags, stream_id: u32, payload_len: usize) -> BytesMut {
    let mut out = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
    out.put_slice(&FrameCodec::encode_header(kind, flags, stream_id, payload_len));
    out
}

/// Pad length byte, body, then zeroed padding
fn put_padded(out: &mut BytesMut, padding: Option<u8>, body: impl FnOnce(&mut BytesMut)) {
    if let Some(pad) = padding {
        out.put_u8(pad);
    }
    body(out);
    if let Some(pad) = padding {
        out.put_bytes(0, pad as usize);
    }
}

fn flag_if(on: bool, flag: u8) -> FrameFlags {
    FrameFlags::from_u8(if on { flag } else { 0 })
}

fn put_priority(out: &mut BytesMut, priority: &PrioritySpec) {
    let exclusive = if priority.exclusive { !STREAM_ID_MASK } else { 0 };
    out.put_u32((priority.stream_dependency & STREAM_ID_MASK) | exclusive);
    out.put_u8(priority.weight);
}

fn read_priority(payload: &mut Bytes) -> PrioritySpec {
    let word = payload.get_u32();
    PrioritySpec {
        stream_dependency: word & STREAM_ID_MASK,
        exclusive: word & !STREAM_ID_MASK != 0,
        weight: payload.get_u8(),
    }
}

fn strip_padding(kind: FrameType, flags: FrameFlags, payload: &mut Bytes) -> Result<Option<u8>> {
    if !flags.is_padded() {
        return Ok(None);
    }
    if payload.is_empty() {
        return Err(Error::FrameSize(format!("{} missing pad length", kind.name())));
    }
    let pad_len = payload.get_u8();
    if pad_len as usize > payload.len() {
        return Err(Error::Protocol(format!("{} padding exceeds payload", kind.name())));
    }
    payload.truncate(payload.len() - pad_len as usize);
    Ok(Some(pad_len))
}

fn require_stream(kind: FrameType, stream_id: u32) -> Result<()> {
    if stream_id == 0 {
        return Err(Error::Protocol(format!("{} on stream 0", kind.name())));
    }
    Ok(())
}

fn require_connection(kind: FrameType, stream_id: u32) -> Result<()> {
    if stream_id != 0 {
        return Err(Error::Protocol(format!("{} on stream {}", kind.name(), stream_id)));
    }
    Ok(())
}

fn require_len(kind: FrameType, payload: &Bytes, len: usize) -> Result<()> {
    if payload.len() != len {
        return Err(Error::FrameSize(format!(
            "{} length {} (expected {})",
            kind.name(),
            payload.len(),
            len
        )));
    }
    Ok(())
}
