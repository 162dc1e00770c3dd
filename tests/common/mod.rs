//! Shared helpers for the adapter integration tests
//!
//! - `RecordingVisitor` records every event and collects written bytes,
//!   optionally from a sink with a limited byte budget
//! - `FrameSequence` builds the peer's side of a conversation, compressing
//!   headers with the independent `hpack` crate
//! - `parse_frames` splits adapter output back into frames

#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use h2adapter::h2::codec::{FrameCodec, FRAME_HEADER_SIZE};
use h2adapter::h2::frames::*;
use h2adapter::h2::CONNECTION_PREFACE;
use h2adapter::{DataSource, Error, ErrorCode, Payload, SettingsParameter, StreamId, Visitor};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    FrameHeader {
        stream_id: StreamId,
        length: usize,
        frame_type: u8,
        flags: u8,
    },
    SettingsStart,
    Setting(u16, u32),
    SettingsEnd,
    SettingsAck,
    BeginHeaders(StreamId),
    Header(StreamId, String, String),
    EndHeaders(StreamId),
    BeginData(StreamId, usize),
    Data(StreamId, Vec<u8>),
    EndStream(StreamId),
    RstStream(StreamId, ErrorCode),
    CloseStream(StreamId, ErrorCode),
    Priority {
        stream_id: StreamId,
        parent: StreamId,
        weight: u16,
        exclusive: bool,
    },
    Ping(u64, bool),
    GoAway(StreamId, ErrorCode, Vec<u8>),
    WindowUpdate(StreamId, u32),
    FrameReceived(StreamId, u8, u8, Vec<u8>),
    ConnectionError(ErrorCode),
}

pub fn frame_header(stream_id: StreamId, length: usize, frame_type: FrameType, flags: u8) -> Event {
    Event::FrameHeader {
        stream_id,
        length,
        frame_type: frame_type.as_u8(),
        flags,
    }
}

pub fn header(stream_id: StreamId, name: &str, value: &str) -> Event {
    Event::Header(stream_id, name.to_string(), value.to_string())
}

#[derive(Debug, Default)]
pub struct RecordingVisitor {
    pub events: Vec<Event>,
    pub data: Vec<u8>,
    /// Bytes the sink still accepts; unlimited when `None`
    pub send_budget: Option<usize>,
    /// Make the sink fail
    pub fail_writes: bool,
}

impl RecordingVisitor {
    pub fn new() -> Self {
        RecordingVisitor::default()
    }

    pub fn with_send_budget(budget: usize) -> Self {
        RecordingVisitor {
            send_budget: Some(budget),
            ..RecordingVisitor::default()
        }
    }

    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Events other than frame headers, for tests that only care about content
    pub fn content_events(&self) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| !matches!(e, Event::FrameHeader { .. }))
            .cloned()
            .collect()
    }
}

impl Visitor for RecordingVisitor {
    fn on_ready_to_send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        let n = match self.send_budget.as_mut() {
            Some(budget) => {
                let n = (*budget).min(data.len());
                *budget -= n;
                n
            }
            None => data.len(),
        };
        self.data.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn on_frame_header(&mut self, stream_id: StreamId, length: usize, frame_type: u8, flags: u8) {
        self.events.push(Event::FrameHeader {
            stream_id,
            length,
            frame_type,
            flags,
        });
    }

    fn on_settings_start(&mut self) {
        self.events.push(Event::SettingsStart);
    }

    fn on_setting(&mut self, id: u16, value: u32) {
        self.events.push(Event::Setting(id, value));
    }

    fn on_settings_end(&mut self) {
        self.events.push(Event::SettingsEnd);
    }

    fn on_settings_ack(&mut self) {
        self.events.push(Event::SettingsAck);
    }

    fn on_begin_headers_for_stream(&mut self, stream_id: StreamId) {
        self.events.push(Event::BeginHeaders(stream_id));
    }

    fn on_header_for_stream(&mut self, stream_id: StreamId, name: &[u8], value: &[u8]) {
        self.events.push(Event::Header(
            stream_id,
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        ));
    }

    fn on_end_headers_for_stream(&mut self, stream_id: StreamId) {
        self.events.push(Event::EndHeaders(stream_id));
    }

    fn on_begin_data_for_stream(&mut self, stream_id: StreamId, payload_length: usize) {
        self.events.push(Event::BeginData(stream_id, payload_length));
    }

    fn on_data_for_stream(&mut self, stream_id: StreamId, data: &[u8]) {
        self.events.push(Event::Data(stream_id, data.to_vec()));
    }

    fn on_end_stream(&mut self, stream_id: StreamId) {
        self.events.push(Event::EndStream(stream_id));
    }

    fn on_rst_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        self.events.push(Event::RstStream(stream_id, error_code));
    }

    fn on_close_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        self.events.push(Event::CloseStream(stream_id, error_code));
    }

    fn on_priority_for_stream(&mut self, stream_id: StreamId, parent: StreamId, weight: u16, exclusive: bool) {
        self.events.push(Event::Priority {
            stream_id,
            parent,
            weight,
            exclusive,
        });
    }

    fn on_ping(&mut self, id: u64, is_ack: bool) {
        self.events.push(Event::Ping(id, is_ack));
    }

    fn on_go_away(&mut self, last_accepted_stream_id: StreamId, error_code: ErrorCode, opaque_data: &[u8]) {
        self.events
            .push(Event::GoAway(last_accepted_stream_id, error_code, opaque_data.to_vec()));
    }

    fn on_window_update(&mut self, stream_id: StreamId, increment: u32) {
        self.events.push(Event::WindowUpdate(stream_id, increment));
    }

    fn on_frame_received(&mut self, stream_id: StreamId, frame_type: u8, flags: u8, payload: &[u8]) {
        self.events
            .push(Event::FrameReceived(stream_id, frame_type, flags, payload.to_vec()));
    }

    fn on_connection_error(&mut self, error: &Error) {
        self.events.push(Event::ConnectionError(error.code()));
    }
}

/// Builds the bytes a peer would send
pub struct FrameSequence {
    buf: BytesMut,
    encoder: hpack::Encoder<'static>,
}

impl FrameSequence {
    pub fn new() -> Self {
        FrameSequence {
            buf: BytesMut::new(),
            encoder: hpack::Encoder::new(),
        }
    }

    /// Client magic followed by an empty SETTINGS
    pub fn client_preface(mut self) -> Self {
        self.buf.put_slice(CONNECTION_PREFACE);
        self.settings(&[])
    }

    /// An empty SETTINGS
    pub fn server_preface(self) -> Self {
        self.settings(&[])
    }

    pub fn settings(mut self, entries: &[(SettingsParameter, u32)]) -> Self {
        let entries = entries.iter().map(|&(p, v)| (p.as_u16(), v)).collect();
        self.buf
            .put_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(entries)));
        self
    }

    pub fn settings_ack(mut self) -> Self {
        self.buf
            .put_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::ack()));
        self
    }

    pub fn encode_block(&mut self, headers: &[(&str, &str)]) -> Vec<u8> {
        self.encoder
            .encode(headers.iter().map(|&(n, v)| (n.as_bytes(), v.as_bytes())))
    }

    pub fn headers(mut self, stream_id: StreamId, headers: &[(&str, &str)], fin: bool) -> Self {
        let block = self.encode_block(headers);
        self.headers_block(stream_id, block, fin)
    }

    /// HEADERS carrying an already encoded block
    pub fn headers_block(mut self, stream_id: StreamId, block: Vec<u8>, fin: bool) -> Self {
        let frame = HeadersFrame::new(stream_id, Bytes::from(block), fin, true);
        self.buf.put_slice(&FrameCodec::encode_headers_frame(&frame));
        self
    }

    /// A header block split into HEADERS + CONTINUATION frames of at most
    /// `fragment_size` bytes
    pub fn headers_split(mut self, stream_id: StreamId, headers: &[(&str, &str)], fin: bool, fragment_size: usize) -> Self {
        let block = Bytes::from(self.encode_block(headers));
        let mut chunks: Vec<Bytes> = block.chunks(fragment_size).map(Bytes::copy_from_slice).collect();
        let first = chunks.remove(0);
        let frame = HeadersFrame::new(stream_id, first, fin, chunks.is_empty());
        self.buf.put_slice(&FrameCodec::encode_headers_frame(&frame));

        let last = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let frame = ContinuationFrame {
                stream_id,
                header_block: chunk,
                end_headers: i + 1 == last,
            };
            self.buf
                .put_slice(&FrameCodec::encode_continuation_frame(&frame));
        }
        self
    }

    pub fn data(mut self, stream_id: StreamId, body: &[u8], fin: bool) -> Self {
        let frame = DataFrame::new(stream_id, Bytes::copy_from_slice(body), fin);
        self.buf.put_slice(&FrameCodec::encode_data_frame(&frame));
        self
    }

    pub fn data_padded(mut self, stream_id: StreamId, body: &[u8], fin: bool, padding: u8) -> Self {
        let frame = DataFrame::new(stream_id, Bytes::copy_from_slice(body), fin).with_padding(padding);
        self.buf.put_slice(&FrameCodec::encode_data_frame(&frame));
        self
    }

    pub fn ping(mut self, id: u64) -> Self {
        self.buf
            .put_slice(&FrameCodec::encode_ping_frame(&PingFrame::new(id.to_be_bytes())));
        self
    }

    pub fn ping_ack(mut self, id: u64) -> Self {
        self.buf
            .put_slice(&FrameCodec::encode_ping_frame(&PingFrame::ack(id.to_be_bytes())));
        self
    }

    pub fn goaway(mut self, last_stream_id: StreamId, error_code: ErrorCode, opaque: &[u8]) -> Self {
        let frame = GoawayFrame::new(last_stream_id, error_code, Bytes::copy_from_slice(opaque));
        self.buf.put_slice(&FrameCodec::encode_goaway_frame(&frame));
        self
    }

    pub fn window_update(mut self, stream_id: StreamId, increment: u32) -> Self {
        self.buf.put_slice(&FrameCodec::encode_window_update_frame(
            &WindowUpdateFrame::new(stream_id, increment),
        ));
        self
    }

    pub fn rst_stream(mut self, stream_id: StreamId, error_code: ErrorCode) -> Self {
        self.buf
            .put_slice(&FrameCodec::encode_rst_stream_frame(&RstStreamFrame { stream_id, error_code }));
        self
    }

    pub fn priority(mut self, stream_id: StreamId, parent: StreamId, weight: u16, exclusive: bool) -> Self {
        let frame = PriorityFrame {
            stream_id,
            priority: PrioritySpec::new(parent, weight, exclusive),
        };
        self.buf.put_slice(&FrameCodec::encode_priority_frame(&frame));
        self
    }

    pub fn push_promise(mut self, stream_id: StreamId, promised_stream_id: StreamId, headers: &[(&str, &str)]) -> Self {
        let block = self.encode_block(headers);
        let header = FrameCodec::encode_header(
            FrameType::PushPromise,
            FrameFlags::from_u8(FrameFlags::END_HEADERS),
            stream_id,
            4 + block.len(),
        );
        self.buf.put_slice(&header);
        self.buf.put_u32(promised_stream_id);
        self.buf.put_slice(&block);
        self
    }

    /// A frame with an arbitrary type byte and payload
    pub fn raw_frame(mut self, frame_type: u8, flags: u8, stream_id: StreamId, payload: &[u8]) -> Self {
        let mut header = FrameCodec::encode_header(FrameType::Data, FrameFlags::from_u8(flags), stream_id, payload.len());
        header[3] = frame_type;
        self.buf.put_slice(&header);
        self.buf.put_slice(payload);
        self
    }

    pub fn serialize(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

impl Default for FrameSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame written by the adapter
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl ParsedFrame {
    pub fn kind(&self) -> Option<FrameType> {
        self.header.kind()
    }

    pub fn flags(&self) -> u8 {
        self.header.flags.as_u8()
    }

    pub fn stream_id(&self) -> StreamId {
        self.header.stream_id
    }

    /// Error code of RST_STREAM or GOAWAY
    pub fn error_code(&self) -> ErrorCode {
        let offset = match self.kind() {
            Some(FrameType::Goaway) => 4,
            _ => 0,
        };
        let raw = u32::from_be_bytes([
            self.payload[offset],
            self.payload[offset + 1],
            self.payload[offset + 2],
            self.payload[offset + 3],
        ]);
        ErrorCode::from_wire(raw)
    }

    /// Increment of WINDOW_UPDATE
    pub fn increment(&self) -> u32 {
        u32::from_be_bytes([self.payload[0], self.payload[1], self.payload[2], self.payload[3]])
    }

    /// SETTINGS entries
    pub fn settings(&self) -> Vec<(u16, u32)> {
        self.payload
            .chunks(6)
            .map(|c| {
                (
                    u16::from_be_bytes([c[0], c[1]]),
                    u32::from_be_bytes([c[2], c[3], c[4], c[5]]),
                )
            })
            .collect()
    }
}

/// Split adapter output into frames; the output must end on a frame boundary
pub fn parse_frames(mut data: &[u8]) -> Vec<ParsedFrame> {
    let mut frames = Vec::new();
    while !data.is_empty() {
        assert!(data.len() >= FRAME_HEADER_SIZE, "truncated frame header");
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&data[..FRAME_HEADER_SIZE]);
        let header = FrameCodec::decode_header(&raw);
        let end = FRAME_HEADER_SIZE + header.length;
        assert!(data.len() >= end, "truncated frame payload");
        frames.push(ParsedFrame {
            header,
            payload: Bytes::copy_from_slice(&data[FRAME_HEADER_SIZE..end]),
        });
        data = &data[end..];
    }
    frames
}

pub fn frame_types(data: &[u8]) -> Vec<FrameType> {
    parse_frames(data)
        .iter()
        .map(|f| f.kind().expect("adapter wrote an unknown frame type"))
        .collect()
}

/// Output after the client connection preface
pub fn strip_preface(data: &[u8]) -> &[u8] {
    assert!(data.starts_with(CONNECTION_PREFACE), "missing client preface");
    &data[CONNECTION_PREFACE.len()..]
}

/// Body source fed by the test while the adapter is running
#[derive(Clone, Default)]
pub struct ScriptedSource {
    state: Rc<RefCell<ScriptState>>,
    send_fin: bool,
}

#[derive(Default)]
struct ScriptState {
    pending: BytesMut,
    finished: bool,
    fail: bool,
}

impl ScriptedSource {
    pub fn new(send_fin: bool) -> Self {
        ScriptedSource {
            state: Rc::default(),
            send_fin,
        }
    }

    pub fn push(&self, data: &[u8]) {
        self.state.borrow_mut().pending.put_slice(data);
    }

    pub fn finish(&self) {
        self.state.borrow_mut().finished = true;
    }

    pub fn fail(&self) {
        self.state.borrow_mut().fail = true;
    }
}

impl DataSource for ScriptedSource {
    fn read_payload(&mut self, max_len: usize) -> h2adapter::Result<Payload> {
        let mut state = self.state.borrow_mut();
        if state.fail {
            return Err(Error::DataSource("scripted failure".to_string()));
        }
        if state.pending.is_empty() && !state.finished {
            return Ok(Payload::NotReady);
        }
        let n = max_len.min(state.pending.len());
        let data = state.pending.split_to(n).freeze();
        Ok(Payload::Ready {
            data,
            end_of_data: state.finished && state.pending.is_empty(),
        })
    }

    fn send_fin(&self) -> bool {
        self.send_fin
    }
}
