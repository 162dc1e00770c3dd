//! Typed frames of RFC 9113 Section 6
//!
//! The adapter builds outbound frames from these structs and hands them to
//! [`FrameCodec`](super::codec::FrameCodec); inbound payloads come back as a
//! [`Frame`].

use super::error::ErrorCode;
use super::stream::StreamId;
use bytes::Bytes;
use std::fmt;

/// Frame types defined by RFC 9113; the discriminant is the type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Request or response body bytes
    Data = 0x0,
    /// Opens a stream and carries the first header block fragment
    Headers = 0x1,
    /// Stream dependency and weight (deprecated by RFC 9113)
    Priority = 0x2,
    /// Abrupt termination of one stream
    RstStream = 0x3,
    /// Connection parameters, or the ACK of them
    Settings = 0x4,
    /// Server push announcement
    PushPromise = 0x5,
    /// Liveness check, echoed back with ACK
    Ping = 0x6,
    /// Graceful or fatal shutdown of the connection
    Goaway = 0x7,
    /// Flow control credit
    WindowUpdate = 0x8,
    /// Further header block fragments
    Continuation = 0x9,
}

// Indexed by type byte.
const FRAME_TYPES: [(FrameType, &str); 10] = [
    (FrameType::Data, "DATA"),
    (FrameType::Headers, "HEADERS"),
    (FrameType::Priority, "PRIORITY"),
    (FrameType::RstStream, "RST_STREAM"),
    (FrameType::Settings, "SETTINGS"),
    (FrameType::PushPromise, "PUSH_PROMISE"),
    (FrameType::Ping, "PING"),
    (FrameType::Goaway, "GOAWAY"),
    (FrameType::WindowUpdate, "WINDOW_UPDATE"),
    (FrameType::Continuation, "CONTINUATION"),
];

impl FrameType {
    /// Type byte as written in the frame header
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// `None` for extension frame types
    pub fn from_u8(byte: u8) -> Option<Self> {
        FRAME_TYPES.get(byte as usize).map(|(kind, _)| *kind)
    }

    /// Upper-case name used by the RFC
    pub fn name(&self) -> &'static str {
        FRAME_TYPES[self.as_u8() as usize].1
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// Flag byte of a frame header. Bit meanings depend on the frame type, so
/// `ACK` and `END_STREAM` share a bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Last frame the sender will send on the stream (DATA, HEADERS)
    pub const END_STREAM: u8 = 0x1;
    /// Acknowledgement (SETTINGS, PING)
    pub const ACK: u8 = 0x1;
    /// The header block is complete (HEADERS, PUSH_PROMISE, CONTINUATION)
    pub const END_HEADERS: u8 = 0x4;
    /// A pad length byte leads the payload
    pub const PADDED: u8 = 0x8;
    /// HEADERS carries dependency and weight fields
    pub const PRIORITY: u8 = 0x20;

    /// No flags set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap a raw flag byte, undefined bits included
    pub fn from_u8(bits: u8) -> Self {
        FrameFlags(bits)
    }

    /// Raw flag byte
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Turn on one of the flag constants
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Whether every bit of `flag` is on
    pub fn is_set(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// END_STREAM bit
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// ACK bit; only meaningful on SETTINGS and PING
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// END_HEADERS bit
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// PADDED bit
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// PRIORITY bit
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// The 9 bytes in front of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// 24-bit payload length
    pub length: usize,
    /// Kept raw so that extension frames can be surfaced to the visitor
    pub frame_type: u8,
    /// Flag byte, interpreted per frame type
    pub flags: FrameFlags,
    /// 0 for connection-level frames
    pub stream_id: StreamId,
}

impl FrameHeader {
    /// Known frame type, or `None` for extension frames
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }
}

/// DATA (RFC 9113 Section 6.1)
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// Never 0
    pub stream_id: StreamId,
    /// Body bytes with padding stripped
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// Pad length byte; `Some` sets PADDED
    pub padding: Option<u8>,
}

impl DataFrame {
    /// Unpadded DATA frame
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    /// Add `padding` zero bytes after the body
    pub fn with_padding(self, padding: u8) -> Self {
        DataFrame {
            padding: Some(padding),
            ..self
        }
    }

    /// Bytes this frame costs against both flow control windows. The pad
    /// length byte and the padding itself count.
    pub fn flow_controlled_len(&self) -> usize {
        self.data.len() + self.padding.map_or(0, |pad| 1 + pad as usize)
    }
}

/// HEADERS (RFC 9113 Section 6.2)
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    /// Stream being opened, or carrying trailers
    pub stream_id: StreamId,
    /// First fragment of the HPACK block
    pub header_block: Bytes,
    /// No DATA follows this block
    pub end_stream: bool,
    /// Clear when CONTINUATION frames follow
    pub end_headers: bool,
    /// Dependency fields when the PRIORITY flag is set
    pub priority: Option<PrioritySpec>,
    /// Pad length when the PADDED flag is set
    pub padding: Option<u8>,
}

impl HeadersFrame {
    /// HEADERS without priority fields or padding
    pub fn new(stream_id: StreamId, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }
}

/// Stream dependency and weight, RFC 9113 Section 5.3.2
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    /// Parent stream; 0 is the root
    pub stream_dependency: StreamId,
    /// E bit: become the only child of the parent
    pub exclusive: bool,
    /// Wire weight, one less than the real weight
    pub weight: u8,
}

impl PrioritySpec {
    /// `weight` is the real weight; values outside 1..=256 are clamped
    pub fn new(stream_dependency: StreamId, weight: u16, exclusive: bool) -> Self {
        let wire = weight.clamp(1, 256) - 1;
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight: wire as u8,
        }
    }

    /// Real weight, 1 to 256
    pub fn weight(&self) -> u16 {
        u16::from(self.weight) + 1
    }
}

/// PRIORITY (RFC 9113 Section 6.3)
#[derive(Debug, Clone, Copy)]
pub struct PriorityFrame {
    /// Stream being reprioritized; may be idle
    pub stream_id: StreamId,
    pub priority: PrioritySpec,
}

/// RST_STREAM (RFC 9113 Section 6.4)
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    /// Why the stream ended
    pub error_code: ErrorCode,
}

/// Entries stay in wire order with raw identifiers, so settings this
/// endpoint does not know can still be reported.
#[derive(Debug, Clone, Default)]
pub struct SettingsFrame {
    /// ACK frames carry no entries
    pub ack: bool,
    /// (identifier, value) pairs
    pub entries: Vec<(u16, u32)>,
}

impl SettingsFrame {
    /// SETTINGS carrying `entries`
    pub fn new(entries: Vec<(u16, u32)>) -> Self {
        SettingsFrame { ack: false, entries }
    }

    /// Empty acknowledgement of the peer's SETTINGS
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            ..Default::default()
        }
    }
}

/// Only ever parsed: this endpoint never pushes
#[derive(Debug, Clone)]
pub struct PushPromiseFrame {
    /// Stream the promise is associated with
    pub stream_id: StreamId,
    /// Stream the server would push on
    pub promised_stream_id: StreamId,
    pub header_block: Bytes,
    pub end_headers: bool,
}

/// PING (RFC 9113 Section 6.7)
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    /// Set on the echo
    pub ack: bool,
    /// Opaque payload, returned unchanged in the ACK
    pub data: [u8; 8],
}

impl PingFrame {
    /// PING that expects an ACK
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Echo of a received PING
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }

    /// The opaque payload as the big-endian id visitors see
    pub fn id(&self) -> u64 {
        u64::from_be_bytes(self.data)
    }
}

/// GOAWAY (RFC 9113 Section 6.8)
#[derive(Debug, Clone)]
pub struct GoawayFrame {
    /// Highest peer-initiated stream the sender may have processed
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
    /// Diagnostic bytes with no protocol meaning
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// GOAWAY with the given last stream, code and debug bytes
    pub fn new(last_stream_id: StreamId, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }
}

/// WINDOW_UPDATE (RFC 9113 Section 6.9)
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    /// 0 addresses the connection window
    pub stream_id: StreamId,
    /// 31-bit credit; 0 is a protocol error
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Credit `size_increment` bytes to a stream or the connection
    pub fn new(stream_id: StreamId, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}

/// CONTINUATION (RFC 9113 Section 6.10)
#[derive(Debug, Clone)]
pub struct ContinuationFrame {
    /// Must match the stream of the block in progress
    pub stream_id: StreamId,
    /// Next fragment of the HPACK block
    pub header_block: Bytes,
    /// Last fragment of the block
    pub end_headers: bool,
}

/// One decoded inbound frame
#[derive(Debug, Clone)]
pub enum Frame {
    Data(DataFrame),
    Headers(HeadersFrame),
    Priority(PriorityFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    PushPromise(PushPromiseFrame),
    Ping(PingFrame),
    Goaway(GoawayFrame),
    WindowUpdate(WindowUpdateFrame),
    Continuation(ContinuationFrame),
    /// Extension frame, passed through untouched
    Unknown { header: FrameHeader, payload: Bytes },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_table_matches_discriminants() {
        for byte in 0..=0x9u8 {
            let kind = FrameType::from_u8(byte).unwrap();
            assert_eq!(kind.as_u8(), byte);
        }
        assert_eq!(FrameType::from_u8(0xa), None);
        assert_eq!(FrameType::from_u8(0xbe), None);
        assert_eq!(FrameType::RstStream.to_string(), "RST_STREAM (0x3)");
        assert_eq!(FrameType::WindowUpdate.name(), "WINDOW_UPDATE");
    }

    #[test]
    fn test_flags_share_bits_across_types() {
        let mut flags = FrameFlags::empty();
        assert!(!flags.is_end_stream());

        flags.set(FrameFlags::END_STREAM);
        flags.set(FrameFlags::END_HEADERS);
        assert!(flags.is_end_headers());
        assert!(flags.is_ack());
        assert!(!flags.is_padded());
        assert_eq!(flags.as_u8(), 0x5);
        assert!(FrameFlags::from_u8(0x28).is_priority());
    }

    #[test]
    fn test_padding_counts_against_flow_control() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true);
        assert_eq!(frame.flow_controlled_len(), 5);
        assert_eq!(frame.with_padding(10).flow_controlled_len(), 16);
        assert_eq!(DataFrame::new(1, Bytes::new(), false).with_padding(0).flow_controlled_len(), 1);
    }

    #[test]
    fn test_priority_weight_is_stored_minus_one() {
        let spec = PrioritySpec::new(1, 256, true);
        assert_eq!((spec.weight, spec.weight()), (255, 256));
        assert_eq!(PrioritySpec::new(1, 0, false).weight(), 1);
    }

    #[test]
    fn test_ping_payload_is_big_endian_id() {
        let ping = PingFrame::new(42u64.to_be_bytes());
        assert_eq!(ping.id(), 42);
        assert!(PingFrame::ack(ping.data).ack);
    }
}
