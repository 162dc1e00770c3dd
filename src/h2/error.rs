//! Session engine errors
//!
//! [`Error`] is what the adapter's fallible calls return. Each error maps to
//! the [`ErrorCode`] that goes on the wire when it ends a stream or the
//! connection.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The visitor's write sink failed
    #[error("write sink failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("internal failure: {0}")]
    Internal(String),

    /// A window was overrun or pushed past 2^31-1
    #[error("flow control violation: {0}")]
    FlowControl(String),

    #[error("stream {0} is closed")]
    StreamClosed(u32),

    #[error("bad frame size: {0}")]
    FrameSize(String),

    /// HPACK state can no longer be trusted
    #[error("header compression failure: {0}")]
    Compression(String),

    #[error("no stream identifiers left")]
    IdExhausted,

    #[error("stream {0} not found")]
    StreamNotFound(u32),

    #[error("invalid setting: {0}")]
    InvalidSettings(String),

    /// A submission the adapter cannot act on
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not implemented")]
    NotImplemented(String),

    /// Raised by a body source
    #[error("body source failed: {0}")]
    DataSource(String),

    /// GOAWAY was received, or an earlier connection error was latched
    #[error("connection is closed")]
    ConnectionClosed,

    #[error("peer did not send the HTTP/2 client preface")]
    MissingPreface,
}

impl Error {
    /// Code carried by the RST_STREAM or GOAWAY this error produces
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::Io(_) | Error::Internal(_) | Error::DataSource(_) => ErrorCode::InternalError,
            _ => ErrorCode::ProtocolError,
        }
    }
}

/// Error codes of RFC 9113 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

// Indexed by wire value.
const KNOWN_CODES: [ErrorCode; 14] = [
    ErrorCode::NoError,
    ErrorCode::ProtocolError,
    ErrorCode::InternalError,
    ErrorCode::FlowControlError,
    ErrorCode::SettingsTimeout,
    ErrorCode::StreamClosed,
    ErrorCode::FrameSizeError,
    ErrorCode::RefusedStream,
    ErrorCode::Cancel,
    ErrorCode::CompressionError,
    ErrorCode::ConnectError,
    ErrorCode::EnhanceYourCalm,
    ErrorCode::InadequateSecurity,
    ErrorCode::Http11Required,
];

impl ErrorCode {
    /// Value written in RST_STREAM and GOAWAY
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// A defined code, or `None` for extension values
    pub fn from_u32(code: u32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|i| KNOWN_CODES.get(i))
            .copied()
    }

    /// Read a code off the wire. Codes this endpoint does not know are
    /// treated as INTERNAL_ERROR.
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::InternalError)
    }

    /// Registered name, as written in the RFC
    pub fn name(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            NoError => "NO_ERROR",
            ProtocolError => "PROTOCOL_ERROR",
            InternalError => "INTERNAL_ERROR",
            FlowControlError => "FLOW_CONTROL_ERROR",
            SettingsTimeout => "SETTINGS_TIMEOUT",
            StreamClosed => "STREAM_CLOSED",
            FrameSizeError => "FRAME_SIZE_ERROR",
            RefusedStream => "REFUSED_STREAM",
            Cancel => "CANCEL",
            CompressionError => "COMPRESSION_ERROR",
            ConnectError => "CONNECT_ERROR",
            EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            InadequateSecurity => "INADEQUATE_SECURITY",
            Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
