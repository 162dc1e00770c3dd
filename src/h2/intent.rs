//! Outbound frame intents
//!
//! Submissions are queued as descriptions of frames rather than bytes. They
//! are serialized by `send` in submission order, which lets HPACK state and
//! settings take effect at the moment a frame actually goes out.

use super::error::ErrorCode;
use super::hpack::Header;
use super::settings::SettingsParameter;
use super::stream::StreamId;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub enum FrameIntent {
    Settings(Vec<(SettingsParameter, u32)>),
    SettingsAck,
    Priority {
        stream_id: StreamId,
        parent: StreamId,
        weight: u16,
        exclusive: bool,
    },
    RstStream {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    Ping {
        id: u64,
        ack: bool,
    },
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
        opaque: Bytes,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    /// Leading headers of a request or response
    Headers {
        stream_id: StreamId,
        headers: Vec<Header>,
        end_stream: bool,
    },
}

impl FrameIntent {
    pub fn stream_id(&self) -> StreamId {
        match self {
            FrameIntent::Settings(_)
            | FrameIntent::SettingsAck
            | FrameIntent::Ping { .. }
            | FrameIntent::GoAway { .. } => 0,
            FrameIntent::Priority { stream_id, .. }
            | FrameIntent::RstStream { stream_id, .. }
            | FrameIntent::WindowUpdate { stream_id, .. }
            | FrameIntent::Headers { stream_id, .. } => *stream_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameIntent::Settings(_) => "SETTINGS",
            FrameIntent::SettingsAck => "SETTINGS_ACK",
            FrameIntent::Priority { .. } => "PRIORITY",
            FrameIntent::RstStream { .. } => "RST_STREAM",
            FrameIntent::Ping { ack: false, .. } => "PING",
            FrameIntent::Ping { ack: true, .. } => "PING_ACK",
            FrameIntent::GoAway { .. } => "GOAWAY",
            FrameIntent::WindowUpdate { .. } => "WINDOW_UPDATE",
            FrameIntent::Headers { .. } => "HEADERS",
        }
    }
}
