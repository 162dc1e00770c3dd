//! Event sink of a [`ConnectionAdapter`](super::ConnectionAdapter)
//!
//! The adapter reports every inbound protocol event through a [`Visitor`] and
//! writes every outbound byte through [`Visitor::on_ready_to_send`]. All
//! callbacks except the write sink default to doing nothing.

use super::error::{Error, ErrorCode};
use super::stream::StreamId;

pub trait Visitor {
    /// Offer serialized bytes to the transport.
    ///
    /// Returns how many leading bytes were accepted. Accepting fewer than
    /// offered, including zero, makes `send` keep the rest and return.
    fn on_ready_to_send(&mut self, data: &[u8]) -> std::io::Result<usize>;

    /// Precedes the type-specific callbacks of every inbound frame
    fn on_frame_header(&mut self, _stream_id: StreamId, _length: usize, _frame_type: u8, _flags: u8) {}

    fn on_settings_start(&mut self) {}

    /// One SETTINGS entry, by raw identifier so unknown settings are visible
    fn on_setting(&mut self, _id: u16, _value: u32) {}

    fn on_settings_end(&mut self) {}

    fn on_settings_ack(&mut self) {}

    fn on_begin_headers_for_stream(&mut self, _stream_id: StreamId) {}

    fn on_header_for_stream(&mut self, _stream_id: StreamId, _name: &[u8], _value: &[u8]) {}

    fn on_end_headers_for_stream(&mut self, _stream_id: StreamId) {}

    /// `payload_length` excludes padding
    fn on_begin_data_for_stream(&mut self, _stream_id: StreamId, _payload_length: usize) {}

    fn on_data_for_stream(&mut self, _stream_id: StreamId, _data: &[u8]) {}

    /// The peer finished its side of the stream
    fn on_end_stream(&mut self, _stream_id: StreamId) {}

    fn on_rst_stream(&mut self, _stream_id: StreamId, _error_code: ErrorCode) {}

    /// Fires exactly once per stream, right before it is forgotten
    fn on_close_stream(&mut self, _stream_id: StreamId, _error_code: ErrorCode) {}

    fn on_priority_for_stream(&mut self, _stream_id: StreamId, _parent_stream_id: StreamId, _weight: u16, _exclusive: bool) {}

    fn on_ping(&mut self, _id: u64, _is_ack: bool) {}

    fn on_go_away(&mut self, _last_accepted_stream_id: StreamId, _error_code: ErrorCode, _opaque_data: &[u8]) {}

    fn on_window_update(&mut self, _stream_id: StreamId, _increment: u32) {}

    /// A frame type without a dedicated callback
    fn on_frame_received(&mut self, _stream_id: StreamId, _frame_type: u8, _flags: u8, _payload: &[u8]) {}

    /// The connection failed; no further events follow
    fn on_connection_error(&mut self, _error: &Error) {}
}
