//! Outbound serialization with partial writes
//!
//! `send` produces one frame at a time and offers it to the visitor's sink.
//! Whatever the sink does not accept is kept in `serialized_prefix` and
//! offered first on the next call, so the bytes of a sequence of bounded
//! sends are identical to those of a single unbounded one.

use super::ConnectionAdapter;
use crate::h2::codec::FrameCodec;
use crate::h2::data_source::Payload;
use crate::h2::error::{ErrorCode, Result};
use crate::h2::frames::*;
use crate::h2::hpack::Header;
use crate::h2::intent::FrameIntent;
use crate::h2::stream::{StreamEvent, StreamId};
use crate::h2::visitor::Visitor;
use crate::h2::CONNECTION_PREFACE;
use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

impl<V: Visitor> ConnectionAdapter<V> {
    /// Write queued output until the queue is empty or the sink pushes back.
    ///
    /// `Ok(())` does not mean everything was written; check
    /// [`want_write`](Self::want_write). An `Err` comes from the sink.
    pub fn send(&mut self) -> Result<()> {
        if !self.flush_prefix()? {
            return Ok(());
        }
        while let Some(bytes) = self.next_frame()? {
            if !self.write(bytes)? {
                break;
            }
        }
        Ok(())
    }

    /// Whether `send` has anything to write
    pub fn want_write(&self) -> bool {
        !self.serialized_prefix.is_empty()
            || self.send_client_magic
            || !self.intents.is_empty()
            || self.streams.has_ready()
    }

    fn flush_prefix(&mut self) -> Result<bool> {
        if self.serialized_prefix.is_empty() {
            return Ok(true);
        }
        let prefix = std::mem::take(&mut self.serialized_prefix);
        self.write(prefix)
    }

    /// Offer bytes to the sink; `false` if it took less than all of them
    fn write(&mut self, bytes: Bytes) -> Result<bool> {
        let written = self.visitor.on_ready_to_send(&bytes)?.min(bytes.len());
        if written < bytes.len() {
            trace!(written, remaining = bytes.len() - written, "short write");
            self.serialized_prefix = bytes.slice(written..);
            return Ok(false);
        }
        Ok(true)
    }

    /// Serialize the next frame: client magic, then intents in submission
    /// order, then stream output in round-robin order.
    fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.send_client_magic {
            self.send_client_magic = false;
            return Ok(Some(Bytes::from_static(CONNECTION_PREFACE)));
        }

        loop {
            if let Some(intent) = self.intents.pop_front() {
                if let Some(bytes) = self.serialize_intent(intent) {
                    return Ok(Some(bytes));
                }
                continue;
            }
            let Some(stream_id) = self.streams.next_ready() else {
                return Ok(None);
            };
            if let Some(bytes) = self.serialize_stream_output(stream_id)? {
                return Ok(Some(bytes));
            }
        }
    }

    fn serialize_intent(&mut self, intent: FrameIntent) -> Option<Bytes> {
        trace!(frame = intent.name(), stream_id = intent.stream_id(), "serializing");
        let bytes = match intent {
            FrameIntent::Settings(entries) => {
                let entries = entries.iter().map(|&(param, value)| (param.as_u16(), value)).collect();
                FrameCodec::encode_settings_frame(&SettingsFrame::new(entries))
            }
            FrameIntent::SettingsAck => FrameCodec::encode_settings_frame(&SettingsFrame::ack()),
            FrameIntent::Priority {
                stream_id,
                parent,
                weight,
                exclusive,
            } => FrameCodec::encode_priority_frame(&PriorityFrame {
                stream_id,
                priority: PrioritySpec::new(parent, weight, exclusive),
            }),
            FrameIntent::RstStream { stream_id, error_code } => {
                FrameCodec::encode_rst_stream_frame(&RstStreamFrame { stream_id, error_code })
            }
            FrameIntent::Ping { id, ack } => {
                let data = id.to_be_bytes();
                let frame = if ack { PingFrame::ack(data) } else { PingFrame::new(data) };
                FrameCodec::encode_ping_frame(&frame)
            }
            FrameIntent::GoAway {
                last_stream_id,
                error_code,
                opaque,
            } => {
                self.goaway_sent = true;
                FrameCodec::encode_goaway_frame(&GoawayFrame::new(last_stream_id, error_code, opaque))
            }
            FrameIntent::WindowUpdate { stream_id, increment } => {
                FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(stream_id, increment))
            }
            FrameIntent::Headers {
                stream_id,
                headers,
                end_stream,
            } => return self.serialize_headers(stream_id, &headers, end_stream),
        };
        Some(bytes)
    }

    /// Encode a header block for a live stream and apply its END_STREAM
    fn serialize_headers(&mut self, stream_id: StreamId, headers: &[Header], end_stream: bool) -> Option<Bytes> {
        let stream = self.streams.get_mut(stream_id)?;
        if !stream.state().can_send() {
            return None;
        }
        stream.headers_sent = true;

        let block = self.encoder.encode(headers);
        let bytes = self.frame_header_block(stream_id, block, end_stream);

        if end_stream {
            let state = self.streams.transition(stream_id, StreamEvent::SendEndStream);
            self.close_if_done(stream_id, state);
        } else {
            self.streams.mark_ready(stream_id);
        }
        Some(bytes)
    }

    /// Split a header block into HEADERS and CONTINUATION frames no larger
    /// than the peer's max frame size.
    fn frame_header_block(&self, stream_id: StreamId, mut block: Bytes, end_stream: bool) -> Bytes {
        let max = self.remote_settings.get_max_frame_size() as usize;
        let first = block.split_to(block.len().min(max));

        let mut out = BytesMut::new();
        out.extend_from_slice(&FrameCodec::encode_headers_frame(&HeadersFrame::new(
            stream_id,
            first,
            end_stream,
            block.is_empty(),
        )));
        while !block.is_empty() {
            let fragment = block.split_to(block.len().min(max));
            out.extend_from_slice(&FrameCodec::encode_continuation_frame(&ContinuationFrame {
                stream_id,
                header_block: fragment,
                end_headers: block.is_empty(),
            }));
        }
        out.freeze()
    }

    /// One DATA frame or the trailers of a scheduled stream
    fn serialize_stream_output(&mut self, stream_id: StreamId) -> Result<Option<Bytes>> {
        let max_frame_size = self.remote_settings.get_max_frame_size() as usize;
        let connection_window = self.flow.send.available();
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return Ok(None);
        };

        let Some(source) = stream.data_source.as_mut() else {
            return Ok(stream
                .pending_trailers
                .take()
                .and_then(|trailers| self.serialize_headers(stream_id, &trailers, true)));
        };

        let max_len = stream
            .flow
            .send
            .available()
            .min(connection_window)
            .min(max_frame_size);
        if max_len == 0 {
            trace!(stream_id, "flow control blocked");
            return Ok(None);
        }

        let (data, end_of_data) = match source.read_payload(max_len) {
            Ok(Payload::Ready { data, end_of_data }) if data.len() <= max_len => (data, end_of_data),
            Ok(Payload::Ready { data, .. }) => {
                warn!(stream_id, len = data.len(), max_len, "body source overran its limit");
                self.reset_stream(stream_id, ErrorCode::InternalError);
                return Ok(None);
            }
            Ok(Payload::NotReady) => {
                trace!(stream_id, "body source not ready");
                stream.blocked = true;
                return Ok(None);
            }
            Err(error) => {
                warn!(stream_id, %error, "body source failed");
                self.reset_stream(stream_id, ErrorCode::InternalError);
                return Ok(None);
            }
        };

        let fin = end_of_data && source.send_fin();
        if end_of_data {
            stream.data_source = None;
        }
        if data.is_empty() && !fin {
            if end_of_data {
                // The body ended without END_STREAM; trailers may follow.
                self.streams.mark_ready(stream_id);
            } else {
                stream.blocked = true;
            }
            return Ok(None);
        }

        stream.flow.send.consume(data.len());
        self.flow.send.consume(data.len());
        let bytes = FrameCodec::encode_data_frame(&DataFrame::new(stream_id, data, fin));

        if fin {
            let state = self.streams.transition(stream_id, StreamEvent::SendEndStream);
            self.close_if_done(stream_id, state);
        } else {
            self.streams.mark_ready(stream_id);
        }
        Ok(Some(bytes))
    }
}
