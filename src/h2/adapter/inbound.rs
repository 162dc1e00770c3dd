//! Inbound bytes: preface, frame dispatch and visitor events

use super::{BlockKind, ConnectionAdapter, HeaderBlock};
use crate::h2::codec::FrameCodec;
use crate::h2::error::{Error, ErrorCode, Result};
use crate::h2::frames::*;
use crate::h2::intent::FrameIntent;
use crate::h2::settings::{Settings, SettingsParameter};
use crate::h2::stream::{StreamEvent, StreamId};
use crate::h2::visitor::Visitor;
use bytes::Bytes;
use tracing::{debug, trace, warn};

impl<V: Visitor> ConnectionAdapter<V> {
    /// Feed bytes read from the transport.
    ///
    /// Returns the number of bytes consumed, which is all of them: incomplete
    /// frames are buffered until the rest arrives. An `Err` is a connection
    /// error; it is latched and every later call fails with
    /// [`Error::ConnectionClosed`].
    pub fn process_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.connection_error.is_some() {
            return Err(Error::ConnectionClosed);
        }

        self.codec.feed(bytes);
        match self.process_buffered() {
            Ok(()) => Ok(bytes.len()),
            Err(error) => {
                self.fail_connection(&error);
                Err(error)
            }
        }
    }

    /// Whether the caller should keep reading from the transport
    pub fn want_read(&self) -> bool {
        if self.connection_error.is_some() {
            return false;
        }
        let goaway = self.goaway_sent || self.goaway_received;
        !(goaway && self.streams.active_stream_count() == 0)
    }

    fn process_buffered(&mut self) -> Result<()> {
        if !self.preface_received {
            if !self.codec.take_preface()? {
                return Ok(());
            }
            trace!("client preface received");
            self.preface_received = true;
            if let Some(settings) = self.initial_settings.take() {
                self.queue_initial_settings(settings);
            }
        }

        while let Some((header, payload)) = self
            .codec
            .next_frame(self.local_settings.get_max_frame_size())?
        {
            self.dispatch(header, payload)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        trace!(
            stream_id = header.stream_id,
            length = header.length,
            frame_type = header.frame_type,
            flags = header.flags.as_u8(),
            "frame received"
        );
        self.visitor.on_frame_header(
            header.stream_id,
            header.length,
            header.frame_type,
            header.flags.as_u8(),
        );

        let kind = header.kind();
        if !self.received_settings && (kind != Some(FrameType::Settings) || header.flags.is_ack()) {
            return Err(Error::Protocol(format!(
                "expected SETTINGS as the first frame, got type 0x{:x}",
                header.frame_type
            )));
        }
        if let Some(block) = &self.header_block {
            if kind != Some(FrameType::Continuation) || header.stream_id != block.stream_id {
                return Err(Error::Protocol(format!(
                    "expected CONTINUATION for stream {}",
                    block.stream_id
                )));
            }
        }
        if kind == Some(FrameType::Priority) && header.length != 5 && header.stream_id != 0 {
            warn!(stream_id = header.stream_id, length = header.length, "bad PRIORITY length");
            self.reset_stream(header.stream_id, ErrorCode::FrameSizeError);
            return Ok(());
        }

        match FrameCodec::decode_payload(&header, payload)? {
            Frame::Data(frame) => self.on_data(header.length, frame),
            Frame::Headers(frame) => self.on_headers(frame),
            Frame::Priority(frame) => {
                let priority = frame.priority;
                self.visitor.on_priority_for_stream(
                    frame.stream_id,
                    priority.stream_dependency,
                    priority.weight(),
                    priority.exclusive,
                );
                Ok(())
            }
            Frame::RstStream(frame) => self.on_rst_stream(frame),
            Frame::Settings(frame) => self.on_settings(frame),
            Frame::PushPromise(frame) => Err(Error::Protocol(format!(
                "PUSH_PROMISE on stream {} is not accepted",
                frame.stream_id
            ))),
            Frame::Ping(frame) => {
                self.visitor.on_ping(frame.id(), frame.ack);
                if !frame.ack && self.options.auto_ping_ack {
                    self.intents.push_back(FrameIntent::Ping {
                        id: frame.id(),
                        ack: true,
                    });
                }
                Ok(())
            }
            Frame::Goaway(frame) => {
                self.on_goaway(frame);
                Ok(())
            }
            Frame::WindowUpdate(frame) => self.on_window_update(frame),
            Frame::Continuation(frame) => self.on_continuation(frame),
            Frame::Unknown { header, payload } => {
                self.visitor.on_frame_received(
                    header.stream_id,
                    header.frame_type,
                    header.flags.as_u8(),
                    &payload,
                );
                Ok(())
            }
        }
    }

    /// `length` is the full payload length, padding included
    fn on_data(&mut self, length: usize, frame: DataFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        self.flow.receive(length)?;

        if !self.streams.contains(stream_id) {
            if self.streams.is_idle(stream_id) {
                return Err(Error::Protocol(format!("DATA on idle stream {}", stream_id)));
            }
            debug!(stream_id, "DATA on closed stream");
            self.intents.push_back(FrameIntent::RstStream {
                stream_id,
                error_code: ErrorCode::StreamClosed,
            });
            return self.credit_consumed(stream_id, length);
        }

        let stream_error = match self.streams.get_mut(stream_id) {
            Some(stream) if !stream.state().can_receive() => Some(ErrorCode::StreamClosed),
            // A message body cannot precede its final header block.
            Some(stream) if !stream.headers_received => Some(ErrorCode::ProtocolError),
            Some(stream) => stream.flow.receive(length).err().map(|e| e.code()),
            None => None,
        };
        if let Some(error_code) = stream_error {
            warn!(stream_id, ?error_code, "DATA rejected");
            self.reset_stream(stream_id, error_code);
            return self.credit_consumed(stream_id, length);
        }

        self.visitor.on_begin_data_for_stream(stream_id, frame.data.len());
        if !frame.data.is_empty() {
            self.visitor.on_data_for_stream(stream_id, &frame.data);
        }
        // Padding never reaches the application.
        let padding = length - frame.data.len();
        if padding > 0 {
            self.credit_consumed(stream_id, padding)?;
        }
        if frame.end_stream {
            self.on_remote_end_stream(stream_id);
        }
        Ok(())
    }

    fn on_remote_end_stream(&mut self, stream_id: StreamId) {
        self.visitor.on_end_stream(stream_id);
        let state = self.streams.transition(stream_id, StreamEvent::RecvEndStream);
        self.close_if_done(stream_id, state);
    }

    fn on_headers(&mut self, frame: HeadersFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        let kind = self.classify_header_block(stream_id, frame.end_stream)?;

        if kind != BlockKind::Ignore {
            self.visitor.on_begin_headers_for_stream(stream_id);
        }
        self.header_block = Some(HeaderBlock {
            stream_id,
            kind,
            end_stream: frame.end_stream,
            invalid: false,
            informational: false,
        });

        self.decode_block_fragment(&frame.header_block)?;
        if frame.end_headers {
            self.finish_header_block()?;
        }
        Ok(())
    }

    /// Decide what an inbound HEADERS frame means for its stream, opening the
    /// stream if the peer starts one.
    fn classify_header_block(&mut self, stream_id: StreamId, end_stream: bool) -> Result<BlockKind> {
        if let Some(stream) = self.streams.get(stream_id) {
            if !stream.state().can_receive() {
                debug!(stream_id, "HEADERS after END_STREAM");
                self.reset_stream(stream_id, ErrorCode::StreamClosed);
                return Ok(BlockKind::Ignore);
            }
            if !stream.headers_received {
                return Ok(BlockKind::Leading);
            }
            if !end_stream {
                warn!(stream_id, "trailers without END_STREAM");
                self.reset_stream(stream_id, ErrorCode::ProtocolError);
                return Ok(BlockKind::Ignore);
            }
            return Ok(BlockKind::Trailers);
        }

        if !self.streams.is_idle(stream_id) {
            debug!(stream_id, "HEADERS on closed stream");
            self.intents.push_back(FrameIntent::RstStream {
                stream_id,
                error_code: ErrorCode::StreamClosed,
            });
            return Ok(BlockKind::Ignore);
        }

        if self.perspective.is_client() || self.streams.is_local_id(stream_id) {
            return Err(Error::Protocol(format!("peer cannot open stream {}", stream_id)));
        }
        self.streams.on_inbound_stream_opened(
            stream_id,
            self.remote_settings.get_initial_window_size(),
            self.local_settings.get_initial_window_size(),
        )?;

        let over_limit = self
            .local_settings
            .get_max_concurrent_streams()
            .is_some_and(|max| self.streams.inbound_stream_count() > max as usize);
        if self.goaway_sent || over_limit {
            debug!(stream_id, over_limit, "refusing stream");
            self.streams.remove(stream_id);
            self.intents.push_back(FrameIntent::RstStream {
                stream_id,
                error_code: ErrorCode::RefusedStream,
            });
            return Ok(BlockKind::Ignore);
        }
        Ok(BlockKind::Leading)
    }

    fn on_continuation(&mut self, frame: ContinuationFrame) -> Result<()> {
        if self.header_block.is_none() {
            return Err(Error::Protocol(format!(
                "CONTINUATION without HEADERS on stream {}",
                frame.stream_id
            )));
        }
        self.decode_block_fragment(&frame.header_block)?;
        if frame.end_headers {
            self.finish_header_block()?;
        }
        Ok(())
    }

    /// Decode one fragment, delivering headers as they are decoded
    fn decode_block_fragment(&mut self, fragment: &[u8]) -> Result<()> {
        let Some(block) = self.header_block.as_mut() else {
            return Err(Error::Internal("no header block in progress".to_string()));
        };
        let visitor = &mut self.visitor;
        let validate_trailers = self.options.validate_trailers;

        self.decoder.decode_fragment(fragment, |name, value| {
            if block.kind == BlockKind::Ignore || block.invalid {
                return;
            }
            if block.kind == BlockKind::Trailers && validate_trailers && name.first() == Some(&b':') {
                block.invalid = true;
                return;
            }
            if block.kind == BlockKind::Leading && name == b":status" && value.first() == Some(&b'1') {
                block.informational = true;
            }
            visitor.on_header_for_stream(block.stream_id, name, value);
        })
    }

    fn finish_header_block(&mut self) -> Result<()> {
        let Some(block) = self.header_block.take() else {
            return Err(Error::Internal("no header block in progress".to_string()));
        };
        self.decoder.end_block()?;

        let stream_id = block.stream_id;
        if block.kind == BlockKind::Ignore {
            return Ok(());
        }
        if block.invalid {
            warn!(stream_id, "pseudo-header in trailers");
            self.reset_stream(stream_id, ErrorCode::ProtocolError);
            return Ok(());
        }

        self.visitor.on_end_headers_for_stream(stream_id);
        if block.kind == BlockKind::Leading && !block.informational {
            if let Some(stream) = self.streams.get_mut(stream_id) {
                stream.headers_received = true;
            }
        }
        if block.end_stream {
            self.on_remote_end_stream(stream_id);
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, frame: RstStreamFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        if self.streams.contains(stream_id) {
            debug!(stream_id, error_code = ?frame.error_code, "stream reset by peer");
            self.visitor.on_rst_stream(stream_id, frame.error_code);
            self.purge_stream_intents(stream_id, false);
            self.streams.transition(stream_id, StreamEvent::RecvRst);
            self.close_stream(stream_id, frame.error_code);
        } else if self.streams.is_idle(stream_id) {
            return Err(Error::Protocol(format!("RST_STREAM on idle stream {}", stream_id)));
        } else {
            trace!(stream_id, "RST_STREAM on closed stream ignored");
        }
        Ok(())
    }

    fn on_settings(&mut self, frame: SettingsFrame) -> Result<()> {
        if frame.ack {
            match self.pending_local_settings.pop_front() {
                Some(settings) => self.apply_local_settings(settings)?,
                None => warn!("SETTINGS ACK without outstanding SETTINGS"),
            }
            self.visitor.on_settings_ack();
            return Ok(());
        }

        self.received_settings = true;
        self.visitor.on_settings_start();
        for &(id, value) in &frame.entries {
            self.visitor.on_setting(id, value);
            match SettingsParameter::from_u16(id) {
                Some(param) => self.apply_remote_setting(param, value)?,
                None => trace!(id, value, "unknown setting ignored"),
            }
        }
        self.visitor.on_settings_end();
        self.intents.push_back(FrameIntent::SettingsAck);
        Ok(())
    }

    fn apply_remote_setting(&mut self, param: SettingsParameter, value: u32) -> Result<()> {
        self.remote_settings.apply(param, value)?;
        debug!(setting = %param, value, "peer setting");

        match param {
            SettingsParameter::HeaderTableSize => {
                self.encoder.apply_header_table_size_setting(value as usize);
            }
            SettingsParameter::InitialWindowSize => {
                self.streams.adjust_send_windows(value)?;
                self.reschedule_all();
            }
            SettingsParameter::EnablePush if value == 1 && self.perspective.is_client() => {
                return Err(Error::Protocol("server enabled push".to_string()));
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_local_settings(&mut self, settings: Settings) -> Result<()> {
        if let Some(size) = settings.header_table_size {
            self.decoder.apply_header_table_size_setting(size as usize);
        }
        if let Some(window) = settings.initial_window_size {
            self.streams.adjust_recv_windows(window)?;
        }
        self.local_settings.merge(&settings);
        Ok(())
    }

    fn on_goaway(&mut self, frame: GoawayFrame) {
        debug!(
            last_stream_id = frame.last_stream_id,
            error_code = ?frame.error_code,
            "GOAWAY received"
        );
        self.goaway_received = true;
        self.visitor
            .on_go_away(frame.last_stream_id, frame.error_code, &frame.debug_data);

        for stream_id in self.streams.stream_ids() {
            if self.streams.is_local_id(stream_id) && stream_id > frame.last_stream_id {
                self.purge_stream_intents(stream_id, false);
                self.streams.transition(stream_id, StreamEvent::RecvRst);
                self.close_stream(stream_id, ErrorCode::RefusedStream);
            }
        }
    }

    fn on_window_update(&mut self, frame: WindowUpdateFrame) -> Result<()> {
        let stream_id = frame.stream_id;
        let increment = frame.size_increment;

        if stream_id == 0 {
            self.flow.send.increase(increment)?;
            self.visitor.on_window_update(0, increment);
            self.reschedule_all();
            return Ok(());
        }

        if self.streams.is_idle(stream_id) {
            return Err(Error::Protocol(format!(
                "WINDOW_UPDATE on idle stream {}",
                stream_id
            )));
        }
        let Some(stream) = self.streams.get_mut(stream_id) else {
            trace!(stream_id, "WINDOW_UPDATE on closed stream ignored");
            return Ok(());
        };
        let result = stream.flow.send.increase(increment);
        match result {
            Ok(_) => {
                self.visitor.on_window_update(stream_id, increment);
                self.streams.mark_ready(stream_id);
            }
            Err(error) => {
                warn!(stream_id, %error, "bad WINDOW_UPDATE");
                self.reset_stream(stream_id, error.code());
            }
        }
        Ok(())
    }

    /// Put every stream with output back on the write scheduler
    fn reschedule_all(&mut self) {
        for stream_id in self.streams.stream_ids() {
            self.streams.mark_ready(stream_id);
        }
    }
}
