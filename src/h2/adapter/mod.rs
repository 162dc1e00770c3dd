//! HTTP/2 connection adapter
//!
//! [`ConnectionAdapter`] is the public face of the session engine. It is
//! driven from outside: bytes read from the transport go into
//! [`process_bytes`](ConnectionAdapter::process_bytes), which reports events to
//! the [`Visitor`]; submissions queue frame intents that
//! [`send`](ConnectionAdapter::send) serializes into the visitor's write sink.
//!
//! Submissions never write. Callers loop on `send` while
//! [`want_write`](ConnectionAdapter::want_write) is true.

mod inbound;
mod outbound;

use super::codec::FrameCodec;
use super::data_source::DataSource;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use super::hpack::{Header, HpackDecoder, HpackEncoder};
use super::intent::FrameIntent;
use super::settings::{Settings, SettingsParameter};
use super::stream::{StreamEvent, StreamId, StreamManager, StreamState};
use super::visitor::Visitor;
use super::{Perspective, DEFAULT_INITIAL_WINDOW_SIZE};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy)]
struct AdapterOptions {
    validate_trailers: bool,
    auto_ping_ack: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        AdapterOptions {
            validate_trailers: true,
            auto_ping_ack: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    /// Request or response headers, including 1xx
    Leading,
    Trailers,
    /// Decoded to keep HPACK in sync, never reported
    Ignore,
}

/// Inbound header block spanning HEADERS and CONTINUATION frames
#[derive(Debug)]
struct HeaderBlock {
    stream_id: StreamId,
    kind: BlockKind,
    end_stream: bool,
    /// A pseudo-header showed up in trailers; delivery stopped there
    invalid: bool,
    informational: bool,
}

/// HTTP/2 session over a visitor
pub struct ConnectionAdapter<V: Visitor> {
    visitor: V,
    perspective: Perspective,
    options: AdapterOptions,

    codec: FrameCodec,
    encoder: HpackEncoder,
    decoder: HpackDecoder,
    streams: StreamManager,

    /// Our settings the peer has acknowledged
    local_settings: Settings,
    /// Our settings sent or queued, oldest first, awaiting ACK
    pending_local_settings: VecDeque<Settings>,
    remote_settings: Settings,
    /// Server: initial SETTINGS queued once the client preface arrives
    initial_settings: Option<Settings>,

    /// Connection-level windows
    flow: FlowControl,

    intents: VecDeque<FrameIntent>,
    /// Bytes of a frame the sink did not take yet
    serialized_prefix: Bytes,
    send_client_magic: bool,
    preface_received: bool,
    received_settings: bool,
    header_block: Option<HeaderBlock>,

    goaway_sent: bool,
    goaway_received: bool,
    connection_error: Option<ErrorCode>,
}

impl<V: Visitor> ConnectionAdapter<V> {
    /// Create an adapter with default settings and options
    pub fn new(perspective: Perspective, visitor: V) -> Self {
        let initial = match perspective {
            Perspective::Client => default_client_settings(),
            Perspective::Server => Settings::new(),
        };
        Self::from_parts(perspective, visitor, initial, AdapterOptions::default())
    }

    fn from_parts(perspective: Perspective, visitor: V, initial: Settings, options: AdapterOptions) -> Self {
        let mut adapter = ConnectionAdapter {
            visitor,
            perspective,
            options,
            codec: FrameCodec::new(),
            encoder: HpackEncoder::new(),
            decoder: HpackDecoder::new(),
            streams: StreamManager::new(perspective.is_client()),
            local_settings: Settings::new(),
            pending_local_settings: VecDeque::new(),
            remote_settings: Settings::new(),
            initial_settings: None,
            flow: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE),
            intents: VecDeque::new(),
            serialized_prefix: Bytes::new(),
            send_client_magic: false,
            preface_received: perspective.is_client(),
            received_settings: false,
            header_block: None,
            goaway_sent: false,
            goaway_received: false,
            connection_error: None,
        };

        match perspective {
            Perspective::Client => {
                adapter.send_client_magic = true;
                adapter.queue_initial_settings(initial);
            }
            Perspective::Server => adapter.initial_settings = Some(initial),
        }
        adapter
    }

    fn queue_initial_settings(&mut self, settings: Settings) {
        self.intents.push_front(FrameIntent::Settings(settings.to_entries()));
        self.pending_local_settings.push_front(settings);
    }

    pub fn is_server_session(&self) -> bool {
        self.perspective == Perspective::Server
    }

    pub fn perspective(&self) -> Perspective {
        self.perspective
    }

    /// Open a stream and queue its request headers.
    ///
    /// Without a body the HEADERS frame carries END_STREAM.
    pub fn submit_request(&mut self, headers: &[Header], body: Option<Box<dyn DataSource>>) -> Result<StreamId> {
        if self.perspective != Perspective::Client {
            return Err(Error::InvalidArgument("servers cannot submit requests".to_string()));
        }
        if self.connection_error.is_some() || self.goaway_received {
            return Err(Error::ConnectionClosed);
        }

        let stream_id = self.streams.create_outbound_stream(
            self.remote_settings.get_initial_window_size(),
            self.local_settings.get_initial_window_size(),
        )?;
        self.queue_leading_headers(stream_id, headers, body);
        Ok(stream_id)
    }

    /// Queue response headers for a stream the peer opened
    pub fn submit_response(&mut self, stream_id: StreamId, headers: &[Header], body: Option<Box<dyn DataSource>>) -> Result<()> {
        let Some(stream) = self.streams.get(stream_id) else {
            warn!(stream_id, "response for unknown stream");
            return Err(Error::StreamNotFound(stream_id));
        };
        if stream.headers_submitted {
            return Err(Error::InvalidArgument(format!(
                "headers already submitted on stream {}",
                stream_id
            )));
        }
        if !stream.state().can_send() {
            return Err(Error::StreamClosed(stream_id));
        }

        self.queue_leading_headers(stream_id, headers, body);
        Ok(())
    }

    fn queue_leading_headers(&mut self, stream_id: StreamId, headers: &[Header], body: Option<Box<dyn DataSource>>) {
        let end_stream = body.is_none();
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.headers_submitted = true;
            stream.local_fin_queued = end_stream;
            stream.data_source = body;
        }
        self.intents.push_back(FrameIntent::Headers {
            stream_id,
            headers: headers.to_vec(),
            end_stream,
        });
        debug!(stream_id, end_stream, "submitted headers");
    }

    /// Queue trailers, sent with END_STREAM once the body is exhausted.
    ///
    /// The body source must leave the stream open (`send_fin() == false`).
    pub fn submit_trailer(&mut self, stream_id: StreamId, trailers: &[Header]) -> Result<()> {
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return Err(Error::StreamNotFound(stream_id));
        };
        if stream.trailers_submitted {
            return Err(Error::InvalidArgument(format!(
                "trailers already submitted on stream {}",
                stream_id
            )));
        }
        if !stream.state().can_send() || stream.local_fin_queued {
            return Err(Error::StreamClosed(stream_id));
        }
        if stream.data_source.as_ref().is_some_and(|source| source.send_fin()) {
            return Err(Error::InvalidArgument(format!(
                "body of stream {} ends the stream itself",
                stream_id
            )));
        }

        stream.trailers_submitted = true;
        stream.local_fin_queued = true;
        stream.pending_trailers = Some(trailers.to_vec());
        self.streams.mark_ready(stream_id);
        debug!(stream_id, "submitted trailers");
        Ok(())
    }

    /// Queue a SETTINGS frame; the values take effect locally once acknowledged
    pub fn submit_settings(&mut self, entries: &[(SettingsParameter, u32)]) -> Result<()> {
        let settings = Settings::from_entries(entries)?;
        self.pending_local_settings.push_back(settings);
        self.intents.push_back(FrameIntent::Settings(entries.to_vec()));
        Ok(())
    }

    pub fn submit_priority_for_stream(&mut self, stream_id: StreamId, parent: StreamId, weight: u16, exclusive: bool) {
        self.intents.push_back(FrameIntent::Priority {
            stream_id,
            parent,
            weight,
            exclusive,
        });
    }

    /// Reset a stream.
    ///
    /// Any unsent headers, body and trailers of the stream are discarded.
    pub fn submit_rst(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        self.reset_stream(stream_id, error_code);
    }

    pub fn submit_ping(&mut self, id: u64) {
        self.intents.push_back(FrameIntent::Ping { id, ack: false });
    }

    pub fn submit_go_away(&mut self, last_stream_id: StreamId, error_code: ErrorCode, opaque: &[u8]) {
        self.intents.push_back(FrameIntent::GoAway {
            last_stream_id,
            error_code,
            opaque: Bytes::copy_from_slice(opaque),
        });
    }

    /// Grant the peer more receive window on a stream, or on the connection
    /// when `stream_id` is 0.
    ///
    /// A zero increment, or one that would take the window past 2^31-1, is
    /// refused and nothing is queued.
    pub fn submit_window_update(&mut self, stream_id: StreamId, increment: u32) -> Result<()> {
        let window = if stream_id == 0 {
            Some(&mut self.flow.recv)
        } else {
            self.streams.get_mut(stream_id).map(|stream| &mut stream.flow.recv)
        };
        if let Some(window) = window {
            if let Err(error) = window.increase(increment) {
                warn!(stream_id, increment, %error, "window update not submitted");
                return Err(error);
            }
        } else if increment == 0 {
            return Err(Error::InvalidArgument("zero window increment".to_string()));
        }
        self.intents
            .push_back(FrameIntent::WindowUpdate { stream_id, increment });
        Ok(())
    }

    /// Metadata frames are not supported
    pub fn submit_metadata(&mut self, stream_id: StreamId, end_metadata: bool) -> Result<()> {
        debug!(stream_id, end_metadata, "metadata submission");
        Self::programmer_error(Error::NotImplemented("metadata".to_string()))
    }

    /// Tell the adapter the application has processed `num_bytes` of DATA on
    /// a stream, returning that much window to the peer.
    ///
    /// The stream may already be closed, typically after its final DATA
    /// carried END_STREAM; only the connection window is credited then. A
    /// stream that was never opened is a programmer error.
    pub fn mark_data_consumed_for_stream(&mut self, stream_id: StreamId, num_bytes: usize) -> Result<()> {
        if !self.streams.contains(stream_id) {
            if stream_id == 0 || self.streams.is_idle(stream_id) {
                return Self::programmer_error(Error::StreamNotFound(stream_id));
            }
            debug!(stream_id, num_bytes, "data consumed on closed stream");
        }
        self.credit_consumed(stream_id, num_bytes)
    }

    /// Return consumed receive window on the stream (if still live) and the
    /// connection.
    fn credit_consumed(&mut self, stream_id: StreamId, num_bytes: usize) -> Result<()> {
        let increment = u32::try_from(num_bytes)
            .map_err(|_| Error::InvalidArgument(format!("{} bytes exceeds any window", num_bytes)))?;
        if increment == 0 {
            return Ok(());
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.flow.recv.increase(increment)?;
            self.intents
                .push_back(FrameIntent::WindowUpdate { stream_id, increment });
        }
        self.flow.recv.increase(increment)?;
        self.intents.push_back(FrameIntent::WindowUpdate {
            stream_id: 0,
            increment,
        });
        Ok(())
    }

    /// Reschedule a stream whose body source said "not ready"
    pub fn resume_stream(&mut self, stream_id: StreamId) -> bool {
        let Some(stream) = self.streams.get_mut(stream_id) else {
            return false;
        };
        if !stream.blocked {
            return false;
        }
        stream.blocked = false;
        self.streams.mark_ready(stream_id);
        true
    }

    /// Connection send window
    pub fn send_window_size(&self) -> i64 {
        self.flow.send.size()
    }

    /// Connection receive window
    pub fn receive_window_size(&self) -> i64 {
        self.flow.recv.size()
    }

    pub fn stream_send_window_size(&self, stream_id: StreamId) -> Option<i64> {
        self.streams.get(stream_id).map(|s| s.flow.send.size())
    }

    pub fn stream_receive_window_size(&self, stream_id: StreamId) -> Option<i64> {
        self.streams.get(stream_id).map(|s| s.flow.recv.size())
    }

    /// State of a live stream; closed and idle streams are `None`
    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get(stream_id).map(|s| s.state())
    }

    pub fn active_stream_count(&self) -> usize {
        self.streams.active_stream_count()
    }

    pub fn highest_received_stream_id(&self) -> StreamId {
        self.streams.highest_inbound_id()
    }

    pub fn hpack_encoder_dynamic_table_size(&self) -> usize {
        self.encoder.table().size()
    }

    pub fn hpack_decoder_dynamic_table_size(&self) -> usize {
        self.decoder.table().size()
    }

    /// Our acknowledged settings
    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    pub fn visitor(&self) -> &V {
        &self.visitor
    }

    pub fn visitor_mut(&mut self) -> &mut V {
        &mut self.visitor
    }

    pub fn into_visitor(self) -> V {
        self.visitor
    }

    /// Close a stream locally with RST_STREAM.
    ///
    /// A stream we opened whose HEADERS never left is still idle for the
    /// peer, so it is dropped without putting anything on the wire.
    fn reset_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        let unseen = self.streams.is_local_id(stream_id)
            && self.streams.get(stream_id).is_some_and(|stream| !stream.headers_sent);
        self.purge_stream_intents(stream_id, unseen);
        if self.streams.transition(stream_id, StreamEvent::SendRst).is_some() {
            self.close_stream(stream_id, error_code);
        }
        if unseen {
            debug!(stream_id, "stream dropped before its headers were sent");
            return;
        }
        self.intents.push_back(FrameIntent::RstStream {
            stream_id,
            error_code,
        });
    }

    /// Drop queued HEADERS for a stream that is going away. WINDOW_UPDATE
    /// goes too when the peer has never seen the stream.
    fn purge_stream_intents(&mut self, stream_id: StreamId, unseen: bool) {
        self.intents.retain(|intent| match intent {
            FrameIntent::Headers { stream_id: id, .. } => *id != stream_id,
            FrameIntent::WindowUpdate { stream_id: id, .. } => !unseen || *id != stream_id,
            _ => true,
        });
    }

    fn close_stream(&mut self, stream_id: StreamId, error_code: ErrorCode) {
        if self.streams.remove(stream_id).is_some() {
            debug!(stream_id, ?error_code, "stream closed");
            self.visitor.on_close_stream(stream_id, error_code);
        }
    }

    fn close_if_done(&mut self, stream_id: StreamId, state: Option<StreamState>) {
        if state == Some(StreamState::Closed) {
            self.close_stream(stream_id, ErrorCode::NoError);
        }
    }

    /// Latch a connection error: report it, drop every stream and queue GOAWAY
    fn fail_connection(&mut self, error: &Error) {
        if self.connection_error.is_some() {
            return;
        }
        let error_code = error.code();
        error!(%error, ?error_code, "connection error");

        self.connection_error = Some(error_code);
        self.header_block = None;
        self.streams.clear();
        self.intents.push_back(FrameIntent::GoAway {
            last_stream_id: self.streams.highest_inbound_id(),
            error_code,
            opaque: Bytes::new(),
        });
        self.visitor.on_connection_error(error);
    }

    /// Misuse of the API by the embedding code
    fn programmer_error<T>(error: Error) -> Result<T> {
        error!(%error, "adapter misuse");
        debug_assert!(false, "{}", error);
        Err(error)
    }
}

fn default_client_settings() -> Settings {
    Settings {
        enable_push: Some(false),
        ..Settings::default()
    }
}

/// Builder for a [`ConnectionAdapter`]
#[derive(Debug, Clone)]
pub struct AdapterBuilder {
    perspective: Perspective,
    settings: Settings,
    options: AdapterOptions,
}

impl AdapterBuilder {
    /// Start a builder for the given side of the connection
    pub fn new(perspective: Perspective) -> Self {
        let settings = match perspective {
            Perspective::Client => default_client_settings(),
            Perspective::Server => Settings::new(),
        };
        AdapterBuilder {
            perspective,
            settings,
            options: AdapterOptions::default(),
        }
    }

    pub fn client() -> Self {
        Self::new(Perspective::Client)
    }

    pub fn server() -> Self {
        Self::new(Perspective::Server)
    }

    /// SETTINGS_HEADER_TABLE_SIZE: the dynamic table we let the peer's
    /// encoder use
    pub fn header_table_size(self, size: u32) -> Self {
        self.with_setting(|s| s.header_table_size = Some(size))
    }

    pub fn enable_push(self, enable: bool) -> Self {
        self.with_setting(|s| s.enable_push = Some(enable))
    }

    /// Inbound streams past this limit are refused
    pub fn max_concurrent_streams(self, max: u32) -> Self {
        self.with_setting(|s| s.max_concurrent_streams = Some(max))
    }

    /// Initial receive window of every stream
    pub fn initial_window_size(self, size: u32) -> Self {
        self.with_setting(|s| s.initial_window_size = Some(size))
    }

    pub fn max_frame_size(self, size: u32) -> Self {
        self.with_setting(|s| s.max_frame_size = Some(size))
    }

    pub fn max_header_list_size(self, size: u32) -> Self {
        self.with_setting(|s| s.max_header_list_size = Some(size))
    }

    fn with_setting(mut self, set: impl FnOnce(&mut Settings)) -> Self {
        set(&mut self.settings);
        self
    }

    /// Reset streams whose trailers carry pseudo-headers (default on)
    pub fn validate_trailers(mut self, validate: bool) -> Self {
        self.options.validate_trailers = validate;
        self
    }

    /// Answer inbound PINGs automatically (default on)
    pub fn auto_ping_ack(mut self, enable: bool) -> Self {
        self.options.auto_ping_ack = enable;
        self
    }

    /// Build the adapter; the initial SETTINGS are queued for the first `send`
    pub fn build<V: Visitor>(self, visitor: V) -> Result<ConnectionAdapter<V>> {
        self.settings.validate()?;
        if self.perspective == Perspective::Server && self.settings.enable_push == Some(true) {
            return Err(Error::InvalidSettings("servers cannot enable push".to_string()));
        }
        Ok(ConnectionAdapter::from_parts(
            self.perspective,
            visitor,
            self.settings,
            self.options,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullVisitor;

    impl Visitor for NullVisitor {
        fn on_ready_to_send(&mut self, data: &[u8]) -> std::io::Result<usize> {
            Ok(data.len())
        }
    }

    #[test]
    fn test_client_queues_preface_settings() {
        let adapter = ConnectionAdapter::new(Perspective::Client, NullVisitor);
        assert!(!adapter.is_server_session());
        assert!(adapter.want_write());
        assert!(matches!(
            adapter.intents.front(),
            Some(FrameIntent::Settings(entries)) if entries == &[(SettingsParameter::EnablePush, 0)]
        ));
        assert_eq!(adapter.pending_local_settings.len(), 1);
    }

    #[test]
    fn test_server_waits_for_preface() {
        let adapter = ConnectionAdapter::new(Perspective::Server, NullVisitor);
        assert!(adapter.is_server_session());
        assert!(!adapter.want_write());
        assert!(adapter.want_read());
        assert!(adapter.initial_settings.is_some());
    }

    #[test]
    fn test_builder_validates_settings() {
        assert!(AdapterBuilder::client().max_frame_size(100).build(NullVisitor).is_err());
        assert!(AdapterBuilder::server().enable_push(true).build(NullVisitor).is_err());

        let adapter = AdapterBuilder::client()
            .initial_window_size(1 << 20)
            .validate_trailers(false)
            .build(NullVisitor)
            .unwrap();
        assert!(!adapter.options.validate_trailers);
        // Applied locally only once acknowledged.
        assert_eq!(adapter.local_settings().get_initial_window_size(), 65535);
    }

    #[test]
    fn test_submit_request_on_server_is_rejected() {
        let mut adapter = ConnectionAdapter::new(Perspective::Server, NullVisitor);
        assert!(matches!(
            adapter.submit_request(&[], None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reset_before_headers_sent_emits_nothing() {
        let mut adapter = ConnectionAdapter::new(Perspective::Client, NullVisitor);
        let stream_id = adapter
            .submit_request(&[Header::new(&b":method"[..], &b"GET"[..])], None)
            .unwrap();
        adapter.submit_priority_for_stream(stream_id, 0, 16, false);
        adapter.submit_window_update(stream_id, 100).unwrap();
        adapter.submit_rst(stream_id, ErrorCode::Cancel);

        let names: Vec<&str> = adapter.intents.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["SETTINGS", "PRIORITY"]);
        assert_eq!(adapter.stream_state(stream_id), None);
    }

    #[test]
    fn test_reset_after_headers_sent_queues_rst() {
        let mut adapter = ConnectionAdapter::new(Perspective::Client, NullVisitor);
        let stream_id = adapter
            .submit_request(&[Header::new(&b":method"[..], &b"GET"[..])], None)
            .unwrap();
        adapter.send().unwrap();
        adapter.submit_rst(stream_id, ErrorCode::Cancel);

        let names: Vec<&str> = adapter.intents.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["RST_STREAM"]);
    }
}
