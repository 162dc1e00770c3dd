//! Stream table and write scheduler
//!
//! Streams are created directly in the open state and dropped from the
//! manager once closed, so a lookup miss is how "closed" and "idle" ids show.

use super::data_source::DataSource;
use super::error::{Error, Result};
use super::flow_control::FlowControl;
use super::hpack::Header;
use super::MAX_STREAM_ID;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::trace;

/// 31-bit stream identifier; 0 names the connection
pub type StreamId = u32;

/// Lifecycle states of RFC 9113 Section 5.1 that a tracked stream can be in.
/// Reserved states never occur because push is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Open,
    /// We sent END_STREAM
    HalfClosedLocal,
    /// The peer sent END_STREAM
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Our side may still send DATA or trailers
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub fn is_closed(&self) -> bool {
        *self == StreamState::Closed
    }
}

/// Lifecycle triggers: END_STREAM and RST_STREAM in either direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    SendEndStream,
    RecvEndStream,
    SendRst,
    RecvRst,
}

/// Per-stream state kept by the adapter
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    /// Stream-level flow-control windows
    pub flow: FlowControl,
    /// Body still to be sent; `None` once exhausted or when there is none
    pub(crate) data_source: Option<Box<dyn DataSource>>,
    /// Trailers waiting for the body to finish
    pub(crate) pending_trailers: Option<Vec<Header>>,
    pub(crate) trailers_submitted: bool,
    /// Leading headers queued by a submission
    pub(crate) headers_submitted: bool,
    /// Leading headers serialized
    pub(crate) headers_sent: bool,
    /// Final (non-1xx) leading headers received from the peer
    pub(crate) headers_received: bool,
    /// The body source answered "not ready"
    pub(crate) blocked: bool,
    /// An END_STREAM is already queued for our side
    pub(crate) local_fin_queued: bool,
    scheduled: bool,
}

impl H2Stream {
    /// Create an open stream with the given window sizes
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Open,
            flow: FlowControl::new(send_window, recv_window),
            data_source: None,
            pending_trailers: None,
            trailers_submitted: false,
            headers_submitted: false,
            headers_sent: false,
            headers_received: false,
            blocked: false,
            local_fin_queued: false,
            scheduled: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the write scheduler has something to send for this stream
    pub fn has_pending_output(&self) -> bool {
        self.headers_sent
            && self.state.can_send()
            && ((self.data_source.is_some() && !self.blocked) || self.pending_trailers.is_some())
    }

    fn apply(&mut self, event: StreamEvent) -> StreamState {
        use StreamEvent::*;
        use StreamState::*;

        self.state = match (self.state, event) {
            (_, SendRst) | (_, RecvRst) => Closed,
            (Idle, SendEndStream) | (Open, SendEndStream) => HalfClosedLocal,
            (Idle, RecvEndStream) | (Open, RecvEndStream) => HalfClosedRemote,
            (HalfClosedRemote, SendEndStream) | (HalfClosedLocal, RecvEndStream) => Closed,
            (state, _) => state,
        };
        self.state
    }
}

impl fmt::Debug for H2Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H2Stream")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("send_window", &self.flow.send.size())
            .field("recv_window", &self.flow.recv.size())
            .field("has_data_source", &self.data_source.is_some())
            .field("pending_trailers", &self.pending_trailers.is_some())
            .field("blocked", &self.blocked)
            .finish()
    }
}

/// Owns every live stream of a connection, enforces identifier parity and
/// monotonicity, and keeps the round-robin list of streams ready to write.
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    is_client: bool,
    /// Next locally initiated id (client: odd, server: even)
    next_outbound_id: StreamId,
    highest_inbound_id: StreamId,
    ready: VecDeque<StreamId>,
}

impl StreamManager {
    /// Clients open odd ids, servers even ones
    pub fn new(is_client: bool) -> Self {
        StreamManager {
            streams: HashMap::new(),
            is_client,
            next_outbound_id: if is_client { 1 } else { 2 },
            highest_inbound_id: 0,
            ready: VecDeque::new(),
        }
    }

    /// Whether `stream_id` has the parity of locally initiated streams
    pub fn is_local_id(&self, stream_id: StreamId) -> bool {
        stream_id != 0 && (stream_id % 2 == 1) == self.is_client
    }

    /// Allocate the next local stream id and open the stream
    pub fn create_outbound_stream(&mut self, send_window: u32, recv_window: u32) -> Result<StreamId> {
        let stream_id = self.next_outbound_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::IdExhausted);
        }
        self.next_outbound_id += 2;

        self.streams
            .insert(stream_id, H2Stream::new(stream_id, send_window, recv_window));
        trace!(stream_id, "opened outbound stream");
        Ok(stream_id)
    }

    /// Open a stream started by the peer
    pub fn on_inbound_stream_opened(&mut self, stream_id: StreamId, send_window: u32, recv_window: u32) -> Result<()> {
        if stream_id == 0 || self.is_local_id(stream_id) {
            return Err(Error::Protocol(format!(
                "peer opened stream {} with our parity",
                stream_id
            )));
        }
        if stream_id <= self.highest_inbound_id {
            return Err(Error::Protocol(format!(
                "peer opened stream {} after stream {}",
                stream_id, self.highest_inbound_id
            )));
        }

        self.highest_inbound_id = stream_id;
        self.streams
            .insert(stream_id, H2Stream::new(stream_id, send_window, recv_window));
        trace!(stream_id, "opened inbound stream");
        Ok(())
    }

    /// Apply a lifecycle event; `None` if the stream is not live
    pub fn transition(&mut self, stream_id: StreamId, event: StreamEvent) -> Option<StreamState> {
        let stream = self.streams.get_mut(&stream_id)?;
        let before = stream.state;
        let after = stream.apply(event);
        if before != after {
            trace!(stream_id, ?event, ?before, ?after, "stream transition");
        }
        Some(after)
    }

    /// Forget a stream
    pub fn remove(&mut self, stream_id: StreamId) -> Option<H2Stream> {
        let stream = self.streams.remove(&stream_id)?;
        if stream.scheduled {
            self.ready.retain(|&id| id != stream_id);
        }
        Some(stream)
    }

    pub fn get(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    pub fn contains(&self, stream_id: StreamId) -> bool {
        self.streams.contains_key(&stream_id)
    }

    /// Whether `stream_id` was never opened by its initiator
    pub fn is_idle(&self, stream_id: StreamId) -> bool {
        if stream_id == 0 {
            return false;
        }
        if self.is_local_id(stream_id) {
            stream_id >= self.next_outbound_id
        } else {
            stream_id > self.highest_inbound_id
        }
    }

    pub fn highest_inbound_id(&self) -> StreamId {
        self.highest_inbound_id
    }

    /// Highest locally initiated id handed out so far, 0 if none
    pub fn highest_outbound_id(&self) -> StreamId {
        self.next_outbound_id.saturating_sub(2)
    }

    /// Get number of live streams
    pub fn active_stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Number of live streams opened by the peer
    pub fn inbound_stream_count(&self) -> usize {
        self.streams.keys().filter(|&&id| !self.is_local_id(id)).count()
    }

    /// Get all stream IDs, in ascending order
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Apply a new peer SETTINGS_INITIAL_WINDOW_SIZE to every send window
    pub fn adjust_send_windows(&mut self, initial_window_size: u32) -> Result<()> {
        for stream in self.streams.values_mut() {
            stream.flow.send.update_initial_size(initial_window_size)?;
        }
        Ok(())
    }

    /// Apply our acknowledged SETTINGS_INITIAL_WINDOW_SIZE to every receive window
    pub fn adjust_recv_windows(&mut self, initial_window_size: u32) -> Result<()> {
        for stream in self.streams.values_mut() {
            stream.flow.recv.update_initial_size(initial_window_size)?;
        }
        Ok(())
    }

    /// Queue a stream for the write scheduler if it has output
    pub fn mark_ready(&mut self, stream_id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            if !stream.scheduled && stream.has_pending_output() {
                stream.scheduled = true;
                self.ready.push_back(stream_id);
            }
        }
    }

    /// Take the next stream in round-robin order
    pub fn next_ready(&mut self) -> Option<StreamId> {
        while let Some(stream_id) = self.ready.pop_front() {
            if let Some(stream) = self.streams.get_mut(&stream_id) {
                stream.scheduled = false;
                if stream.has_pending_output() {
                    return Some(stream_id);
                }
            }
        }
        None
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Drop every stream, as on a fatal connection error
    pub fn clear(&mut self) {
        self.streams.clear();
        self.ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2::data_source::BytesSource;

    #[test]
    fn test_stream_state_transitions() {
        let mut manager = StreamManager::new(true);
        let id = manager.create_outbound_stream(65535, 65535).unwrap();
        assert_eq!(manager.get(id).unwrap().state(), StreamState::Open);

        assert_eq!(
            manager.transition(id, StreamEvent::SendEndStream),
            Some(StreamState::HalfClosedLocal)
        );
        // A second END_STREAM in the same direction changes nothing.
        assert_eq!(
            manager.transition(id, StreamEvent::SendEndStream),
            Some(StreamState::HalfClosedLocal)
        );
        assert_eq!(
            manager.transition(id, StreamEvent::RecvEndStream),
            Some(StreamState::Closed)
        );
    }

    #[test]
    fn test_rst_closes_from_any_state() {
        let mut manager = StreamManager::new(false);
        manager.on_inbound_stream_opened(1, 65535, 65535).unwrap();
        manager.transition(1, StreamEvent::RecvEndStream);
        assert_eq!(manager.transition(1, StreamEvent::SendRst), Some(StreamState::Closed));

        manager.remove(1).unwrap();
        assert_eq!(manager.transition(1, StreamEvent::RecvRst), None);
        assert_eq!(manager.transition(7, StreamEvent::RecvRst), None);
        assert!(manager.remove(1).is_none());
    }

    #[test]
    fn test_stream_manager_client() {
        let mut manager = StreamManager::new(true);

        assert_eq!(manager.create_outbound_stream(65535, 65535).unwrap(), 1);
        assert_eq!(manager.create_outbound_stream(65535, 65535).unwrap(), 3);
        assert_eq!(manager.create_outbound_stream(65535, 65535).unwrap(), 5);

        assert_eq!(manager.active_stream_count(), 3);
        assert_eq!(manager.highest_outbound_id(), 5);
        assert!(manager.is_idle(7));
        assert!(!manager.is_idle(3));
    }

    #[test]
    fn test_stream_manager_server() {
        let mut manager = StreamManager::new(false);
        assert_eq!(manager.highest_outbound_id(), 0);

        assert_eq!(manager.create_outbound_stream(65535, 65535).unwrap(), 2);
        assert_eq!(manager.create_outbound_stream(65535, 65535).unwrap(), 4);
        assert_eq!(manager.active_stream_count(), 2);
    }

    #[test]
    fn test_id_exhausted() {
        let mut manager = StreamManager::new(true);
        manager.next_outbound_id = MAX_STREAM_ID;

        assert_eq!(manager.create_outbound_stream(65535, 65535).unwrap(), MAX_STREAM_ID);
        assert!(matches!(
            manager.create_outbound_stream(65535, 65535),
            Err(Error::IdExhausted)
        ));
    }

    #[test]
    fn test_inbound_parity_and_order() {
        let mut manager = StreamManager::new(false);

        manager.on_inbound_stream_opened(3, 65535, 65535).unwrap();
        assert!(matches!(
            manager.on_inbound_stream_opened(2, 65535, 65535),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            manager.on_inbound_stream_opened(1, 65535, 65535),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            manager.on_inbound_stream_opened(3, 65535, 65535),
            Err(Error::Protocol(_))
        ));
        manager.on_inbound_stream_opened(5, 65535, 65535).unwrap();

        assert_eq!(manager.highest_inbound_id(), 5);
        assert_eq!(manager.inbound_stream_count(), 2);
        assert!(!manager.is_idle(1));
        assert!(manager.is_idle(7));
    }

    #[test]
    fn test_window_adjustment() {
        let mut manager = StreamManager::new(true);
        let id = manager.create_outbound_stream(65535, 65535).unwrap();
        manager.get_mut(id).unwrap().flow.send.consume(65000);

        manager.adjust_send_windows(100).unwrap();
        assert_eq!(manager.get(id).unwrap().flow.send.size(), 100 - 65000);

        manager.adjust_recv_windows(1 << 20).unwrap();
        assert_eq!(manager.get(id).unwrap().flow.recv.size(), 1 << 20);
    }

    #[test]
    fn test_round_robin_scheduler() {
        let mut manager = StreamManager::new(true);
        let a = manager.create_outbound_stream(65535, 65535).unwrap();
        let b = manager.create_outbound_stream(65535, 65535).unwrap();
        for id in [a, b] {
            let stream = manager.get_mut(id).unwrap();
            stream.headers_sent = true;
            stream.data_source = Some(Box::new(BytesSource::new(&b"body"[..], true)));
        }

        // Nothing without headers on the wire.
        let c = manager.create_outbound_stream(65535, 65535).unwrap();
        manager.mark_ready(c);

        manager.mark_ready(a);
        manager.mark_ready(b);
        manager.mark_ready(a);
        assert_eq!(manager.next_ready(), Some(a));
        manager.mark_ready(a);
        assert_eq!(manager.next_ready(), Some(b));
        assert_eq!(manager.next_ready(), Some(a));
        assert_eq!(manager.next_ready(), None);

        manager.mark_ready(b);
        manager.remove(b);
        assert!(!manager.has_ready());
    }
}
