//! HTTP/2 session engine
//!
//! This module turns a byte stream into HTTP/2 protocol events and turns
//! application intent (submit a request, respond, reset a stream) into framed,
//! HPACK-compressed bytes. It performs no I/O of its own: inbound bytes are
//! handed to [`ConnectionAdapter::process_bytes`], and outbound bytes are
//! offered to the [`Visitor`] write sink from [`ConnectionAdapter::send`].
//!
//! # Architecture
//!
//! - **Frame handling**: all HTTP/2 frame types are decoded by [`codec::FrameCodec`];
//!   unknown types are reported and skipped
//! - **Stream multiplexing**: [`stream::StreamManager`] owns per-stream state,
//!   identifier rules and the round-robin write scheduler
//! - **HPACK compression**: [`hpack`] keeps the dynamic tables in lock-step with
//!   the peer
//! - **Flow control**: connection and stream windows, signed so they may go
//!   negative after a SETTINGS reduction
//! - **Settings exchange**: connection preface, SETTINGS and ACK ordering
//! - **Back-pressure**: `send` stops at the first short write and resumes from
//!   the unwritten remainder on the next call
//!
//! # Examples
//!
//! ```
//! use h2adapter::h2::{AdapterBuilder, Visitor};
//! use h2adapter::h2::hpack::headers;
//!
//! struct Sink(Vec<u8>);
//!
//! impl Visitor for Sink {
//!     fn on_ready_to_send(&mut self, data: &[u8]) -> std::io::Result<usize> {
//!         self.0.extend_from_slice(data);
//!         Ok(data.len())
//!     }
//! }
//!
//! # fn example() -> h2adapter::h2::error::Result<()> {
//! let mut client = AdapterBuilder::client().build(Sink(Vec::new()))?;
//! let stream_id = client.submit_request(
//!     &headers([
//!         (":method", "GET"),
//!         (":scheme", "http"),
//!         (":authority", "example.com"),
//!         (":path", "/"),
//!     ]),
//!     None,
//! )?;
//! assert_eq!(stream_id, 1);
//!
//! while client.want_write() {
//!     client.send()?;
//! }
//! assert!(client.visitor().0.starts_with(b"PRI * HTTP/2.0"));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod adapter;
pub mod codec;
pub mod data_source;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod hpack;
pub mod intent;
pub mod settings;
pub mod stream;
pub mod visitor;

pub use adapter::{AdapterBuilder, ConnectionAdapter};
pub use data_source::{BytesSource, DataSource, Payload};
pub use error::{Error, ErrorCode, Result};
pub use hpack::Header;
pub use settings::{Settings, SettingsParameter};
pub use stream::{StreamId, StreamState};
pub use visitor::Visitor;

/// HTTP/2 connection preface sent by clients
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (RFC 9113 Section 6.9.2)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (RFC 9113 Section 4.2)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default HPACK header table size (RFC 7541 Section 4.2)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Largest stream identifier (2^31 - 1)
pub const MAX_STREAM_ID: StreamId = 0x7FFFFFFF;

/// Stream identifier of connection-scoped frames
pub const CONNECTION_STREAM_ID: StreamId = 0;

/// Which end of the connection an adapter plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Client,
    Server,
}

impl Perspective {
    pub fn is_client(self) -> bool {
        self == Perspective::Client
    }
}
