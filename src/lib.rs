//! h2adapter - HTTP/2 session engine
//!
//! A sans-I/O HTTP/2 connection adapter: stream multiplexing, flow control,
//! HPACK header compression and frame serialization with back-pressure. The
//! embedding code moves bytes between the adapter and the transport.

pub mod h2;

pub use h2::{
    AdapterBuilder, BytesSource, ConnectionAdapter, DataSource, Error, ErrorCode, Header, Payload, Perspective,
    Result, Settings, SettingsParameter, StreamId, StreamState, Visitor,
};
