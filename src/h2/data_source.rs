//! Outbound body sources
//!
//! A [`DataSource`] supplies DATA payload for one stream on demand. The adapter
//! pulls from it while serializing, asking for no more than the flow-control
//! windows and the peer's frame size allow. A source that has nothing yet
//! answers [`Payload::NotReady`]; the stream is then parked until
//! [`ConnectionAdapter::resume_stream`](super::ConnectionAdapter::resume_stream).

use super::error::Result;
use bytes::Bytes;

/// One pull from a [`DataSource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Up to `max_len` bytes; `end_of_data` marks the last chunk of the body
    Ready { data: Bytes, end_of_data: bool },
    /// Nothing available now
    NotReady,
}

/// Lazily supplies the body of an outbound stream
pub trait DataSource {
    /// Produce at most `max_len` bytes of body.
    ///
    /// An `Err` resets the stream with INTERNAL_ERROR.
    fn read_payload(&mut self, max_len: usize) -> Result<Payload>;

    /// Whether the end of the body also ends the stream.
    ///
    /// Sources that return `false` leave the stream open for trailers.
    fn send_fin(&self) -> bool;
}

/// In-memory body
#[derive(Debug, Clone)]
pub struct BytesSource {
    remaining: Bytes,
    send_fin: bool,
}

impl BytesSource {
    pub fn new(body: impl Into<Bytes>, send_fin: bool) -> Self {
        BytesSource {
            remaining: body.into(),
            send_fin,
        }
    }

    /// Bytes not yet handed out
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl DataSource for BytesSource {
    fn read_payload(&mut self, max_len: usize) -> Result<Payload> {
        let n = max_len.min(self.remaining.len());
        let data = self.remaining.split_to(n);
        Ok(Payload::Ready {
            data,
            end_of_data: self.remaining.is_empty(),
        })
    }

    fn send_fin(&self) -> bool {
        self.send_fin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_source_chunks() {
        let mut source = BytesSource::new(&b"hello world"[..], true);

        assert_eq!(
            source.read_payload(5).unwrap(),
            Payload::Ready {
                data: Bytes::from_static(b"hello"),
                end_of_data: false
            }
        );
        assert_eq!(source.remaining(), 6);
        assert_eq!(
            source.read_payload(100).unwrap(),
            Payload::Ready {
                data: Bytes::from_static(b" world"),
                end_of_data: true
            }
        );
        assert!(source.send_fin());
    }

    #[test]
    fn test_empty_body_ends_immediately() {
        let mut source = BytesSource::new(Bytes::new(), false);
        assert_eq!(
            source.read_payload(16384).unwrap(),
            Payload::Ready {
                data: Bytes::new(),
                end_of_data: true
            }
        );
        assert!(!source.send_fin());
    }
}
