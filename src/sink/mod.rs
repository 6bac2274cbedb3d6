//! Consumer sinks
//!
//! A [`Sink`] is the write capability handed to the relay by a transport
//! adapter: snapshot responses and live feed buffers are delivered through
//! it. The relay only ever borrows sinks through `Arc`; it never owns the
//! underlying transport.
//!
//! Two adapters cover the common transports: [`BufferSink`] accumulates a
//! one-shot snapshot for an HTTP-style response, and [`ChannelSink`] forwards
//! each buffer to an async consumer task (WebSocket writer, streaming RPC
//! frame writer, and so on).

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

/// Write-capable consumer of relay output.
///
/// `write` either accepts the whole buffer (returning its length) or fails.
/// It is called from the engine's callback thread, so implementations must
/// not block for long and must never call back into the relay.
pub trait Sink: Send + Sync {
    /// Write one output buffer, returning the number of bytes accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// Identity of a sink, used to cancel a subscription by sink rather than
/// by token. Clones of one `Arc` share an identity; independently created
/// sinks never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SinkId(usize);

impl SinkId {
    pub(crate) fn of(sink: &Arc<dyn Sink>) -> Self {
        SinkId(Arc::as_ptr(sink).cast::<()>() as usize)
    }
}

/// Sink that accumulates everything written into one in-memory buffer.
///
/// Used for snapshot requests: the transport hands it in, waits for the
/// snapshot call to return, then takes the bytes for the response body.
#[derive(Default)]
pub struct BufferSink {
    buf: Mutex<BytesMut>,
}

impl BufferSink {
    /// Create an empty buffer sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the accumulated bytes, leaving the sink empty.
    pub fn take(&self) -> Bytes {
        self.lock().split().freeze()
    }

    /// Number of bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BytesMut> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for BufferSink {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Sink that forwards each buffer to an async consumer over a channel.
///
/// The send is unbounded and non-blocking, so it is safe to call from the
/// engine's callback thread; backpressure policy belongs to the consumer
/// task draining the receiver. Once the receiver is dropped, writes fail
/// with `BrokenPipe` and the transport is expected to unsubscribe.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    /// Create a sink plus the receiver the consumer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "live feed receiver dropped"))?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_accumulates() {
        let sink = BufferSink::new();
        assert!(sink.is_empty());

        assert_eq!(sink.write(b"hello ").unwrap(), 6);
        assert_eq!(sink.write(b"world").unwrap(), 5);
        assert_eq!(sink.len(), 11);

        assert_eq!(sink.take(), Bytes::from_static(b"hello world"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel();

        sink.write(b"frame1").unwrap();
        sink.write(b"frame2").unwrap();

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"frame1"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"frame2"));
    }

    #[test]
    fn test_channel_sink_broken_pipe() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);

        let err = sink.write(b"frame").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_sink_identity_tracks_arc_clones() {
        let a: Arc<dyn Sink> = Arc::new(BufferSink::new());
        let b = a.clone();
        let c: Arc<dyn Sink> = Arc::new(BufferSink::new());

        assert_eq!(SinkId::of(&a), SinkId::of(&b));
        assert_ne!(SinkId::of(&a), SinkId::of(&c));
    }
}
