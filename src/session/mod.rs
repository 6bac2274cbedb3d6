//! Publish session
//!
//! One [`Session`] exists per actively published stream id: the frame
//! buffer, subscriber registry, lifecycle guard and engine handle created
//! together when a publisher attaches, torn down together when it leaves.
//! Consumers never hold a `Session` directly; the hub resolves the stream id
//! to the session for each snapshot/subscribe/unsubscribe call.

pub mod lifecycle;
pub mod subscribers;

pub use lifecycle::{Lifecycle, LifecyclePhase};
pub use subscribers::{DispatchError, SubscriberRegistry, Token};

use std::sync::Arc;

use crate::buffer::{chunk_channel, ChunkSender};
use crate::engine::{ContextHandle, ContextTable, Engine, EngineError, EngineHandle, PullOutcome};
use crate::engine::context::SessionIo;
use crate::error::RelayError;
use crate::sink::Sink;

/// The bundle backing one active publish: frame buffer + subscriber
/// registry + lifecycle + engine handle.
pub struct Session {
    stream_id: String,
    engine: Arc<dyn Engine>,
    handle: EngineHandle,
    io: Arc<SessionIo>,
    context: ContextHandle,
    contexts: Arc<ContextTable>,
    lifecycle: Lifecycle,
}

impl Session {
    /// Open a session: wire up the I/O context, register it in the handle
    /// table and open the engine side. Returns the session plus the push
    /// handle the transport feeds chunks into.
    pub(crate) fn open(
        stream_id: &str,
        input_format: &str,
        engine: Arc<dyn Engine>,
        contexts: Arc<ContextTable>,
        chunk_capacity: usize,
    ) -> Result<(Arc<Session>, ChunkSender), RelayError> {
        let (sender, buffer) = chunk_channel(chunk_capacity);
        let io = Arc::new(SessionIo::new(buffer));
        let context = contexts.insert(io.clone());

        let handle = match engine.open(input_format, context) {
            Ok(handle) => handle,
            Err(e) => {
                contexts.remove(context);
                return Err(RelayError::Engine(e));
            }
        };

        tracing::info!(
            stream = %stream_id,
            format = input_format,
            engine_handle = %handle,
            context = %context,
            "session opened"
        );

        let session = Arc::new(Session {
            stream_id: stream_id.to_string(),
            engine,
            handle,
            io,
            context,
            contexts,
            lifecycle: Lifecycle::new(),
        });
        Ok((session, sender))
    }

    /// The stream id this session serves.
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Drive one engine consumption cycle. Publisher read loop only.
    pub(crate) fn read_frame(&self) -> Result<PullOutcome, RelayError> {
        match self.lifecycle.guard(|| self.engine.pull_read(self.handle)) {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(RelayError::Engine(e)),
            Err(e) => Err(e),
        }
    }

    /// Request the most recent frame remuxed into `output_format`, written
    /// to `sink` exactly once.
    ///
    /// The one-shot token lives only for the duration of the call.
    pub fn snapshot(&self, output_format: &str, sink: Arc<dyn Sink>) -> Result<(), RelayError> {
        let token = self.io.subscribers().register(sink, false);
        let result = self.engine_call(|| {
            self.engine.read_snapshot(self.handle, output_format, token)
        });
        self.io.subscribers().unregister_token(token);

        if result.is_ok() {
            tracing::debug!(stream = %self.stream_id, %token, "snapshot served");
        }
        result
    }

    /// Start a live feed in `output_format` to `sink`.
    ///
    /// The subscription stays registered until [`Session::unsubscribe`] with
    /// the same sink, or session teardown.
    pub fn subscribe(&self, output_format: &str, sink: Arc<dyn Sink>) -> Result<(), RelayError> {
        let token = self.io.subscribers().register(sink, true);
        let result =
            self.engine_call(|| self.engine.subscribe(self.handle, output_format, token));

        match result {
            Ok(()) => {
                tracing::info!(
                    stream = %self.stream_id,
                    %token,
                    subscribers = self.io.subscribers().len(),
                    "subscriber added"
                );
                Ok(())
            }
            Err(e) => {
                // Roll both map entries back; the engine never saw the token
                // or rejected it.
                self.io.subscribers().unregister_token(token);
                Err(e)
            }
        }
    }

    /// Cancel a live feed by sink identity.
    ///
    /// Safe to call concurrently with teardown: an unknown sink or an
    /// already-freed session is a silent no-op, never an error.
    pub fn unsubscribe(&self, sink: &Arc<dyn Sink>) {
        let Some(token) = self.io.subscribers().unregister_sink(sink) else {
            return;
        };
        let _ = self
            .lifecycle
            .guard(|| self.engine.unsubscribe(self.handle, token));
        tracing::info!(
            stream = %self.stream_id,
            %token,
            subscribers = self.io.subscribers().len(),
            "subscriber removed"
        );
    }

    /// Tear the session down: free the engine handle (excluded against every
    /// in-flight engine call), then invalidate the context handle so late
    /// engine callbacks resolve to nothing. Idempotent.
    pub(crate) fn free(&self) {
        let freed = self.lifecycle.free(|| self.engine.free(self.handle));
        if freed {
            self.contexts.remove(self.context);
            tracing::info!(stream = %self.stream_id, "session freed");
        }
    }

    /// Whether teardown has started.
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_freed()
    }

    /// Wait until teardown has completed.
    pub async fn done(&self) {
        self.lifecycle.done().await
    }

    fn engine_call(&self, f: impl FnOnce() -> Result<(), EngineError>) -> Result<(), RelayError> {
        match self.lifecycle.guard(f) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RelayError::Engine(e)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PassthroughEngine;
    use crate::sink::BufferSink;
    use bytes::Bytes;

    fn open_session() -> (Arc<Session>, ChunkSender, Arc<ContextTable>) {
        let contexts = Arc::new(ContextTable::new());
        let engine = Arc::new(PassthroughEngine::new(contexts.clone()));
        let (session, sender) =
            Session::open("cam", "h264", engine, contexts.clone(), 8).unwrap();
        (session, sender, contexts)
    }

    #[test]
    fn test_snapshot_token_is_one_shot() {
        let (session, sender, _contexts) = open_session();

        sender.blocking_send(Bytes::from_static(b"frame-a")).unwrap();
        session.read_frame().unwrap();

        let sink = Arc::new(BufferSink::new());
        session.snapshot("mjpeg", sink.clone()).unwrap();
        assert_eq!(sink.take(), Bytes::from_static(b"frame-a"));

        // The one-shot registration is gone after the call.
        assert!(session.io.subscribers().is_empty());
    }

    #[test]
    fn test_subscribe_unsubscribe_round_trip() {
        let (session, _sender, _contexts) = open_session();

        let sink: Arc<dyn Sink> = Arc::new(BufferSink::new());
        session.subscribe("flv", sink.clone()).unwrap();
        assert_eq!(session.io.subscribers().len(), 1);

        session.unsubscribe(&sink);
        assert!(session.io.subscribers().is_empty());

        // Cancelling again is a silent no-op.
        session.unsubscribe(&sink);
    }

    #[test]
    fn test_closed_session_rejects_calls() {
        let (session, _sender, contexts) = open_session();
        assert_eq!(contexts.len(), 1);

        session.free();
        assert!(session.is_closed());
        assert!(contexts.is_empty());

        let sink: Arc<dyn Sink> = Arc::new(BufferSink::new());
        assert!(matches!(
            session.snapshot("mjpeg", sink.clone()),
            Err(RelayError::AlreadyClosed)
        ));
        assert!(matches!(
            session.subscribe("flv", sink.clone()),
            Err(RelayError::AlreadyClosed)
        ));
        assert!(matches!(
            session.read_frame(),
            Err(RelayError::AlreadyClosed)
        ));
        // No stray registrations survive the rejected calls.
        assert!(session.io.subscribers().is_empty());

        // Unsubscribe after teardown stays silent.
        session.unsubscribe(&sink);

        // Free is idempotent.
        session.free();
    }

    #[tokio::test]
    async fn test_done_waiter_observes_free() {
        let (session, _sender, _contexts) = open_session();

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.done().await })
        };

        let session_for_free = session.clone();
        tokio::task::spawn_blocking(move || session_for_free.free())
            .await
            .unwrap();
        waiter.await.unwrap();
    }
}
