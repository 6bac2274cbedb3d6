//! Stream hub implementation
//!
//! The per-id session table: reserve on publish-start, activate once the
//! session is open, remove on every exit path, and forward consumer calls
//! to the owning session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::config::HubConfig;
use super::publisher::Publisher;
use crate::buffer::ChunkSender;
use crate::engine::{ContextTable, Engine};
use crate::error::RelayError;
use crate::session::Session;
use crate::sink::Sink;

/// Table entry for one stream id.
///
/// `Reserving` blocks duplicate publishers while the session open handshake
/// is still in flight; `Active` carries the live session.
enum StreamSlot {
    Reserving,
    Active(Arc<Session>),
}

/// Routes publishers and consumers per stream id.
///
/// At most one publish session exists per id at any instant. The table
/// mutex guards membership only; engine calls and sink writes always happen
/// outside it, so one stream's traffic never blocks another's.
pub struct StreamHub {
    engine: Arc<dyn Engine>,
    contexts: Arc<ContextTable>,
    streams: Mutex<HashMap<String, StreamSlot>>,
    config: HubConfig,
}

impl StreamHub {
    /// Create a hub with default configuration.
    ///
    /// `contexts` must be the same table the engine services callbacks
    /// through.
    pub fn new(engine: Arc<dyn Engine>, contexts: Arc<ContextTable>) -> Self {
        Self::with_config(engine, contexts, HubConfig::default())
    }

    /// Create a hub with custom configuration.
    pub fn with_config(
        engine: Arc<dyn Engine>,
        contexts: Arc<ContextTable>,
        config: HubConfig,
    ) -> Self {
        Self {
            engine,
            contexts,
            streams: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get the hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Start publishing `id`.
    ///
    /// Reserves the id, opens the engine session and activates the entry.
    /// Returns the publisher (whose `run` loop drives the engine) and the
    /// push handle for the incoming chunk sequence. Fails with
    /// [`RelayError::AlreadyPublishing`] while any publish for `id` is
    /// reserving or active; any failure after the reservation releases the
    /// id again.
    pub fn publish(
        self: &Arc<Self>,
        id: &str,
        input_format: &str,
    ) -> Result<(Publisher, ChunkSender), RelayError> {
        self.reserve(id)?;

        let opened = Session::open(
            id,
            input_format,
            self.engine.clone(),
            self.contexts.clone(),
            self.config.chunk_capacity,
        );
        let (session, sender) = match opened {
            Ok(v) => v,
            Err(e) => {
                // The open handshake failed; the id must be free for reuse.
                self.end_publish(id);
                return Err(e);
            }
        };

        self.activate(id, session.clone());
        tracing::info!(stream = %id, format = input_format, "publisher registered");

        Ok((Publisher::new(self.clone(), id.to_string(), session), sender))
    }

    /// Request the most recent frame of `id` remuxed into `output_format`,
    /// written into `sink`.
    pub fn snapshot(
        &self,
        id: &str,
        output_format: &str,
        sink: Arc<dyn Sink>,
    ) -> Result<(), RelayError> {
        self.lookup(id)?.snapshot(output_format, sink)
    }

    /// Start a live feed of `id` in `output_format` to `sink`.
    pub fn subscribe(
        &self,
        id: &str,
        output_format: &str,
        sink: Arc<dyn Sink>,
    ) -> Result<(), RelayError> {
        self.lookup(id)?.subscribe(output_format, sink)
    }

    /// Cancel a live feed by sink identity.
    ///
    /// Silent no-op when the stream or the subscription is already gone;
    /// consumer cancellation may race session teardown freely.
    pub fn unsubscribe(&self, id: &str, sink: &Arc<dyn Sink>) {
        if let Ok(session) = self.lookup(id) {
            session.unsubscribe(sink);
        }
    }

    /// Whether `id` currently has an active publish session.
    pub fn is_publishing(&self, id: &str) -> bool {
        matches!(self.lock().get(id), Some(StreamSlot::Active(_)))
    }

    /// Number of entries (reserving or active).
    pub fn stream_count(&self) -> usize {
        self.lock().len()
    }

    fn reserve(&self, id: &str) -> Result<(), RelayError> {
        let mut streams = self.lock();
        if streams.contains_key(id) {
            return Err(RelayError::AlreadyPublishing(id.to_string()));
        }
        streams.insert(id.to_string(), StreamSlot::Reserving);
        Ok(())
    }

    fn activate(&self, id: &str, session: Arc<Session>) {
        if let Some(slot) = self.lock().get_mut(id) {
            *slot = StreamSlot::Active(session);
        }
    }

    /// Remove the table entry for `id` unconditionally (placeholder or
    /// active). Runs on every exit path of the publish flow.
    pub(super) fn end_publish(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            tracing::info!(stream = %id, "publisher removed");
        }
    }

    fn lookup(&self, id: &str) -> Result<Arc<Session>, RelayError> {
        match self.lock().get(id) {
            Some(StreamSlot::Active(session)) => Ok(session.clone()),
            // A reserving entry is not consumable yet.
            Some(StreamSlot::Reserving) | None => Err(RelayError::NotPlaying(id.to_string())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StreamSlot>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PassthroughEngine;
    use crate::sink::{BufferSink, ChannelSink};
    use bytes::Bytes;
    use tokio_test::assert_ok;

    fn hub() -> Arc<StreamHub> {
        let contexts = Arc::new(ContextTable::new());
        let engine = Arc::new(PassthroughEngine::new(contexts.clone()));
        Arc::new(StreamHub::with_config(
            engine,
            contexts,
            HubConfig::default().chunk_capacity(8),
        ))
    }

    #[test]
    fn test_single_publisher_per_id() {
        let hub = hub();

        let (publisher, _sender) = hub.publish("cam", "h264").unwrap();
        assert!(hub.is_publishing("cam"));

        assert!(matches!(
            hub.publish("cam", "h264"),
            Err(RelayError::AlreadyPublishing(_))
        ));

        // A different id is unaffected.
        assert_ok!(hub.publish("other", "h264").map(|_| ()));

        drop(publisher);
        assert!(!hub.is_publishing("cam"));

        // The id is reusable after the publisher is gone.
        assert_ok!(hub.publish("cam", "h264").map(|_| ()));
    }

    #[test]
    fn test_consumer_calls_on_absent_stream() {
        let hub = hub();
        let sink: Arc<dyn Sink> = Arc::new(BufferSink::new());

        assert!(matches!(
            hub.snapshot("nobody", "mjpeg", sink.clone()),
            Err(RelayError::NotPlaying(_))
        ));
        assert!(matches!(
            hub.subscribe("nobody", "flv", sink.clone()),
            Err(RelayError::NotPlaying(_))
        ));
        // Never an error.
        hub.unsubscribe("nobody", &sink);
    }

    #[tokio::test]
    async fn test_publish_relay_end_to_end() {
        let hub = hub();
        let (publisher, sender) = hub.publish("cam", "h264").unwrap();
        let session = publisher.session().clone();
        let running = publisher.spawn();

        // Live subscriber.
        let (feed, mut feed_rx) = ChannelSink::channel();
        let feed: Arc<dyn Sink> = Arc::new(feed);
        let hub_sub = hub.clone();
        let feed_sub = feed.clone();
        tokio::task::spawn_blocking(move || hub_sub.subscribe("cam", "flv", feed_sub))
            .await
            .unwrap()
            .unwrap();

        sender.send(Bytes::from_static(b"frame-1")).await.unwrap();
        assert_eq!(feed_rx.recv().await.unwrap(), Bytes::from_static(b"frame-1"));

        sender.send(Bytes::from_static(b"frame-2")).await.unwrap();
        assert_eq!(feed_rx.recv().await.unwrap(), Bytes::from_static(b"frame-2"));

        // Snapshot sees the most recent frame.
        let snap = Arc::new(BufferSink::new());
        let hub_snap = hub.clone();
        let snap_sink = snap.clone();
        tokio::task::spawn_blocking(move || hub_snap.snapshot("cam", "mjpeg", snap_sink))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snap.take(), Bytes::from_static(b"frame-2"));

        hub.unsubscribe("cam", &feed);

        // Producer closes; the publisher drains to EOF and cleans up.
        drop(sender);
        running.await.unwrap().unwrap();
        assert!(!hub.is_publishing("cam"));
        assert_eq!(hub.stream_count(), 0);
        session.done().await;

        // Late consumers see NotPlaying.
        let late: Arc<dyn Sink> = Arc::new(BufferSink::new());
        assert!(matches!(
            hub.snapshot("cam", "mjpeg", late),
            Err(RelayError::NotPlaying(_))
        ));
    }

    #[tokio::test]
    async fn test_faulting_stream_tears_down_own_session_only() {
        let hub = hub();
        let (good, good_sender) = hub.publish("good", "h264").unwrap();
        let (bad, bad_sender) = hub.publish("bad", "h264").unwrap();
        let good_running = good.spawn();
        let bad_running = bad.spawn();

        // An empty chunk is invalid input and fatal to its own session.
        bad_sender.send(Bytes::new()).await.unwrap();
        let err = bad_running.await.unwrap().unwrap_err();
        assert!(matches!(err, RelayError::Engine(_)));
        assert!(!hub.is_publishing("bad"));

        // The sibling stream keeps relaying.
        let (feed, mut feed_rx) = ChannelSink::channel();
        let hub_sub = hub.clone();
        tokio::task::spawn_blocking(move || hub_sub.subscribe("good", "flv", Arc::new(feed)))
            .await
            .unwrap()
            .unwrap();
        good_sender.send(Bytes::from_static(b"alive")).await.unwrap();
        assert_eq!(feed_rx.recv().await.unwrap(), Bytes::from_static(b"alive"));

        drop(good_sender);
        good_running.await.unwrap().unwrap();
        assert_eq!(hub.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_outlives_nothing_after_teardown() {
        let hub = hub();
        let (publisher, sender) = hub.publish("cam", "h264").unwrap();
        let session = publisher.session().clone();
        let running = publisher.spawn();

        let (feed, _feed_rx) = ChannelSink::channel();
        let feed: Arc<dyn Sink> = Arc::new(feed);
        let hub_sub = hub.clone();
        let feed_sub = feed.clone();
        tokio::task::spawn_blocking(move || hub_sub.subscribe("cam", "flv", feed_sub))
            .await
            .unwrap()
            .unwrap();

        drop(sender);
        running.await.unwrap().unwrap();

        // Cancelling after teardown is a silent no-op, and direct session
        // calls are rejected without reaching the engine.
        hub.unsubscribe("cam", &feed);
        assert!(session.is_closed());
        assert!(matches!(
            session.snapshot("mjpeg", feed.clone()),
            Err(RelayError::AlreadyClosed)
        ));
    }
}
