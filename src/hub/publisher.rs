//! Publisher flow
//!
//! One [`Publisher`] exists per accepted publish: it owns the session's read
//! loop and guarantees teardown. Dropping it (after a clean EOF, an engine
//! fault, or without ever running) frees the engine handle and releases the
//! stream id, so a crashed or abandoned publisher can never wedge its id.

use std::sync::Arc;

use crate::engine::PullOutcome;
use crate::error::RelayError;
use crate::hub::StreamHub;
use crate::session::Session;

/// Handle driving one publish session's read loop.
pub struct Publisher {
    hub: Arc<StreamHub>,
    id: String,
    session: Arc<Session>,
}

impl Publisher {
    pub(super) fn new(hub: Arc<StreamHub>, id: String, session: Arc<Session>) -> Self {
        Self { hub, id, session }
    }

    /// The session this publisher drives.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The published stream id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the blocking read loop until the producer closes or the engine
    /// faults, then tear the session down.
    ///
    /// This is the only flow that drives the engine's consumption cycle.
    /// Each cycle blocks on chunk arrival, so call this from a thread that
    /// may block (see [`Publisher::spawn`]).
    pub fn run(self) -> Result<(), RelayError> {
        let result = loop {
            match self.session.read_frame() {
                Ok(PullOutcome::Frame) | Ok(PullOutcome::Again) => continue,
                Ok(PullOutcome::Eof) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(()) => tracing::info!(stream = %self.id, "publisher finished"),
            Err(e) => tracing::warn!(stream = %self.id, error = %e, "publisher failed"),
        }
        // Teardown happens in Drop, shared with every other exit path.
        result
    }

    /// Run the read loop on the blocking thread pool.
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<(), RelayError>> {
        tokio::task::spawn_blocking(move || self.run())
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        // Free the engine handle first, then release the id for reuse.
        self.session.free();
        self.hub.end_publish(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ContextTable, PassthroughEngine};
    use crate::hub::HubConfig;
    use bytes::Bytes;

    fn hub() -> Arc<StreamHub> {
        let contexts = Arc::new(ContextTable::new());
        let engine = Arc::new(PassthroughEngine::new(contexts.clone()));
        Arc::new(StreamHub::with_config(
            engine,
            contexts,
            HubConfig::default().chunk_capacity(4),
        ))
    }

    #[tokio::test]
    async fn test_run_drains_to_eof() {
        let hub = hub();
        let (publisher, sender) = hub.publish("cam", "h264").unwrap();
        let running = publisher.spawn();

        sender.send(Bytes::from_static(b"a")).await.unwrap();
        sender.send(Bytes::from_static(b"b")).await.unwrap();
        drop(sender);

        running.await.unwrap().unwrap();
        assert_eq!(hub.stream_count(), 0);
    }

    #[test]
    fn test_drop_without_run_cleans_up() {
        let hub = hub();
        let (publisher, _sender) = hub.publish("cam", "h264").unwrap();
        let session = publisher.session().clone();

        drop(publisher);

        assert!(session.is_closed());
        assert!(!hub.is_publishing("cam"));
        assert_eq!(hub.stream_count(), 0);
    }
}
