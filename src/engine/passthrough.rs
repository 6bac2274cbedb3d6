//! Passthrough reference engine
//!
//! An in-process [`Engine`] that performs no real remuxing: every pulled
//! input buffer is forwarded verbatim to all live subscriptions, and the
//! most recent buffer is retained to answer snapshot requests. It exists to
//! exercise the relay boundary in tests and demos where the external media
//! engine is out of reach; output format names are accepted and ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::{
    status, ContextHandle, ContextTable, Engine, EngineError, EngineHandle, PullOutcome,
};
use crate::session::subscribers::Token;

/// Read size for one pull cycle, matching a typical I/O context buffer.
const PULL_CAPACITY: usize = 4096;

struct Stream {
    context: ContextHandle,
    subscriptions: Vec<Token>,
    latest: Option<Vec<u8>>,
}

/// Identity "remux" engine backed by the shared context table.
pub struct PassthroughEngine {
    contexts: Arc<ContextTable>,
    next_handle: AtomicU64,
    streams: Mutex<HashMap<u64, Stream>>,
}

impl PassthroughEngine {
    /// Create an engine servicing callbacks through `contexts`.
    pub fn new(contexts: Arc<ContextTable>) -> Self {
        Self {
            contexts,
            next_handle: AtomicU64::new(0),
            streams: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Stream>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stream_context(&self, handle: EngineHandle) -> Result<ContextHandle, EngineError> {
        self.lock()
            .get(&handle.value())
            .map(|s| s.context)
            .ok_or_else(|| EngineError::new(status::STALE_HANDLE, "unknown engine handle"))
    }
}

impl Engine for PassthroughEngine {
    fn open(&self, _input_format: &str, context: ContextHandle) -> Result<EngineHandle, EngineError> {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().insert(
            handle,
            Stream {
                context,
                subscriptions: Vec::new(),
                latest: None,
            },
        );
        Ok(EngineHandle::new(handle))
    }

    fn free(&self, handle: EngineHandle) {
        self.lock().remove(&handle.value());
    }

    fn pull_read(&self, handle: EngineHandle) -> Result<PullOutcome, EngineError> {
        let context = self.stream_context(handle)?;

        // Pull outside the stream lock; the fill blocks on input arrival.
        let mut buf = vec![0u8; PULL_CAPACITY];
        let n = self.contexts.on_pull_request(context, &mut buf);
        if n == status::EOF {
            return Ok(PullOutcome::Eof);
        }
        if n < 0 {
            return Err(EngineError::from_code(n));
        }
        if n == 0 {
            return Ok(PullOutcome::Again);
        }
        let frame = &buf[..n as usize];

        let subscriptions = {
            let mut streams = self.lock();
            let Some(stream) = streams.get_mut(&handle.value()) else {
                // Freed while the pull was blocked.
                return Ok(PullOutcome::Eof);
            };
            stream.latest = Some(frame.to_vec());
            stream.subscriptions.clone()
        };

        for token in subscriptions {
            let rc = self.contexts.on_push_output(context, token, frame);
            if rc < 0 {
                // One dead consumer must not fail the stream; forget the
                // engine-side token and keep feeding the others.
                if let Some(stream) = self.lock().get_mut(&handle.value()) {
                    stream.subscriptions.retain(|t| *t != token);
                }
            }
        }

        Ok(PullOutcome::Frame)
    }

    fn read_snapshot(
        &self,
        handle: EngineHandle,
        _output_format: &str,
        token: Token,
    ) -> Result<(), EngineError> {
        let (context, latest) = {
            let streams = self.lock();
            let stream = streams
                .get(&handle.value())
                .ok_or_else(|| EngineError::new(status::STALE_HANDLE, "unknown engine handle"))?;
            (stream.context, stream.latest.clone())
        };

        let frame = latest
            .ok_or_else(|| EngineError::new(status::AGAIN, "no frame decoded yet"))?;

        let rc = self.contexts.on_push_output(context, token, &frame);
        if rc < 0 {
            return Err(EngineError::from_code(rc));
        }
        Ok(())
    }

    fn subscribe(
        &self,
        handle: EngineHandle,
        _output_format: &str,
        token: Token,
    ) -> Result<(), EngineError> {
        let mut streams = self.lock();
        let stream = streams
            .get_mut(&handle.value())
            .ok_or_else(|| EngineError::new(status::STALE_HANDLE, "unknown engine handle"))?;
        stream.subscriptions.push(token);
        Ok(())
    }

    fn unsubscribe(&self, handle: EngineHandle, token: Token) {
        if let Some(stream) = self.lock().get_mut(&handle.value()) {
            stream.subscriptions.retain(|t| *t != token);
        }
    }
}
