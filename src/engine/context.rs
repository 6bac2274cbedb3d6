//! Context handle table and callback servicing
//!
//! Engines receive a [`ContextHandle`] at `open` and pass it back inside
//! every callback. Instead of round-tripping a raw pointer across the
//! boundary, the handle is an index into a [`ContextTable`] slot with a
//! generation counter: once a session is torn down and its slot removed, any
//! callback still carrying the old handle resolves to nothing and is
//! rejected with [`status::STALE_HANDLE`] rather than touching freed state.
//!
//! [`SessionIo`] is what a live handle resolves to: the per-session pair of
//! input buffer and subscriber registry that services the two callbacks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::buffer::{FillError, FillRead, FrameBuffer};
use crate::engine::status;
use crate::session::subscribers::{DispatchError, SubscriberRegistry, Token};

/// Handle identifying one session's I/O state across the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    index: u32,
    generation: u32,
}

impl ContextHandle {
    /// Pack into a single integer, for engines that can only carry one word
    /// across their own boundary.
    pub fn to_raw(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Unpack a handle previously produced by [`ContextHandle::to_raw`].
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

impl std::fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// Per-session I/O state reachable from engine callbacks.
pub struct SessionIo {
    buffer: Mutex<FrameBuffer>,
    subscribers: SubscriberRegistry,
}

impl SessionIo {
    pub(crate) fn new(buffer: FrameBuffer) -> Self {
        Self {
            buffer: Mutex::new(buffer),
            subscribers: SubscriberRegistry::new(),
        }
    }

    pub(crate) fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    fn fill_request(&self, buf: &mut [u8]) -> i32 {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        match buffer.fill(buf) {
            Ok(FillRead::Data(n)) => n as i32,
            Ok(FillRead::Eof) => status::EOF,
            Err(FillError::EmptyChunk) => {
                tracing::warn!("producer pushed an empty chunk");
                status::INVALID_DATA
            }
        }
    }

    fn push_output(&self, token: Token, buf: &[u8]) -> i32 {
        match self.subscribers.dispatch(token, buf) {
            Ok(()) => status::OK,
            Err(DispatchError::NoSinkForToken(token)) => {
                tracing::warn!(%token, "no sink for token");
                status::NO_SINK
            }
            Err(DispatchError::Sink(e)) => {
                tracing::warn!(%token, error = %e, "sink write failed");
                status::SINK_WRITE
            }
        }
    }
}

struct Slot {
    generation: u32,
    io: Option<Arc<SessionIo>>,
}

/// Table mapping context handles to live session I/O state.
///
/// One table is shared by a hub and the engines attached to it. Slots are
/// reused, with the generation bumped on removal so stale handles can never
/// alias a newer session.
#[derive(Default)]
pub struct ContextTable {
    inner: Mutex<TableInner>,
}

#[derive(Default)]
struct TableInner {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl ContextTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, io: Arc<SessionIo>) -> ContextHandle {
        let mut inner = self.lock();
        match inner.free.pop() {
            Some(index) => {
                let slot = &mut inner.slots[index];
                slot.io = Some(io);
                ContextHandle {
                    index: index as u32,
                    generation: slot.generation,
                }
            }
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot {
                    generation: 0,
                    io: Some(io),
                });
                ContextHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn remove(&self, handle: ContextHandle) -> Option<Arc<SessionIo>> {
        let mut inner = self.lock();
        let slot = inner.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation || slot.io.is_none() {
            return None;
        }
        let io = slot.io.take();
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index as usize);
        io
    }

    fn get(&self, handle: ContextHandle) -> Option<Arc<SessionIo>> {
        let inner = self.lock();
        let slot = inner.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.io.clone()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.slots.len() - inner.free.len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Service an input pull: fill `buf` from the session's frame buffer.
    ///
    /// Called by the engine, reentrantly, on its own thread. Blocks until
    /// input arrives. Returns the byte count or a negative [`status`] code.
    pub fn on_pull_request(&self, handle: ContextHandle, buf: &mut [u8]) -> i32 {
        // The table lock is released before the blocking fill.
        match self.get(handle) {
            Some(io) => io.fill_request(buf),
            None => {
                tracing::warn!(context = %handle, "pull request on stale context handle");
                status::STALE_HANDLE
            }
        }
    }

    /// Service an output push: dispatch `buf` to the sink registered for
    /// `token`. Returns [`status::OK`] or a negative [`status`] code.
    pub fn on_push_output(&self, handle: ContextHandle, token: Token, buf: &[u8]) -> i32 {
        match self.get(handle) {
            Some(io) => io.push_output(token, buf),
            None => {
                tracing::warn!(context = %handle, %token, "output push on stale context handle");
                status::STALE_HANDLE
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
