//! Session lifecycle
//!
//! Guards a session's engine handle against use-after-free. Engine-facing
//! calls run under the read side of a lock and fail fast once teardown has
//! begun; `free` runs under the write side, so it can never overlap an
//! in-flight engine call. A watch channel broadcasts completion of the free
//! exactly once for anyone awaiting teardown.

use std::sync::{PoisonError, RwLock};

use tokio::sync::watch;

use crate::error::RelayError;

/// Lifecycle phase of a session's engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Engine handle is live
    Active,
    /// Free has started; the engine free call is in flight
    Freeing,
    /// Free has completed; the handle must never be touched again
    Freed,
}

/// Free/cancel discipline for one session.
pub struct Lifecycle {
    phase: RwLock<LifecyclePhase>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Lifecycle {
    /// Create a lifecycle in the active phase.
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            phase: RwLock::new(LifecyclePhase::Active),
            done_tx,
            done_rx,
        }
    }

    /// Run an engine-facing call, excluded against `free`.
    ///
    /// Multiple guarded calls may run concurrently (the engine tolerates
    /// that for everything except free); a call that observes teardown fails
    /// with [`RelayError::AlreadyClosed`] without reaching the engine.
    pub fn guard<T>(&self, f: impl FnOnce() -> T) -> Result<T, RelayError> {
        let phase = self.phase.read().unwrap_or_else(PoisonError::into_inner);
        if *phase != LifecyclePhase::Active {
            return Err(RelayError::AlreadyClosed);
        }
        Ok(f())
    }

    /// Run the free path exactly once.
    ///
    /// `f` (the engine free call) executes under the write lock, after every
    /// in-flight guarded call has drained. Returns `false` if teardown had
    /// already run.
    pub fn free(&self, f: impl FnOnce()) -> bool {
        let mut phase = self.phase.write().unwrap_or_else(PoisonError::into_inner);
        if *phase != LifecyclePhase::Active {
            return false;
        }
        *phase = LifecyclePhase::Freeing;
        f();
        *phase = LifecyclePhase::Freed;
        let _ = self.done_tx.send(true);
        true
    }

    /// Whether teardown has started.
    pub fn is_freed(&self) -> bool {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner) != LifecyclePhase::Active
    }

    /// Wait until the free path has completed.
    pub async fn done(&self) {
        let mut rx = self.done_rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
