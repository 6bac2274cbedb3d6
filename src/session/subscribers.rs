//! Subscriber registry
//!
//! Bidirectional mapping between output tokens and consumer sinks for one
//! session. The engine routes every output buffer by token; consumers cancel
//! live subscriptions by sink identity, so those entries are mirrored in a
//! reverse map. One-shot snapshot tokens get no reverse entry; the snapshot
//! call itself unregisters them.
//!
//! Locking contract: both maps are only ever mutated together under the one
//! registry mutex, and the mutex is never held across a sink write (a write
//! that re-enters the registry must not deadlock).

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::sink::{Sink, SinkId};

/// Identifier routing engine output to one sink.
///
/// Allocated monotonically per session; identifies either one outstanding
/// snapshot request or one live subscription.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    /// The raw token value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for dispatch
#[derive(Debug)]
pub enum DispatchError {
    /// The token has no registered sink (already unregistered or never known)
    NoSinkForToken(Token),
    /// The sink rejected the write
    Sink(io::Error),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::NoSinkForToken(token) => write!(f, "no sink for token {}", token),
            DispatchError::Sink(e) => write!(f, "sink write failed: {}", e),
        }
    }
}

impl std::error::Error for DispatchError {}

#[derive(Default)]
struct Maps {
    by_token: HashMap<Token, Arc<dyn Sink>>,
    by_sink: HashMap<SinkId, Token>,
}

/// Token-to-sink routing table for one session.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_token: AtomicU64,
    maps: Mutex<Maps>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink and allocate its token.
    ///
    /// `with_backref` records the reverse entry that later allows
    /// [`unregister_sink`](Self::unregister_sink); snapshot tokens pass
    /// `false` because they are unregistered by token when the call returns.
    pub fn register(&self, sink: Arc<dyn Sink>, with_backref: bool) -> Token {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        let mut maps = self.lock();
        if with_backref {
            maps.by_sink.insert(SinkId::of(&sink), token);
        }
        maps.by_token.insert(token, sink);
        token
    }

    /// Remove a token and its reverse entry, if any. No-op for unknown tokens.
    pub fn unregister_token(&self, token: Token) {
        let mut maps = self.lock();
        if let Some(sink) = maps.by_token.remove(&token) {
            let id = SinkId::of(&sink);
            if maps.by_sink.get(&id) == Some(&token) {
                maps.by_sink.remove(&id);
            }
        }
    }

    /// Remove a subscription by sink identity, returning its token.
    ///
    /// Idempotent: unknown sinks (never subscribed, or already removed)
    /// return `None`.
    pub fn unregister_sink(&self, sink: &Arc<dyn Sink>) -> Option<Token> {
        let mut maps = self.lock();
        let token = maps.by_sink.remove(&SinkId::of(sink))?;
        maps.by_token.remove(&token);
        Some(token)
    }

    /// Deliver one buffer to the sink registered for `token`.
    ///
    /// The sink is looked up under the mutex; the write happens outside it.
    pub fn dispatch(&self, token: Token, buf: &[u8]) -> Result<(), DispatchError> {
        let sink = self.lock().by_token.get(&token).cloned();
        let sink = sink.ok_or(DispatchError::NoSinkForToken(token))?;
        sink.write(buf).map_err(DispatchError::Sink)?;
        Ok(())
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.lock().by_token.len()
    }

    /// Whether no tokens are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().by_token.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
