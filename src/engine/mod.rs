//! Engine adapter boundary
//!
//! The actual demultiplex/remux/codec work lives in an external engine that
//! the relay drives through synchronous calls. During those calls the engine
//! calls back into the relay (`on_pull_request` to fetch more input bytes,
//! `on_push_output` to emit remuxed output for a token) reentrantly, on the
//! calling thread. [`Engine`] is the call side of that contract; the callback
//! side is serviced by [`ContextTable`](context::ContextTable).
//!
//! Engines identify each open stream by an opaque [`EngineHandle`] of their
//! own and reach the owning session's buffers through the [`ContextHandle`]
//! given to `open`.

pub mod context;
pub mod passthrough;

pub use context::{ContextHandle, ContextTable, SessionIo};
pub use passthrough::PassthroughEngine;

use crate::session::subscribers::Token;

/// Status codes shared across the engine boundary.
///
/// Callbacks return a byte count (>= 0) or one of these negative codes, and
/// engines surface them back through [`EngineError`].
pub mod status {
    /// Success / zero bytes
    pub const OK: i32 = 0;
    /// Producer closed; no further input will arrive
    pub const EOF: i32 = -1;
    /// Nothing available right now, retry later
    pub const AGAIN: i32 = -2;
    /// Malformed input (e.g. an empty chunk)
    pub const INVALID_DATA: i32 = -3;
    /// No sink registered for the output token
    pub const NO_SINK: i32 = -4;
    /// The sink write itself failed
    pub const SINK_WRITE: i32 = -5;
    /// The context handle is stale (session already torn down)
    pub const STALE_HANDLE: i32 = -6;

    /// Human-readable description of a status code.
    pub fn describe(code: i32) -> &'static str {
        match code {
            OK => "ok",
            EOF => "end of stream",
            AGAIN => "resource temporarily unavailable",
            INVALID_DATA => "invalid data",
            NO_SINK => "no sink for token",
            SINK_WRITE => "sink write failed",
            STALE_HANDLE => "stale context handle",
            _ => "unknown engine error",
        }
    }
}

/// Opaque handle an engine assigns to one open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
    /// Wrap an engine-chosen handle value.
    pub fn new(value: u64) -> Self {
        EngineHandle(value)
    }

    /// The raw handle value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of driving one engine consumption cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The engine consumed input and/or produced output
    Frame,
    /// The engine made no progress this cycle; call again
    Again,
    /// Input is exhausted; the stream is over
    Eof,
}

/// Failure reported by an engine call.
#[derive(Debug, Clone)]
pub struct EngineError {
    /// Boundary status code (one of [`status`], or engine-specific)
    pub code: i32,
    /// Description of the failure
    pub message: String,
}

impl EngineError {
    /// Create an error with an explicit message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error described by its status code alone.
    pub fn from_code(code: i32) -> Self {
        Self::new(code, status::describe(code))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

/// The synchronous call surface of an external media engine.
///
/// All methods are blocking foreign calls from the relay's point of view.
/// `pull_read` is only ever invoked from the single publisher flow of a
/// session; `read_snapshot`/`subscribe`/`unsubscribe` may be invoked
/// concurrently with it and with each other. `free` is never invoked
/// concurrently with any other call for the same handle; the session
/// lifecycle guarantees it.
pub trait Engine: Send + Sync {
    /// Open a stream for the given input format. The engine keeps `context`
    /// and passes it back on every callback for this stream.
    fn open(&self, input_format: &str, context: ContextHandle) -> Result<EngineHandle, EngineError>;

    /// Release every engine-side resource for the stream.
    fn free(&self, handle: EngineHandle);

    /// Drive one consumption cycle: the engine pulls input via
    /// `on_pull_request` and pushes any resulting output via
    /// `on_push_output`.
    fn pull_read(&self, handle: EngineHandle) -> Result<PullOutcome, EngineError>;

    /// Remux the most recent decoded frame into `output_format` and push it
    /// to `token` exactly once.
    fn read_snapshot(
        &self,
        handle: EngineHandle,
        output_format: &str,
        token: Token,
    ) -> Result<(), EngineError>;

    /// Start pushing a continuously remuxed live feed to `token`.
    fn subscribe(
        &self,
        handle: EngineHandle,
        output_format: &str,
        token: Token,
    ) -> Result<(), EngineError>;

    /// Stop pushing the live feed for `token`. Unknown tokens are ignored.
    fn unsubscribe(&self, handle: EngineHandle, token: Token);
}
