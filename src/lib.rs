//! # streamhub
//!
//! Concurrency core for relaying one live media stream from a single
//! publisher to many consumers. A publisher pushes an ordered sequence of
//! opaque chunk payloads; an external media engine (reached through the
//! synchronous [`Engine`] boundary) pulls those bytes on demand, remuxes
//! them, and pushes output back through per-consumer tokens; consumers
//! either request the most recent decoded frame as a one-shot snapshot or
//! subscribe to a continuously remuxed live feed.
//!
//! The crate deliberately stops at the engine and transport seams: no
//! demuxing, codecs, RPC framing or sockets here, only the buffering,
//! routing and lifecycle machinery between them.
//!
//! ## Pieces
//!
//! - [`buffer::FrameBuffer`]: adapts pushed variable-length chunks into
//!   demand-driven pull reads (short-read contract, one pending remainder).
//! - [`session::SubscriberRegistry`]: token-to-sink routing for one session.
//! - [`session::Lifecycle`]: free/cancel discipline guarding the engine
//!   handle against use-after-free.
//! - [`StreamHub`]: the per-id session table enforcing single publisher
//!   per stream id.
//! - [`engine::ContextTable`]: generation-counted handle table the engine's
//!   reentrant callbacks resolve through.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use streamhub::{ContextTable, PassthroughEngine, StreamHub};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let contexts = Arc::new(ContextTable::new());
//! let engine = Arc::new(PassthroughEngine::new(contexts.clone()));
//! let hub = Arc::new(StreamHub::new(engine, contexts));
//!
//! let (publisher, sender) = hub.publish("cam", "h264")?;
//! let running = publisher.spawn();
//!
//! sender.send(Bytes::from_static(b"\x00\x00\x01...")).await?;
//! drop(sender); // producer closes
//! running.await??;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod engine;
pub mod error;
pub mod hub;
pub mod session;
pub mod sink;

pub use buffer::{BufferClosed, ChunkSender, FillError, FillRead, FrameBuffer};
pub use engine::{
    ContextHandle, ContextTable, Engine, EngineError, EngineHandle, PassthroughEngine,
    PullOutcome,
};
pub use error::RelayError;
pub use hub::{HubConfig, Publisher, StreamHub};
pub use session::{Session, Token};
pub use sink::{BufferSink, ChannelSink, Sink};
