//! Stream hub: publish/consume routing per stream id
//!
//! The hub maps each stream id to at most one live publish session and
//! forwards consumer requests to it.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<StreamHub>
//!                  ┌────────────────────────────┐
//!                  │ streams: HashMap<id,       │
//!                  │   Reserving | Active(      │
//!                  │     Session {              │
//!                  │       frame buffer,        │
//!                  │       subscriber registry, │
//!                  │       lifecycle, engine    │
//!                  │     })                     │
//!                  │ >                          │
//!                  └─────────────┬──────────────┘
//!                                │
//!          ┌─────────────────────┼─────────────────────┐
//!          │                     │                     │
//!          ▼                     ▼                     ▼
//!     [Publisher]           [Snapshot]            [Subscriber]
//!     run() loop:           hub.snapshot()        hub.subscribe()
//!     engine pull ◄── chunks     │ one frame           │ live feed
//!          │                     ▼                     ▼
//!          └──► engine ──► on_push_output ──► Sink (HTTP buffer, WS, ...)
//! ```
//!
//! A publish reserves its id before the session exists, so a duplicate
//! publisher is rejected even during the open handshake. Every exit path of
//! the publish flow releases the id again.

pub mod config;
pub mod publisher;
pub mod store;

pub use config::HubConfig;
pub use publisher::Publisher;
pub use store::StreamHub;
