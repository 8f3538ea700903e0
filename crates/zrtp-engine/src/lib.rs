//! The ZRTP handshake engine: the ten-state per-channel state machine, the
//! session that owns a peer's channel table and cache/callback surface, and
//! the pure message-building helpers the state machine is built from.
//!
//! # Modules
//! - `channel`     — per-channel state: role, hash chains, transcript store
//! - `session`     — per-peer state: channel table, cache lookups, MTU/egress
//! - `state`        — the ten-state handshake dispatch
//! - `handshake`    — pure message-building/verification helpers
//! - `negotiation`  — algorithm-list advertisement and negotiation
//! - `events`       — the `Event`/`StatusEvent` vocabulary `dispatch` runs on
//! - `callbacks`    — the host-provided `Callbacks` trait
//! - `timer`        — the per-channel retransmission timer
//! - `error`        — `EngineError`, this crate's error type
//!
//! This crate has no notion of a cache backend or a transport; it depends
//! on `zrtp_cache::ZidCache` and `Callbacks` as traits and is generic over
//! both, matching the teacher's pattern of depending on facades rather
//! than concrete backends.

pub mod callbacks;
pub mod channel;
pub mod error;
pub mod events;
pub mod handshake;
pub mod negotiation;
pub mod session;
pub mod state;
pub mod timer;

pub use callbacks::Callbacks;
pub use channel::{Channel, Role};
pub use error::EngineError;
pub use events::{Event, StatusEvent};
pub use session::Session;
pub use state::State;
