//! The ZRTP wire codec: packet envelope, fragmentation, per-message
//! bodies, algorithm negotiation, and the framing/authentication pipeline
//! that ties them together.
//!
//! # Modules
//! - `envelope`   — 12-byte fixed header, optional fragment header, CRC-32
//! - `fragment`   — out-of-order fragment reassembly, one record per channel
//! - `message`    — the message header and the per-type bodies
//! - `algorithms` — supported-algorithm lists and negotiation
//! - `codec`      — ties the above together: decode/encode a whole message

pub mod algorithms;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod fragment;
pub mod message;

pub use codec::Message as MessageBody;
pub use envelope::Envelope;
pub use error::ProtoError;
pub use message::MessageType;
