//! Engine-level errors: wraps the lower crates' errors and adds the
//! handful of failures that only make sense once packets are being
//! interpreted as protocol *events*.

use thiserror::Error;

use zrtp_cache::CacheError;
use zrtp_crypto::CryptoError;
use zrtp_proto::ProtoError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("channel {0} does not exist or was never started")]
    NoSuchChannel(usize),

    #[error("channel table is full (capacity 64)")]
    ChannelTableFull,

    #[error("event not accepted by the current state; state unchanged")]
    UnexpectedEvent,

    #[error("message type not expected in the current state")]
    UnexpectedMessage,

    #[error("required key material or transcript is absent for this step: {0}")]
    InvalidContext(String),

    #[error("no algorithm in common with the peer for this category")]
    NoCommonAlgorithm,

    #[error("unsupported ZRTP version")]
    UnsupportedZrtpVersion,

    #[error("retransmitted message differs byte-for-byte from the stored copy")]
    UnmatchingPacketRepetition,

    #[error("key-agreement mode not implemented: {0}")]
    UnsupportedMode(String),
}
