use thiserror::Error;

use zrtp_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("CRC-32 mismatch")]
    InvalidCrc,

    #[error("packet out of order")]
    OutOfOrder,

    #[error("fragment held pending reassembly")]
    FragmentHeld,

    #[error("unsupported or unrecognised message type: {0:?}")]
    UnsupportedMessageType(String),

    #[error("unmatching hash chain")]
    UnmatchingHashChain,

    #[error("unmatching MAC")]
    UnmatchingMac,

    #[error("unmatching hvi")]
    UnmatchingHvi,

    #[error("unmatching Confirm MAC")]
    UnmatchingConfirmMac,

    #[error("peer_hello_hash mismatch")]
    HelloHashMismatch,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
