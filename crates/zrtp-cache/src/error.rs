use thiserror::Error;

use zrtp_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("no cached secrets for peer ZID {0}")]
    NotFound(String),

    #[error("migration error: {0}")]
    Migration(String),
}
