//! Row model for the one table the ZID cache facade needs: retained
//! secrets keyed by peer ZID.
//!
//! Grounded on `dl_store/src/models.rs`'s `#[derive(sqlx::FromRow)]` row
//! structs, narrowed to the four cached secrets spec.md §3 lists. Unlike
//! the teacher's encrypted-text columns, secrets are stored as raw BLOBs —
//! this crate has no vault/password layer to encrypt them under, so
//! there is nothing to base64-encode for.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RetainedSecretsRow {
    /// Hex-encoded 12-byte peer ZID (text, so it can be a primary key).
    pub peer_zid: String,
    /// Retained secrets as raw bytes; `NULL` when absent.
    pub rs1: Option<Vec<u8>>,
    pub rs2: Option<Vec<u8>>,
    pub aux: Option<Vec<u8>>,
    pub pbx: Option<Vec<u8>>,
    /// Whether the SAS has previously been verified aloud with this peer.
    pub previously_verified_sas: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
