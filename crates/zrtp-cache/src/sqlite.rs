//! SQLite-backed [`ZidCache`], grounded on `dl_store/src/db.rs`'s
//! `Store::open` (WAL journal mode set outside any migration transaction,
//! since SQLite forbids changing `journal_mode` inside one) and
//! `dl_store/src/models.rs`'s row-struct pattern.
//!
//! Secrets are bound as raw BLOB parameters rather than the teacher's
//! base64-encoded-ciphertext columns: this crate carries no vault/password
//! layer, so there is
//! nothing to encrypt the bytes under before storage.

use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use zrtp_crypto::zid::Zid;

use crate::error::CacheError;
use crate::facade::{PeerSecrets, ZidCache};
use crate::models::RetainedSecretsRow;

#[derive(Clone)]
pub struct SqliteCache {
    pool: SqlitePool,
}

impl SqliteCache {
    pub async fn open(db_path: &Path) -> Result<Self, CacheError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| CacheError::Migration(e.to_string()))?;

        tracing::debug!(path = %db_path.display(), "zid cache opened");
        Ok(Self { pool })
    }
}

impl ZidCache for SqliteCache {
    async fn get_peer_secrets(&self, peer_zid: &Zid) -> Result<PeerSecrets, CacheError> {
        let row: Option<RetainedSecretsRow> = sqlx::query_as(
            "SELECT peer_zid, rs1, rs2, aux, pbx, previously_verified_sas, created_at, updated_at \
             FROM peer_secrets WHERE peer_zid = ?",
        )
        .bind(peer_zid.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => PeerSecrets {
                rs1: row.rs1,
                rs2: row.rs2,
                aux: row.aux,
                pbx: row.pbx,
                previously_verified_sas: row.previously_verified_sas,
            },
            None => PeerSecrets::default(),
        })
    }

    async fn update_peer_secrets(
        &self,
        peer_zid: &Zid,
        secrets: &PeerSecrets,
    ) -> Result<(), CacheError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO peer_secrets \
                (peer_zid, rs1, rs2, aux, pbx, previously_verified_sas, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(peer_zid) DO UPDATE SET \
                rs1 = excluded.rs1, \
                rs2 = excluded.rs2, \
                aux = excluded.aux, \
                pbx = excluded.pbx, \
                previously_verified_sas = excluded.previously_verified_sas, \
                updated_at = excluded.updated_at",
        )
        .bind(peer_zid.to_hex())
        .bind(&secrets.rs1)
        .bind(&secrets.rs2)
        .bind(&secrets.aux)
        .bind(&secrets.pbx)
        .bind(secrets.previously_verified_sas)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::trace!(peer_zid = %peer_zid, "retained secrets updated");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    async fn open_temp() -> (SqliteCache, std::path::PathBuf) {
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_nanos();
        let db_path = std::env::temp_dir().join(format!("zrtp-cache-test-{nanos}-{unique}.db"));
        let cache = SqliteCache::open(&db_path).await.expect("open sqlite cache");
        (cache, db_path)
    }

    fn cleanup(db_path: &std::path::Path) {
        let _ = std::fs::remove_file(db_path);
        let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    }

    #[tokio::test]
    async fn unseen_peer_returns_empty_secrets() {
        let (cache, db_path) = open_temp().await;
        let zid = Zid::generate();
        let secrets = cache.get_peer_secrets(&zid).await.unwrap();
        assert!(secrets.is_empty());
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn insert_then_update_preserves_latest_value() {
        let (cache, db_path) = open_temp().await;
        let zid = Zid::generate();

        cache
            .update_peer_secrets(
                &zid,
                &PeerSecrets {
                    rs1: Some(vec![1, 2, 3]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        cache
            .update_peer_secrets(
                &zid,
                &PeerSecrets {
                    rs1: Some(vec![9, 9]),
                    rs2: Some(vec![1, 2, 3]),
                    previously_verified_sas: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let fetched = cache.get_peer_secrets(&zid).await.unwrap();
        assert_eq!(fetched.rs1, Some(vec![9, 9]));
        assert_eq!(fetched.rs2, Some(vec![1, 2, 3]));
        assert!(fetched.previously_verified_sas);

        cleanup(&db_path);
    }
}
