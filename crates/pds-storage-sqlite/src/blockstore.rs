use std::str::FromStr;

use async_trait::async_trait;
use cid::Cid;
use sqlx::{Row, SqlitePool};

use pds_core::{BlockStore, PdsError, PdsResult};

/// Content-addressed block storage backed by the `block` table (§4.B, §6).
#[derive(Clone)]
pub struct SqliteBlockStore {
    pool: SqlitePool,
}

impl SqliteBlockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Re-hash `bytes` and compare against `cid`, debug-mode only (§4.B "put
/// must verify `cid == cid_for(bytes)` in debug/test modes"). Duplicated
/// from `pds_repo::codec::verify_cid` rather than pulled in as a dependency
/// — this crate sits below `pds-repo` in the workspace (see
/// `test_support::cid_for`).
#[cfg(debug_assertions)]
fn verify_cid(cid: &Cid, bytes: &[u8]) -> PdsResult<()> {
    use multihash::Multihash;
    use sha2::{Digest, Sha256};

    let digest = Sha256::digest(bytes);
    let mh = Multihash::<64>::wrap(0x12, &digest).expect("sha-256 digest fits a 64-byte multihash");
    let expected = Cid::new_v1(0x71, mh);
    if &expected != cid {
        return Err(PdsError::IntegrityError(format!("CID mismatch: expected {expected}, got {cid}")));
    }
    Ok(())
}

#[async_trait]
impl BlockStore for SqliteBlockStore {
    async fn get(&self, cid: &Cid) -> PdsResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT bytes FROM block WHERE cid = ?")
            .bind(cid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;

        row.map(|r| r.try_get::<Vec<u8>, _>("bytes").map_err(|e| PdsError::Storage(e.to_string())))
            .transpose()
    }

    async fn has(&self, cid: &Cid) -> PdsResult<bool> {
        let row = sqlx::query("SELECT 1 FROM block WHERE cid = ? AND length(bytes) > 0")
            .bind(cid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn put(&self, cid: &Cid, bytes: &[u8]) -> PdsResult<()> {
        #[cfg(debug_assertions)]
        verify_cid(cid, bytes)?;

        sqlx::query("INSERT OR IGNORE INTO block (cid, bytes) VALUES (?, ?)")
            .bind(cid.to_string())
            .bind(bytes)
            .execute(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn put_many(&self, blocks: &[(Cid, Vec<u8>)]) -> PdsResult<()> {
        #[cfg(debug_assertions)]
        for (cid, bytes) in blocks {
            verify_cid(cid, bytes)?;
        }

        let mut tx = self.pool.begin().await.map_err(|e| PdsError::Storage(e.to_string()))?;
        for (cid, bytes) in blocks {
            sqlx::query("INSERT OR IGNORE INTO block (cid, bytes) VALUES (?, ?)")
                .bind(cid.to_string())
                .bind(bytes.as_slice())
                .execute(&mut *tx)
                .await
                .map_err(|e| PdsError::Storage(e.to_string()))?;
        }
        tx.commit().await.map_err(|e| PdsError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn get_all(&self) -> PdsResult<Vec<(Cid, Vec<u8>)>> {
        let rows = sqlx::query("SELECT cid, bytes FROM block")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let cid_text: String = row.try_get("cid").map_err(|e| PdsError::Storage(e.to_string()))?;
                let cid = Cid::from_str(&cid_text).map_err(|e| PdsError::IntegrityError(e.to_string()))?;
                let bytes: Vec<u8> = row.try_get("bytes").map_err(|e| PdsError::Storage(e.to_string()))?;
                Ok((cid, bytes))
            })
            .collect()
    }
}
