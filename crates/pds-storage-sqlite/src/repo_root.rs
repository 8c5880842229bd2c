use std::str::FromStr;

use async_trait::async_trait;
use cid::Cid;
use sqlx::{Row, SqlitePool};

use pds_core::{PdsError, PdsResult, RepoRoot, RepoRootStore};

/// The exclusive-write head pointer backed by the `repo_root` table (§3,
/// §5, §6). One row per hosted repo; in single-user mode that's exactly one.
#[derive(Clone)]
pub struct SqliteRepoRootStore {
    pool: SqlitePool,
}

impl SqliteRepoRootStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepoRootStore for SqliteRepoRootStore {
    async fn get(&self, did: &str) -> PdsResult<Option<RepoRoot>> {
        let row = sqlx::query("SELECT did, commit_cid, rev FROM repo_root WHERE did = ?")
            .bind(did)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let commit_cid_text: String = row.try_get("commit_cid").map_err(|e| PdsError::Storage(e.to_string()))?;
        let commit_cid = Cid::from_str(&commit_cid_text).map_err(|e| PdsError::IntegrityError(e.to_string()))?;
        Ok(Some(RepoRoot {
            did: row.try_get("did").map_err(|e| PdsError::Storage(e.to_string()))?,
            commit_cid,
            rev: row.try_get("rev").map_err(|e| PdsError::Storage(e.to_string()))?,
        }))
    }

    async fn set(&self, did: &str, commit_cid: &Cid, rev: &str) -> PdsResult<()> {
        sqlx::query(
            "INSERT INTO repo_root (did, commit_cid, rev) VALUES (?, ?, ?)
             ON CONFLICT(did) DO UPDATE SET commit_cid = excluded.commit_cid, rev = excluded.rev",
        )
        .bind(did)
        .bind(commit_cid.to_string())
        .bind(rev)
        .execute(&self.pool)
        .await
        .map_err(|e| PdsError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cid_for, memory_pool};

    #[tokio::test]
    async fn unset_repo_root_is_none() {
        let store = SqliteRepoRootStore::new(memory_pool().await);
        assert!(store.get("did:key:test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = SqliteRepoRootStore::new(memory_pool().await);
        let cid = cid_for(b"commit-1");
        store.set("did:key:test", &cid, "rev-1").await.unwrap();
        let root = store.get("did:key:test").await.unwrap().unwrap();
        assert_eq!(root.commit_cid, cid);
        assert_eq!(root.rev, "rev-1");
    }

    #[tokio::test]
    async fn set_overwrites_existing_root() {
        let store = SqliteRepoRootStore::new(memory_pool().await);
        store.set("did:key:test", &cid_for(b"c1"), "rev-1").await.unwrap();
        store.set("did:key:test", &cid_for(b"c2"), "rev-2").await.unwrap();
        let root = store.get("did:key:test").await.unwrap().unwrap();
        assert_eq!(root.rev, "rev-2");
        assert_eq!(root.commit_cid, cid_for(b"c2"));
    }
}
