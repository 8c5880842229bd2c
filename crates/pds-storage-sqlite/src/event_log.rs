use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use pds_core::{EventLogStore, PdsError, PdsResult, PersistedEvent};

/// Durable backing for the Sequencer (§4.G), built on the same `commit_log`
/// table every other commit metadata lands in — `event_buffer` in §6 is
/// this table, not a second one, since `seq`, `did`, and the frame payload
/// already live here once per commit.
#[derive(Clone)]
pub struct SqliteEventLogStore {
    pool: SqlitePool,
}

impl SqliteEventLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLogStore for SqliteEventLogStore {
    async fn append_event(&self, event_type: &str, did: &str, payload: &[u8]) -> PdsResult<i64> {
        let result = sqlx::query(
            "INSERT INTO commit_log (did, commit_cid, prev_cid, rev, ops_json, blocks_car)
             VALUES (?, '', NULL, '', ?, ?)",
        )
        .bind(did)
        .bind(event_type)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| PdsError::Storage(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    async fn get_events_after(&self, after_seq: i64, limit: usize) -> PdsResult<Vec<PersistedEvent>> {
        let rows = sqlx::query(
            "SELECT seq, ops_json, did, blocks_car FROM commit_log
             WHERE seq > ? ORDER BY seq ASC LIMIT ?",
        )
        .bind(after_seq)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PdsError::Storage(e.to_string()))?;

        rows.iter()
            .map(|r| {
                Ok(PersistedEvent {
                    seq: r.try_get("seq").map_err(|e| PdsError::Storage(e.to_string()))?,
                    event_type: r.try_get("ops_json").map_err(|e| PdsError::Storage(e.to_string()))?,
                    did: r.try_get("did").map_err(|e| PdsError::Storage(e.to_string()))?,
                    payload: r.try_get("blocks_car").map_err(|e| PdsError::Storage(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn get_min_seq(&self) -> PdsResult<i64> {
        let row = sqlx::query("SELECT COALESCE(MIN(seq), 0) as min_seq FROM commit_log")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;
        row.try_get("min_seq").map_err(|e| PdsError::Storage(e.to_string()))
    }

    async fn get_max_seq(&self) -> PdsResult<i64> {
        let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) as max_seq FROM commit_log")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;
        row.try_get("max_seq").map_err(|e| PdsError::Storage(e.to_string()))
    }

    /// Drop rows older than the retention window (§3 Lifecycle, §4.G
    /// Retention window). Keeps the most recent `keep` rows by `seq`.
    async fn trim(&self, keep: i64) -> PdsResult<()> {
        sqlx::query(
            "DELETE FROM commit_log WHERE seq <= (SELECT COALESCE(MAX(seq), 0) FROM commit_log) - ?",
        )
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(|e| PdsError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_pool;

    #[tokio::test]
    async fn append_assigns_increasing_seq() {
        let store = SqliteEventLogStore::new(memory_pool().await);
        let a = store.append_event("#commit", "did:key:test", b"one").await.unwrap();
        let b = store.append_event("#commit", "did:key:test", b"two").await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn get_events_after_is_ascending_and_exclusive() {
        let store = SqliteEventLogStore::new(memory_pool().await);
        for i in 0..3 {
            store.append_event("#commit", "did:key:test", format!("p{i}").as_bytes()).await.unwrap();
        }
        let events = store.get_events_after(1, 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].seq < events[1].seq);
    }

    #[tokio::test]
    async fn trim_keeps_only_most_recent_window() {
        let store = SqliteEventLogStore::new(memory_pool().await);
        for i in 0..5 {
            store.append_event("#commit", "did:key:test", format!("p{i}").as_bytes()).await.unwrap();
        }
        store.trim(2).await.unwrap();
        assert_eq!(store.get_min_seq().await.unwrap(), 4);
        assert_eq!(store.get_max_seq().await.unwrap(), 5);
    }
}
