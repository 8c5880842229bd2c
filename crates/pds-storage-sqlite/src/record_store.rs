use std::str::FromStr;

use async_trait::async_trait;
use cid::Cid;
use sqlx::{Row, SqlitePool};

use pds_core::{PdsError, PdsResult, RecordRow, RecordStore};

/// Projection of `uri -> (cid, json)` backed by the `record` table (§4.D,
/// §6). Kept in lockstep with the MST by the Commit engine only.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> PdsResult<RecordRow> {
    let uri: String = row.try_get("uri").map_err(|e| PdsError::Storage(e.to_string()))?;
    let cid_text: String = row.try_get("cid").map_err(|e| PdsError::Storage(e.to_string()))?;
    let cid = Cid::from_str(&cid_text).map_err(|e| PdsError::IntegrityError(e.to_string()))?;
    let json_bytes: Vec<u8> = row.try_get("json_bytes").map_err(|e| PdsError::Storage(e.to_string()))?;
    Ok(RecordRow { uri, cid, json_bytes })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, uri: &str) -> PdsResult<Option<RecordRow>> {
        let row = sqlx::query("SELECT uri, cid, json_bytes FROM record WHERE uri = ?")
            .bind(uri)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn put(&self, uri: &str, cid: &Cid, json_bytes: &[u8]) -> PdsResult<()> {
        sqlx::query(
            "INSERT INTO record (uri, cid, json_bytes) VALUES (?, ?, ?)
             ON CONFLICT(uri) DO UPDATE SET cid = excluded.cid, json_bytes = excluded.json_bytes",
        )
        .bind(uri)
        .bind(cid.to_string())
        .bind(json_bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| PdsError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, uri: &str) -> PdsResult<()> {
        sqlx::query("DELETE FROM record WHERE uri = ?")
            .bind(uri)
            .execute(&self.pool)
            .await
            .map_err(|e| PdsError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, collection: &str, limit: usize, cursor: Option<&str>) -> PdsResult<Vec<RecordRow>> {
        let prefix = format!("{collection}/%");
        let after = cursor.unwrap_or("");
        let rows = sqlx::query(
            "SELECT uri, cid, json_bytes FROM record
             WHERE uri LIKE ? AND uri > ?
             ORDER BY uri ASC LIMIT ?",
        )
        .bind(prefix)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PdsError::Storage(e.to_string()))?;

        rows.iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{cid_for, memory_pool};

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = SqliteRecordStore::new(memory_pool().await);
        let cid = cid_for(b"{}");
        store.put("at://did:key:test/app.bsky.feed.post/a", &cid, b"{}").await.unwrap();
        let row = store.get("at://did:key:test/app.bsky.feed.post/a").await.unwrap().unwrap();
        assert_eq!(row.cid, cid);
    }

    #[tokio::test]
    async fn put_overwrites_existing_uri() {
        let store = SqliteRecordStore::new(memory_pool().await);
        let uri = "at://did:key:test/app.bsky.feed.post/a";
        store.put(uri, &cid_for(b"v1"), b"v1").await.unwrap();
        store.put(uri, &cid_for(b"v2"), b"v2").await.unwrap();
        let row = store.get(uri).await.unwrap().unwrap();
        assert_eq!(row.json_bytes, b"v2");
    }

    #[tokio::test]
    async fn list_is_scoped_to_collection_and_ascending() {
        let store = SqliteRecordStore::new(memory_pool().await);
        for (collection, rkey) in [
            ("app.bsky.feed.post", "1"),
            ("app.bsky.feed.post", "2"),
            ("app.bsky.feed.like", "1"),
        ] {
            let uri = format!("at://did:key:test/{collection}/{rkey}");
            store.put(&uri, &cid_for(uri.as_bytes()), b"{}").await.unwrap();
        }
        let rows = store.list("app.bsky.feed.post", 10, None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].uri < rows[1].uri);
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = SqliteRecordStore::new(memory_pool().await);
        let uri = "at://did:key:test/app.bsky.feed.post/a";
        store.put(uri, &cid_for(b"v"), b"v").await.unwrap();
        store.delete(uri).await.unwrap();
        assert!(store.get(uri).await.unwrap().is_none());
    }
}
