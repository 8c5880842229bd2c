pub mod blockstore;
pub mod event_log;
pub mod record_store;
pub mod repo_root;

#[cfg(test)]
pub(crate) mod test_support;

pub use blockstore::SqliteBlockStore;
pub use event_log::SqliteEventLogStore;
pub use record_store::SqliteRecordStore;
pub use repo_root::SqliteRepoRootStore;

use sqlx::SqlitePool;

use pds_core::{PdsError, PdsResult};

/// Connect to the sqlite backing store and run pending migrations. Shared
/// by every table-scoped store above; each one just wraps the same pool
/// (§6 Persisted state layout).
pub async fn connect(url: &str) -> PdsResult<SqlitePool> {
    let pool = SqlitePool::connect(url)
        .await
        .map_err(|e| PdsError::Storage(e.to_string()))?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| PdsError::Storage(e.to_string()))?;
    Ok(pool)
}
