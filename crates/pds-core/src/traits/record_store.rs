use async_trait::async_trait;
use cid::Cid;

use crate::error::PdsResult;

/// A single projected record row, as read back by `repo.getRecord` /
/// `repo.listRecords` without traversing the MST (§4.D).
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub uri: String,
    pub cid: Cid,
    pub json_bytes: Vec<u8>,
}

/// Projection of `uri → (cid, json)`, kept in lockstep with the MST by the
/// Commit engine. Nothing outside the Commit engine writes here.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn get(&self, uri: &str) -> PdsResult<Option<RecordRow>>;

    async fn put(&self, uri: &str, cid: &Cid, json_bytes: &[u8]) -> PdsResult<()>;

    async fn delete(&self, uri: &str) -> PdsResult<()>;

    /// Ascending by `uri` within `collection`, starting strictly after
    /// `cursor` when given.
    async fn list(
        &self,
        collection: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> PdsResult<Vec<RecordRow>>;
}
