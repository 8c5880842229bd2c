use async_trait::async_trait;
use cid::Cid;

use crate::error::PdsResult;
use crate::types::RepoRoot;

/// The exclusive-write singleton head pointer (§3 RepoRoot, §5). Updated
/// once per successful commit, strictly after the commit's blocks are
/// durable in the blockstore.
#[async_trait]
pub trait RepoRootStore: Send + Sync + 'static {
    async fn get(&self, did: &str) -> PdsResult<Option<RepoRoot>>;

    async fn set(&self, did: &str, commit_cid: &Cid, rev: &str) -> PdsResult<()>;
}
