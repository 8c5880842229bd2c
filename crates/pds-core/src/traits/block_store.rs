use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use cid::Cid;

use crate::error::PdsResult;

/// Content-addressed block storage (§4.B). A conforming implementation is a
/// set keyed by CID: `put` is idempotent, `has` never reports a block whose
/// bytes were written but empty, and puts may arrive in any order.
#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    async fn get(&self, cid: &Cid) -> PdsResult<Option<Vec<u8>>>;

    /// Splits `cids` into the blocks that were found and the ones that
    /// weren't. Implementations chunk internally to respect backing-store
    /// parameter limits; callers never need to pre-batch.
    async fn get_many(&self, cids: &[Cid]) -> PdsResult<(HashMap<Cid, Vec<u8>>, HashSet<Cid>)> {
        let mut found = HashMap::with_capacity(cids.len());
        let mut missing = HashSet::new();
        for cid in cids {
            match self.get(cid).await? {
                Some(bytes) => {
                    found.insert(*cid, bytes);
                }
                None => {
                    missing.insert(*cid);
                }
            }
        }
        Ok((found, missing))
    }

    async fn has(&self, cid: &Cid) -> PdsResult<bool>;

    async fn put(&self, cid: &Cid, bytes: &[u8]) -> PdsResult<()>;

    async fn put_many(&self, blocks: &[(Cid, Vec<u8>)]) -> PdsResult<()> {
        for (cid, bytes) in blocks {
            self.put(cid, bytes).await?;
        }
        Ok(())
    }

    /// All blocks belonging to the repo, for CAR export and recovery. Order
    /// is unspecified.
    async fn get_all(&self) -> PdsResult<Vec<(Cid, Vec<u8>)>>;
}
