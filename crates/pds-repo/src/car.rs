//! CAR v1 codec (§4.F): streaming encode/decode of a block set plus export
//! helpers built on top of the MST and blockstore abstractions.

use std::collections::HashSet;

use cid::Cid;
use iroh_car::{CarHeader, CarReader, CarWriter};

use pds_core::{BlockStore, PdsError, PdsResult};

use crate::codec;
use crate::mst::Mst;

/// Streams `blocks` into a CAR v1 byte buffer with the given `roots`.
pub async fn write_car(roots: Vec<Cid>, blocks: Vec<(Cid, Vec<u8>)>) -> PdsResult<Vec<u8>> {
    let header = CarHeader::new_v1(roots);
    let mut buf = Vec::new();
    let mut writer = CarWriter::new(header, &mut buf);
    for (cid, bytes) in blocks {
        writer
            .write(cid, bytes)
            .await
            .map_err(|e| PdsError::IntegrityError(format!("CAR write failed: {e}")))?;
    }
    writer
        .finish()
        .await
        .map_err(|e| PdsError::IntegrityError(format!("CAR finalize failed: {e}")))?;
    Ok(buf)
}

/// Parses a CAR v1 buffer, re-hashing every block against its CID. Fails
/// with `IntegrityError` on the first block whose bytes don't hash to the
/// CID they were stored under.
pub async fn read_car(bytes: &[u8]) -> PdsResult<(Vec<Cid>, Vec<(Cid, Vec<u8>)>)> {
    let mut reader = CarReader::new(bytes)
        .await
        .map_err(|e| PdsError::IntegrityError(format!("malformed CAR header: {e}")))?;
    let roots = reader.header().roots().to_vec();

    let mut blocks = Vec::new();
    while let Some((cid, data)) = reader
        .next_block()
        .await
        .map_err(|e| PdsError::IntegrityError(format!("malformed CAR block: {e}")))?
    {
        codec::verify_cid(&cid, &data)?;
        blocks.push((cid, data));
    }
    Ok((roots, blocks))
}

/// Full repo export (§4.F): the commit block, every MST node reachable from
/// `data`, and every record block the MST's leaves reference.
pub async fn export_repo(store: &dyn BlockStore, commit_cid: Cid, data_root: Cid) -> PdsResult<Vec<u8>> {
    let mst = Mst::load(store, data_root, None).await?;

    let mut cids = HashSet::new();
    mst.collect_all_cids(&mut cids)?;
    for (_, value_cid) in mst.list(usize::MAX, None, None) {
        cids.insert(value_cid);
    }
    cids.insert(commit_cid);

    let mut blocks = Vec::with_capacity(cids.len());
    for cid in cids {
        let bytes = store
            .get(&cid)
            .await?
            .ok_or_else(|| PdsError::IntegrityError(format!("block {cid} referenced but missing")))?;
        blocks.push((cid, bytes));
    }
    write_car(vec![commit_cid], blocks).await
}

/// Single-record export (§4.H `getRecord`): the commit block plus the MST
/// inclusion path for `key` plus the leaf's record block.
pub async fn export_record(
    store: &dyn BlockStore,
    commit_cid: Cid,
    data_root: Cid,
    key: &str,
) -> PdsResult<Vec<u8>> {
    let mst = Mst::load(store, data_root, None).await?;
    let (value_cid, mut blocks) = mst.get_with_proof(key)?;
    let value_cid = value_cid.ok_or_else(|| PdsError::NotFound(format!("record not found: {key}")))?;

    let commit_bytes = store
        .get(&commit_cid)
        .await?
        .ok_or_else(|| PdsError::IntegrityError(format!("commit block {commit_cid} missing")))?;
    blocks.push((commit_cid, commit_bytes));

    let value_bytes = store
        .get(&value_cid)
        .await?
        .ok_or_else(|| PdsError::IntegrityError(format!("record block {value_cid} missing")))?;
    blocks.push((value_cid, value_bytes));

    write_car(vec![commit_cid], blocks).await
}

/// Range export (§4.F `export_range`): merges the already-recorded
/// per-commit block sets for every commit with `from_rev < rev <= to_rev`,
/// deduplicating blocks that appear in more than one commit's delta.
/// Callers (the sync endpoints, backed by `commit_log.blocks_car`) supply
/// those per-commit block sets already decoded; this function only owns the
/// merge-and-dedup-and-frame step.
pub async fn export_range(target_root: Cid, per_commit_blocks: Vec<Vec<(Cid, Vec<u8>)>>) -> PdsResult<Vec<u8>> {
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for commit_blocks in per_commit_blocks {
        for (cid, bytes) in commit_blocks {
            if seen.insert(cid) {
                blocks.push((cid, bytes));
            }
        }
    }
    write_car(vec![target_root], blocks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cid_for_bytes;

    #[tokio::test]
    async fn write_then_read_round_trips_blocks_and_roots() {
        let a = cid_for_bytes(b"block-a");
        let b = cid_for_bytes(b"block-b");
        let bytes = write_car(vec![a], vec![(a, b"block-a".to_vec()), (b, b"block-b".to_vec())])
            .await
            .unwrap();

        let (roots, blocks) = read_car(&bytes).await.unwrap();
        assert_eq!(roots, vec![a]);
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().any(|(cid, data)| *cid == a && data == b"block-a"));
    }

    #[tokio::test]
    async fn read_car_rejects_tampered_block() {
        let a = cid_for_bytes(b"block-a");
        let mut bytes = write_car(vec![a], vec![(a, b"block-a".to_vec())]).await.unwrap();
        *bytes.last_mut().unwrap() ^= 0xff;
        assert!(read_car(&bytes).await.is_err());
    }

    #[tokio::test]
    async fn export_range_dedups_shared_blocks() {
        let a = cid_for_bytes(b"shared");
        let b = cid_for_bytes(b"only-in-second");
        let root = cid_for_bytes(b"root");
        let per_commit = vec![
            vec![(a, b"shared".to_vec())],
            vec![(a, b"shared".to_vec()), (b, b"only-in-second".to_vec())],
        ];
        let bytes = export_range(root, per_commit).await.unwrap();
        let (_, blocks) = read_car(&bytes).await.unwrap();
        assert_eq!(blocks.len(), 2);
    }

    #[tokio::test]
    async fn export_record_includes_path_commit_and_value() {
        use std::collections::HashMap;
        use tokio::sync::RwLock;

        #[derive(Default)]
        struct MemBlocks(RwLock<HashMap<Cid, Vec<u8>>>);

        #[async_trait::async_trait]
        impl BlockStore for MemBlocks {
            async fn get(&self, cid: &Cid) -> PdsResult<Option<Vec<u8>>> {
                Ok(self.0.read().await.get(cid).cloned())
            }
            async fn has(&self, cid: &Cid) -> PdsResult<bool> {
                Ok(self.0.read().await.contains_key(cid))
            }
            async fn put(&self, cid: &Cid, bytes: &[u8]) -> PdsResult<()> {
                self.0.write().await.insert(*cid, bytes.to_vec());
                Ok(())
            }
            async fn get_all(&self) -> PdsResult<Vec<(Cid, Vec<u8>)>> {
                Ok(self.0.read().await.iter().map(|(k, v)| (*k, v.clone())).collect())
            }
        }

        let store = MemBlocks::default();
        let value_bytes = b"record payload".to_vec();
        let value_cid = cid_for_bytes(&value_bytes);
        store.put(&value_cid, &value_bytes).await.unwrap();

        let mst = Mst::empty().add("app.bsky.feed.post/a", value_cid).unwrap();
        for (cid, bytes) in mst.unstored_blocks(&store).await.unwrap() {
            store.put(&cid, &bytes).await.unwrap();
        }
        let commit_bytes = b"fake commit".to_vec();
        let commit_cid = cid_for_bytes(&commit_bytes);
        store.put(&commit_cid, &commit_bytes).await.unwrap();

        let bytes = export_record(&store, commit_cid, mst.root_cid().unwrap(), "app.bsky.feed.post/a")
            .await
            .unwrap();
        let (roots, blocks) = read_car(&bytes).await.unwrap();
        assert_eq!(roots, vec![commit_cid]);
        assert!(blocks.iter().any(|(cid, _)| *cid == value_cid));
        assert!(blocks.iter().any(|(cid, _)| *cid == commit_cid));
    }
}
