//! The Commit engine (§4.E): the only writer of repo state. Every public
//! operation funnels through `apply_writes`, which holds the repo write
//! lock for its whole duration — the single-writer property the Sequencer
//! also depends on (§5) is enforced here, not there.

use std::sync::Arc;

use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tokio::sync::Mutex;

use pds_core::{BlockStore, CommitResult, PdsError, PdsResult, RecordStore, RepoRootStore, WriteOp};
use pds_crypto::{SigningKey, TidGenerator};

use crate::codec;
use crate::diff::diff_ops;
use crate::mst::Mst;

/// The signed commit value (§3, §4.E step 5-6). Field order here is
/// irrelevant to the wire format — `serde_ipld_dagcbor` sorts map keys
/// canonically regardless of struct declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub did: String,
    pub version: i64,
    pub prev: Option<Cid>,
    pub data: Cid,
    pub rev: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<ByteBuf>,
}

/// Everything a caller needs to both record the write and hand a frame to
/// the Sequencer (§4.E step 9): the `CommitResult` plus every block this
/// write introduced, ready to wrap in a CAR.
pub struct WriteOutcome {
    pub result: CommitResult,
    pub new_blocks: Vec<(Cid, Vec<u8>)>,
}

pub struct CommitEngine<B, R, G> {
    did: String,
    blocks: Arc<B>,
    records: Arc<R>,
    roots: Arc<G>,
    signing_key: SigningKey,
    tid: TidGenerator,
    write_lock: Mutex<()>,
}

impl<B, R, G> CommitEngine<B, R, G>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
{
    pub fn new(did: String, blocks: Arc<B>, records: Arc<R>, roots: Arc<G>, signing_key: SigningKey) -> Self {
        Self {
            did,
            blocks,
            records,
            roots,
            signing_key,
            tid: TidGenerator::new(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn create_record(
        &self,
        collection: &str,
        record: serde_json::Value,
        rkey: Option<String>,
    ) -> PdsResult<WriteOutcome> {
        self.apply_writes(vec![WriteOp::Create {
            collection: collection.to_string(),
            rkey,
            record,
        }])
        .await
    }

    pub async fn put_record(&self, collection: &str, rkey: &str, record: serde_json::Value) -> PdsResult<WriteOutcome> {
        self.apply_writes(vec![WriteOp::Update {
            collection: collection.to_string(),
            rkey: rkey.to_string(),
            record,
        }])
        .await
    }

    pub async fn delete_record(&self, collection: &str, rkey: &str) -> PdsResult<WriteOutcome> {
        self.apply_writes(vec![WriteOp::Delete {
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        }])
        .await
    }

    /// Steps 1-9 of §4.E, atomic under `write_lock`.
    pub async fn apply_writes(&self, ops: Vec<WriteOp>) -> PdsResult<WriteOutcome> {
        let _guard = self.write_lock.lock().await;

        // Step 1: load current RepoRoot, or start from the empty MST.
        let current_root = self.roots.get(&self.did).await?;
        let (old_mst, prev_commit_cid, prev_rev) = match &current_root {
            Some(root) => {
                let commit_bytes = self
                    .blocks
                    .get(&root.commit_cid)
                    .await?
                    .ok_or_else(|| PdsError::IntegrityError(format!("missing commit block {}", root.commit_cid)))?;
                codec::verify_cid(&root.commit_cid, &commit_bytes)?;
                let commit: Commit = codec::decode(&commit_bytes)?;
                let mst = Mst::load(self.blocks.as_ref(), commit.data, None).await?;
                (mst, Some(root.commit_cid), Some(root.rev.clone()))
            }
            None => (Mst::empty(), None, None),
        };

        // Steps 2-3: encode each record, apply ops to the MST. `old_mst` is
        // kept untouched for the step 8 diff.
        let mut mst = old_mst.duplicate();
        let mut new_record_blocks = Vec::new();
        let mut record_rows: Vec<(String, Cid, Vec<u8>)> = Vec::new();

        for op in ops {
            match op {
                WriteOp::Create { collection, rkey, record } => {
                    let rkey = rkey.unwrap_or_else(|| self.tid.next_tid());
                    let key = format!("{collection}/{rkey}");
                    let bytes = codec::encode(&record)?;
                    let cid = codec::cid_for_bytes(&bytes);
                    mst = mst.add(&key, cid)?;
                    new_record_blocks.push((cid, bytes.clone()));
                    record_rows.push((format!("at://{}/{key}", self.did), cid, bytes));
                }
                WriteOp::Update { collection, rkey, record } => {
                    // `putRecord` is an upsert (§4.E): create the leaf if
                    // it doesn't exist yet rather than failing.
                    let key = format!("{collection}/{rkey}");
                    let bytes = codec::encode(&record)?;
                    let cid = codec::cid_for_bytes(&bytes);
                    mst = if mst.get(&key).is_some() {
                        mst.update(&key, cid)?
                    } else {
                        mst.add(&key, cid)?
                    };
                    new_record_blocks.push((cid, bytes.clone()));
                    record_rows.push((format!("at://{}/{key}", self.did), cid, bytes));
                }
                WriteOp::Delete { collection, rkey } => {
                    let key = format!("{collection}/{rkey}");
                    mst = mst.delete(&key)?;
                    self.records.delete(&format!("at://{}/{key}", self.did)).await?;
                }
            }
        }

        // Step 4: new-or-changed MST nodes.
        let unstored_mst_blocks = mst.unstored_blocks(self.blocks.as_ref()).await?;

        // Step 5-6: build and sign the commit.
        let rev = self.tid.next_tid();
        let new_data_cid = mst.root_cid()?;
        let unsigned = Commit {
            did: self.did.clone(),
            version: 3,
            prev: prev_commit_cid,
            data: new_data_cid,
            rev: rev.clone(),
            sig: None,
        };
        let signing_bytes = codec::encode(&unsigned)?;
        let signature = self.signing_key.sign(&signing_bytes);
        let signed = Commit {
            sig: Some(ByteBuf::from(signature)),
            ..unsigned
        };
        let (commit_cid, commit_bytes) = codec::cid_for(&signed)?;

        // Step 7: write blocks, update RepoRoot, update record projection.
        self.blocks.put_many(&unstored_mst_blocks).await?;
        self.blocks.put_many(&new_record_blocks).await?;
        self.blocks.put(&commit_cid, &commit_bytes).await?;
        for (uri, cid, bytes) in &record_rows {
            self.records.put(uri, cid, bytes).await?;
        }
        self.roots.set(&self.did, &commit_cid, &rev).await?;

        // Step 8: diff against the pre-write tree.
        let ops_diff = diff_ops(&old_mst, &mst)?;

        let mut new_blocks = unstored_mst_blocks;
        new_blocks.extend(new_record_blocks);
        new_blocks.push((commit_cid, commit_bytes));

        Ok(WriteOutcome {
            result: CommitResult {
                commit_cid,
                rev,
                prev: prev_commit_cid,
                since: prev_rev,
                ops: ops_diff,
            },
            new_blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[derive(Default)]
    struct MemRecords(RwLock<HashMap<String, pds_core::RecordRow>>);

    #[async_trait::async_trait]
    impl RecordStore for MemRecords {
        async fn get(&self, uri: &str) -> PdsResult<Option<pds_core::RecordRow>> {
            Ok(self.0.read().await.get(uri).cloned())
        }
        async fn put(&self, uri: &str, cid: &Cid, json_bytes: &[u8]) -> PdsResult<()> {
            self.0.write().await.insert(
                uri.to_string(),
                pds_core::RecordRow {
                    uri: uri.to_string(),
                    cid: *cid,
                    json_bytes: json_bytes.to_vec(),
                },
            );
            Ok(())
        }
        async fn delete(&self, uri: &str) -> PdsResult<()> {
            self.0.write().await.remove(uri);
            Ok(())
        }
        async fn list(&self, _collection: &str, _limit: usize, _cursor: Option<&str>) -> PdsResult<Vec<pds_core::RecordRow>> {
            Ok(self.0.read().await.values().cloned().collect())
        }
    }

    #[derive(Default)]
    struct MemRoots(RwLock<Option<pds_core::RepoRoot>>);

    #[async_trait::async_trait]
    impl RepoRootStore for MemRoots {
        async fn get(&self, _did: &str) -> PdsResult<Option<pds_core::RepoRoot>> {
            Ok(self.0.read().await.clone())
        }
        async fn set(&self, did: &str, commit_cid: &Cid, rev: &str) -> PdsResult<()> {
            *self.0.write().await = Some(pds_core::RepoRoot {
                did: did.to_string(),
                commit_cid: *commit_cid,
                rev: rev.to_string(),
            });
            Ok(())
        }
    }

    fn engine() -> CommitEngine<MemBlocks, MemRecords, MemRoots> {
        CommitEngine::new(
            "did:key:test".to_string(),
            Arc::new(MemBlocks::default()),
            Arc::new(MemRecords::default()),
            Arc::new(MemRoots::default()),
            SigningKey::generate_ed25519(),
        )
    }

    #[tokio::test]
    async fn first_write_has_no_prev() {
        let engine = engine();
        let outcome = engine
            .create_record("app.bsky.feed.post", serde_json::json!({"text": "hi"}), None)
            .await
            .unwrap();
        assert!(outcome.result.prev.is_none());
        assert!(outcome.result.since.is_none());
        assert_eq!(outcome.result.ops.len(), 1);
    }

    #[tokio::test]
    async fn second_write_chains_prev_and_since() {
        let engine = engine();
        let first = engine
            .create_record("app.bsky.feed.post", serde_json::json!({"text": "one"}), Some("a".into()))
            .await
            .unwrap();
        let second = engine
            .create_record("app.bsky.feed.post", serde_json::json!({"text": "two"}), Some("b".into()))
            .await
            .unwrap();
        assert_eq!(second.result.prev, Some(first.result.commit_cid));
        assert_eq!(second.result.since, Some(first.result.rev));
        assert_eq!(second.result.ops.len(), 1);
    }

    #[tokio::test]
    async fn put_record_upserts_when_absent() {
        let engine = engine();
        let outcome = engine
            .put_record("app.bsky.feed.post", "a", serde_json::json!({"text": "new"}))
            .await
            .unwrap();
        assert!(outcome.result.prev.is_none());
        assert_eq!(outcome.result.ops[0].action, pds_core::RepoOpAction::Create);
    }

    #[tokio::test]
    async fn put_record_updates_when_present() {
        let engine = engine();
        engine
            .create_record("app.bsky.feed.post", serde_json::json!({"text": "one"}), Some("a".into()))
            .await
            .unwrap();
        let outcome = engine
            .put_record("app.bsky.feed.post", "a", serde_json::json!({"text": "two"}))
            .await
            .unwrap();
        assert_eq!(outcome.result.ops[0].action, pds_core::RepoOpAction::Update);
    }

    #[tokio::test]
    async fn delete_then_create_round_trips_root() {
        let engine = engine();
        engine
            .create_record("app.bsky.feed.post", serde_json::json!({"text": "one"}), Some("a".into()))
            .await
            .unwrap();
        let outcome = engine.delete_record("app.bsky.feed.post", "a").await.unwrap();
        assert_eq!(outcome.result.ops.len(), 1);
        assert_eq!(outcome.result.ops[0].action, pds_core::RepoOpAction::Delete);
    }
}
