use std::sync::Arc;

use pds_core::config::PdsConfig;
use pds_core::{BlockStore, EventLogStore, PdsResult, RecordStore, RepoRootStore};
use pds_repo::CommitEngine;
use pds_sync::Sequencer;

/// Everything a route handler needs: the Commit engine (the only writer),
/// direct read access to the blockstore/record store for sync and read
/// endpoints, the durable event log for `sync.getRepo`'s incremental export,
/// and the firehose Sequencer (§2 data flow, §4.H).
pub struct AppState<B, R, G, E>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    pub did: String,
    pub commit_engine: Arc<CommitEngine<B, R, G>>,
    pub blocks: Arc<B>,
    pub records: Arc<R>,
    pub roots: Arc<G>,
    pub event_log: Arc<E>,
    pub sequencer: Sequencer,
    pub config: Arc<PdsConfig>,
}

impl<B, R, G, E> Clone for AppState<B, R, G, E>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    fn clone(&self) -> Self {
        AppState {
            did: self.did.clone(),
            commit_engine: self.commit_engine.clone(),
            blocks: self.blocks.clone(),
            records: self.records.clone(),
            roots: self.roots.clone(),
            event_log: self.event_log.clone(),
            sequencer: self.sequencer.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B, R, G, E> AppState<B, R, G, E>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    /// The signed commit CID and rev currently at the head of the repo, or
    /// `None` if no write has ever landed (§4.H `getHead`/`getLatestCommit`).
    pub async fn head(&self) -> PdsResult<Option<pds_core::RepoRoot>> {
        self.roots.get(&self.did).await
    }
}
