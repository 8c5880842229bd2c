use cid::Cid;
use serde::{Deserialize, Serialize};

/// The current head pointer of the single repo hosted by this server.
/// Updated atomically on every successful commit (§4.E).
#[derive(Debug, Clone)]
pub struct RepoRoot {
    pub did: String,
    pub commit_cid: Cid,
    pub rev: String,
}

/// A single mutation inside `apply_writes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WriteOp {
    Create {
        collection: String,
        rkey: Option<String>,
        record: serde_json::Value,
    },
    Update {
        collection: String,
        rkey: String,
        record: serde_json::Value,
    },
    Delete {
        collection: String,
        rkey: String,
    },
}

/// One entry of a commit's `ops[]`, diffed between the prior and new MST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoOp {
    pub action: RepoOpAction,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoOpAction {
    Create,
    Update,
    Delete,
}

/// The outcome of a single write against the Commit engine (§4.E).
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub commit_cid: Cid,
    pub rev: String,
    pub prev: Option<Cid>,
    /// The repo's `rev` immediately before this commit, carried through to
    /// the firehose frame as `since` (§4.E step 9).
    pub since: Option<String>,
    pub ops: Vec<RepoOp>,
}
