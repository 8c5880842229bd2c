//! Firehose payload shapes (§4.G, §6). These are the DAG-CBOR bodies framed
//! by `wire::encode_frame`; the envelope (seq, event_type, did) they travel
//! inside on the persisted log is `pds_core::PersistedEvent`.

use cid::Cid;
use pds_core::{PdsError, PdsResult, RepoOp};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// `#commit` frame body: everything a subscriber needs to apply the write
/// without a follow-up request (§4.E step 9, §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPayload {
    pub seq: i64,
    pub repo: String,
    pub commit: Cid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<Cid>,
    pub rev: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    pub time: String,
    pub ops: Vec<RepoOp>,
    /// CAR bytes: the new commit block, unstored MST nodes, new record
    /// blocks (§4.E step 9).
    pub blocks: ByteBuf,
}

/// Everything a `CommitPayload` carries except `seq`. The committer builds
/// one of these and hands its encoding to `Sequencer::emit`, which is the
/// only thing that ever learns the assigned `seq` (§4.E step 9, §4.G) — the
/// stored event log row supplies it back when a frame is built for replay
/// or live delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCommit {
    pub repo: String,
    pub commit: Cid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<Cid>,
    pub rev: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    pub time: String,
    pub ops: Vec<RepoOp>,
    pub blocks: ByteBuf,
}

impl PendingCommit {
    pub fn encode(&self) -> PdsResult<Vec<u8>> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| PdsError::IntegrityError(format!("commit payload encode failed: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> PdsResult<Self> {
        serde_ipld_dagcbor::from_slice(bytes).map_err(|e| PdsError::IntegrityError(format!("commit payload decode failed: {e}")))
    }

    pub fn into_payload(self, seq: i64) -> CommitPayload {
        CommitPayload {
            seq,
            repo: self.repo,
            commit: self.commit,
            prev: self.prev,
            rev: self.rev,
            since: self.since,
            time: self.time,
            ops: self.ops,
            blocks: self.blocks,
        }
    }
}

/// `#info` frame body, sent on idle subscriber keepalive (§5 Timeouts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoPayload {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `#error` frame body: one of the terminal-frame kinds a subscription can
/// end with (§4.G, §7 `CursorOutOfRange`/`ConsumerTooSlow`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorPayload {
    pub fn outdated_cursor() -> Self {
        Self {
            error: "OutdatedCursor".to_string(),
            message: Some("requested cursor is older than the retained replay window".to_string()),
        }
    }

    pub fn future_cursor() -> Self {
        Self {
            error: "FutureCursor".to_string(),
            message: Some("requested cursor is ahead of the current sequence".to_string()),
        }
    }

    pub fn consumer_too_slow() -> Self {
        Self {
            error: "ConsumerTooSlow".to_string(),
            message: Some("subscriber did not keep up with the live stream".to_string()),
        }
    }
}
