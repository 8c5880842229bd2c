//! Bridges the Commit engine's write outcome to the Sequencer (§4.E step 9).
//! Nothing else in this crate calls `Sequencer::emit` directly.

use serde_bytes::ByteBuf;

use pds_core::{BlockStore, EventLogStore, PdsResult, RecordStore, RepoRootStore};
use pds_repo::WriteOutcome;
use pds_sync::PendingCommit;

use crate::state::AppState;

/// Wraps a successful write's new blocks in a CAR, builds the pending
/// commit body, and hands it to the Sequencer for durable `seq` assignment
/// (§4.E step 9, §4.G `emit`).
pub async fn emit_commit<B, R, G, E>(state: &AppState<B, R, G, E>, outcome: &WriteOutcome) -> PdsResult<i64>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let car_bytes = pds_repo::car::write_car(vec![outcome.result.commit_cid], outcome.new_blocks.clone()).await?;
    let pending = PendingCommit {
        repo: state.did.clone(),
        commit: outcome.result.commit_cid,
        prev: outcome.result.prev,
        rev: outcome.result.rev.clone(),
        since: outcome.result.since.clone(),
        time: chrono::Utc::now().to_rfc3339(),
        ops: outcome.result.ops.clone(),
        blocks: ByteBuf::from(car_bytes),
    };
    state.sequencer.emit("commit", &state.did, pending.encode()?).await
}

/// Wraps the stored `(seq, event_type, did, payload)` row back into a wire
/// frame once a subscriber is ready to receive it (§4.G Frame wire format).
/// `event_type` selects which payload shape `payload` decodes as.
pub fn frame_for_event(event: &pds_core::PersistedEvent) -> PdsResult<Vec<u8>> {
    match event.event_type.as_str() {
        "commit" => {
            let pending = PendingCommit::decode(&event.payload)?;
            let payload = pending.into_payload(event.seq);
            pds_sync::wire::encode_commit_frame(&payload)
        }
        other => {
            // Unknown event kinds never reach the durable log in this
            // implementation (only "commit" is ever appended), but a
            // forward-compatible reader treats them as `#info` noise
            // rather than failing the whole subscription.
            pds_sync::wire::encode_info_frame(&pds_sync::InfoPayload {
                name: other.to_string(),
                message: None,
            })
        }
    }
}
