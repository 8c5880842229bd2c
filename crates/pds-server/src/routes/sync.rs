//! `sync.*` XRPC handlers (§4.H, §6): CAR exports and the `subscribeRepos`
//! firehose WebSocket. Every handler reads the current `RepoRoot` first —
//! there is exactly one repo in this deployment, so no `did`/`repo` query
//! param is accepted; the DID is whatever `PdsConfig::repo_did` names.

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use pds_core::{BlockStore, EventLogStore, PdsError, RecordStore, RepoRoot, RepoRootStore};
use pds_sync::sequencer::{SequencedFrame, TerminalError};
use pds_sync::PendingCommit;

use crate::error::XrpcError;
use crate::firehose;
use crate::state::AppState;

async fn head_or_not_found<B, R, G, E>(state: &AppState<B, R, G, E>) -> Result<RepoRoot, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    state
        .head()
        .await?
        .ok_or_else(|| XrpcError::new(StatusCode::BAD_REQUEST, "RepoNotFound", "repository has no commits yet"))
}

async fn load_commit_data_cid<B, R, G, E>(state: &AppState<B, R, G, E>, commit_cid: cid::Cid) -> Result<cid::Cid, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let bytes = state
        .blocks
        .get(&commit_cid)
        .await?
        .ok_or_else(|| XrpcError::from(PdsError::IntegrityError(format!("missing commit block {commit_cid}"))))?;
    let commit: pds_repo::Commit = pds_repo::codec::decode(&bytes)?;
    Ok(commit.data)
}

// ---------------------------------------------------------------------------
// getRepo
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GetRepoQuery {
    pub since: Option<String>,
}

/// Merges the CAR blocks recorded against every commit with `rev > since`,
/// up to and including the current head (§4.F `export_range`, "used by
/// getRepo range"). The durable event log doubles as that per-commit block
/// history (§4.G) — each `#commit` event's `PendingCommit.blocks` is the CAR
/// the write produced, already scoped to just that commit's new blocks.
async fn export_since<B, R, G, E>(state: &AppState<B, R, G, E>, root: &RepoRoot, since_rev: &str) -> Result<Vec<u8>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let max_seq = state.event_log.get_max_seq().await?;
    let events = state.event_log.get_events_after(0, max_seq.max(0) as usize).await?;

    let mut per_commit_blocks = Vec::new();
    for event in events {
        if event.event_type != "commit" {
            continue;
        }
        let pending = PendingCommit::decode(&event.payload)?;
        if pending.rev.as_str() <= since_rev {
            continue;
        }
        let (_, blocks) = pds_repo::car::read_car(&pending.blocks).await?;
        per_commit_blocks.push(blocks);
        if pending.rev == root.rev {
            break;
        }
    }

    let bytes = pds_repo::car::export_range(root.commit_cid, per_commit_blocks).await?;
    Ok(bytes)
}

pub async fn get_repo<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Query(params): Query<GetRepoQuery>,
) -> Result<Response, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let root = head_or_not_found(&state).await?;

    let car_bytes = match params.since {
        Some(since_rev) => export_since(&state, &root, &since_rev).await?,
        None => {
            let data_root = load_commit_data_cid(&state, root.commit_cid).await?;
            pds_repo::car::export_repo(state.blocks.as_ref(), root.commit_cid, data_root).await?
        }
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.ipld.car")
        .body(Body::from(car_bytes))
        .unwrap())
}

// ---------------------------------------------------------------------------
// getRecord — inclusion-proof CAR (§4.H; distinct from repo.getRecord's
// plain JSON form)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GetRecordQuery {
    pub collection: String,
    pub rkey: String,
}

pub async fn get_record<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Query(params): Query<GetRecordQuery>,
) -> Result<Response, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let root = head_or_not_found(&state).await?;
    let data_root = load_commit_data_cid(&state, root.commit_cid).await?;
    let key = format!("{}/{}", params.collection, params.rkey);
    let car_bytes = pds_repo::car::export_record(state.blocks.as_ref(), root.commit_cid, data_root, &key).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.ipld.car")
        .body(Body::from(car_bytes))
        .unwrap())
}

// ---------------------------------------------------------------------------
// getBlocks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GetBlocksQuery {
    /// Comma-separated CID strings.
    pub cids: String,
}

pub async fn get_blocks<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Query(params): Query<GetBlocksQuery>,
) -> Result<Response, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let mut blocks = Vec::new();
    for cid_str in params.cids.split(',').filter(|s| !s.is_empty()) {
        let cid: cid::Cid = cid_str
            .parse()
            .map_err(|e| XrpcError::new(StatusCode::BAD_REQUEST, "InvalidRequest", format!("invalid cid {cid_str}: {e}")))?;
        if let Some(bytes) = state.blocks.get(&cid).await? {
            blocks.push((cid, bytes));
        }
    }
    let car_bytes = pds_repo::car::write_car(vec![], blocks).await?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.ipld.car")
        .body(Body::from(car_bytes))
        .unwrap())
}

// ---------------------------------------------------------------------------
// getLatestCommit
// ---------------------------------------------------------------------------

pub async fn get_latest_commit<B, R, G, E>(State(state): State<AppState<B, R, G, E>>) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let root = head_or_not_found(&state).await?;
    Ok(Json(json!({ "cid": root.commit_cid.to_string(), "rev": root.rev })))
}

// ---------------------------------------------------------------------------
// getHead
// ---------------------------------------------------------------------------

pub async fn get_head<B, R, G, E>(State(state): State<AppState<B, R, G, E>>) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let root = head_or_not_found(&state).await?;
    Ok(Json(json!({ "root": root.commit_cid.to_string() })))
}

// ---------------------------------------------------------------------------
// listRepos — single-entry in single-user mode
// ---------------------------------------------------------------------------

pub async fn list_repos<B, R, G, E>(State(state): State<AppState<B, R, G, E>>) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let repos = match state.head().await? {
        Some(root) => vec![json!({
            "did": state.did,
            "head": root.commit_cid.to_string(),
            "rev": root.rev,
            "active": true,
        })],
        None => vec![],
    };
    Ok(Json(json!({ "repos": repos })))
}

// ---------------------------------------------------------------------------
// subscribeRepos
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubscribeReposQuery {
    pub cursor: Option<i64>,
}

pub async fn subscribe_repos<B, R, G, E>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<B, R, G, E>>,
    Query(params): Query<SubscribeReposQuery>,
) -> impl IntoResponse
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    ws.on_upgrade(move |socket| handle_subscribe(socket, state, params.cursor))
}

async fn handle_subscribe<B, R, G, E>(socket: WebSocket, state: AppState<B, R, G, E>, cursor: Option<i64>)
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let (mut sender, mut receiver) = socket.split();

    let mut rx = match state.sequencer.subscribe(cursor).await {
        Ok(rx) => rx,
        Err(err) => {
            tracing::warn!(%err, "subscribeRepos failed to register");
            return;
        }
    };

    // Drain incoming control frames (pings/pongs/close) on a side task so the
    // client's half of the socket never blocks this loop.
    let drain = tokio::spawn(async move { while let Some(Ok(_)) = receiver.next().await {} });

    while let Some(frame) = rx.recv().await {
        let encoded = match frame {
            SequencedFrame::Commit(event) => firehose::frame_for_event(&event),
            SequencedFrame::Error(terminal) => pds_sync::wire::encode_error_frame(&terminal_error_payload(terminal)),
        };
        match encoded {
            Ok(bytes) => {
                if sender.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to encode subscribeRepos frame");
            }
        }
    }

    drain.abort();
}

fn terminal_error_payload(terminal: TerminalError) -> pds_sync::ErrorPayload {
    match terminal {
        TerminalError::OutdatedCursor => pds_sync::ErrorPayload::outdated_cursor(),
        TerminalError::FutureCursor => pds_sync::ErrorPayload::future_cursor(),
        TerminalError::ConsumerTooSlow => pds_sync::ErrorPayload::consumer_too_slow(),
    }
}
