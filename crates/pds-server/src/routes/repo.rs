//! `repo.*` XRPC handlers (§4.H, §6). Every write funnels through
//! `state.commit_engine` and then the firehose bridge in `crate::firehose`;
//! every read goes straight to the record projection (§4.D) rather than
//! walking the MST.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use pds_core::{BlockStore, EventLogStore, PdsResult, RecordStore, RepoOp, RepoOpAction, RepoRootStore, WriteOp};
use pds_repo::WriteOutcome;

use crate::error::XrpcError;
use crate::firehose;
use crate::state::AppState;

fn check_record_size<B, R, G, E>(state: &AppState<B, R, G, E>, record: &Value) -> Result<(), XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let encoded_len = serde_json::to_vec(record).map(|v| v.len()).unwrap_or(usize::MAX);
    if encoded_len > state.config.max_json_bytes {
        return Err(XrpcError::new(
            StatusCode::BAD_REQUEST,
            "InvalidRequest",
            format!("record of {encoded_len} bytes exceeds the {} byte limit", state.config.max_json_bytes),
        ));
    }
    Ok(())
}

fn commit_json(outcome: &WriteOutcome) -> Value {
    json!({
        "cid": outcome.result.commit_cid.to_string(),
        "rev": outcome.result.rev,
    })
}

async fn emit<B, R, G, E>(state: &AppState<B, R, G, E>, outcome: &WriteOutcome) -> PdsResult<i64>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    firehose::emit_commit(state, outcome).await
}

// ---------------------------------------------------------------------------
// createRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub collection: String,
    pub rkey: Option<String>,
    pub record: Value,
}

pub async fn create_record<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Json(body): Json<CreateRecordRequest>,
) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    check_record_size(&state, &body.record)?;

    let outcome = state
        .commit_engine
        .create_record(&body.collection, body.record, body.rkey)
        .await?;
    emit(&state, &outcome).await?;

    let path = &outcome.result.ops.first().ok_or_else(|| {
        XrpcError::new(StatusCode::INTERNAL_SERVER_ERROR, "IntegrityError", "commit produced no op")
    })?.path;
    let cid = outcome.result.ops[0].cid.clone().unwrap_or_default();

    Ok(Json(json!({
        "uri": format!("at://{}/{path}", state.did),
        "cid": cid,
        "commit": commit_json(&outcome),
    })))
}

// ---------------------------------------------------------------------------
// putRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PutRecordRequest {
    pub collection: String,
    pub rkey: String,
    pub record: Value,
}

pub async fn put_record<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Json(body): Json<PutRecordRequest>,
) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    check_record_size(&state, &body.record)?;

    let outcome = state.commit_engine.put_record(&body.collection, &body.rkey, body.record).await?;
    emit(&state, &outcome).await?;

    let uri = format!("at://{}/{}/{}", state.did, body.collection, body.rkey);
    let cid = outcome
        .result
        .ops
        .iter()
        .find(|op| op.path == format!("{}/{}", body.collection, body.rkey))
        .and_then(|op| op.cid.clone())
        .unwrap_or_default();

    Ok(Json(json!({
        "uri": uri,
        "cid": cid,
        "commit": commit_json(&outcome),
    })))
}

// ---------------------------------------------------------------------------
// deleteRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeleteRecordRequest {
    pub collection: String,
    pub rkey: String,
}

pub async fn delete_record<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Json(body): Json<DeleteRecordRequest>,
) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let outcome = state.commit_engine.delete_record(&body.collection, &body.rkey).await?;
    emit(&state, &outcome).await?;

    Ok(Json(json!({ "commit": commit_json(&outcome) })))
}

// ---------------------------------------------------------------------------
// applyWrites
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ApplyWriteOp {
    Create {
        collection: String,
        rkey: Option<String>,
        record: Value,
    },
    Update {
        collection: String,
        rkey: String,
        record: Value,
    },
    Delete {
        collection: String,
        rkey: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct ApplyWritesRequest {
    pub writes: Vec<ApplyWriteOp>,
}

pub async fn apply_writes<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Json(body): Json<ApplyWritesRequest>,
) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let mut ops = Vec::with_capacity(body.writes.len());
    for write in &body.writes {
        match write {
            ApplyWriteOp::Create { collection, rkey, record } => {
                check_record_size(&state, record)?;
                ops.push(WriteOp::Create {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    record: record.clone(),
                });
            }
            ApplyWriteOp::Update { collection, rkey, record } => {
                check_record_size(&state, record)?;
                ops.push(WriteOp::Update {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                    record: record.clone(),
                });
            }
            ApplyWriteOp::Delete { collection, rkey } => {
                ops.push(WriteOp::Delete {
                    collection: collection.clone(),
                    rkey: rkey.clone(),
                });
            }
        }
    }

    let outcome = state.commit_engine.apply_writes(ops).await?;
    emit(&state, &outcome).await?;

    // Diffed ops are sorted ascending by path (§4.E step 8); TIDs generated
    // for rkey-less creates are themselves strictly increasing, so walking
    // the request in order and consuming matching diff entries in ascending
    // order recovers the rkey the engine picked for each one.
    let mut remaining: Vec<RepoOp> = outcome.result.ops.clone();
    let mut results = Vec::with_capacity(body.writes.len());

    for write in &body.writes {
        let (result_type, matched) = match write {
            ApplyWriteOp::Create { collection, rkey: Some(rkey), .. } => {
                let path = format!("{collection}/{rkey}");
                let idx = remaining.iter().position(|op| op.path == path && op.action == RepoOpAction::Create);
                ("create", idx)
            }
            ApplyWriteOp::Create { collection, rkey: None, .. } => {
                let prefix = format!("{collection}/");
                let idx = remaining
                    .iter()
                    .position(|op| op.action == RepoOpAction::Create && op.path.starts_with(&prefix));
                ("create", idx)
            }
            ApplyWriteOp::Update { collection, rkey, .. } => {
                let path = format!("{collection}/{rkey}");
                let idx = remaining.iter().position(|op| op.path == path);
                ("update", idx)
            }
            ApplyWriteOp::Delete { collection, rkey } => {
                let path = format!("{collection}/{rkey}");
                let idx = remaining.iter().position(|op| op.path == path && op.action == RepoOpAction::Delete);
                ("delete", idx)
            }
        };

        let op = matched.map(|idx| remaining.remove(idx)).ok_or_else(|| {
            XrpcError::new(StatusCode::INTERNAL_SERVER_ERROR, "IntegrityError", "write did not produce a matching op")
        })?;

        results.push(match result_type {
            "delete" => json!({ "$type": "com.atproto.repo.applyWrites#deleteResult" }),
            kind => json!({
                "$type": format!("com.atproto.repo.applyWrites#{kind}Result"),
                "uri": format!("at://{}/{}", state.did, op.path),
                "cid": op.cid,
            }),
        });
    }

    Ok(Json(json!({
        "commit": commit_json(&outcome),
        "results": results,
    })))
}

// ---------------------------------------------------------------------------
// getRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct GetRecordQuery {
    pub collection: String,
    pub rkey: String,
}

pub async fn get_record<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Query(params): Query<GetRecordQuery>,
) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let uri = format!("at://{}/{}/{}", state.did, params.collection, params.rkey);
    let row = state.records.get(&uri).await?.ok_or_else(|| {
        pds_core::PdsError::NotFound(format!("record not found: {uri}"))
    })?;

    let value: Value = serde_json::from_slice(&row.json_bytes)
        .map_err(|e| pds_core::PdsError::IntegrityError(format!("stored record is not valid JSON: {e}")))?;

    Ok(Json(json!({
        "uri": row.uri,
        "cid": row.cid.to_string(),
        "value": value,
    })))
}

// ---------------------------------------------------------------------------
// listRecords
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListRecordsQuery {
    pub collection: String,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

pub async fn list_records<B, R, G, E>(
    State(state): State<AppState<B, R, G, E>>,
    Query(params): Query<ListRecordsQuery>,
) -> Result<Json<Value>, XrpcError>
where
    B: BlockStore,
    R: RecordStore,
    G: RepoRootStore,
    E: EventLogStore,
{
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let rows = state.records.list(&params.collection, limit, params.cursor.as_deref()).await?;

    let cursor = if rows.len() >= limit {
        rows.last().map(|r| r.uri.clone())
    } else {
        None
    };

    let records: Vec<Value> = rows
        .iter()
        .map(|r| {
            let value: Value = serde_json::from_slice(&r.json_bytes).unwrap_or(Value::Null);
            json!({ "uri": r.uri, "cid": r.cid.to_string(), "value": value })
        })
        .collect();

    let mut response = json!({ "records": records });
    if let Some(c) = cursor {
        response["cursor"] = json!(c);
    }
    Ok(Json(response))
}
