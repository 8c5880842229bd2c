//! Shared harness for the integration tests in this crate: an `AppState`
//! wired to a fresh in-memory sqlite database, the way `pds-single`'s
//! `main.rs` wires the real one minus TLS/process concerns.

use std::sync::Arc;

use pds_core::config::{DatabaseConfig, PdsConfig};
use pds_repo::CommitEngine;
use pds_storage_sqlite::{SqliteBlockStore, SqliteEventLogStore, SqliteRecordStore, SqliteRepoRootStore};
use pds_sync::Sequencer;

pub const TEST_DID: &str = "did:key:z6MkTestRepoDidForIntegrationTests";

pub type TestState = pds_server::AppState<SqliteBlockStore, SqliteRecordStore, SqliteRepoRootStore, SqliteEventLogStore>;

pub async fn test_state() -> TestState {
    let pool = pds_storage_sqlite::connect("sqlite::memory:").await.expect("connect in-memory sqlite");

    let blocks = Arc::new(SqliteBlockStore::new(pool.clone()));
    let records = Arc::new(SqliteRecordStore::new(pool.clone()));
    let roots = Arc::new(SqliteRepoRootStore::new(pool.clone()));
    let event_log = Arc::new(SqliteEventLogStore::new(pool));

    let signing_key = pds_crypto::SigningKey::generate_ed25519();
    let commit_engine = Arc::new(CommitEngine::new(
        TEST_DID.to_string(),
        blocks.clone(),
        records.clone(),
        roots.clone(),
        signing_key,
    ));
    let sequencer = Sequencer::spawn(event_log.clone(), 512).await.expect("spawn sequencer");

    let config = Arc::new(PdsConfig {
        repo_did: TEST_DID.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        database: DatabaseConfig { url: "sqlite::memory:".to_string() },
        signing: Default::default(),
        sequencer: Default::default(),
        max_json_bytes: 65536,
        log_level: "info".to_string(),
    });

    pds_server::AppState {
        did: TEST_DID.to_string(),
        commit_engine,
        blocks,
        records,
        roots,
        event_log,
        sequencer,
        config,
    }
}

pub fn router(state: TestState) -> axum::Router {
    pds_server::build_router(state)
}

pub async fn post_json(app: &axum::Router, uri: &str, body: serde_json::Value) -> (axum::http::StatusCode, serde_json::Value) {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() { serde_json::Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

pub async fn get_json(app: &axum::Router, uri: &str) -> (axum::http::StatusCode, serde_json::Value) {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let request = axum::http::Request::builder().uri(uri).body(axum::body::Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() { serde_json::Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

pub async fn get_bytes(app: &axum::Router, uri: &str) -> (axum::http::StatusCode, Vec<u8>) {
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let request = axum::http::Request::builder().uri(uri).body(axum::body::Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}
