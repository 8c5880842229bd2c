pub mod health;
pub mod repo;
pub mod sync;

use pds_core::{BlockStore, EventLogStore, RecordStore, RepoRootStore};

use crate::state::AppState;

/// Wires every route named in the HTTP/XRPC surface table (§6) plus a
/// liveness probe; no auth/session/CORS/admin layer (§1 out of scope).
pub fn build_router<B, R, G, E>(state: AppState<B, R, G, E>) -> axum::Router
where
    B: BlockStore + Clone,
    R: RecordStore + Clone,
    G: RepoRootStore + Clone,
    E: EventLogStore + Clone,
{
    axum::Router::new()
        .route("/healthz", axum::routing::get(health::healthz))
        .route(
            "/xrpc/com.atproto.repo.createRecord",
            axum::routing::post(repo::create_record::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.repo.putRecord",
            axum::routing::post(repo::put_record::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.repo.deleteRecord",
            axum::routing::post(repo::delete_record::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.repo.applyWrites",
            axum::routing::post(repo::apply_writes::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.repo.getRecord",
            axum::routing::get(repo::get_record::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.repo.listRecords",
            axum::routing::get(repo::list_records::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.sync.getRepo",
            axum::routing::get(sync::get_repo::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.sync.getRecord",
            axum::routing::get(sync::get_record::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.sync.getBlocks",
            axum::routing::get(sync::get_blocks::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.sync.getLatestCommit",
            axum::routing::get(sync::get_latest_commit::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.sync.getHead",
            axum::routing::get(sync::get_head::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.sync.listRepos",
            axum::routing::get(sync::list_repos::<B, R, G, E>),
        )
        .route(
            "/xrpc/com.atproto.sync.subscribeRepos",
            axum::routing::get(sync::subscribe_repos::<B, R, G, E>),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
