//! Liveness probe. Not part of the XRPC surface (§4.H), just confirms the
//! process and router are up.

pub async fn healthz() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
