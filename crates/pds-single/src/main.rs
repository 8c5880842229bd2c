use std::sync::Arc;

use pds_core::config::PdsConfig;
use pds_core::config::SigningAlgorithm;
use pds_crypto::SigningKey;
use pds_server::{AppState, build_router};
use pds_storage_sqlite::{SqliteBlockStore, SqliteEventLogStore, SqliteRecordStore, SqliteRepoRootStore};

/// The single-process binary (§4.L): load config, connect sqlite, load or
/// provision the repo signing key, spawn the sequencer, and serve. No
/// TLS/ACME termination or account/email/blob layer — those belong to a
/// multi-tenant deployment this crate never became.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/single.toml".to_string());
    let config = PdsConfig::load(&config_path)?;

    let pool = pds_storage_sqlite::connect(&config.database.url).await?;

    let blocks = Arc::new(SqliteBlockStore::new(pool.clone()));
    let records = Arc::new(SqliteRecordStore::new(pool.clone()));
    let roots = Arc::new(SqliteRepoRootStore::new(pool.clone()));
    let event_log = Arc::new(SqliteEventLogStore::new(pool));

    let signing_key = load_or_provision_signing_key(&config)?;
    tracing::info!(did_key = %signing_key.did_key(), "repo signing key ready");

    let commit_engine = Arc::new(pds_repo::CommitEngine::new(
        config.repo_did.clone(),
        blocks.clone(),
        records.clone(),
        roots.clone(),
        signing_key,
    ));

    let sequencer = pds_sync::Sequencer::spawn(event_log.clone(), config.sequencer.seq_window).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let config = Arc::new(config);

    let state = AppState {
        did: config.repo_did.clone(),
        commit_engine,
        blocks,
        records,
        roots,
        event_log,
        sequencer,
        config,
    };

    let router = build_router(state);

    tracing::info!("pds-single listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

/// Loads `signing.repo_signing_key` from config if set, otherwise generates
/// a fresh key for the configured algorithm and prints it once so the
/// operator can pin it in `config/single.toml` for the next boot (§9
/// Signing keys: a repo settles on one algorithm, chosen at provisioning).
fn load_or_provision_signing_key(config: &PdsConfig) -> anyhow::Result<SigningKey> {
    if let Some(hex_key) = &config.signing.repo_signing_key {
        let bytes = hex::decode(hex_key)?;
        let algorithm = match config.signing.algorithm {
            SigningAlgorithm::Ed25519 => "ed25519",
            SigningAlgorithm::Secp256k1 => "secp256k1",
        };
        return Ok(SigningKey::from_bytes(algorithm, &bytes)?);
    }

    let key = match config.signing.algorithm {
        SigningAlgorithm::Ed25519 => SigningKey::generate_ed25519(),
        SigningAlgorithm::Secp256k1 => SigningKey::generate_secp256k1(),
    };
    tracing::warn!(
        repo_signing_key = %hex::encode(key.to_bytes()),
        "no signing.repo_signing_key configured, generated one for this boot; \
         pin it in config/single.toml or every restart will sign under a new identity"
    );
    Ok(key)
}
