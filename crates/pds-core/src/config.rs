use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;

/// Process-wide configuration, captured once at startup (§4.I). No handler
/// code reads environment variables or files directly — everything flows
/// through this struct.
#[derive(Debug, Clone, Deserialize)]
pub struct PdsConfig {
    /// DID of the single repo this server hosts.
    pub repo_did: String,
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default = "default_max_json_bytes")]
    pub max_json_bytes: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningAlgorithm {
    Ed25519,
    Secp256k1,
}

impl Default for SigningAlgorithm {
    fn default() -> Self {
        SigningAlgorithm::Ed25519
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigningConfig {
    #[serde(default)]
    pub algorithm: SigningAlgorithm,
    /// Hex-encoded private key bytes. Generated and printed once on first
    /// boot if absent; never logged after that.
    pub repo_signing_key: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        SigningConfig {
            algorithm: SigningAlgorithm::default(),
            repo_signing_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SequencerConfig {
    #[serde(default = "default_seq_window")]
    pub seq_window: i64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        SequencerConfig {
            seq_window: default_seq_window(),
        }
    }
}

fn default_seq_window() -> i64 {
    512
}

fn default_max_json_bytes() -> usize {
    65536
}

fn default_log_level() -> String {
    "info".to_string()
}

impl PdsConfig {
    pub fn load(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PDS_").split("__"))
            .extract()
    }
}
