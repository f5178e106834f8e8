use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Root of the local store: objects, catalog and outbox live here.
    pub data_dir: PathBuf,
    /// Base URL of the sync server.
    pub server_url: String,
    /// Maximum accepted blob size in bytes.
    pub max_blob_size: u64,
    /// Upper bound on changes submitted per flush.
    pub flush_batch_size: usize,
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let default_data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("carrel");

        let s = Config::builder()
            .set_default("data_dir", default_data_dir.to_string_lossy().to_string())?
            .set_default("server_url", "http://127.0.0.1:3000")?
            .set_default("max_blob_size", 128 * 1024 * 1024i64)? // 128 MB
            .set_default("flush_batch_size", 64)?
            // Load from config/client.toml
            .add_source(File::with_name("config/client").required(false))
            // Override from environment (e.g., CARREL__SERVER_URL)
            .add_source(Environment::with_prefix("CARREL").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
