//! Configuration types for the protoo client.
//! Parsed from ~/.protoo/config.toml.

use protoo_connection::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_url")]
    pub url: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:4443/".into()
}

impl ClientConfig {
    /// Load config from file, or fall back to defaults if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
