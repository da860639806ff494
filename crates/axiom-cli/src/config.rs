use axiom_chat::{DecoderConfig, EndpointConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `endpoint.api_key`.
pub const API_KEY_ENV: &str = "AXIOM_API_KEY";

/// Contents of `axiom.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct AxiomConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl AxiomConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads the config file and applies the environment override.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_api_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    fn apply_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.endpoint.api_key = key;
        }
    }

    /// Directory holding the persisted session document.
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }
}
