use std::path::Path;

use serde::Deserialize;

/// Engine configuration, loaded from TOML. Every section and field has a
/// default so an empty file (or no file) yields a working engine.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub turns: TurnsConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TurnsConfig {
    /// Maximum number of mention-triggered follow-up turns per chain.
    #[serde(default = "default_chain_depth_limit")]
    pub chain_depth_limit: u32,
}

impl Default for TurnsConfig {
    fn default() -> Self {
        Self {
            chain_depth_limit: default_chain_depth_limit(),
        }
    }
}

fn default_chain_depth_limit() -> u32 {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    /// Bounded buffer per event subscriber; overflow evicts the subscriber.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_subscriber_buffer() -> usize {
    crate::hub::DEFAULT_SUBSCRIBER_BUFFER
}

impl EngineConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
