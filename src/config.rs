//! Chain configuration.
//!
//! The configuration file is a JSON object mapping chain names to chain
//! definitions:
//!
//! ```json
//! {
//!   "mychain": {
//!     "plugins": ["count", "byte_limit"],
//!     "config": {
//!       "byte_limit": { "src2dst_limit": 4096, "dst2src_limit": -1 },
//!       "0": { "limit": 10, "limit_interval": 3600 }
//!     }
//!   }
//! }
//! ```
//!
//! Per-stage configuration resolves by stringified position first (useful
//! when the same plugin appears twice in a chain), then by plugin name.

use crate::error::ProxyError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Default location of the chain configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/qrexec-proxy/config.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Ordered list of plugin names making up the chain.
    pub plugins: Vec<String>,

    /// Per-stage configuration, keyed by stage index (stringified) or name.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

impl ChainConfig {
    /// Configuration for the stage at `index` named `name`, if any.
    pub fn stage_config(&self, index: usize, name: &str) -> Option<serde_json::Value> {
        self.config
            .get(&index.to_string())
            .or_else(|| self.config.get(name))
            .cloned()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ProxyConfig {
    chains: HashMap<String, ChainConfig>,
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self, ProxyError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
            .map_err(|e| ProxyError::Config(format!("invalid config file {}: {e}", path.display())))
    }

    fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Definition of the named chain, if configured.
    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ProxyConfig {
        ProxyConfig::parse(
            r#"{
                "filtered": {
                    "plugins": ["count", "byte_limit", "count"],
                    "config": {
                        "byte_limit": {"src2dst_limit": 3, "dst2src_limit": -1},
                        "count": {"limit": 5, "limit_interval": 60},
                        "2": {"limit": 1, "limit_interval": 10}
                    }
                },
                "open": { "plugins": [] }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn chains_parse_with_and_without_config() {
        let cfg = sample();
        assert_eq!(cfg.chain("filtered").unwrap().plugins.len(), 3);
        assert!(cfg.chain("open").unwrap().config.is_empty());
        assert!(cfg.chain("missing").is_none());
    }

    #[test]
    fn stage_config_prefers_index_over_name() {
        let cfg = sample();
        let chain = cfg.chain("filtered").unwrap();

        // position 0 has no index key, falls back to the name
        assert_eq!(
            chain.stage_config(0, "count"),
            Some(json!({"limit": 5, "limit_interval": 60}))
        );
        // position 2 has an index key which wins over the name
        assert_eq!(
            chain.stage_config(2, "count"),
            Some(json!({"limit": 1, "limit_interval": 10}))
        );
        assert_eq!(chain.stage_config(1, "pass"), None);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ProxyConfig::load(&path).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
