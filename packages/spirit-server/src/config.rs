//! Server configuration.

use std::path::PathBuf;

use spirit_core::memory::DEFAULT_DATASOURCE;

use crate::network::NetworkConfig;

/// Top-level configuration for [`SpiritServer`](crate::SpiritServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    /// Version segment every model route is mounted under (`/v1/...`).
    pub api_version: String,
    /// Directories scanned for `*.json` model declarations.
    pub model_dirs: Vec<PathBuf>,
    /// Datasource for models that do not name one.
    pub default_datasource: String,
    /// Export a data-only class for declarations without a registered one.
    pub export_plain_classes: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            api_version: "v1".to_string(),
            model_dirs: Vec::new(),
            default_datasource: DEFAULT_DATASOURCE.to_string(),
            export_plain_classes: false,
        }
    }
}

impl ServerConfig {
    /// Route prefix, e.g. `/v1`.
    #[must_use]
    pub fn api_prefix(&self) -> String {
        format!("/{}", self.api_version.trim_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.api_prefix(), "/v1");
        assert_eq!(config.default_datasource, "memory");
        assert!(config.model_dirs.is_empty());
        assert!(!config.export_plain_classes);
    }

    #[test]
    fn api_prefix_trims_slashes() {
        let config = ServerConfig {
            api_version: "/v2/".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.api_prefix(), "/v2");
    }
}
