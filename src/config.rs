//! Client configuration
//!
//! Read from `<config dir>/mogalink/client.toml`. Every field has a default,
//! so a missing file or a partial one still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::transport::SERVICE_DESCRIPTOR;

const CONFIG_DIR: &str = "mogalink";
const CONFIG_FILE: &str = "client.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Interface name providers are looked up by
    pub service_descriptor: String,

    /// Controller whose events are forwarded to the listener. Events from
    /// any other id are dropped.
    pub controller_id: i32,

    /// Upper bound for a single remote call
    pub call_timeout_ms: u64,

    /// Probe the provider for the revised call set once per bind
    pub negotiate_version: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_descriptor: SERVICE_DESCRIPTOR.to_string(),
            controller_id: 1,
            call_timeout_ms: 3000,
            negotiate_version: true,
        }
    }
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading client config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, path)
    }

    /// Loads the default config file, falling back to defaults when it is
    /// absent or unreadable
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            warn!("No config directory on this platform, using defaults");
            return Self::default();
        };

        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded client config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config =
            ClientConfig::from_toml("call_timeout_ms = 250\n", Path::new("client.toml")).unwrap();
        assert_eq!(config.call_timeout(), Duration::from_millis(250));
        assert_eq!(config.controller_id, 1);
        assert_eq!(config.service_descriptor, SERVICE_DESCRIPTOR);
        assert!(config.negotiate_version);
    }

    #[test]
    fn serialized_defaults_parse_back() {
        let text = ClientConfig::default().to_toml().unwrap();
        let parsed = ClientConfig::from_toml(&text, Path::new("client.toml")).unwrap();
        assert_eq!(parsed, ClientConfig::default());
    }

    #[test]
    fn bad_type_is_a_parse_error() {
        let err = ClientConfig::from_toml("controller_id = \"one\"", Path::new("c.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ClientConfig::load(Path::new("/nonexistent/mogalink/client.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
