//! CLI configuration.
//!
//! Settings live in `~/.config/webrpc/config.toml` by default:
//!
//! ```toml
//! debug = false
//!
//! [server]
//! socket_path = "/run/user/1000/webrpc.sock"
//! timeout = 5
//! max_connections = 100
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Configuration for the webrpc CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Debug mode.
    pub debug: bool,

    /// Socket and connection settings.
    pub server: ServerSettings,
}

/// Socket and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Path to the peer socket.
    pub socket_path: Option<PathBuf>,

    /// Request timeout in seconds; 0 waits forever.
    pub timeout: u64,

    /// Maximum concurrent connections when serving.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            timeout: 5,
            max_connections: 100,
        }
    }
}

impl ServerSettings {
    /// The socket path, falling back to the engine default.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(webrpc_peer::default_socket_path)
    }

    /// The request timeout; `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

impl CliConfig {
    /// Loads configuration from the default path, or defaults if absent.
    pub fn load() -> CliResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| CliError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("webrpc")
            .join("config.toml")
    }

    /// Applies command-line overrides.
    pub fn with_overrides(
        mut self,
        debug: bool,
        socket_path: Option<PathBuf>,
        timeout: Option<u64>,
    ) -> Self {
        self.debug |= debug;
        if socket_path.is_some() {
            self.server.socket_path = socket_path;
        }
        if let Some(timeout) = timeout {
            self.server.timeout = timeout;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_without_file() {
        let config = CliConfig::default();
        assert!(!config.debug);
        assert_eq!(config.server.timeout, 5);
        assert_eq!(config.server.max_connections, 100);
        assert_eq!(
            config.server.request_timeout(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn loads_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "debug = true\n[server]\nsocket_path = \"/tmp/x.sock\"\ntimeout = 0\n",
        )
        .unwrap();

        let config = CliConfig::load_from(&path).unwrap();
        assert!(config.debug);
        assert_eq!(config.server.socket_path(), PathBuf::from("/tmp/x.sock"));
        assert_eq!(config.server.request_timeout(), None);
        assert_eq!(config.server.max_connections, 100);
    }

    #[test]
    fn rejects_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\n").unwrap();

        assert!(matches!(CliConfig::load_from(&path), Err(CliError::Config(_))));
    }

    #[test]
    fn overrides_win() {
        let config = CliConfig::default().with_overrides(
            true,
            Some(PathBuf::from("/tmp/o.sock")),
            Some(9),
        );
        assert!(config.debug);
        assert_eq!(config.server.socket_path(), PathBuf::from("/tmp/o.sock"));
        assert_eq!(config.server.timeout, 9);
    }
}
