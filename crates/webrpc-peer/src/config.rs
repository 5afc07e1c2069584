//! Peer, server and reconnect configuration.

use std::path::PathBuf;
use std::time::Duration;

use webrpc_protocol::MAX_MESSAGE_SIZE;

/// Per-connection engine configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// How long `call`, `query_var` and chains wait for a response.
    /// `None` waits forever.
    pub request_timeout: Option<Duration>,

    /// Treat inbound binary frames as a protocol error instead of ignoring them.
    pub reject_binary_frames: bool,

    /// Maximum frame size on byte-stream transports.
    pub max_message_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            reject_binary_frames: false,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl PeerConfig {
    /// Builder: set request timeout.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder: set binary frame handling.
    pub fn with_reject_binary_frames(mut self, reject: bool) -> Self {
        self.reject_binary_frames = reject;
        self
    }

    /// Builder: set max message size.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

/// Unix socket server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the Unix socket.
    pub socket_path: PathBuf,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Whether to remove stale socket on startup.
    pub cleanup_stale_socket: bool,

    /// Engine configuration for each accepted connection.
    pub peer: PeerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_connections: 100,
            cleanup_stale_socket: true,
            peer: PeerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Creates a new server configuration with the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: set cleanup stale socket.
    pub fn with_cleanup_stale_socket(mut self, cleanup: bool) -> Self {
        self.cleanup_stale_socket = cleanup;
        self
    }

    /// Builder: set per-connection engine configuration.
    pub fn with_peer_config(mut self, peer: PeerConfig) -> Self {
        self.peer = peer;
        self
    }
}

/// Reopen policy for a client whose transport drops.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Maximum delay between attempts.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before the next attempt after consecutive failures.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_backoff.as_secs_f64();
        let multiplier = self
            .backoff_multiplier
            .powi(consecutive_failures.min(64) as i32 - 1);
        let delay = base * multiplier;
        let max = self.max_backoff.as_secs_f64();

        Duration::from_secs_f64(delay.min(max))
    }
}

/// Returns the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/webrpc.sock` if available,
/// otherwise falls back to `/tmp/webrpc-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("webrpc.sock")
    } else {
        #[cfg(unix)]
        let uid = unsafe { libc::getuid() };
        #[cfg(not(unix))]
        let uid = 0;
        PathBuf::from(format!("/tmp/webrpc-{}.sock", uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_peer_config() {
        let config = PeerConfig::default();
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert!(!config.reject_binary_frames);
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn custom_server_config() {
        let config = ServerConfig::new("/custom/path.sock")
            .with_max_connections(50)
            .with_cleanup_stale_socket(false)
            .with_peer_config(PeerConfig::default().with_request_timeout(None));

        assert_eq!(config.socket_path, PathBuf::from("/custom/path.sock"));
        assert_eq!(config.max_connections, 50);
        assert!(!config.cleanup_stale_socket);
        assert!(config.peer.request_timeout.is_none());
    }

    #[test]
    fn default_socket_path_format() {
        let path = default_socket_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("webrpc"));
        assert!(path_str.ends_with(".sock"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::ZERO);
        assert_eq!(config.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(20), Duration::from_secs(30));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(30));
    }
}
