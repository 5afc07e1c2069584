//! Subcommand implementations.

pub mod call;
pub mod config;
pub mod echo;
pub mod serve;

use serde_json::Value as Json;
use tokio::task::JoinHandle;
use webrpc_peer::{Peer, PeerConfig, SocketClient};

use crate::config::CliConfig;
use crate::error::CliResult;

/// Parses a command-line value as JSON, taking it as a plain string when it
/// is not valid JSON.
pub fn parse_value(raw: &str) -> Json {
    serde_json::from_str(raw).unwrap_or_else(|_| Json::String(raw.to_string()))
}

/// A connection held for the length of one command.
pub struct Session {
    pub peer: Peer,
    reader: JoinHandle<()>,
}

impl Session {
    /// Closes the connection once every queued frame is written.
    pub async fn finish(self) {
        self.peer.close();
        let _ = self.reader.await;
    }
}

/// Connects to the configured socket.
pub async fn connect(config: &CliConfig) -> CliResult<Session> {
    let peer_config = PeerConfig::default().with_request_timeout(config.server.request_timeout());
    let (peer, reader) = SocketClient::new(config.server.socket_path(), peer_config)
        .connect_attached()
        .await?;
    Ok(Session { peer, reader })
}

/// Prints a JSON value, strings without quotes.
pub fn print_value(value: &Json) -> CliResult<()> {
    match value {
        Json::String(text) => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_parse_as_json_or_text() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value(r#"{"a": [1]}"#), json!({"a": [1]}));
        assert_eq!(parse_value(r#""quoted""#), json!("quoted"));
        assert_eq!(parse_value("hello world"), json!("hello world"));
        assert_eq!(parse_value("{broken"), json!("{broken"));
    }
}
