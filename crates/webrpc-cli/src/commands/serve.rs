//! `serve` command: a demo peer on the Unix socket.
//!
//! Exposes:
//! - `echo(x)`: returns its first argument
//! - `hello(name?)`: a greeting
//! - `time()`: seconds and milliseconds since the Unix epoch
//! - `pipe.echo`: pipe constructor writing back every chunk it reads

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};
use webrpc_peer::{Callable, PeerConfig, Registry, RemoteError, ServerConfig, SocketServer, Value};

use crate::config::CliConfig;
use crate::error::{CliError, CliResult};

/// Builds the registry served by `webrpc serve`.
pub fn demo_registry() -> CliResult<Arc<Registry>> {
    let registry = Arc::new(Registry::new());
    let provide = |path: &str, callable: Callable| {
        registry
            .provide(path, callable)
            .map_err(|e| CliError::Config(format!("cannot register {path}: {e}")))
    };

    provide(
        "echo",
        Callable::plain(|_, args: Vec<Value>| async move {
            Ok(args.into_iter().next().unwrap_or_default())
        }),
    )?;
    provide(
        "hello",
        Callable::plain(|_, args: Vec<Value>| async move {
            let name = args.first().and_then(Value::as_str).unwrap_or("world");
            Ok(Value::from(format!("Hello, {name}!")))
        }),
    )?;
    provide(
        "time",
        Callable::plain(|_, _| async {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| RemoteError::from_error(&e))?;
            let mut time = Value::object();
            time.insert("unix", Value::from(now.as_secs()))?;
            time.insert("millis", Value::from(now.as_millis() as u64))?;
            Ok::<_, RemoteError>(time)
        }),
    )?;
    provide(
        "pipe.echo",
        Callable::pipe(|_, pipe, _| async move {
            let (mut reader, writer) = pipe.split();
            while let Some(chunk) = reader.recv().await? {
                debug!(id = writer.id(), "Echoing chunk");
                writer.write(chunk).map_err(|e| RemoteError::from_error(&e))?;
            }
            Ok::<_, RemoteError>(Value::Null)
        }),
    )?;

    Ok(registry)
}

/// Serves the demo registry until SIGINT or SIGTERM.
pub async fn run(config: &CliConfig, max_connections: Option<usize>) -> CliResult<()> {
    let socket_path = config.server.socket_path();
    let server_config = ServerConfig::new(&socket_path)
        .with_max_connections(max_connections.unwrap_or(config.server.max_connections))
        .with_peer_config(
            PeerConfig::default().with_request_timeout(config.server.request_timeout()),
        );
    let server = SocketServer::new(server_config).await?;
    info!(path = %socket_path.display(), "Serving demo functions");

    server
        .run_until_shutdown(demo_registry()?, shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            return;
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use webrpc_peer::{Peer, memory};

    fn connect() -> Peer {
        let ((a_source, a_sink), (b_source, b_sink)) = memory::pair();
        let server = Peer::with_registry(PeerConfig::default(), demo_registry().unwrap());
        server.attach(a_source, a_sink);
        let client = Peer::with_registry(PeerConfig::default(), Arc::new(Registry::new()));
        client.attach(b_source, b_sink);
        client
    }

    #[tokio::test]
    async fn demo_functions() {
        let client = connect();

        assert_eq!(
            client.call("echo", vec![json!({"a": 1})]).await.unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            client.call("hello", vec![json!("zlh")]).await.unwrap(),
            json!("Hello, zlh!")
        );
        assert_eq!(
            client.call("hello", Vec::new()).await.unwrap(),
            json!("Hello, world!")
        );

        let time = client.call("time", Vec::new()).await.unwrap();
        assert!(time["unix"].as_u64().unwrap() > 0);
        assert!(time["millis"].as_u64().unwrap() >= time["unix"].as_u64().unwrap());
    }

    #[tokio::test]
    async fn demo_echo_pipe() {
        let client = connect();
        let mut pipe = client.pipe("pipe.echo", Vec::new()).unwrap();

        pipe.write("one").unwrap();
        pipe.write(json!([2])).unwrap();
        assert_eq!(pipe.recv().await.unwrap(), Some(json!("one")));
        assert_eq!(pipe.recv().await.unwrap(), Some(json!([2])));
        pipe.close();
    }
}
