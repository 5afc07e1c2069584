//! Engines talking over a Unix socket.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;
use tokio::sync::mpsc;
use webrpc_peer::{
    Callable, Peer, PeerConfig, ReconnectConfig, Registry, RemoteError, ServerConfig,
    SocketClient, SocketServer, Value,
};

fn registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry
        .provide(
            "echo",
            Callable::plain(|_, args: Vec<Value>| async move {
                Ok(args.into_iter().next().unwrap_or_default())
            }),
        )
        .unwrap();
    registry
        .provide(
            "upper",
            Callable::pipe(|_, pipe, _| async move {
                let (mut reader, writer) = pipe.split();
                while let Ok(Some(chunk)) = reader.recv().await {
                    let text = chunk.as_str().unwrap_or_default().to_uppercase();
                    writer.write(text).map_err(|e| RemoteError::from_error(&e))?;
                }
                Ok::<_, RemoteError>(Value::Null)
            }),
        )
        .unwrap();
    registry
}

/// Starts accepting on `server`, reporting every accepted peer.
fn serve(server: SocketServer, registry: Arc<Registry>) -> mpsc::UnboundedReceiver<Peer> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok(peer) = server.accept(registry.clone()).await {
            if tx.send(peer).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::test]
async fn call_and_pipe_over_socket() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("webrpc.sock");
    let server = SocketServer::new(ServerConfig::new(&socket_path)).await.unwrap();
    let mut accepted = serve(server, registry());

    let client = SocketClient::new(&socket_path, PeerConfig::default())
        .with_registry(Arc::new(Registry::new()))
        .connect()
        .await
        .unwrap();
    let server_peer = accepted.recv().await.unwrap();

    assert_eq!(
        client.call("echo", vec![json!({"deep": [1, 2]})]).await.unwrap(),
        json!({"deep": [1, 2]})
    );

    let mut pipe = client.pipe("upper", Vec::new()).unwrap();
    pipe.write("abc").unwrap();
    pipe.write("def").unwrap();
    assert_eq!(pipe.recv().await.unwrap(), Some(json!("ABC")));
    assert_eq!(pipe.recv().await.unwrap(), Some(json!("DEF")));
    pipe.close();

    client.close();
    tokio::time::timeout(Duration::from_secs(2), server_peer.closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn server_calls_back_into_client() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("webrpc.sock");
    let server = SocketServer::new(ServerConfig::new(&socket_path)).await.unwrap();
    let mut accepted = serve(server, registry());

    let client_registry = Arc::new(Registry::new());
    client_registry.set("client.version", "1.2.3").unwrap();
    let _client = SocketClient::new(&socket_path, PeerConfig::default())
        .with_registry(client_registry)
        .connect()
        .await
        .unwrap();
    let server_peer = accepted.recv().await.unwrap();

    assert_eq!(
        server_peer.query_var("client.version", None, None).await.unwrap(),
        json!("1.2.3")
    );
}

#[tokio::test]
async fn client_reconnects_after_connection_drop() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("webrpc.sock");
    let server = SocketServer::new(ServerConfig::new(&socket_path)).await.unwrap();
    let mut accepted = serve(server, registry());

    let reconnect = ReconnectConfig::default().with_backoff(
        Duration::from_millis(10),
        Duration::from_millis(50),
        2.0,
    );
    let client = SocketClient::new(&socket_path, PeerConfig::default())
        .with_registry(Arc::new(Registry::new()))
        .connect_with_reconnect(reconnect)
        .await
        .unwrap();
    let first = accepted.recv().await.unwrap();
    assert_eq!(client.call("echo", vec![json!(1)]).await.unwrap(), json!(1));

    first.close();
    let second = tokio::time::timeout(Duration::from_secs(2), accepted.recv())
        .await
        .unwrap()
        .unwrap();

    assert!(!client.is_closed());
    assert_eq!(client.call("echo", vec![json!(2)]).await.unwrap(), json!(2));

    client.close();
    tokio::time::timeout(Duration::from_secs(2), second.closed())
        .await
        .unwrap();
}
