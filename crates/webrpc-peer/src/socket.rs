//! Unix socket transport.
//!
//! Each text frame travels with a 4-byte big-endian length prefix. A close
//! shuts down the write half; the other side sees end of stream.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use webrpc_protocol::{FrameReader, FrameWriter};

use crate::config::{PeerConfig, ReconnectConfig, ServerConfig};
use crate::env::Registry;
use crate::error::{PeerError, PeerResult};
use crate::peer::Peer;
use crate::transport::{Frame, FrameSink, FrameSource};

/// Read half of a Unix socket connection.
pub struct UnixSource {
    reader: FrameReader<OwnedReadHalf>,
}

/// Write half of a Unix socket connection.
pub struct UnixSink {
    writer: FrameWriter<OwnedWriteHalf>,
}

/// Splits a connected stream into a frame source and sink.
pub fn split(stream: UnixStream, max_message_size: usize) -> (UnixSource, UnixSink) {
    let (read, write) = stream.into_split();
    (
        UnixSource {
            reader: FrameReader::with_max_size(read, max_message_size),
        },
        UnixSink {
            writer: FrameWriter::with_max_size(write, max_message_size),
        },
    )
}

impl FrameSource for UnixSource {
    async fn recv(&mut self) -> Option<Frame> {
        match self.reader.read_frame().await {
            Ok(frame) => frame.map(Frame::Text),
            Err(e) => {
                warn!(error = %e, "Failed to read frame");
                None
            }
        }
    }
}

impl FrameSink for UnixSink {
    async fn send(&mut self, text: &str) -> PeerResult<()> {
        Ok(self.writer.write_frame(text).await?)
    }

    async fn close(&mut self, code: u16, reason: &str) -> PeerResult<()> {
        debug!(code, reason, "Shutting down socket");
        Ok(self.writer.shutdown().await?)
    }
}

/// Unix socket server; every accepted connection gets its own [`Peer`].
pub struct SocketServer {
    config: ServerConfig,
    listener: UnixListener,
    connection_semaphore: Arc<Semaphore>,
}

impl SocketServer {
    /// Binds the socket path from the configuration.
    ///
    /// With `cleanup_stale_socket`, an existing socket file nobody listens
    /// on is removed first.
    pub async fn new(config: ServerConfig) -> PeerResult<Self> {
        let socket_path = &config.socket_path;

        if let Some(parent) = socket_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            return Err(PeerError::socket_path_invalid(
                parent.to_string_lossy().to_string(),
            ));
        }

        if config.cleanup_stale_socket && socket_path.exists() {
            match UnixStream::connect(socket_path).await {
                Ok(_) => {
                    return Err(PeerError::socket_in_use(
                        socket_path.to_string_lossy().to_string(),
                    ));
                }
                Err(_) => {
                    info!(path = %socket_path.display(), "Removing stale socket");
                    std::fs::remove_file(socket_path)?;
                }
            }
        } else if socket_path.exists() {
            return Err(PeerError::socket_in_use(
                socket_path.to_string_lossy().to_string(),
            ));
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "Socket server listening");

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            config,
            listener,
            connection_semaphore,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Accepts one connection and attaches a peer over `registry` to it.
    ///
    /// The connection slot is released when the peer's transport ends.
    pub async fn accept(&self, registry: Arc<Registry>) -> PeerResult<Peer> {
        let permit = self
            .connection_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PeerError::Closed)?;

        let (stream, _addr) = self.listener.accept().await?;
        debug!("Accepted new connection");

        let peer = Peer::with_registry(self.config.peer.clone(), registry);
        let (source, sink) = split(stream, self.config.peer.max_message_size);
        let reader = peer.attach(source, sink);
        tokio::spawn(async move {
            let _ = reader.await;
            drop(permit);
        });
        Ok(peer)
    }

    /// Accepts connections until an unrecoverable error.
    pub async fn run(&self, registry: Arc<Registry>) -> PeerResult<()> {
        loop {
            if let Err(e) = self.accept(registry.clone()).await {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }

    /// Accepts connections until `shutdown` completes.
    pub async fn run_until_shutdown<S>(&self, registry: Arc<Registry>, shutdown: S) -> PeerResult<()>
    where
        S: std::future::Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(registry) => result,
            _ = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!(
                    path = %self.config.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            } else {
                debug!(path = %self.config.socket_path.display(), "Removed socket file");
            }
        }
    }
}

/// Connects peers to a Unix socket server.
#[derive(Debug, Clone)]
pub struct SocketClient {
    socket_path: PathBuf,
    config: PeerConfig,
    registry: Arc<Registry>,
    connect_timeout: Duration,
}

impl SocketClient {
    /// Creates a client over the process-wide registry.
    pub fn new(socket_path: impl Into<PathBuf>, config: PeerConfig) -> Self {
        Self {
            socket_path: socket_path.into(),
            config,
            registry: Registry::global(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Builder: serve this registry to the server side.
    pub fn with_registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = registry;
        self
    }

    /// Builder: set connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Checks if the server socket exists.
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    async fn open_stream(&self) -> PeerResult<UnixStream> {
        debug!(socket = %self.socket_path.display(), "Connecting to server");
        tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| PeerError::timeout(format!("connect to {}", self.socket_path.display())))?
            .map_err(PeerError::from)
    }

    fn split(&self, stream: UnixStream) -> (UnixSource, UnixSink) {
        split(stream, self.config.max_message_size)
    }

    /// Connects once. The peer closes when the connection drops.
    pub async fn connect(&self) -> PeerResult<Peer> {
        let (peer, _reader) = self.connect_attached().await?;
        Ok(peer)
    }

    /// Like [`connect`](Self::connect), also returning the read loop
    /// handle. It completes once the connection is closed and every queued
    /// frame was flushed.
    pub async fn connect_attached(&self) -> PeerResult<(Peer, JoinHandle<()>)> {
        let stream = self.open_stream().await?;
        let peer = Peer::with_registry(self.config.clone(), self.registry.clone());
        let (source, sink) = self.split(stream);
        let reader = peer.attach(source, sink);
        Ok((peer, reader))
    }

    /// Connects and keeps reconnecting with backoff whenever the
    /// connection drops, until the peer is closed.
    ///
    /// Frames sent while disconnected are queued and flushed to the next
    /// connection. Pending requests are kept and subject to the request
    /// timeout.
    pub async fn connect_with_reconnect(&self, reconnect: ReconnectConfig) -> PeerResult<Peer> {
        let stream = self.open_stream().await?;
        let peer = Peer::with_registry(self.config.clone(), self.registry.clone());
        let (source, sink) = self.split(stream);
        let reader = peer.rebind(source, sink);

        tokio::spawn(self.clone().supervise(peer.clone(), reader, reconnect));
        Ok(peer)
    }

    async fn supervise(self, peer: Peer, mut reader: JoinHandle<()>, reconnect: ReconnectConfig) {
        loop {
            let _ = reader.await;
            if peer.is_closed() {
                return;
            }

            let mut failures = 0u32;
            reader = loop {
                failures += 1;
                let delay = reconnect.backoff_delay(failures);
                warn!(
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "Connection lost, reconnecting"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = peer.closed() => return,
                }

                match self.open_stream().await {
                    Ok(stream) => {
                        let (source, sink) = self.split(stream);
                        break peer.rebind(source, sink);
                    }
                    Err(e) => debug!(error = %e, "Reconnect attempt failed"),
                }
            };
            info!(attempts = failures, "Reconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn socket_server_creates_socket_file() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let server = SocketServer::new(ServerConfig::new(&socket_path)).await.unwrap();

        assert!(socket_path.exists());
        drop(server);
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn socket_server_rejects_duplicate() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let config = ServerConfig::new(&socket_path).with_cleanup_stale_socket(false);
        let _server = SocketServer::new(config.clone()).await.unwrap();

        let result = SocketServer::new(config).await;
        assert!(matches!(result, Err(PeerError::SocketInUse { .. })));
    }

    #[tokio::test]
    async fn socket_server_rejects_live_socket_even_with_cleanup() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let _server = SocketServer::new(ServerConfig::new(&socket_path)).await.unwrap();
        let result = SocketServer::new(ServerConfig::new(&socket_path)).await;
        assert!(matches!(result, Err(PeerError::SocketInUse { .. })));
    }

    #[tokio::test]
    async fn socket_server_cleans_stale_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let config = ServerConfig::new(&socket_path).with_cleanup_stale_socket(true);
        let server = SocketServer::new(config).await.unwrap();

        assert!(socket_path.exists());
        drop(server);
    }

    #[tokio::test]
    async fn socket_server_checks_parent_dir() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("missing").join("test.sock");

        let result = SocketServer::new(ServerConfig::new(&socket_path)).await;
        assert!(matches!(result, Err(PeerError::SocketPathInvalid { .. })));
    }

    #[tokio::test]
    async fn client_without_server_fails() {
        let dir = tempdir().unwrap();
        let client = SocketClient::new(dir.path().join("none.sock"), PeerConfig::default());

        assert!(!client.socket_exists());
        assert!(matches!(client.connect().await, Err(PeerError::Io(_))));
    }
}
