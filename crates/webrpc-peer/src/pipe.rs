//! Duplex pipes multiplexed over `pipe` frames.
//!
//! Both ends of a pipe share one correlation id. The read side is fed by
//! inbound data frames for that id; writing sends a data frame. Either end
//! may close: the closing side sends exactly one `close` frame and ends its
//! reader, the other side ends its reader and marks its writer closed
//! without answering.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value as Json;
use tokio::sync::mpsc;
use webrpc_core::RemoteError;
use webrpc_protocol::Message;

use crate::error::{PeerError, PeerResult};
use crate::peer::Peer;

/// Event delivered to a pipe's read side.
#[derive(Debug)]
pub(crate) enum PipeEvent {
    Data(Json),
    Closed,
    Failed(RemoteError),
}

/// Engine-side handle feeding a pipe's read side.
#[derive(Debug, Clone)]
pub(crate) struct PipeSink {
    tx: mpsc::UnboundedSender<PipeEvent>,
    closed: Arc<AtomicBool>,
}

impl PipeSink {
    #[cfg(test)]
    pub(crate) fn for_tests(tx: mpsc::UnboundedSender<PipeEvent>) -> Self {
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn deliver(&self, data: Json) {
        let _ = self.tx.send(PipeEvent::Data(data));
    }

    /// Ends the pipe gracefully.
    pub(crate) fn end(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(PipeEvent::Closed);
    }

    /// Ends the pipe with an error from the other side.
    pub(crate) fn fail(&self, error: RemoteError) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(PipeEvent::Failed(error));
    }
}

/// Both ends of an open pipe.
#[derive(Debug)]
pub struct Pipe {
    reader: PipeReader,
    writer: PipeWriter,
}

impl Pipe {
    pub(crate) fn open(peer: Peer, id: String) -> (Self, PipeSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let pipe = Self {
            reader: PipeReader {
                id: id.clone(),
                rx,
                finished: false,
            },
            writer: PipeWriter {
                id,
                peer,
                closed: closed.clone(),
            },
        };
        (pipe, PipeSink { tx, closed })
    }

    /// The correlation id shared by both ends.
    pub fn id(&self) -> &str {
        &self.writer.id
    }

    /// Separates the read and write sides.
    pub fn split(self) -> (PipeReader, PipeWriter) {
        (self.reader, self.writer)
    }

    /// See [`PipeReader::recv`].
    pub async fn recv(&mut self) -> Result<Option<Json>, RemoteError> {
        self.reader.recv().await
    }

    /// See [`PipeWriter::write`].
    pub fn write(&self, data: impl Into<Json>) -> PeerResult<()> {
        self.writer.write(data)
    }

    /// See [`PipeWriter::close`].
    pub fn close(&self) {
        self.writer.close()
    }
}

/// Read side of a pipe.
#[derive(Debug)]
pub struct PipeReader {
    id: String,
    rx: mpsc::UnboundedReceiver<PipeEvent>,
    finished: bool,
}

impl PipeReader {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the next chunk.
    ///
    /// Returns `Ok(None)` once the pipe is closed by either side or the
    /// connection goes away, and `Err` once if the other side failed it.
    pub async fn recv(&mut self) -> Result<Option<Json>, RemoteError> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(PipeEvent::Data(data)) => Ok(Some(data)),
            Some(PipeEvent::Failed(error)) => {
                self.finished = true;
                Err(error)
            }
            Some(PipeEvent::Closed) | None => {
                self.finished = true;
                Ok(None)
            }
        }
    }
}

/// Write side of a pipe. Cloning shares the same pipe.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    id: String,
    peer: Peer,
    closed: Arc<AtomicBool>,
}

impl PipeWriter {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends one chunk. Fails once the pipe is closed.
    pub fn write(&self, data: impl Into<Json>) -> PeerResult<()> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        self.peer.send(&Message::pipe_data(&self.id, data.into()))
    }

    /// Closes both ends. Does nothing if the pipe is already closed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.peer.close_pipe(&self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;
    use crate::env::Registry;
    use serde_json::json;

    fn pipe() -> (Pipe, PipeSink) {
        let peer = Peer::with_registry(PeerConfig::default(), Arc::new(Registry::new()));
        Pipe::open(peer, "p1".to_string())
    }

    #[tokio::test]
    async fn delivers_in_order_then_ends() {
        let (mut pipe, sink) = pipe();
        sink.deliver(json!("a"));
        sink.deliver(json!("b"));
        sink.end();

        assert_eq!(pipe.recv().await.unwrap(), Some(json!("a")));
        assert_eq!(pipe.recv().await.unwrap(), Some(json!("b")));
        assert_eq!(pipe.recv().await.unwrap(), None);
        assert_eq!(pipe.recv().await.unwrap(), None);
        assert!(pipe.write("late").is_err());
    }

    #[tokio::test]
    async fn failure_is_reported_once() {
        let (pipe, sink) = pipe();
        let (mut reader, writer) = pipe.split();
        sink.fail(RemoteError::from_parts("Error", "broken", Vec::new()));

        assert_eq!(reader.recv().await.unwrap_err().message, "broken");
        assert_eq!(reader.recv().await.unwrap(), None);
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn reader_ends_when_sink_dropped() {
        let (mut pipe, sink) = pipe();
        drop(sink);
        assert_eq!(pipe.recv().await.unwrap(), None);
    }
}
