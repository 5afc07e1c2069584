//! One endpoint of a webrpc connection.
//!
//! A [`Peer`] owns the per-connection state: the local scope, the pending
//! request table and the outbound queue. Frames sent before a transport is
//! attached, or while it is being replaced, wait in the queue and are
//! flushed in order once a transport is bound.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::Value as Json;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrpc_protocol::{
    CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, CheckKind, Message, ProtocolError, encode_message,
};

use crate::config::PeerConfig;
use crate::env::{Environment, Registry};
use crate::error::{PeerError, PeerResult};
use crate::pipe::Pipe;
use crate::prepared::ChainBuilder;
use crate::requests::{Handler, Reply, RequestTable};
use crate::transport::{FrameSink, FrameSource};

#[derive(Debug)]
pub(crate) enum Outgoing {
    Frame(String),
    Close { code: u16, reason: String },
}

struct PeerInner {
    config: PeerConfig,
    env: Environment,
    requests: RequestTable,
    outbound: mpsc::UnboundedSender<Outgoing>,
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Outgoing>>,
    /// Frames a failed transport could not deliver; sent first by the next one.
    backlog: Mutex<VecDeque<Outgoing>>,
    closed: watch::Sender<bool>,
}

/// A connection endpoint. Cloning yields another handle to the same endpoint.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("pending", &self.inner.requests.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Peer {
    /// Creates a peer over the process-wide [`Registry::global`].
    pub fn new(config: PeerConfig) -> Self {
        Self::with_registry(config, Registry::global())
    }

    /// Creates a peer over a specific registry.
    pub fn with_registry(config: PeerConfig, registry: Arc<Registry>) -> Self {
        let (outbound, queue) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(PeerInner {
                config,
                env: Environment::new(registry),
                requests: RequestTable::default(),
                outbound,
                queue: tokio::sync::Mutex::new(queue),
                backlog: Mutex::new(VecDeque::new()),
                closed,
            }),
        }
    }

    /// The connection's environment (local scope over the registry).
    pub fn env(&self) -> &Environment {
        &self.inner.env
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    /// Number of requests and pipes awaiting frames from the other side.
    pub fn pending(&self) -> usize {
        self.inner.requests.len()
    }

    pub(crate) fn requests(&self) -> &RequestTable {
        &self.inner.requests
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the connection is torn down.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Binds a transport. When it ends, the connection is torn down.
    ///
    /// Returns the handle of the read loop.
    pub fn attach<S: FrameSource, K: FrameSink>(&self, source: S, sink: K) -> JoinHandle<()> {
        self.bind(source, sink, true)
    }

    /// Binds a replacement transport. When it ends the connection stays
    /// open, waiting for the next one; pending requests are kept as is.
    pub fn rebind<S: FrameSource, K: FrameSink>(&self, source: S, sink: K) -> JoinHandle<()> {
        self.bind(source, sink, false)
    }

    fn bind<S: FrameSource, K: FrameSink>(
        &self,
        mut source: S,
        sink: K,
        teardown_on_drop: bool,
    ) -> JoinHandle<()> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let writer = tokio::spawn(self.clone().write_loop(sink, stop_rx));
        let peer = self.clone();

        tokio::spawn(async move {
            info!("Transport attached");
            loop {
                let frame = tokio::select! {
                    frame = source.recv() => frame,
                    _ = peer.closed() => None,
                };
                let Some(frame) = frame else {
                    break;
                };

                if let Err(e) = peer.handle_frame(frame) {
                    let reason = match &e {
                        PeerError::Protocol(ProtocolError::BinaryFrame { .. }) => e.to_string(),
                        _ => "Bad JSON data".to_string(),
                    };
                    warn!(error = %e, "Closing connection on protocol error");
                    peer.close_with(CLOSE_PROTOCOL_ERROR, &reason);
                    break;
                }
            }

            let _ = stop_tx.send(());
            let _ = writer.await;
            info!("Transport detached");
            if teardown_on_drop {
                peer.teardown();
            }
        })
    }

    async fn write_loop<K: FrameSink>(self, mut sink: K, mut stop: oneshot::Receiver<()>) {
        let mut queue = self.inner.queue.lock().await;
        loop {
            let item = match self.pop_backlog() {
                Some(item) => item,
                None => tokio::select! {
                    biased;
                    item = queue.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                    _ = &mut stop => break,
                },
            };

            match item {
                Outgoing::Frame(text) => {
                    if let Err(e) = sink.send(&text).await {
                        warn!(error = %e, "Transport send failed; keeping frame for the next transport");
                        self.push_backlog(Outgoing::Frame(text));
                        break;
                    }
                }
                Outgoing::Close { code, reason } => {
                    if let Err(e) = sink.close(code, &reason).await {
                        debug!(error = %e, "Transport close failed");
                    }
                    break;
                }
            }
        }
    }

    fn pop_backlog(&self) -> Option<Outgoing> {
        self.inner
            .backlog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    fn push_backlog(&self, item: Outgoing) {
        self.inner
            .backlog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_front(item);
    }

    fn enqueue(&self, item: Outgoing) -> PeerResult<()> {
        self.inner.outbound.send(item).map_err(|_| PeerError::Closed)
    }

    /// Queues one message for the transport.
    ///
    /// A pending one-shot handler registered under the message's id is
    /// dropped first: the outbound frame supersedes it.
    pub(crate) fn send(&self, message: &Message) -> PeerResult<()> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        if self.inner.requests.supersede(message.id()) {
            warn!(
                id = message.id(),
                kind = message.kind(),
                "Outbound frame superseded a pending one-shot handler"
            );
        }
        let text = encode_message(message)?;
        self.enqueue(Outgoing::Frame(text))
    }

    /// Registers a reply handler under a fresh id and queues the request
    /// built for that id.
    fn request(
        &self,
        build: impl FnOnce(&str) -> Message,
    ) -> PeerResult<(String, oneshot::Receiver<Reply>)> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        let id = self.inner.requests.register(Handler::Reply(tx));
        let queued = encode_message(&build(&id))
            .map_err(PeerError::from)
            .and_then(|text| self.enqueue(Outgoing::Frame(text)));
        if let Err(e) = queued {
            self.inner.requests.remove(&id);
            return Err(e);
        }
        Ok((id, rx))
    }

    async fn wait_reply(
        &self,
        id: &str,
        rx: oneshot::Receiver<Reply>,
        operation: impl FnOnce() -> String,
    ) -> PeerResult<Json> {
        let reply = match self.inner.config.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.inner.requests.remove(id);
                    return Err(PeerError::timeout(operation()));
                }
            },
            None => rx.await,
        };

        match reply {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(error)) => Err(PeerError::Remote(error)),
            Err(_) => Err(PeerError::Closed),
        }
    }

    /// Calls a remote function by dotted name.
    ///
    /// A rejection comes back as [`PeerError::Remote`] carrying the remote
    /// name, message and trace.
    pub async fn call(&self, name: &str, args: Vec<Json>) -> PeerResult<Json> {
        let (id, rx) = self.request(|id| Message::call(id, name, args))?;
        debug!(%id, name, "Sent call");
        self.wait_reply(&id, rx, || format!("call {name}")).await
    }

    /// Calls a remote function without waiting for, or receiving, a result.
    pub fn notify(&self, name: &str, args: Vec<Json>) -> PeerResult<()> {
        self.send(&Message::call("", name, args))
    }

    /// Reads (`value` of `None`) or writes a remote value.
    ///
    /// A read with `check` yields `null` when the remote value is of another
    /// kind. A write yields `null`. Writing `Some(Json::Null)` sends
    /// `"data": null`, which the receiver takes for a missing field and
    /// answers as a read, so a remote value cannot be cleared this way.
    pub async fn query_var(
        &self,
        path: &str,
        value: Option<Json>,
        check: Option<CheckKind>,
    ) -> PeerResult<Json> {
        let (id, rx) = self.request(|id| Message::var(id, path, value, check))?;
        debug!(%id, path, "Sent var");
        self.wait_reply(&id, rx, || format!("var {path}")).await
    }

    /// Opens a pipe bound to a remote pipe constructor.
    pub fn pipe(&self, name: &str, args: Vec<Json>) -> PeerResult<Pipe> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }
        let mut opened = None;
        let id = self.inner.requests.register_with(|id| {
            let (pipe, sink) = Pipe::open(self.clone(), id.to_string());
            opened = Some(pipe);
            Handler::Pipe(sink)
        });
        let Some(pipe) = opened else {
            return Err(PeerError::Closed);
        };

        if let Err(e) = self.send(&Message::pipe_open(&id, name, args)) {
            self.inner.requests.remove(&id);
            return Err(e);
        }
        debug!(%id, name, "Opened pipe");
        Ok(pipe)
    }

    /// Starts a prepared chain with its first step.
    pub fn prepare(&self, name: &str, args: Json) -> ChainBuilder {
        ChainBuilder::new(self.clone()).then(name, args)
    }

    pub(crate) async fn send_chain(
        &self,
        steps: Vec<webrpc_protocol::Prepare>,
        safe: bool,
    ) -> PeerResult<Json> {
        let count = steps.len();
        let (id, rx) = self.request(|id| Message::pcall(id, steps, safe))?;
        debug!(%id, steps = count, safe, "Sent prepared chain");
        self.wait_reply(&id, rx, || format!("pcall of {count} steps"))
            .await
    }

    /// Closes a pipe from this side: one `close` frame, reader ended.
    pub(crate) fn close_pipe(&self, id: &str) {
        self.inner.requests.end_pipe(id);
        if let Err(e) = self.send(&Message::pipe_close(id)) {
            debug!(id, error = %e, "Pipe close not sent");
        }
    }

    /// Closes the connection normally.
    pub fn close(&self) {
        self.close_with(CLOSE_NORMAL, "Normal closure");
    }

    pub(crate) fn close_with(&self, code: u16, reason: &str) {
        if self.is_closed() {
            return;
        }
        let _ = self.enqueue(Outgoing::Close {
            code,
            reason: reason.to_string(),
        });
        self.teardown();
    }

    /// Marks the connection closed, failing pending requests with
    /// [`PeerError::Closed`] and ending every pipe.
    pub(crate) fn teardown(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        let pending = self.inner.requests.drain();
        let count = pending.len();
        for (_, handler) in pending {
            handler.abandon();
        }
        info!(abandoned = count, "Connection closed");
    }
}
