//! Inbound frame dispatch.
//!
//! Frames are handled in arrival order. Responses and pipe traffic are
//! applied inline so each id's lifecycle stays ordered; `call`, pipe
//! constructors and chains await user code and run as their own tasks.

use serde_json::Value as Json;
use tracing::{Instrument, Span, debug, debug_span, warn};
use webrpc_core::RemoteError;
use webrpc_protocol::{CheckKind, Message, PipeAction, ProtocolError, decode_message};

use crate::env::Resolved;
use crate::error::PeerResult;
use crate::peer::Peer;
use crate::pipe::Pipe;
use crate::prepared::resolve_chain;
use crate::requests::{ClearPolicy, Handler};
use crate::transport::Frame;
use crate::value::Value;

impl Peer {
    /// Handles one inbound transport frame.
    ///
    /// Binary frames are ignored, or refused with
    /// [`ProtocolError::BinaryFrame`] when the configuration says so.
    pub(crate) fn handle_frame(&self, frame: Frame) -> PeerResult<()> {
        match frame {
            Frame::Text(text) => self.handle_text(&text),
            Frame::Binary(bytes) if self.config().reject_binary_frames => {
                Err(ProtocolError::BinaryFrame { len: bytes.len() }.into())
            }
            Frame::Binary(bytes) => {
                debug!(len = bytes.len(), "Ignoring binary frame");
                Ok(())
            }
        }
    }

    /// Handles one inbound text frame.
    ///
    /// An error means the frame is not a valid message; the caller should
    /// close the transport with
    /// [`CLOSE_PROTOCOL_ERROR`](webrpc_protocol::CLOSE_PROTOCOL_ERROR).
    /// Every other failure is answered with a `reject` frame.
    pub fn handle_text(&self, text: &str) -> PeerResult<()> {
        let message = decode_message(text)?;
        let span = debug_span!("frame", kind = message.kind(), id = message.id());
        let _entered = span.enter();

        match message {
            Message::Resolve { data, id } => {
                if !self.requests().complete(&id, Ok(data)) {
                    warn!(%id, "Resolve for unknown request");
                }
            }
            Message::Reject {
                name,
                message,
                trace,
                id,
            } => {
                let error = RemoteError::from_parts(name, message, trace);
                let summary = format!("{}: {}", error.name, error.message);
                if !self.requests().complete(&id, Err(error)) {
                    warn!(%id, error = %summary, "Reject for unknown request");
                }
            }
            Message::Call { name, args, id } => {
                let peer = self.clone();
                tokio::spawn(
                    async move { peer.handle_call(name, args, id).await }
                        .instrument(span.clone()),
                );
            }
            Message::Var {
                path,
                data,
                check,
                id,
            } => self.handle_var(&path, data, check, &id),
            Message::Pipe {
                action,
                call,
                data,
                id,
            } => self.handle_pipe(action, call, data, id, span.clone()),
            Message::PCall { call, safe, id } => {
                let peer = self.clone();
                tokio::spawn(
                    async move {
                        match resolve_chain(&peer, &call, safe).await {
                            Ok(result) => peer.reply(&Message::resolve(&id, result.to_json())),
                            Err(error) => peer.reply_error(&id, error),
                        }
                    }
                    .instrument(span.clone()),
                );
            }
        }
        Ok(())
    }

    async fn handle_call(&self, name: String, args: Vec<Json>, id: String) {
        let proxy = match self.env().get(&name) {
            Ok(Some(Resolved::Callable(proxy))) if !proxy.is_pipe_only() => proxy,
            Ok(_) => {
                let error = RemoteError::type_error(format!("{name} is not callable"));
                return self.reply_error(&id, error);
            }
            Err(e) => return self.reply_error(&id, e.into()),
        };

        if !proxy.take() {
            let error = RemoteError::type_error(format!("{name} is not callable"));
            return self.reply_error(&id, error);
        }

        let args = args.into_iter().map(Value::from).collect();
        match proxy.apply(self, args).await {
            Ok(result) => {
                debug!(%name, "Call resolved");
                if !id.is_empty() {
                    self.reply(&Message::resolve(&id, result.to_json()));
                }
            }
            Err(error) => {
                proxy.restore();
                self.reply_error(&id, error);
            }
        }
    }

    fn handle_var(&self, path: &str, data: Option<Json>, check: Option<CheckKind>, id: &str) {
        if let Some(data) = data {
            match self.env().set(path, Value::from(data)) {
                Ok(()) => self.reply(&Message::resolve(id, Json::Null)),
                Err(e) => self.reply_error(id, e.into()),
            }
            return;
        }

        let value = match self.env().get(path) {
            Ok(found) => found.map(Resolved::into_value).unwrap_or_default(),
            Err(e) => return self.reply_error(id, e.into()),
        };
        let value = match check {
            Some(kind) if value.kind() != kind => {
                debug!(
                    path,
                    expected = kind.as_str(),
                    actual = value.kind().as_str(),
                    "Var check failed"
                );
                Value::Null
            }
            _ => value,
        };
        self.reply(&Message::resolve(id, value.to_json()));
    }

    fn handle_pipe(
        &self,
        action: Option<PipeAction>,
        call: Option<String>,
        data: Json,
        id: String,
        span: Span,
    ) {
        match (self.requests().policy(&id), action) {
            (None, Some(PipeAction::Open)) => self.open_pipe(call, data, id, span),
            (None, _) => self.reply_error(&id, RemoteError::type_error("pipe not found")),
            (Some(ClearPolicy::Once), _) => {
                self.reply_error(&id, RemoteError::type_error("not a valid pipe"))
            }
            (Some(ClearPolicy::Never), Some(PipeAction::Close)) => {
                debug!(%id, "Pipe closed by remote");
                self.requests().end_pipe(&id);
            }
            (Some(ClearPolicy::Never), Some(PipeAction::Open)) => {
                self.reply_error(&id, RemoteError::type_error("pipe already open"))
            }
            (Some(ClearPolicy::Never), None) => {
                self.requests().deliver(&id, data);
            }
        }
    }

    /// Opens a pipe requested by the remote side and runs its constructor.
    fn open_pipe(&self, call: Option<String>, data: Json, id: String, span: Span) {
        let (Some(call), Json::Array(args)) = (call, data) else {
            return self.reply_error(&id, RemoteError::type_error("invalid data found"));
        };
        let proxy = match self.env().get(&call) {
            Ok(Some(Resolved::Callable(proxy))) if proxy.is_pipe_only() => proxy,
            Ok(_) => {
                return self.reply_error(
                    &id,
                    RemoteError::type_error(format!("{call} is not a pipe constructor")),
                );
            }
            Err(e) => return self.reply_error(&id, e.into()),
        };
        if !proxy.take() {
            return self.reply_error(
                &id,
                RemoteError::type_error(format!("{call} is not a pipe constructor")),
            );
        }

        // Registered before returning so data frames right behind the open
        // find the pipe.
        let (pipe, sink) = Pipe::open(self.clone(), id.clone());
        self.requests().insert(&id, Handler::Pipe(sink));
        debug!(%id, %call, "Pipe opened by remote");

        let peer = self.clone();
        tokio::spawn(
            async move {
                let args = args.into_iter().map(Value::from).collect();
                match proxy.apply_pipe(&peer, pipe, args).await {
                    Ok(_) => debug!(%id, "Pipe constructor finished"),
                    Err(error) => {
                        proxy.restore();
                        peer.requests().end_pipe(&id);
                        peer.reply_error(&id, error);
                    }
                }
            }
            .instrument(span),
        );
    }

    fn reply(&self, message: &Message) {
        if let Err(e) = self.send(message) {
            debug!(id = message.id(), error = %e, "Reply not sent");
        }
    }

    /// Answers a request with a `reject`. Fire-and-forget calls (empty id)
    /// get no answer.
    fn reply_error(&self, id: &str, error: RemoteError) {
        if id.is_empty() {
            warn!(error = %error.message, "Fire-and-forget call failed");
            return;
        }
        debug!(id, name = %error.name, error = %error.message, "Rejecting request");
        self.reply(&Message::reject(id, &error));
    }
}
