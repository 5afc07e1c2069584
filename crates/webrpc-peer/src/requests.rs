//! Pending request table.
//!
//! Maps correlation ids to the local handler waiting for the matching
//! response frames. Reply handlers are one-shot; pipe handlers stay until
//! the pipe closes.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value as Json;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;
use webrpc_core::RemoteError;

use crate::pipe::PipeSink;

/// Outcome delivered to a reply handler.
pub(crate) type Reply = Result<Json, RemoteError>;

/// When a handler leaves the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearPolicy {
    /// Removed after its single firing.
    Once,
    /// Kept for the life of a pipe.
    Never,
}

#[derive(Debug)]
pub(crate) enum Handler {
    Reply(oneshot::Sender<Reply>),
    Pipe(PipeSink),
}

impl Handler {
    pub(crate) fn policy(&self) -> ClearPolicy {
        match self {
            Self::Reply(_) => ClearPolicy::Once,
            Self::Pipe(_) => ClearPolicy::Never,
        }
    }

    /// Ends the handler because the connection went away.
    pub(crate) fn abandon(self) {
        match self {
            // Dropping the sender fails the waiting caller with `Closed`.
            Self::Reply(tx) => drop(tx),
            Self::Pipe(sink) => sink.end(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RequestTable {
    pending: Mutex<HashMap<String, Handler>>,
}

impl RequestTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Handler>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Draws a random id, retrying while it collides with a pending one.
    fn fresh_id(pending: &HashMap<String, Handler>) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if !pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Allocates an id and registers the handler built for it, atomically.
    pub(crate) fn register_with(&self, build: impl FnOnce(&str) -> Handler) -> String {
        let mut pending = self.lock();
        let id = Self::fresh_id(&pending);
        let handler = build(&id);
        pending.insert(id.clone(), handler);
        id
    }

    pub(crate) fn register(&self, handler: Handler) -> String {
        self.register_with(|_| handler)
    }

    /// Registers a handler under an id chosen by the remote side.
    pub(crate) fn insert(&self, id: &str, handler: Handler) {
        if let Some(previous) = self.lock().insert(id.to_string(), handler) {
            warn!(id, "Replaced a pending handler with the same id");
            previous.abandon();
        }
    }

    pub(crate) fn policy(&self, id: &str) -> Option<ClearPolicy> {
        self.lock().get(id).map(Handler::policy)
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Handler> {
        self.lock().remove(id)
    }

    /// Drops a one-shot handler that an outbound frame with the same id
    /// supersedes. Pipe handlers are never dropped this way.
    pub(crate) fn supersede(&self, id: &str) -> bool {
        let mut pending = self.lock();
        match pending.get(id).map(Handler::policy) {
            Some(ClearPolicy::Once) => {
                pending.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Delivers a `resolve` or `reject` to its handler.
    ///
    /// Returns false when no handler is registered for the id.
    pub(crate) fn complete(&self, id: &str, result: Reply) -> bool {
        let mut pending = self.lock();
        let Some(policy) = pending.get(id).map(Handler::policy) else {
            return false;
        };

        match (policy, result) {
            (ClearPolicy::Once, result) => {
                if let Some(Handler::Reply(tx)) = pending.remove(id) {
                    drop(pending);
                    let _ = tx.send(result);
                }
            }
            (ClearPolicy::Never, Ok(data)) => {
                if let Some(Handler::Pipe(sink)) = pending.get(id) {
                    sink.deliver(data);
                }
            }
            (ClearPolicy::Never, Err(error)) => {
                if let Some(Handler::Pipe(sink)) = pending.remove(id) {
                    drop(pending);
                    sink.fail(error);
                }
            }
        }
        true
    }

    /// Feeds a data chunk to an open pipe.
    pub(crate) fn deliver(&self, id: &str, data: Json) -> bool {
        match self.lock().get(id) {
            Some(Handler::Pipe(sink)) => {
                sink.deliver(data);
                true
            }
            _ => false,
        }
    }

    /// Removes and ends an open pipe.
    pub(crate) fn end_pipe(&self, id: &str) -> bool {
        let mut pending = self.lock();
        if !matches!(pending.get(id), Some(Handler::Pipe(_))) {
            return false;
        }
        if let Some(Handler::Pipe(sink)) = pending.remove(id) {
            drop(pending);
            sink.end();
        }
        true
    }

    /// Removes every handler.
    pub(crate) fn drain(&self) -> Vec<(String, Handler)> {
        self.lock().drain().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
