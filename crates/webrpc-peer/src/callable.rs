//! Registered functions and the proxies the engine invokes them through.
//!
//! A [`Callable`] is either a plain function or a pipe constructor, tagged
//! at registration time, and may be one-shot. Environment lookups never
//! hand out the function itself: they return a [`CallableProxy`] that
//! remembers where the binding lives so a one-shot function can be cleared
//! after it fires.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use tracing::warn;
use webrpc_core::RemoteError;

use crate::peer::Peer;
use crate::pipe::Pipe;
use crate::value::Value;

/// Future returned by registered functions.
pub type CallFuture = Pin<Box<dyn Future<Output = Result<Value, RemoteError>> + Send>>;

/// A plain function: receives the calling connection and positional arguments.
pub type PlainFn = Arc<dyn Fn(Peer, Vec<Value>) -> CallFuture + Send + Sync>;

/// A pipe constructor: additionally receives the freshly opened pipe.
pub type PipeFn = Arc<dyn Fn(Peer, Pipe, Vec<Value>) -> CallFuture + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Plain(PlainFn),
    Pipe(PipeFn),
}

struct Inner {
    handler: Handler,
    once: bool,
}

/// A function exposed to the remote side.
#[derive(Clone)]
pub struct Callable(Arc<Inner>);

impl Callable {
    /// Wraps an async function invoked by `call` and `pcall`.
    pub fn plain<F, Fut>(f: F) -> Self
    where
        F: Fn(Peer, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        let handler: PlainFn = Arc::new(move |peer, args| Box::pin(f(peer, args)));
        Self::from_handler(Handler::Plain(handler), false)
    }

    /// Wraps an async pipe constructor, invoked only by a pipe `open`.
    pub fn pipe<F, Fut>(f: F) -> Self
    where
        F: Fn(Peer, Pipe, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        let handler: PipeFn = Arc::new(move |peer, pipe, args| Box::pin(f(peer, pipe, args)));
        Self::from_handler(Handler::Pipe(handler), false)
    }

    /// Marks the function one-shot: its binding is cleared after the first
    /// successful invocation.
    #[must_use]
    pub fn once(self) -> Self {
        Self::from_handler(self.0.handler.clone(), true)
    }

    fn from_handler(handler: Handler, once: bool) -> Self {
        Self(Arc::new(Inner { handler, once }))
    }

    /// Returns true for pipe constructors.
    pub fn is_pipe(&self) -> bool {
        matches!(self.0.handler, Handler::Pipe(_))
    }

    /// Returns true for one-shot functions.
    pub fn is_once(&self) -> bool {
        self.0.once
    }

    /// Returns true if both handles refer to the same registration.
    pub fn same(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("pipe", &self.is_pipe())
            .field("once", &self.is_once())
            .finish()
    }
}

/// Location of a binding inside a scope.
#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) scope: Arc<RwLock<Value>>,
    pub(crate) path: String,
}

/// A located function plus its remoting flags.
///
/// Created per lookup; it does not own the binding.
#[derive(Clone)]
pub struct CallableProxy {
    callable: Callable,
    binding: Option<Binding>,
}

impl CallableProxy {
    pub(crate) fn bound(callable: Callable, binding: Binding) -> Self {
        Self {
            callable,
            binding: Some(binding),
        }
    }

    /// A proxy for a function found outside any scope, e.g. in a chain result.
    pub(crate) fn detached(callable: Callable) -> Self {
        Self {
            callable,
            binding: None,
        }
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    /// May only be invoked as a pipe constructor.
    pub fn is_pipe_only(&self) -> bool {
        self.callable.is_pipe()
    }

    /// Binding is cleared after the first successful invocation.
    pub fn is_one_shot(&self) -> bool {
        self.callable.is_once()
    }

    /// Invokes a plain function with positional arguments.
    ///
    /// Panics inside the function are caught and reported as an error named
    /// `Panic`.
    pub async fn apply(&self, peer: &Peer, args: Vec<Value>) -> Result<Value, RemoteError> {
        let Handler::Plain(f) = &self.callable.0.handler else {
            return Err(RemoteError::type_error(
                "PipeOnly function is not allowed; use the pipe call instead",
            ));
        };
        guarded(f(peer.clone(), args)).await
    }

    /// Invokes a pipe constructor with the pipe and positional arguments.
    pub async fn apply_pipe(
        &self,
        peer: &Peer,
        pipe: Pipe,
        args: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        let Handler::Pipe(f) = &self.callable.0.handler else {
            return Err(RemoteError::type_error("not a pipe constructor"));
        };
        guarded(f(peer.clone(), pipe, args)).await
    }

    /// Overwrites the binding in place.
    pub fn set(&self, value: Value) {
        let Some(binding) = &self.binding else {
            return;
        };
        let mut scope = binding
            .scope
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = scope.insert(&binding.path, value) {
            warn!(path = %binding.path, error = %e, "Failed to overwrite binding");
        }
    }

    /// Clears the binding so later lookups find nothing.
    pub fn clear(&self) {
        self.set(Value::Null);
    }

    /// Claims a one-shot function before invoking it.
    ///
    /// The binding is cleared atomically if it still holds this function.
    /// Returns false when another invocation claimed it first. Functions
    /// that are not one-shot, or not bound to a scope, are always claimed.
    pub fn take(&self) -> bool {
        let Some(binding) = self.binding.as_ref().filter(|_| self.is_one_shot()) else {
            return true;
        };
        let mut scope = binding
            .scope
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let held = matches!(
            scope.lookup(&binding.path),
            Ok(Some(Value::Function(current))) if current.same(&self.callable)
        );
        if held && let Err(e) = scope.insert(&binding.path, Value::Null) {
            warn!(path = %binding.path, error = %e, "Failed to clear one-shot binding");
        }
        held
    }

    /// Puts back a function claimed with [`take`](Self::take) whose
    /// invocation failed. A slot rebound in the meantime is left alone.
    pub fn restore(&self) {
        let Some(binding) = self.binding.as_ref().filter(|_| self.is_one_shot()) else {
            return;
        };
        let mut scope = binding
            .scope
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !matches!(scope.lookup(&binding.path), Ok(None | Some(Value::Null))) {
            return;
        }
        if let Err(e) = scope.insert(&binding.path, Value::Function(self.callable.clone())) {
            warn!(path = %binding.path, error = %e, "Failed to restore one-shot binding");
        }
    }
}

impl fmt::Debug for CallableProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableProxy")
            .field("callable", &self.callable)
            .field("path", &self.binding.as_ref().map(|b| b.path.as_str()))
            .finish()
    }
}

async fn guarded(fut: CallFuture) -> Result<Value, RemoteError> {
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(error = %message, "Registered function panicked");
            Err(RemoteError::new("Panic", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "function panicked".to_string()
    }
}
