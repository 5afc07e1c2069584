//! Protocol engine for webrpc connections.
//!
//! Both ends of a connection run the same engine. Each side can:
//! - expose functions and values in a dotted namespace ([`Registry`] for
//!   every connection, [`Environment`] for one)
//! - call remote functions, read and write remote values
//! - open duplex [`Pipe`]s bound to remote pipe constructors
//! - send prepared call chains resolved remotely in one round trip
//!
//! Requests are multiplexed over one transport by correlation id. The
//! transport is anything implementing [`FrameSource`] and [`FrameSink`];
//! an in-process [`memory`] transport and a Unix socket transport are
//! provided.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use webrpc_peer::{Callable, Peer, PeerConfig, Registry, Value, memory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(Registry::new());
//!     registry.provide(
//!         "math.add",
//!         Callable::plain(|_, args: Vec<Value>| async move {
//!             let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
//!             Ok(Value::from(sum))
//!         }),
//!     )?;
//!
//!     let ((a_source, a_sink), (b_source, b_sink)) = memory::pair();
//!     let server = Peer::with_registry(PeerConfig::default(), registry);
//!     server.attach(a_source, a_sink);
//!     let client = Peer::with_registry(PeerConfig::default(), Arc::new(Registry::new()));
//!     client.attach(b_source, b_sink);
//!
//!     let sum = client.call("math.add", vec![json!(1), json!(2)]).await?;
//!     assert_eq!(sum, json!(3));
//!     Ok(())
//! }
//! ```

mod callable;
mod config;
mod dispatch;
mod env;
mod error;
mod peer;
mod pipe;
mod prepared;
mod requests;
#[cfg(unix)]
mod socket;
mod transport;
mod value;

pub use callable::{CallFuture, Callable, CallableProxy, PipeFn, PlainFn};
pub use config::{PeerConfig, ReconnectConfig, ServerConfig, default_socket_path};
pub use env::{Environment, Registry, Resolved};
pub use error::{AddressError, PeerError, PeerResult};
pub use peer::Peer;
pub use pipe::{Pipe, PipeReader, PipeWriter};
pub use prepared::ChainBuilder;
pub use requests::ClearPolicy;
#[cfg(unix)]
pub use socket::{SocketClient, SocketServer, UnixSink, UnixSource, split};
pub use transport::{Frame, FrameSink, FrameSource, memory};
pub use value::Value;

pub use webrpc_core::{ErrorTrace, RemoteError};
pub use webrpc_protocol::CheckKind;
