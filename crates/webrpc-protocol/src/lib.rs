//! Wire protocol for webrpc.
//!
//! Both endpoints of a webrpc connection speak the same protocol: there is
//! no client/server asymmetry. Every transport frame carries exactly one
//! UTF-8 JSON [`Message`], a tagged union discriminated by `type`:
//!
//! | `type`    | purpose                                         |
//! |-----------|-------------------------------------------------|
//! | `call`    | invoke a remote callable by dotted name         |
//! | `resolve` | successful result for a prior `id`              |
//! | `reject`  | failure for a prior `id`, with a remote trace   |
//! | `var`     | read or write a remote named value              |
//! | `pipe`    | open, feed or close a duplex pipe               |
//! | `pcall`   | resolve a prepared call chain in one round trip |
//!
//! Every message carries a correlation `id` tying a request to its
//! response frame(s).
//!
//! Transports that are byte streams rather than message based (Unix
//! sockets) wrap each text frame in a 4-byte big-endian length prefix, see
//! [`FrameReader`] and [`FrameWriter`].
//!
//! # Example
//!
//! ```rust
//! use webrpc_protocol::{Message, decode_message, encode_message};
//!
//! let call = Message::call("k2x9", "math.add", vec![1.into(), 2.into()]);
//! let text = encode_message(&call).unwrap();
//! assert_eq!(decode_message(&text).unwrap(), call);
//! ```

mod error;
mod framing;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{FrameReader, FrameWriter, decode_message, encode_frame, encode_message};
pub use types::{CheckKind, Message, PipeAction, Prepare};

/// Maximum frame payload size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Close code for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent when a peer delivers a frame that is not a valid message.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
