//! Error and stack-trace codec.
//!
//! A failing call on one peer is reported to the other as a `reject` frame
//! carrying the error name, message and an ordered list of stack frames.
//! This module turns a native Rust backtrace into that frame list
//! ([`capture_trace`]) and rebuilds a displayable error from the pieces
//! ([`RemoteError`]).
//!
//! Frames that belong to the engine itself, to the standard library, to the
//! async runtime or to registry dependencies are dropped so a remote trace
//! only shows application code.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

/// Frame header line: `  12: some::function::path`.
static FRAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+:\s+(.+?)\s*$").expect("Invalid frame regex"));

/// Location line following a frame header: `      at ./src/lib.rs:10:5`.
static LOCATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*at\s+(.+?)\s*$").expect("Invalid location regex"));

/// Trailing symbol hash emitted by some unwinders (`::h0123456789abcdef`).
static HASH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::h[0-9a-f]{16}$").expect("Invalid hash regex"));

/// Symbol prefixes that never reach a remote trace.
const EXCLUDED_SYMBOLS: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "futures_util::",
    "futures_core::",
    "<std::",
    "<core::",
    "<alloc::",
    "<tokio::",
    "<futures_util::",
    "__rust",
    "rust_begin_unwind",
    "__libc_start",
    "_start",
    "start_thread",
];

/// Crates making up the engine; their frames describe the transport
/// machinery, not the failing application code.
const ENGINE_CRATES: &[&str] = &["webrpc_core::", "webrpc_peer::", "<webrpc_peer::"];

/// File path prefixes of host toolchain and dependency sources.
const EXCLUDED_PATHS: &[&str] = &["/rustc/"];

/// File path fragments of dependency sources.
const EXCLUDED_PATH_FRAGMENTS: &[&str] = &["/.cargo/registry/", "/.cargo/git/"];

/// One frame of a transmitted stack trace.
///
/// Peers report frames they could not locate (`at new Promise (<anonymous>)`)
/// with `null` positions; those decode as empty strings and zeros.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTrace {
    /// Source file.
    #[serde(default, deserialize_with = "lenient_string")]
    pub file: String,
    /// Function name (may be empty when unknown).
    #[serde(default, deserialize_with = "lenient_string")]
    pub func: String,
    /// 1-based line, 0 when unknown.
    #[serde(default, deserialize_with = "lenient_position")]
    pub line: u32,
    /// 1-based column, 0 when unknown.
    #[serde(default, deserialize_with = "lenient_position")]
    pub col: u32,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Text(String),
        Other(IgnoredAny),
    }

    Ok(match Loose::deserialize(deserializer)? {
        Loose::Text(text) => text,
        Loose::Other(_) => String::new(),
    })
}

fn lenient_position<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Int(u64),
        Float(f64),
        Other(IgnoredAny),
    }

    Ok(match Loose::deserialize(deserializer)? {
        Loose::Int(n) => u32::try_from(n).unwrap_or(u32::MAX),
        Loose::Float(f) if f.is_finite() && f >= 0.0 => f as u32,
        Loose::Float(_) | Loose::Other(_) => 0,
    })
}

/// Parses a `std::backtrace::Backtrace` rendering into ordered frames.
///
/// Frames without a source location, and frames from the engine, the
/// standard library, the runtime or dependency sources are discarded.
pub fn capture_trace(stack: &str) -> Vec<ErrorTrace> {
    let mut trace = Vec::new();
    let mut current: Option<String> = None;

    for line in stack.lines() {
        if let Some(caps) = LOCATION_REGEX.captures(line) {
            let Some(func) = current.as_deref() else {
                continue;
            };
            let Some((file, line_no, col)) = split_location(&caps[1]) else {
                continue;
            };
            if is_excluded(func, file) {
                continue;
            }
            trace.push(ErrorTrace {
                file: file.to_string(),
                func: func.to_string(),
                line: line_no,
                col,
            });
        } else if let Some(caps) = FRAME_REGEX.captures(line) {
            current = Some(HASH_REGEX.replace(&caps[1], "").into_owned());
        }
    }

    trace
}

/// Captures the calling thread's backtrace and converts it with
/// [`capture_trace`].
///
/// Capture honours `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE`; when backtraces
/// are disabled the result is empty.
pub fn current_trace() -> Vec<ErrorTrace> {
    capture_trace(&Backtrace::capture().to_string())
}

/// Splits `path:line:col` from the right, so paths containing `:` survive.
fn split_location(location: &str) -> Option<(&str, u32, u32)> {
    let mut parts = location.rsplitn(3, ':');
    let col = parts.next()?.parse().ok()?;
    let line = parts.next()?.parse().ok()?;
    let file = parts.next()?;
    if file.is_empty() {
        return None;
    }
    Some((file, line, col))
}

fn is_excluded(func: &str, file: &str) -> bool {
    EXCLUDED_SYMBOLS.iter().any(|p| func.starts_with(p))
        || ENGINE_CRATES.iter().any(|p| func.starts_with(p))
        || EXCLUDED_PATHS.iter().any(|p| file.starts_with(p))
        || EXCLUDED_PATH_FRAGMENTS.iter().any(|p| file.contains(p))
}

/// An error raised on the remote peer, or raised locally to be sent there.
///
/// Its string form is `"<name>: <message>"` followed by one
/// `"\n\tat <file> (<file>:<line>:<col>)"` line per frame. The frames are
/// the remote side's, not a local stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error class name, e.g. `TypeError`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Stack frames, innermost first.
    #[serde(default)]
    pub trace: Vec<ErrorTrace>,
}

impl RemoteError {
    /// Creates an error and records the current stack.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            trace: current_trace(),
        }
    }

    /// Rebuilds an error from its transmitted parts.
    pub fn from_parts(
        name: impl Into<String>,
        message: impl Into<String>,
        trace: Vec<ErrorTrace>,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            trace,
        }
    }

    /// Creates a generic `Error`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    /// Creates a `TypeError`, used for addressing and capability failures.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    /// Wraps any native error as a generic `Error`.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::error(err.to_string())
    }

    /// Returns the reconstructed stack text.
    pub fn stack(&self) -> String {
        let mut stack = format!("{}: {}", self.name, self.message);
        for frame in &self.trace {
            stack.push_str(&format!(
                "\n\tat {} ({}:{}:{})",
                frame.file, frame.file, frame.line, frame.col
            ));
        }
        stack
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stack())
    }
}

impl std::error::Error for RemoteError {}
