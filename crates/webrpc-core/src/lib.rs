//! Core types: remote error reconstruction, stack traces, tracing setup

pub mod trace;
pub mod tracing;

pub use trace::{ErrorTrace, RemoteError, capture_trace, current_trace};
pub use crate::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
