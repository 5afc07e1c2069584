//! Message types for the webrpc protocol.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use webrpc_core::{ErrorTrace, RemoteError};

/// A protocol message. One message per transport frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Failure for a prior `id`.
    Reject {
        /// Error class name.
        #[serde(default, deserialize_with = "any_to_string")]
        name: String,
        /// Error message. Non-string payloads are kept as their JSON text.
        #[serde(default, deserialize_with = "any_to_string")]
        message: String,
        /// Remote stack frames. `null` reads as no frames.
        #[serde(default, deserialize_with = "null_as_default")]
        trace: Vec<ErrorTrace>,
        /// Correlation id.
        id: String,
    },

    /// Successful result for a prior `id`.
    Resolve {
        /// Result value.
        #[serde(default)]
        data: Value,
        /// Correlation id.
        id: String,
    },

    /// Invoke a remote callable. An empty `id` asks for no `resolve`.
    Call {
        /// Dotted name of the callable.
        name: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
        /// Correlation id.
        id: String,
    },

    /// Read (no `data`) or write (`data` present) a remote named value.
    Var {
        /// Dotted path of the value.
        #[serde(alias = "var")]
        path: String,
        /// Value to write.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Expected kind of a read value; mismatches read as `null`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        check: Option<CheckKind>,
        /// Correlation id.
        id: String,
    },

    /// Open, feed or close a duplex pipe.
    Pipe {
        /// Lifecycle action; absent for a data chunk.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<PipeAction>,
        /// Pipe constructor name, required with `open`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call: Option<String>,
        /// Chunk payload, or the constructor arguments with `open`.
        #[serde(default)]
        data: Value,
        /// Correlation id shared by every frame of the pipe.
        id: String,
    },

    /// A chain of calls resolved remotely in one round trip.
    #[serde(rename = "pcall")]
    PCall {
        /// Steps, in order.
        call: Vec<Prepare>,
        /// Substitute an empty result for failing steps instead of rejecting.
        #[serde(default)]
        safe: bool,
        /// Correlation id.
        id: String,
    },
}

impl Message {
    /// Creates a `call` message.
    pub fn call(id: impl Into<String>, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Call {
            name: name.into(),
            args,
            id: id.into(),
        }
    }

    /// Creates a `resolve` message.
    pub fn resolve(id: impl Into<String>, data: Value) -> Self {
        Self::Resolve {
            data,
            id: id.into(),
        }
    }

    /// Creates a `reject` message carrying `error`.
    pub fn reject(id: impl Into<String>, error: &RemoteError) -> Self {
        Self::Reject {
            name: error.name.clone(),
            message: error.message.clone(),
            trace: error.trace.clone(),
            id: id.into(),
        }
    }

    /// Creates a `var` message; `data` of `None` reads.
    pub fn var(
        id: impl Into<String>,
        path: impl Into<String>,
        data: Option<Value>,
        check: Option<CheckKind>,
    ) -> Self {
        Self::Var {
            path: path.into(),
            data,
            check,
            id: id.into(),
        }
    }

    /// Creates a pipe `open` message.
    pub fn pipe_open(id: impl Into<String>, call: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Pipe {
            action: Some(PipeAction::Open),
            call: Some(call.into()),
            data: Value::Array(args),
            id: id.into(),
        }
    }

    /// Creates a pipe data chunk.
    pub fn pipe_data(id: impl Into<String>, data: Value) -> Self {
        Self::Pipe {
            action: None,
            call: None,
            data,
            id: id.into(),
        }
    }

    /// Creates a pipe `close` message.
    pub fn pipe_close(id: impl Into<String>) -> Self {
        Self::Pipe {
            action: Some(PipeAction::Close),
            call: None,
            data: Value::Null,
            id: id.into(),
        }
    }

    /// Creates a `pcall` message.
    pub fn pcall(id: impl Into<String>, call: Vec<Prepare>, safe: bool) -> Self {
        Self::PCall {
            call,
            safe,
            id: id.into(),
        }
    }

    /// Returns the correlation id.
    pub fn id(&self) -> &str {
        match self {
            Self::Reject { id, .. }
            | Self::Resolve { id, .. }
            | Self::Call { id, .. }
            | Self::Var { id, .. }
            | Self::Pipe { id, .. }
            | Self::PCall { id, .. } => id,
        }
    }

    /// Returns the wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reject { .. } => "reject",
            Self::Resolve { .. } => "resolve",
            Self::Call { .. } => "call",
            Self::Var { .. } => "var",
            Self::Pipe { .. } => "pipe",
            Self::PCall { .. } => "pcall",
        }
    }

    /// Rebuilds the remote error of a `reject` message.
    pub fn into_remote_error(self) -> Option<RemoteError> {
        match self {
            Self::Reject {
                name,
                message,
                trace,
                ..
            } => Some(RemoteError::from_parts(name, message, trace)),
            _ => None,
        }
    }
}

/// Pipe lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeAction {
    /// Open a pipe bound to a remote pipe constructor.
    Open,
    /// Close the pipe on both ends.
    Close,
}

/// Value kind named by `var` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// A string.
    String,
    /// A number.
    Number,
    /// A boolean.
    Boolean,
    /// No value.
    Undefined,
    /// A mapping or an array.
    Object,
    /// A callable.
    Function,
}

impl CheckKind {
    /// Returns the wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Undefined => "undefined",
            Self::Object => "object",
            Self::Function => "function",
        }
    }
}

/// One step of a prepared chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prepare {
    /// Call target: a dotted name or a `&N.path` reference.
    pub call: String,
    /// Argument tree; strings may hold references or `$N[path]` tokens.
    #[serde(default)]
    pub args: Value,
}

impl Prepare {
    /// Creates a step.
    pub fn new(call: impl Into<String>, args: Value) -> Self {
        Self {
            call: call.into(),
            args,
        }
    }
}

/// Accepts any JSON value, keeping strings verbatim and other values as
/// their JSON text.
fn any_to_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_wire_shape() {
        let message = Message::call("a1", "math.add", vec![json!(1), json!(2)]);
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"type":"call","name":"math.add","args":[1,2],"id":"a1"}"#
        );
        assert_eq!(message.kind(), "call");
        assert_eq!(message.id(), "a1");
    }

    #[test]
    fn call_without_args() {
        let parsed: Message =
            serde_json::from_str(r#"{"type":"call","name":"hello","id":"x"}"#).unwrap();
        assert_eq!(parsed, Message::call("x", "hello", Vec::new()));
    }

    #[test]
    fn resolve_defaults_to_null() {
        let parsed: Message = serde_json::from_str(r#"{"type":"resolve","id":"x"}"#).unwrap();
        assert_eq!(parsed, Message::resolve("x", Value::Null));
    }

    #[test]
    fn reject_carries_trace() {
        let error = RemoteError::from_parts(
            "TypeError",
            "boom",
            vec![ErrorTrace {
                file: "a.rs".to_string(),
                func: "f".to_string(),
                line: 3,
                col: 9,
            }],
        );
        let message = Message::reject("r", &error);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "reject");
        assert_eq!(json["trace"][0]["line"], 3);

        let parsed: Message = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.into_remote_error(), Some(error));
    }

    #[test]
    fn reject_with_unlocated_frames_decodes() {
        let parsed = crate::decode_message(
            r#"{"type":"reject","name":"Error","message":"boom","trace":[{"file":"","func":"new Promise","line":null,"col":null}],"id":"k1"}"#,
        )
        .unwrap();
        let error = parsed.into_remote_error().unwrap();
        assert_eq!(error.message, "boom");
        assert_eq!(error.trace[0].func, "new Promise");
        assert_eq!((error.trace[0].line, error.trace[0].col), (0, 0));

        let parsed = crate::decode_message(
            r#"{"type":"reject","name":null,"message":"m","trace":null,"id":"k2"}"#,
        )
        .unwrap();
        let error = parsed.into_remote_error().unwrap();
        assert_eq!(error.name, "");
        assert!(error.trace.is_empty());
    }

    #[test]
    fn reject_message_accepts_non_string() {
        let parsed: Message = serde_json::from_str(
            r#"{"type":"reject","name":"Error","message":{"code":7},"trace":[],"id":"r"}"#,
        )
        .unwrap();
        let error = parsed.into_remote_error().unwrap();
        assert_eq!(error.message, r#"{"code":7}"#);
    }

    #[test]
    fn var_read_omits_data() {
        let message = Message::var("v", "config.theme", None, Some(CheckKind::String));
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"type":"var","path":"config.theme","check":"string","id":"v"}"#
        );
    }

    #[test]
    fn var_accepts_legacy_field_name() {
        let parsed: Message =
            serde_json::from_str(r#"{"type":"var","var":"a.b","data":5,"id":"v"}"#).unwrap();
        assert_eq!(parsed, Message::var("v", "a.b", Some(json!(5)), None));
    }

    #[test]
    fn pipe_open_data_and_close() {
        let open = Message::pipe_open("p", "echo", vec![json!("x")]);
        assert_eq!(
            serde_json::to_string(&open).unwrap(),
            r#"{"type":"pipe","action":"open","call":"echo","data":["x"],"id":"p"}"#
        );

        let chunk: Message =
            serde_json::from_str(r#"{"type":"pipe","data":"abc","id":"p"}"#).unwrap();
        assert_eq!(chunk, Message::pipe_data("p", json!("abc")));

        let close: Message =
            serde_json::from_str(r#"{"type":"pipe","action":"close","id":"p"}"#).unwrap();
        assert_eq!(close, Message::pipe_close("p"));
    }

    #[test]
    fn pcall_wire_shape() {
        let message = Message::pcall(
            "c",
            vec![
                Prepare::new("makeArray", json!([])),
                Prepare::new("&.0", json!([])),
            ],
            true,
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "pcall");
        assert_eq!(json["safe"], true);
        assert_eq!(json["call"][1]["call"], "&.0");

        let parsed: Message =
            serde_json::from_str(r#"{"type":"pcall","call":[{"call":"f"}],"id":"c"}"#).unwrap();
        assert_eq!(
            parsed,
            Message::pcall("c", vec![Prepare::new("f", Value::Null)], false)
        );
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<Message, _> = serde_json::from_str(r#"{"type":"nope","id":"x"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_id_is_rejected() {
        let result: Result<Message, _> = serde_json::from_str(r#"{"type":"resolve","data":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn check_kind_spelling() {
        for kind in [
            CheckKind::String,
            CheckKind::Number,
            CheckKind::Boolean,
            CheckKind::Undefined,
            CheckKind::Object,
            CheckKind::Function,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
