//! Prepared call chains.
//!
//! A chain is a list of steps resolved by the receiving side in one round
//! trip. Each step names its target and arguments; later steps may refer
//! to earlier results with two small grammars:
//!
//! - a **reference** is a whole string `&[N][.path]`: the value at `path`
//!   inside result `N` (the previous result when `N` is omitted). It may
//!   stand for any value, including a function used as a step target.
//! - an **interpolation** token `$[path]` or `$N[path]` inside any other
//!   string is replaced by the string form of the addressed value.
//!
//! ```text
//! prepare("session.open", ["alice"])     -> {"user": {"name": "Alice"}, "close": <fn>}
//!   .then("&.close", [])                 -> calls the returned function
//!   .then("greet", ["Hi $0[user.name]"]) -> greet("Hi Alice")
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value as Json;
use tracing::debug;
use webrpc_core::RemoteError;
use webrpc_protocol::Prepare;

use crate::callable::CallableProxy;
use crate::env::Resolved;
use crate::error::{AddressError, PeerResult};
use crate::peer::Peer;
use crate::value::Value;

/// A whole-string reference: `&`, `&2`, `&.a.b`, `&0.list.1`.
static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&([0-9]+)?(?:\.(.+))?$").expect("Invalid reference regex")
});

/// An interpolation token: `$[a.b]`, `$1[name]`.
static INTERPOLATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([0-9]+)?\[([^\]]*)\]").expect("Invalid interpolation regex")
});

/// Stands in for the previous result before the first step completes.
static EMPTY: Value = Value::Object(BTreeMap::new());

const PIPE_ONLY_MESSAGE: &str = "PipeOnly function is not allowed; use the pipe call instead";

/// Builds a chain on the calling side.
#[derive(Debug)]
pub struct ChainBuilder {
    peer: Peer,
    steps: Vec<Prepare>,
}

impl ChainBuilder {
    pub(crate) fn new(peer: Peer) -> Self {
        Self {
            peer,
            steps: Vec::new(),
        }
    }

    /// Appends a step. `call` may be a dotted name or a reference; string
    /// leaves of `args` may hold references or interpolation tokens.
    #[must_use]
    pub fn then(mut self, call: &str, args: Json) -> Self {
        self.steps.push(Prepare::new(call, args));
        self
    }

    pub fn steps(&self) -> &[Prepare] {
        &self.steps
    }

    /// Sends the chain and waits for the last step's result.
    ///
    /// With `safe`, failing steps yield an empty mapping and the chain goes
    /// on; otherwise the first failure rejects the whole chain.
    pub async fn send(self, safe: bool) -> PeerResult<Json> {
        self.peer.send_chain(self.steps, safe).await
    }
}

/// Results of the steps completed so far.
#[derive(Debug, Default)]
struct ChainContext {
    results: Vec<Value>,
}

impl ChainContext {
    /// Result `index`, or the previous one when `index` is absent.
    fn base(&self, index: Option<&str>) -> Result<&Value, AddressError> {
        match index {
            None => Ok(self.results.last().unwrap_or(&EMPTY)),
            Some(raw) => {
                let index = raw.parse::<usize>().unwrap_or(usize::MAX);
                self.results
                    .get(index)
                    .ok_or(AddressError::MissingResult { index })
            }
        }
    }

    fn reference(&self, caps: &Captures<'_>) -> Result<Value, AddressError> {
        let base = self.base(caps.get(1).map(|m| m.as_str()))?;
        let path = caps.get(2).map_or("", |m| m.as_str());
        Ok(base.lookup(path)?.cloned().unwrap_or_default())
    }

    fn interpolate(&self, text: &str) -> Result<String, AddressError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in INTERPOLATION_REGEX.captures_iter(text) {
            let Some(token) = caps.get(0) else {
                continue;
            };
            out.push_str(&text[last..token.start()]);
            let base = self.base(caps.get(1).map(|m| m.as_str()))?;
            if let Some(value) = base.lookup(&caps[2])? {
                out.push_str(&value.interpolate());
            }
            last = token.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Resolves one string: a reference yields the addressed value, any
    /// other string has its tokens substituted.
    fn resolve_str(&self, text: &str) -> Result<Value, AddressError> {
        match REFERENCE_REGEX.captures(text) {
            Some(caps) => self.reference(&caps),
            None => Ok(Value::String(self.interpolate(text)?)),
        }
    }

    /// Resolves every string leaf of an argument tree.
    fn resolve_tree(&self, args: &Json) -> Result<Value, AddressError> {
        match args {
            Json::String(text) => self.resolve_str(text),
            Json::Array(items) => items
                .iter()
                .map(|item| self.resolve_tree(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Json::Object(map) => map
                .iter()
                .map(|(key, item)| Ok((key.clone(), self.resolve_tree(item)?)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Value::Object),
            other => Ok(Value::from(other)),
        }
    }

    /// Turns a step's argument tree into positional arguments.
    ///
    /// Lists and keyed mappings are spread (mappings in the sender's key
    /// order). A string that resolves to a mapping is spread too; any other
    /// value is the sole argument.
    fn positional(&self, args: &Json) -> Result<Vec<Value>, AddressError> {
        match args {
            Json::Null => Ok(Vec::new()),
            Json::Array(items) => items.iter().map(|item| self.resolve_tree(item)).collect(),
            Json::Object(map) => map.values().map(|item| self.resolve_tree(item)).collect(),
            Json::String(text) => Ok(match self.resolve_str(text)? {
                Value::Object(map) => map.into_values().collect(),
                value => vec![value],
            }),
            other => Ok(vec![Value::from(other)]),
        }
    }

    fn target(&self, peer: &Peer, call: &str) -> Result<CallableProxy, RemoteError> {
        let proxy = match self.resolve_str(call)? {
            Value::String(name) => match peer.env().get(&name)? {
                Some(Resolved::Callable(proxy)) => Some(proxy),
                _ => None,
            },
            Value::Function(callable) => Some(CallableProxy::detached(callable)),
            _ => None,
        };

        match proxy {
            Some(proxy) if proxy.is_pipe_only() => Err(RemoteError::type_error(PIPE_ONLY_MESSAGE)),
            Some(proxy) => Ok(proxy),
            None => Err(RemoteError::type_error(format!("{call} is not callable"))),
        }
    }

    async fn run_step(&self, peer: &Peer, step: &Prepare) -> Result<Value, RemoteError> {
        let proxy = self.target(peer, &step.call)?;
        let args = self.positional(&step.args)?;
        proxy.apply(peer, args).await
    }
}

/// Runs a chain and returns the last step's result.
///
/// A failing step aborts the chain unless `safe` is set, in which case an
/// empty mapping takes its place. A pipe constructor named as a step
/// target counts as a failing step: it aborts an unsafe chain instead of
/// being rejected while later steps keep running.
pub(crate) async fn resolve_chain(
    peer: &Peer,
    steps: &[Prepare],
    safe: bool,
) -> Result<Value, RemoteError> {
    let mut context = ChainContext::default();
    for (index, step) in steps.iter().enumerate() {
        match context.run_step(peer, step).await {
            Ok(result) => context.results.push(result),
            Err(error) if safe => {
                debug!(step = index, call = %step.call, error = %error.message, "Chain step failed, continuing");
                context.results.push(Value::object());
            }
            Err(error) => {
                debug!(step = index, call = %step.call, error = %error.message, "Chain step failed, aborting");
                return Err(error);
            }
        }
    }
    Ok(context.results.pop().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(results: Vec<Json>) -> ChainContext {
        ChainContext {
            results: results.into_iter().map(Value::from).collect(),
        }
    }

    #[test]
    fn reference_to_previous_result() {
        let ctx = context(vec![json!("first"), json!({"a": {"b": [1, 2]}})]);

        assert_eq!(ctx.resolve_str("&.a.b.1").unwrap(), Value::from(2));
        assert_eq!(ctx.resolve_str("&").unwrap().to_json(), json!({"a": {"b": [1, 2]}}));
        assert_eq!(ctx.resolve_str("&0").unwrap(), Value::from("first"));
        assert_eq!(ctx.resolve_str("&.missing").unwrap(), Value::Null);
    }

    #[test]
    fn reference_out_of_range() {
        let ctx = context(vec![json!(1)]);
        assert_eq!(
            ctx.resolve_str("&9").unwrap_err(),
            AddressError::MissingResult { index: 9 }
        );
    }

    #[test]
    fn reference_before_any_result_is_empty() {
        let ctx = ChainContext::default();
        assert_eq!(ctx.resolve_str("&").unwrap(), Value::object());
        assert_eq!(ctx.resolve_str("&.x").unwrap(), Value::Null);
    }

    #[test]
    fn reference_through_scalar_is_an_error() {
        let ctx = context(vec![json!({"n": 5})]);
        assert!(matches!(
            ctx.resolve_str("&.n.x"),
            Err(AddressError::NotAMapping { .. })
        ));
    }

    #[test]
    fn interpolation_tokens() {
        let ctx = context(vec![
            json!({"user": "zlh"}),
            json!(["Good morning!", {"code": 200}]),
        ]);

        assert_eq!(
            ctx.resolve_str("$[0] $0[user], state: $[1.code]/").unwrap(),
            Value::from("Good morning! zlh, state: 200/")
        );
        assert_eq!(ctx.resolve_str("none: [$[9]]").unwrap(), Value::from("none: []"));
        assert_eq!(ctx.resolve_str("plain text").unwrap(), Value::from("plain text"));
        assert!(ctx.resolve_str("$5[x]").is_err());
    }

    #[test]
    fn interpolation_is_not_a_reference() {
        let ctx = context(vec![json!({"a": 1})]);
        assert_eq!(ctx.resolve_str("x&.a").unwrap(), Value::from("x&.a"));
        assert_eq!(ctx.resolve_str("$[a]").unwrap(), Value::from("1"));
    }

    #[test]
    fn positional_arguments() {
        let ctx = context(vec![json!({"k": "v", "n": 3})]);

        assert_eq!(
            ctx.positional(&json!(["&.k", 1, {"x": "$[n]"}])).unwrap(),
            vec![
                Value::from("v"),
                Value::from(1),
                Value::from(json!({"x": "3"}))
            ]
        );
        assert_eq!(
            ctx.positional(&json!({"z": 1, "a": 2})).unwrap(),
            vec![Value::from(1), Value::from(2)]
        );
        assert_eq!(
            ctx.positional(&json!("&")).unwrap(),
            vec![Value::from("v"), Value::from(3)]
        );
        assert_eq!(ctx.positional(&json!("&.n")).unwrap(), vec![Value::from(3)]);
        assert_eq!(ctx.positional(&json!(7)).unwrap(), vec![Value::from(7)]);
        assert!(ctx.positional(&Json::Null).unwrap().is_empty());
    }
}
