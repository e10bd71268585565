//! The unified, tagged value type that flows through every expression (spec §3).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instruction::SourceLocation;

/// The raw payload carried by a [`VibeValue`].
///
/// Wrapped host objects (model handles, tool sentinels) are represented as
/// [`Payload::Model`] and [`Payload::Tool`] rather than arbitrary host
/// references, so that [`crate::state::RuntimeState`] stays serializable
/// (spec §6: "no host references in `value` except wrapped model/tool
/// sentinels tagged by `__vibe_model`/`__vibe_tool`").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Payload {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Array(Vec<VibeValue>),
    Object(indexmap::IndexMap<String, VibeValue>),
    /// `__vibe_model` sentinel: a named model binding with its accumulated usage log.
    Model(ModelHandle),
    /// `__vibe_tool` sentinel: a bound-method or declared-tool reference.
    Tool(ToolHandle),
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Null => "null",
            Payload::Bool(_) => "boolean",
            Payload::Number(_) => "number",
            Payload::Text(_) => "text",
            Payload::Array(_) => "array",
            Payload::Object(_) => "json",
            Payload::Model(_) => "model",
            Payload::Tool(_) => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHandle {
    pub name: String,
    /// Push-only usage log. Reads via `.usage` return a shallow copy (spec §4.2, §5, §8).
    pub usage_log: Vec<UsageRecord>,
}

impl ModelHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), usage_log: Vec::new() }
    }

    pub fn record_usage(&mut self, usage: UsageRecord) {
        self.usage_log.push(usage);
    }

    /// A defensive copy of the usage log; mutating the result never leaks back (spec §8).
    pub fn usage_snapshot(&self) -> Vec<UsageRecord> {
        self.usage_log.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolHandle {
    pub name: String,
    pub bound_receiver: Option<Box<VibeValue>>,
}

/// An error record carried by a [`VibeValue`] (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeError {
    pub message: String,
    pub kind: ErrorKind,
    pub location: SourceLocation,
    pub stack: Option<Vec<String>>,
}

impl VibeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, location: SourceLocation) -> Self {
        Self { message: message.into(), kind, location, stack: None }
    }
}

impl fmt::Display for VibeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.location)
    }
}

/// The error taxonomy named in spec §7. Distinct from [`crate::errors::RuntimeFault`]:
/// this is the *recoverable* in-language error kind carried by a value, not a fault
/// that terminates the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ParseError,
    SemanticError,
    TypeError,
    ReferenceError,
    RangeError,
    ConstAssignError,
    MissingFieldError,
    AIProviderError,
    HostBlockError,
    CompressError,
    AsyncCanceledError,
    BreakpointError,
    InternalError,
}

/// A single tool invocation performed during a tool-loop AI call (spec §3, §4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub err: Option<VibeError>,
    pub duration_ms: u64,
}

/// Per-request resource accounting attached to an AI response (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: Option<u64>,
    pub thinking_tokens: Option<u64>,
}

/// Declared structural type tag attached to a binding (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeAnnotation {
    Text,
    Number,
    Boolean,
    Json,
    Prompt,
    Model,
    Named(String),
    ArrayOf(Box<TypeAnnotation>),
}

/// Provenance tag attached to a value (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSource {
    Ai,
    User,
}

/// The single in-language value representation (spec §3).
///
/// Invariants upheld by every constructor and operator in this crate:
///  1. `err.is_some() => value is Payload::Null`.
///  2. any scalar operation on a value with `err` set yields a new value
///     carrying the *first* error unchanged.
///  3. `is_const` is copied from the binding into the value for cheap
///     downstream enforcement, but privacy is never stored here (spec §9) —
///     it lives on the owning [`crate::frame::FrameEntry`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibeValue {
    pub value: Payload,
    pub err: Option<VibeError>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: Option<UsageRecord>,
    pub is_const: bool,
    pub type_annotation: Option<TypeAnnotation>,
    pub source: Option<ValueSource>,
    pub async_operation_id: Option<u64>,
}

impl VibeValue {
    pub fn new(value: Payload) -> Self {
        Self {
            value,
            err: None,
            tool_calls: Vec::new(),
            usage: None,
            is_const: false,
            type_annotation: None,
            source: None,
            async_operation_id: None,
        }
    }

    pub fn null() -> Self {
        Self::new(Payload::Null)
    }

    pub fn number(n: f64) -> Self {
        Self::new(Payload::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::new(Payload::Text(s.into()))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(Payload::Bool(b))
    }

    pub fn array(items: Vec<VibeValue>) -> Self {
        Self::new(Payload::Array(items))
    }

    /// Build an error value. Upholds invariant (1): `value` is always `Null`.
    pub fn error(err: VibeError) -> Self {
        Self { err: Some(err), ..Self::new(Payload::Null) }
    }

    pub fn with_const(mut self, is_const: bool) -> Self {
        self.is_const = is_const;
        self
    }

    pub fn with_type(mut self, ty: Option<TypeAnnotation>) -> Self {
        self.type_annotation = ty;
        self
    }

    pub fn with_source(mut self, source: ValueSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn is_error(&self) -> bool {
        self.err.is_some()
    }

    /// A pending placeholder for an async computation (spec §4.5).
    pub fn pending_async(id: u64) -> Self {
        Self { async_operation_id: Some(id), ..Self::new(Payload::Null) }
    }

    pub fn is_pending_async(&self) -> bool {
        self.async_operation_id.is_some()
    }

    /// Reserved member access surfaced on every VibeValue (spec §4.2): `err`,
    /// `errDetails`, `toolCalls`, `usage`. Returns `None` for any other name,
    /// signalling the caller should unwrap and look at the payload instead.
    pub fn reserved_member(&self, name: &str) -> Option<VibeValue> {
        match name {
            "err" => Some(match &self.err {
                Some(e) => VibeValue::text(e.message.clone()),
                None => VibeValue::null(),
            }),
            "errDetails" => Some(match &self.err {
                Some(e) => {
                    let mut obj = indexmap::IndexMap::new();
                    obj.insert("message".to_string(), VibeValue::text(e.message.clone()));
                    obj.insert("kind".to_string(), VibeValue::text(format!("{:?}", e.kind)));
                    obj.insert("location".to_string(), VibeValue::text(e.location.to_string()));
                    VibeValue::new(Payload::Object(obj))
                }
                None => VibeValue::null(),
            }),
            "toolCalls" => {
                let items = self
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        let mut obj = indexmap::IndexMap::new();
                        obj.insert("name".to_string(), VibeValue::text(tc.name.clone()));
                        obj.insert(
                            "duration_ms".to_string(),
                            VibeValue::number(tc.duration_ms as f64),
                        );
                        VibeValue::new(Payload::Object(obj))
                    })
                    .collect();
                Some(VibeValue::array(items))
            }
            "usage" => match &self.value {
                // Defensive copy: mutating the returned array never leaks back
                // into the model handle (spec §4.2, §5, §8).
                Payload::Model(handle) => {
                    let items = handle
                        .usage_snapshot()
                        .into_iter()
                        .map(|u| {
                            let mut obj = indexmap::IndexMap::new();
                            obj.insert("request_id".to_string(), VibeValue::text(u.request_id));
                            obj.insert(
                                "input_tokens".to_string(),
                                VibeValue::number(u.input_tokens as f64),
                            );
                            obj.insert(
                                "output_tokens".to_string(),
                                VibeValue::number(u.output_tokens as f64),
                            );
                            VibeValue::new(Payload::Object(obj))
                        })
                        .collect();
                    Some(VibeValue::array(items))
                }
                _ => Some(match &self.usage {
                    Some(u) => VibeValue::number(u.input_tokens as f64),
                    None => VibeValue::null(),
                }),
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation { file: "test.vibe".into(), line: 1, col: 1 }
    }

    #[test]
    fn error_value_has_null_payload() {
        let v = VibeValue::error(VibeError::new(ErrorKind::TypeError, "bad", loc()));
        assert!(v.is_error());
        assert_eq!(v.value, Payload::Null);
    }

    #[test]
    fn usage_snapshot_is_defensive_copy() {
        let mut handle = ModelHandle::new("gpt");
        handle.record_usage(UsageRecord {
            request_id: "r1".into(),
            input_tokens: 10,
            output_tokens: 5,
            cached_input_tokens: None,
            thinking_tokens: None,
        });
        let model_value = VibeValue::new(Payload::Model(handle));

        let first = model_value.reserved_member("usage").unwrap();
        let mut first = first;
        if let Payload::Array(ref mut items) = first.value {
            items.clear();
        }
        let second = model_value.reserved_member("usage").unwrap();
        assert!(matches!(second.value, Payload::Array(ref items) if items.len() == 1));
    }

    #[test]
    fn reserved_members_cover_err_and_tool_calls() {
        let mut v = VibeValue::number(4.0);
        v.tool_calls.push(ToolCallRecord {
            name: "search".into(),
            args: serde_json::json!({}),
            result: None,
            err: None,
            duration_ms: 12,
        });
        let calls = v.reserved_member("toolCalls").unwrap();
        assert!(matches!(calls.value, Payload::Array(ref items) if items.len() == 1));
        assert_eq!(v.reserved_member("err").unwrap().value, Payload::Null);
    }
}
