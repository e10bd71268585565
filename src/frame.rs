//! Lexical call frames and their ordered history entries (spec §3, §9).
//!
//! Grounded on `debug/variables.rs`'s `DebugVarTracker`, which tracks named
//! values observed over time in declaration order; generalized here to the
//! full `FrameEntry` sequence spec §3 describes, plus the "lexical parent as
//! arena index, not pointer" design spec §9 calls for so that
//! [`crate::state::RuntimeState`] stays serializable.

use serde::{Deserialize, Serialize};

use crate::value::{ToolCallRecord, TypeAnnotation, ValueSource, VibeValue};

/// Index into [`FrameArena`]. Frames are append-only within a run and
/// reclaimed only when their owning call returns (spec §9).
pub type FrameIndex = usize;

/// One entry in a frame's ordered history (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FrameEntry {
    Variable {
        name: String,
        value: VibeValue,
        ty: Option<TypeAnnotation>,
        is_const: bool,
        source: Option<ValueSource>,
        is_private: bool,
    },
    Prompt {
        op_kind: crate::instruction::AiOpKind,
        prompt_text: String,
        tool_calls: Vec<ToolCallRecord>,
        response: Option<VibeValue>,
    },
    ScopeEnter {
        scope_kind: crate::instruction::ScopeKind,
        label: Option<String>,
    },
    ScopeExit {
        scope_kind: crate::instruction::ScopeKind,
        label: Option<String>,
    },
    Summary {
        text: String,
    },
    ToolCall {
        name: String,
        args: serde_json::Value,
        result: Option<serde_json::Value>,
        err: Option<crate::value::VibeError>,
    },
}

impl FrameEntry {
    /// Whether this entry must never appear in rendered AI context (spec §4.3).
    pub fn is_private(&self) -> bool {
        matches!(self, FrameEntry::Variable { is_private: true, .. })
    }

    pub fn variable_name(&self) -> Option<&str> {
        match self {
            FrameEntry::Variable { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// A lexical call frame: locals (declaration-ordered), the ordered entry log,
/// and a lexical (not dynamic) parent index so closures can see module
/// globals (spec §3, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    pub name: String,
    pub locals: indexmap::IndexMap<String, VibeValue>,
    pub parent_frame_index: Option<FrameIndex>,
    pub ordered_entries: Vec<FrameEntry>,
    pub module_path: Option<String>,
}

impl StackFrame {
    pub fn new(name: impl Into<String>, parent_frame_index: Option<FrameIndex>) -> Self {
        Self {
            name: name.into(),
            locals: indexmap::IndexMap::new(),
            parent_frame_index,
            ordered_entries: Vec::new(),
            module_path: None,
        }
    }

    pub fn declare(
        &mut self,
        name: impl Into<String>,
        value: VibeValue,
        ty: Option<TypeAnnotation>,
        is_const: bool,
        is_private: bool,
    ) {
        let name = name.into();
        let source = value.source;
        self.locals.insert(name.clone(), value.clone());
        self.ordered_entries.push(FrameEntry::Variable {
            name,
            value,
            ty,
            is_const,
            source,
            is_private,
        });
    }

    /// Mutate an existing binding. Fails if the binding is const (spec §3).
    pub fn assign(&mut self, name: &str, value: VibeValue) -> Result<(), crate::value::ErrorKind> {
        let current_const = self.locals.get(name).map(|v| v.is_const).unwrap_or(false);
        if current_const {
            return Err(crate::value::ErrorKind::ConstAssignError);
        }
        self.locals.insert(name.to_string(), value.clone());
        // Privacy is a property of the declaration, not the value — look up the
        // existing entry's flag and carry it forward (spec §4.3, §9).
        let is_private = self
            .ordered_entries
            .iter()
            .rev()
            .find_map(|e| match e {
                FrameEntry::Variable { name: n, is_private, .. } if n == name => Some(*is_private),
                _ => None,
            })
            .unwrap_or(false);
        let ty = self.ordered_entries.iter().rev().find_map(|e| match e {
            FrameEntry::Variable { name: n, ty, .. } if n == name => ty.clone(),
            _ => None,
        });
        let source = value.source;
        self.ordered_entries.push(FrameEntry::Variable {
            name: name.to_string(),
            value,
            ty,
            is_const: false,
            source,
            is_private,
        });
        Ok(())
    }

    /// Truncate entries added since `entry_index`, restoring locals captured
    /// at that point (used by `forget` context mode and plain block exit).
    pub fn truncate_to(&mut self, entry_index: usize, saved_keys: &[String]) {
        self.ordered_entries.truncate(entry_index);
        let saved: std::collections::HashSet<&str> = saved_keys.iter().map(|s| s.as_str()).collect();
        self.locals.retain(|k, _| saved.contains(k.as_str()));
    }
}

/// The frame arena: append-only storage for lexical frames across a run
/// (spec §9 — "a frame arena", indexed, not referenced by pointer).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameArena {
    frames: Vec<StackFrame>,
}

impl FrameArena {
    pub fn push(&mut self, frame: StackFrame) -> FrameIndex {
        self.frames.push(frame);
        self.frames.len() - 1
    }

    pub fn get(&self, index: FrameIndex) -> Option<&StackFrame> {
        self.frames.get(index)
    }

    pub fn get_mut(&mut self, index: FrameIndex) -> Option<&mut StackFrame> {
        self.frames.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_to_const_fails() {
        let mut frame = StackFrame::new("main", None);
        frame.declare("x", VibeValue::number(1.0).with_const(true), None, true, false);
        let err = frame.assign("x", VibeValue::number(2.0)).unwrap_err();
        assert_eq!(err, crate::value::ErrorKind::ConstAssignError);
    }

    #[test]
    fn assign_drops_private_from_binding_not_value() {
        let mut frame = StackFrame::new("main", None);
        frame.declare("k", VibeValue::text("secret"), None, false, true);
        // assigning k's value into a new, non-private binding drops privacy
        frame.declare("pub_k", VibeValue::text("secret"), None, false, false);
        assert!(frame.ordered_entries[0].is_private());
        assert!(!frame.ordered_entries[1].is_private());
    }

    #[test]
    fn truncate_restores_saved_keys_only() {
        let mut frame = StackFrame::new("main", None);
        let entry_index = frame.ordered_entries.len();
        let saved_keys: Vec<String> = frame.locals.keys().cloned().collect();
        frame.declare("temp", VibeValue::number(1.0), None, false, false);
        assert!(frame.locals.contains_key("temp"));
        frame.truncate_to(entry_index, &saved_keys);
        assert!(!frame.locals.contains_key("temp"));
        assert_eq!(frame.ordered_entries.len(), entry_index);
    }
}
