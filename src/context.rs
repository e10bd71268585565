//! Context assembly and context-mode policy (spec §4.3).
//!
//! Grounded on `debug/variables.rs::DebugVarTracker::current_variables`,
//! which filters a tracked set down to what's currently visible; generalized
//! here to full-frame entry filtering (privacy) plus the three scope-exit
//! policies (`forget`/`verbose`/`compress`) spec §4.3 names. The `compress`
//! AI-summarization pause is composed with the suspend/resume shape used for
//! AI calls in [`crate::ai`] (enrichment: `other_examples`'s
//! `llmspell-kernel` execution-bridge suspend pattern).

use serde::{Deserialize, Serialize};

use crate::frame::{FrameArena, FrameEntry, FrameIndex};

/// Scope-exit policy chosen for a loop (spec §4.3). Functions always `forget`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContextModeSpec {
    Forget,
    Verbose,
    /// `arg1` disambiguates a literal prompt vs. a named model; `arg2`, if
    /// present, is always the model name.
    Compress { arg1: Option<String>, arg2: Option<String> },
}

/// A single rendered entry in a context view, ready for wire formatting
/// (spec §6: "newline-delimited rendering of `ContextEntry` items").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub kind: &'static str,
    pub text: String,
}

/// The local and global views fed to AI calls (spec §4.3). Private entries
/// are filtered out before these are ever constructed — they never exist in
/// a form that could leak into rendered text.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub local: Vec<ContextEntry>,
    pub global: Vec<ContextEntry>,
}

fn render_entry(entry: &FrameEntry) -> Option<ContextEntry> {
    if entry.is_private() {
        return None;
    }
    let rendered = match entry {
        FrameEntry::Variable { name, value, .. } => ContextEntry {
            kind: "variable",
            text: format!("{name} = {}", render_value(value)),
        },
        FrameEntry::Prompt { prompt_text, response, .. } => ContextEntry {
            kind: "prompt",
            text: match response {
                Some(r) => format!("prompt: {prompt_text}\nresponse: {}", render_value(r)),
                None => format!("prompt: {prompt_text}"),
            },
        },
        FrameEntry::ScopeEnter { scope_kind, label } => ContextEntry {
            kind: "scope_enter",
            text: format!("enter {:?}{}", scope_kind, label.as_deref().unwrap_or("")),
        },
        FrameEntry::ScopeExit { scope_kind, label } => ContextEntry {
            kind: "scope_exit",
            text: format!("exit {:?}{}", scope_kind, label.as_deref().unwrap_or("")),
        },
        FrameEntry::Summary { text } => ContextEntry { kind: "summary", text: text.clone() },
        FrameEntry::ToolCall { name, args, result, err } => ContextEntry {
            kind: "tool_call",
            text: format!(
                "tool {name}({args}) => {}",
                err.as_ref()
                    .map(|e| e.message.clone())
                    .or_else(|| result.as_ref().map(|r| r.to_string()))
                    .unwrap_or_default()
            ),
        },
    };
    Some(rendered)
}

fn render_value(v: &crate::value::VibeValue) -> String {
    if let Some(err) = &v.err {
        return format!("<error: {}>", err.message);
    }
    match &v.value {
        crate::value::Payload::Null => "null".to_string(),
        crate::value::Payload::Bool(b) => b.to_string(),
        crate::value::Payload::Number(n) => n.to_string(),
        crate::value::Payload::Text(s) => s.clone(),
        crate::value::Payload::Array(_) | crate::value::Payload::Object(_) => {
            serde_json::to_string(&v.value).unwrap_or_default()
        }
        crate::value::Payload::Model(m) => format!("<model {}>", m.name),
        crate::value::Payload::Tool(t) => format!("<tool {}>", t.name),
    }
}

/// Rebuild `local_context`/`global_context` ahead of every step (spec §4.2,
/// §4.3). `local_context` is the top frame's entries (private filtered).
/// `global_context` is the module-root frame's entries (private filtered)
/// plus non-top frames in caller order.
pub fn assemble(arena: &FrameArena, call_stack: &[FrameIndex]) -> AssembledContext {
    let mut assembled = AssembledContext::default();

    if let Some(&top) = call_stack.last() {
        if let Some(frame) = arena.get(top) {
            assembled.local = frame.ordered_entries.iter().filter_map(render_entry).collect();
        }
    }

    if let Some(&root) = call_stack.first() {
        if let Some(frame) = arena.get(root) {
            assembled.global.extend(frame.ordered_entries.iter().filter_map(render_entry));
        }
    }
    for &idx in call_stack.iter().skip(1).take(call_stack.len().saturating_sub(2)) {
        if let Some(frame) = arena.get(idx) {
            assembled.global.extend(frame.ordered_entries.iter().filter_map(render_entry));
        }
    }

    assembled
}

/// Render a context view to the stable wire format (spec §6): one line per
/// entry, `kind: text`.
pub fn render_wire(entries: &[ContextEntry]) -> String {
    entries.iter().map(|e| format!("{}: {}", e.kind, e.text)).collect::<Vec<_>>().join("\n")
}

/// Apply a scope-exit context mode to a frame's entries at `entry_index`
/// (spec §4.3). `Compress` is handled by the caller, which must suspend for
/// an AI summarization call before invoking [`apply_compress`].
pub fn apply_forget_or_verbose(
    frame: &mut crate::frame::StackFrame,
    mode: &ContextModeSpec,
    entry_index: usize,
    saved_keys: &[String],
    scope_kind: crate::instruction::ScopeKind,
    label: Option<String>,
) {
    match mode {
        ContextModeSpec::Forget => {
            frame.truncate_to(entry_index, saved_keys);
        }
        ContextModeSpec::Verbose => {
            frame.ordered_entries.push(FrameEntry::ScopeExit { scope_kind, label });
        }
        ContextModeSpec::Compress { .. } => unreachable!("compress handled separately"),
    }
}

/// Atomically replace `[entry_index..]` with a single summary, then append a
/// `scope_exit` marker (spec §4.3 "Compress resumption" design note).
/// Compressing an empty scope is a no-op.
pub fn apply_compress(
    frame: &mut crate::frame::StackFrame,
    entry_index: usize,
    summary_text: String,
    scope_kind: crate::instruction::ScopeKind,
    label: Option<String>,
) {
    if entry_index >= frame.ordered_entries.len() {
        return;
    }
    frame.ordered_entries.truncate(entry_index);
    frame.ordered_entries.push(FrameEntry::Summary { text: summary_text });
    frame.ordered_entries.push(FrameEntry::ScopeExit { scope_kind, label });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StackFrame;
    use crate::value::VibeValue;

    #[test]
    fn private_entries_never_render() {
        let mut frame = StackFrame::new("main", None);
        frame.declare("k", VibeValue::text("secret"), None, false, true);
        frame.declare("pub", VibeValue::text("hello"), None, false, false);
        let rendered: Vec<_> = frame.ordered_entries.iter().filter_map(render_entry).collect();
        let wire = render_wire(&rendered);
        assert!(!wire.contains('k'));
        assert!(!wire.contains("secret"));
        assert!(wire.contains("hello"));
    }

    #[test]
    fn forget_on_empty_scope_is_noop_except_marker() {
        let mut frame = StackFrame::new("main", None);
        let entry_index = frame.ordered_entries.len();
        let saved_keys: Vec<String> = frame.locals.keys().cloned().collect();
        apply_forget_or_verbose(
            &mut frame,
            &ContextModeSpec::Forget,
            entry_index,
            &saved_keys,
            crate::instruction::ScopeKind::For,
            None,
        );
        assert_eq!(frame.ordered_entries.len(), entry_index);
    }

    #[test]
    fn compress_empty_scope_is_noop() {
        let mut frame = StackFrame::new("main", None);
        let entry_index = frame.ordered_entries.len();
        apply_compress(
            &mut frame,
            entry_index,
            "summary".into(),
            crate::instruction::ScopeKind::For,
            None,
        );
        assert_eq!(frame.ordered_entries.len(), entry_index);
    }
}
