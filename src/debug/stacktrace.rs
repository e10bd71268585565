//! Stack/scope/variable inspection protocol (spec §5.4, §6).
//!
//! Grounded on `debug/stacktrace.rs`'s `CallStack`/`CallFrame`/`StackTrace`
//! (one entry per active call, resolved to a source location); generalized
//! from MAST call frames to this core's [`crate::frame::StackFrame`] arena,
//! with `variables_reference` numbering added as enrichment from
//! `other_examples`'s DAP-shaped session protocols (`lexlapax-rs-llmspell`).

use serde::{Deserialize, Serialize};

use crate::frame::{FrameArena, FrameIndex};
use crate::instruction::SourceLocation;
use crate::value::VibeValue;

/// One entry in a stack trace (spec §5.4): a frame's name and the location
/// it's currently suspended at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrameSummary {
    pub frame_index: FrameIndex,
    pub name: String,
    pub location: SourceLocation,
}

/// Full call-stack snapshot, innermost frame first (spec §5.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackTrace {
    pub frames: Vec<StackFrameSummary>,
}

pub fn build_stack_trace(arena: &FrameArena, call_stack: &[FrameIndex], current_location: SourceLocation) -> StackTrace {
    let mut frames = Vec::with_capacity(call_stack.len());
    for (i, &idx) in call_stack.iter().rev().enumerate() {
        if let Some(frame) = arena.get(idx) {
            let location = if i == 0 { current_location.clone() } else { SourceLocation::unknown() };
            frames.push(StackFrameSummary { frame_index: idx, name: frame.name.clone(), location });
        }
    }
    StackTrace { frames }
}

/// A scope exposed for a given stack frame: `local` and `global`, matching
/// the two context views spec §4.3 assembles (spec §5.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub name: &'static str,
    pub variables_reference: u64,
    pub frame_index: FrameIndex,
}

/// Encode `(frame_index, is_global)` into the flat reference id the `variables`
/// query takes, and decode it back (spec §6: "`variables_reference`
/// numbering"). Global scopes get an odd id, local scopes an even one, so a
/// single frame index maps to two distinct references without a side table.
pub fn scope_reference(frame_index: FrameIndex, is_global: bool) -> u64 {
    let base = (frame_index as u64) << 1;
    if is_global { base | 1 } else { base }
}

pub fn decode_scope_reference(reference: u64) -> (FrameIndex, bool) {
    ((reference >> 1) as FrameIndex, reference & 1 == 1)
}

pub fn scopes_for_frame(frame_index: FrameIndex) -> Vec<Scope> {
    vec![
        Scope { name: "local", variables_reference: scope_reference(frame_index, false), frame_index },
        Scope { name: "global", variables_reference: scope_reference(frame_index, true), frame_index },
    ]
}

/// One named value returned by a `variables` query (spec §5.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableEntry {
    pub name: String,
    pub value: VibeValue,
}

/// Resolve the variables visible for a scope reference (spec §5.4). `local`
/// is the frame's own locals; `global` walks the lexical parent chain,
/// flattening each ancestor's locals with closer frames shadowing.
pub fn variables_for_reference(arena: &FrameArena, reference: u64) -> Vec<VariableEntry> {
    let (frame_index, is_global) = decode_scope_reference(reference);
    let Some(frame) = arena.get(frame_index) else { return Vec::new() };

    if !is_global {
        return frame.locals.iter().map(|(name, value)| VariableEntry { name: name.clone(), value: value.clone() }).collect();
    }

    let mut seen = std::collections::BTreeMap::new();
    let mut idx = frame.parent_frame_index;
    while let Some(i) = idx {
        let Some(ancestor) = arena.get(i) else { break };
        for (name, value) in &ancestor.locals {
            seen.entry(name.clone()).or_insert_with(|| value.clone());
        }
        idx = ancestor.parent_frame_index;
    }
    seen.into_iter().map(|(name, value)| VariableEntry { name, value }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StackFrame;

    #[test]
    fn scope_reference_roundtrips() {
        let r = scope_reference(7, true);
        assert_eq!(decode_scope_reference(r), (7, true));
        let r = scope_reference(7, false);
        assert_eq!(decode_scope_reference(r), (7, false));
    }

    #[test]
    fn local_variables_only_own_frame() {
        let mut arena = FrameArena::default();
        let root = arena.push(StackFrame::new("<module>", None));
        arena.get_mut(root).unwrap().declare("g", VibeValue::number(1.0), None, false, false);
        let child = arena.push(StackFrame::new("f", Some(root)));
        arena.get_mut(child).unwrap().declare("x", VibeValue::number(2.0), None, false, false);

        let local = variables_for_reference(&arena, scope_reference(child, false));
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].name, "x");

        let global = variables_for_reference(&arena, scope_reference(child, true));
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].name, "g");
    }
}
