//! The debug controller: breakpoints, stepping modes, and watch expressions
//! layered over the stepper (spec §5).
//!
//! Grounded on `debug/mod.rs`'s `Breakpoint`/`StackTrace` re-exports plus the
//! REPL's `run_until_stopped` breakpoint-checking loop in
//! `repl/session.rs::ReplSession::run_until_stopped`, generalized from
//! VM-cycle/procedure checks to source-location/function/exception checks
//! and a `StepMode` enum instead of one-shot `Next`/`Finish` breakpoints.

mod breakpoint;
mod stacktrace;
mod watch;

pub use breakpoint::{Breakpoint, BreakpointType, HitCondition};
pub use stacktrace::{
    Scope, StackFrameSummary, StackTrace, VariableEntry, build_stack_trace, decode_scope_reference,
    scope_reference, scopes_for_frame, variables_for_reference,
};
pub use watch::WatchExpression;

use crate::ast::Expr;
use crate::frame::FrameIndex;
use crate::instruction::SourceLocation;
use crate::state::RuntimeState;

/// How the debugger wants the next `run_until_pause` to behave (spec §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMode {
    /// No stepping constraint: run to completion, suspension, or breakpoint.
    #[default]
    None,
    /// Stop at the next statement, descending into calls.
    Into,
    /// Stop at the next statement in the same or an enclosing frame.
    Over { starting_depth: usize },
    /// Stop only after the current frame returns.
    Out { target_depth: usize },
}

/// Owns breakpoints, watches, and the active step mode; consulted by the
/// driver after each `step()` to decide whether to keep running (spec §5).
#[derive(Debug, Default)]
pub struct DebugController {
    breakpoints: Vec<Breakpoint>,
    watches: Vec<WatchExpression>,
    next_breakpoint_id: u32,
    next_watch_id: u32,
    pub step_mode: StepMode,
}

impl DebugController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_breakpoint(&mut self, ty: BreakpointType) -> u32 {
        let id = self.next_breakpoint_id;
        self.next_breakpoint_id += 1;
        self.breakpoints.push(Breakpoint::new(id, ty));
        id
    }

    pub fn clear_breakpoint(&mut self, id: u32) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|bp| bp.id != id);
        self.breakpoints.len() != before
    }

    pub fn clear_all_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    /// Replace every line breakpoint in `file` with one freshly-assigned
    /// breakpoint per entry in `lines`, each paired positionally with
    /// `conditions` if given (spec §6 `set_breakpoints`). Issuing the same
    /// `(file, lines)` pair twice yields an equal breakpoint set rather than
    /// accumulating duplicates (spec §8 round-trip property).
    pub fn set_breakpoints(&mut self, file: &str, lines: &[u32], conditions: Option<&[Option<Expr>]>) -> Vec<Breakpoint> {
        self.breakpoints.retain(|bp| !matches!(&bp.ty, BreakpointType::Line { file: f, .. } if f == file));
        let mut created = Vec::with_capacity(lines.len());
        for (i, &line) in lines.iter().enumerate() {
            let id = self.next_breakpoint_id;
            self.next_breakpoint_id += 1;
            let mut bp = Breakpoint::new(id, BreakpointType::Line { file: file.to_string(), line });
            bp.condition = conditions.and_then(|c| c.get(i)).cloned().flatten();
            self.breakpoints.push(bp.clone());
            created.push(bp);
        }
        created
    }

    /// Remove every line breakpoint set on `file` (spec §6 `clear_breakpoints`).
    pub fn clear_breakpoints(&mut self, file: &str) {
        self.breakpoints.retain(|bp| !matches!(&bp.ty, BreakpointType::Line { file: f, .. } if f == file));
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn add_watch(&mut self, expr: impl Into<String>) -> u32 {
        let id = self.next_watch_id;
        self.next_watch_id += 1;
        self.watches.push(WatchExpression::new(id, expr));
        id
    }

    pub fn remove_watch(&mut self, id: u32) {
        self.watches.retain(|w| w.id != id);
    }

    pub fn watches(&self) -> &[WatchExpression] {
        &self.watches
    }

    pub fn watches_mut(&mut self) -> &mut [WatchExpression] {
        &mut self.watches
    }

    /// Whether execution sitting at `location`/`function` in a frame at
    /// `depth` should pause (spec §5.1, §5.2): a matching breakpoint whose
    /// `condition` (if any) evaluates truthy against `state`'s current frame
    /// and whose hit-count gate passes, or the active step mode being
    /// satisfied. A log-message breakpoint logs its rendered template and
    /// never pauses, independent of whether its gate passes.
    pub fn should_pause(&mut self, state: &RuntimeState, location: &SourceLocation, function: &str, depth: usize) -> bool {
        let mut hit = false;
        for bp in &mut self.breakpoints {
            let matches = bp.matches_location(location) || bp.matches_function(function);
            if !matches {
                continue;
            }
            let condition_passes = match &bp.condition {
                Some(expr) => matches!(
                    crate::stepper::eval_expr_sync(state, expr, location).map(|v| v.value),
                    Ok(crate::value::Payload::Bool(true))
                ),
                None => true,
            };
            if !condition_passes {
                continue;
            }
            bp.hit_count += 1;
            if !bp.hit_condition_satisfied() {
                continue;
            }
            if let Some(parts) = &bp.log_message {
                match crate::stepper::render_template_sync(state, parts, location) {
                    Ok(message) => log::info!(target: "debug", "{message}"),
                    Err(fault) => log::debug!(target: "debug", "log breakpoint template failed: {fault}"),
                }
                continue;
            }
            hit = true;
        }
        if hit {
            log::debug!(target: "debug", "breakpoint hit at {}:{} in {function}", location.file, location.line);
            self.step_mode = StepMode::None;
            return true;
        }

        match self.step_mode {
            StepMode::None => false,
            StepMode::Into => true,
            StepMode::Over { starting_depth } => depth <= starting_depth,
            StepMode::Out { target_depth } => depth <= target_depth,
        }
    }

    /// Whether an uncaught runtime fault of `kind` should pause rather than
    /// terminate the run (spec §5.1 "exception breakpoints").
    pub fn should_pause_on_exception(&mut self, kind: &str) -> bool {
        self.breakpoints.iter_mut().any(|bp| bp.matches_exception(kind) && bp.record_hit())
    }

    pub fn set_step_into(&mut self) {
        self.step_mode = StepMode::Into;
    }

    pub fn set_step_over(&mut self, current_depth: usize) {
        self.step_mode = StepMode::Over { starting_depth: current_depth };
    }

    pub fn set_step_out(&mut self, current_depth: usize) {
        self.step_mode = StepMode::Out { target_depth: current_depth.saturating_sub(1) };
    }

    pub fn clear_step_mode(&mut self) {
        self.step_mode = StepMode::None;
    }
}

/// Re-evaluate every registered watch expression against the current frame
/// chain (spec §5.3). Unresolvable paths (undeclared root, missing member)
/// leave `last_value` untouched rather than erroring — watches are a
/// best-effort inspection aid, not part of the executed program.
pub fn refresh_watches(controller: &mut DebugController, arena: &crate::frame::FrameArena, current: FrameIndex) {
    for watch in controller.watches.iter_mut() {
        let (root, chain) = watch.path();
        if let Some(mut value) = lookup_in_chain(arena, current, root) {
            for member in chain {
                value = value.reserved_member(member).or_else(|| match &value.value {
                    crate::value::Payload::Object(obj) => obj.get(member).cloned(),
                    _ => None,
                }).unwrap_or_else(crate::value::VibeValue::null);
            }
            watch.last_value = Some(value);
        }
    }
}

fn lookup_in_chain(arena: &crate::frame::FrameArena, start: FrameIndex, name: &str) -> Option<crate::value::VibeValue> {
    let mut idx = Some(start);
    while let Some(i) = idx {
        let frame = arena.get(i)?;
        if let Some(v) = frame.locals.get(name) {
            return Some(v.clone());
        }
        idx = frame.parent_frame_index;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_over_pauses_only_at_same_or_shallower_depth() {
        let mut ctrl = DebugController::new();
        ctrl.set_step_over(2);
        let state = RuntimeState::new(vec![], 1, None);
        let loc = SourceLocation::unknown();
        assert!(!ctrl.should_pause(&state, &loc, "f", 3));
        assert!(ctrl.should_pause(&state, &loc, "f", 2));
    }

    #[test]
    fn breakpoint_hit_clears_step_mode() {
        let mut ctrl = DebugController::new();
        ctrl.set_breakpoint(BreakpointType::Line { file: "a.vibe".into(), line: 5 });
        ctrl.set_step_over(10);
        let state = RuntimeState::new(vec![], 1, None);
        let loc = SourceLocation { file: "a.vibe".into(), line: 5, col: 0 };
        assert!(ctrl.should_pause(&state, &loc, "f", 0));
        assert_eq!(ctrl.step_mode, StepMode::None);
    }

    #[test]
    fn condition_false_suppresses_breakpoint() {
        let mut ctrl = DebugController::new();
        let mut bp = Breakpoint::new(0, BreakpointType::Line { file: "a.vibe".into(), line: 5 });
        bp.condition = Some(Expr::Literal(crate::value::VibeValue::boolean(false)));
        ctrl.breakpoints.push(bp);
        ctrl.next_breakpoint_id = 1;
        let state = RuntimeState::new(vec![], 1, None);
        let loc = SourceLocation { file: "a.vibe".into(), line: 5, col: 0 };
        assert!(!ctrl.should_pause(&state, &loc, "f", 0));
    }

    #[test]
    fn condition_true_allows_breakpoint() {
        let mut ctrl = DebugController::new();
        let mut bp = Breakpoint::new(0, BreakpointType::Line { file: "a.vibe".into(), line: 5 });
        bp.condition = Some(Expr::Literal(crate::value::VibeValue::boolean(true)));
        ctrl.breakpoints.push(bp);
        ctrl.next_breakpoint_id = 1;
        let state = RuntimeState::new(vec![], 1, None);
        let loc = SourceLocation { file: "a.vibe".into(), line: 5, col: 0 };
        assert!(ctrl.should_pause(&state, &loc, "f", 0));
    }

    #[test]
    fn set_breakpoints_replaces_rather_than_accumulates() {
        let mut ctrl = DebugController::new();
        let first = ctrl.set_breakpoints("a.vibe", &[1, 2], None);
        assert_eq!(first.len(), 2);
        let second = ctrl.set_breakpoints("a.vibe", &[1, 2], None);
        assert_eq!(second.len(), 2);
        assert_eq!(ctrl.breakpoints().len(), 2);
    }

    #[test]
    fn log_message_breakpoint_never_pauses_but_counts_hits() {
        let mut ctrl = DebugController::new();
        let mut bp = Breakpoint::new(0, BreakpointType::Line { file: "a.vibe".into(), line: 5 });
        bp.log_message = Some(vec![crate::instruction::TemplatePart::Literal("hit".into())]);
        ctrl.breakpoints.push(bp);
        ctrl.next_breakpoint_id = 1;
        let state = RuntimeState::new(vec![], 1, None);
        let loc = SourceLocation { file: "a.vibe".into(), line: 5, col: 0 };
        assert!(!ctrl.should_pause(&state, &loc, "f", 0));
        assert_eq!(ctrl.breakpoints()[0].hit_count, 1);
    }

    #[test]
    fn clear_breakpoints_removes_only_matching_file() {
        let mut ctrl = DebugController::new();
        ctrl.set_breakpoints("a.vibe", &[1], None);
        ctrl.set_breakpoints("b.vibe", &[2], None);
        ctrl.clear_breakpoints("a.vibe");
        assert_eq!(ctrl.breakpoints().len(), 1);
        assert_eq!(ctrl.breakpoints()[0].ty, BreakpointType::Line { file: "b.vibe".into(), line: 2 });
    }
}
