//! The external driver API (spec §6): the boundary a host program uses to
//! create a run, advance it, resume suspended AI/host/async/compress
//! requests, and inspect it for debugging.
//!
//! Grounded on `exec/executor.rs`'s `DebugExecutor`, which is the single
//! object a REPL or test harness holds and calls `step`/`run`/breakpoint
//! management on; generalized here from a VM-cycle loop to this core's
//! suspend/resume points, with `resume_with_*` replacing the VM's host
//! callback injection.

use crate::ast::{Expr, Stmt};
use crate::debug::{self, Breakpoint, BreakpointType, DebugController, Scope, StackTrace, VariableEntry};
use crate::errors::RuntimeFault;
use crate::instruction::SourceLocation;
use crate::state::{AsyncOpKind, RuntimeState, Status, StartRequest};
use crate::value::VibeValue;

/// Build the initial state for a compiled program (spec §3, §6).
pub fn create_initial_state(program: Vec<Stmt>, max_parallel: usize, root_dir: Option<String>) -> RuntimeState {
    RuntimeState::new(program, max_parallel, root_dir)
}

pub fn step(state: RuntimeState) -> RuntimeState {
    crate::stepper::step(state)
}

pub fn step_n(state: RuntimeState, n: usize) -> RuntimeState {
    crate::stepper::step_n(state, n)
}

/// Run without any debug controller attached (spec §4 core loop): advances
/// until the machine leaves `running`.
pub fn run_until_pause(state: RuntimeState) -> RuntimeState {
    crate::stepper::run_until_pause(state)
}

/// Run under a [`DebugController`]: stops at breakpoints, on an active step
/// mode being satisfied, or when the machine suspends/terminates on its own
/// (spec §5.2).
pub fn run_debug(mut state: RuntimeState, controller: &mut DebugController) -> RuntimeState {
    loop {
        if state.status != Status::Running {
            return state;
        }
        let Some(next) = state.instruction_stack.last() else {
            return crate::stepper::step(state);
        };
        let location = next.location.clone();
        let function = state.current_frame().name.clone();
        let depth = state.call_stack.len();

        if controller.should_pause(&state, &location, &function, depth) {
            state.status = Status::Paused;
            return state;
        }

        state = crate::stepper::step(state);

        if state.status == Status::Error {
            let kind = state.error.as_deref().unwrap_or("unknown").to_string();
            if controller.should_pause_on_exception(&kind) {
                state.status = Status::Paused;
            }
            return state;
        }
    }
}

pub fn pause(state: &mut RuntimeState) {
    if state.status == Status::Running {
        state.status = Status::Paused;
    }
}

pub fn resume_execution(state: &mut RuntimeState) {
    if state.status == Status::Paused {
        state.status = Status::Running;
    }
}

pub fn resume_with_ai_response(state: &mut RuntimeState, response: crate::ai::AiResponse) -> Result<(), RuntimeFault> {
    crate::ai::resume_with_ai_response(state, response)
}

pub fn resume_with_ts_result(state: &mut RuntimeState, response: crate::handoff::HostResponse) -> Result<VibeValue, RuntimeFault> {
    crate::handoff::resume_with_host_result(state, response)
}

/// Drain pending async starts, bounded by `max_parallel` (spec §4.5 step
/// "parallel-start guarantee"). The caller is responsible for actually
/// dispatching each [`StartRequest`] and eventually calling
/// [`resume_with_async_results`].
pub fn drain_async_starts(state: &mut RuntimeState) -> Vec<StartRequest> {
    crate::async_scheduler::drain_start_requests(state)
}

/// A completed or failed async result ready to bind back (spec §4.5 step 3,
/// `resume_with_async_results`).
pub struct AsyncCompletion {
    pub id: u64,
    pub result: VibeValue,
    pub end_ns: u64,
}

/// Apply a batch of async completions: marks each op terminal, and for any
/// whose originating `Let`/`Async` declared a binding, rewrites that binding
/// in place (spec §4.5 step 3). If the only thing blocking progress was
/// `awaiting_async`, resumes `running`.
pub fn resume_with_async_results(state: &mut RuntimeState, completions: Vec<AsyncCompletion>) {
    for completion in completions {
        if let Some((variable_name, frame_index)) =
            crate::async_scheduler::complete_async(state, completion.id, completion.result.clone(), completion.end_ns)
        {
            if let (Some(name), Some(idx)) = (variable_name, frame_index) {
                if let Some(frame) = state.frame_arena.get_mut(idx) {
                    if frame.locals.contains_key(&name) {
                        let _ = frame.assign(&name, completion.result);
                    }
                }
            }
        }
        state.awaiting_async_ids.retain(|id| *id != completion.id);
    }
    if state.status == Status::AwaitingAsync && state.awaiting_async_ids.is_empty() {
        state.status = Status::Running;
    }
}

/// Resume a suspended `compress` scope exit with the AI-generated summary
/// text (spec §4.3 "Compress resumption"). Atomically replaces the scope's
/// entries with a single `Summary` entry, as [`crate::context::apply_compress`]
/// describes.
pub fn resume_with_compress(state: &mut RuntimeState, summary_text: String) -> Result<(), RuntimeFault> {
    let pending = state.pending_compress.take().ok_or_else(|| RuntimeFault::InternalError {
        message: "resume_with_compress called with no pending compress request".into(),
        location: SourceLocation::unknown(),
    })?;
    let Some(frame) = state.frame_arena.get_mut(pending.frame_index) else {
        return Err(RuntimeFault::InternalError {
            message: "compress target frame no longer exists".into(),
            location: SourceLocation::unknown(),
        });
    };
    crate::context::apply_compress(frame, pending.entry_index, summary_text, pending.scope_kind, pending.label);
    state.status = Status::Running;
    Ok(())
}

pub fn set_breakpoint(controller: &mut DebugController, ty: BreakpointType) -> u32 {
    controller.set_breakpoint(ty)
}

pub fn clear_breakpoint(controller: &mut DebugController, id: u32) -> bool {
    controller.clear_breakpoint(id)
}

/// Replace every line breakpoint on `file` with fresh ones at `lines` (spec
/// §6 `set_breakpoints`); issuing the same call twice yields an equal
/// breakpoint set rather than accumulating duplicates (spec §8).
pub fn set_breakpoints(controller: &mut DebugController, file: &str, lines: &[u32], conditions: Option<&[Option<Expr>]>) -> Vec<Breakpoint> {
    controller.set_breakpoints(file, lines, conditions)
}

/// Remove every line breakpoint set on `file` (spec §6 `clear_breakpoints`).
pub fn clear_breakpoints(controller: &mut DebugController, file: &str) {
    controller.clear_breakpoints(file)
}

pub fn get_stack_trace(state: &RuntimeState) -> StackTrace {
    let location = state.instruction_stack.last().map(|i| i.location.clone()).unwrap_or_else(SourceLocation::unknown);
    debug::build_stack_trace(&state.frame_arena, &state.call_stack, location)
}

pub fn get_scopes(state: &RuntimeState, frame_index: crate::frame::FrameIndex) -> Vec<Scope> {
    let _ = state;
    debug::scopes_for_frame(frame_index)
}

pub fn get_variables(state: &RuntimeState, variables_reference: u64) -> Vec<VariableEntry> {
    debug::variables_for_reference(&state.frame_arena, variables_reference)
}

pub fn async_kind_of(state: &RuntimeState, id: u64) -> Option<AsyncOpKind> {
    state.async_operations.get(&id).map(|op| op.kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn run_debug_pauses_at_breakpoint_line() {
        let program = vec![
            Stmt::Let { name: "a".into(), is_const: false, is_private: false, ty: None, value: Expr::Literal(VibeValue::number(1.0)) },
            Stmt::Let { name: "b".into(), is_const: false, is_private: false, ty: None, value: Expr::Literal(VibeValue::number(2.0)) },
        ];
        let mut state = create_initial_state(program, 4, None);
        let mut controller = DebugController::new();
        // first statement has unknown location (no parser in this core), so
        // break on the function "<module>" itself to confirm the gate fires.
        controller.set_breakpoint(BreakpointType::Function("<module>".into()));
        state = run_debug(state, &mut controller);
        assert_eq!(state.status, Status::Paused);
    }

    #[test]
    fn resume_with_async_results_rebinds_variable() {
        let program = vec![];
        let mut state = create_initial_state(program, 4, None);
        let placeholder = crate::async_scheduler::begin_async(
            &mut state,
            AsyncOpKind::Call,
            Some("x".into()),
            crate::state::AsyncRequest::Call { name: "f".into(), args: vec![] },
        );
        state.current_frame_mut().declare("x", placeholder.clone(), None, false, false);
        state.status = Status::AwaitingAsync;
        state.awaiting_async_ids.push(placeholder.async_operation_id.unwrap());

        resume_with_async_results(&mut state, vec![AsyncCompletion {
            id: placeholder.async_operation_id.unwrap(),
            result: VibeValue::number(99.0),
            end_ns: 10,
        }]);

        assert_eq!(state.status, Status::Running);
        let x = state.current_frame().locals.get("x").unwrap();
        assert_eq!(x.value, crate::value::Payload::Number(99.0));
    }
}
