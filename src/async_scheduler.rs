//! Async scheduler: tracks externally-executed units, hands the driver
//! start requests bounded by `max_parallel`, and performs implicit await when
//! an instruction reads a still-pending placeholder (spec §4.5).
//!
//! Grounded on `exec/trace.rs`'s chunked processing loop generalized from a
//! fixed batch size to a parallelism bound; the `AsyncOp` registry itself
//! (pending/running/completed/failed with start/end timestamps) is
//! enrichment from `other_examples/octofhir-otter`'s async execution
//! context, which tracks the same states for scheduled jobs.

use crate::state::{AsyncOp, AsyncOpKind, AsyncOpStatus, AsyncRequest, RuntimeState, StartRequest};
use crate::value::VibeValue;

/// Register a new async operation as `pending`, returning the placeholder
/// [`VibeValue`] to bind in place of the result (spec §4.5 step 1).
pub fn begin_async(
    state: &mut RuntimeState,
    kind: AsyncOpKind,
    variable_name: Option<String>,
    request: AsyncRequest,
) -> VibeValue {
    let id = state.allocate_async_id();
    let frame_index = state.current_frame_index();
    state.async_operations.insert(
        id,
        AsyncOp {
            id,
            kind,
            status: AsyncOpStatus::Pending,
            variable_name,
            frame_index: Some(frame_index),
            request,
            result: None,
            start_ns: 0,
            end_ns: None,
        },
    );
    state.pending_async_ids.insert(id);
    log::trace!(target: "async", "registered op {id} ({kind:?}) as pending");
    VibeValue::pending_async(id)
}

/// Promote queued pending ops to `running` start requests up to
/// `max_parallel` concurrently-running ops, respecting FIFO order among the
/// pending set (spec §4.5: "parallel-start guarantee").
pub fn drain_start_requests(state: &mut RuntimeState) -> Vec<StartRequest> {
    let running_count = state
        .async_operations
        .values()
        .filter(|op| op.status == AsyncOpStatus::Running)
        .count();
    let mut available = state.max_parallel.saturating_sub(running_count);
    if available == 0 {
        return Vec::new();
    }

    let mut starts = Vec::new();
    let pending_ids: Vec<u64> = state.pending_async_ids.iter().copied().collect();
    for id in pending_ids {
        if available == 0 {
            break;
        }
        if let Some(op) = state.async_operations.get_mut(&id) {
            if op.status == AsyncOpStatus::Pending {
                op.status = AsyncOpStatus::Running;
                state.pending_async_ids.remove(&id);
                starts.push(StartRequest { id, kind: op.kind });
                available -= 1;
            }
        }
    }
    state.pending_async_starts.extend(starts.iter().cloned());
    if !starts.is_empty() {
        log::debug!(target: "async", "draining {} start request(s), {available} slot(s) left", starts.len());
    }
    starts
}

/// Record a completed or failed async result (spec §4.5 step 3,
/// `resume_with_async_results`). Binding the result back into the originating
/// frame's local is the driver's job via the returned `(variable_name,
/// frame_index)`, since multiple async ops may complete in one batch.
pub fn complete_async(
    state: &mut RuntimeState,
    id: u64,
    result: VibeValue,
    end_ns: u64,
) -> Option<(Option<String>, Option<crate::frame::FrameIndex>)> {
    let op = state.async_operations.get_mut(&id)?;
    op.status = if result.is_error() { AsyncOpStatus::Failed } else { AsyncOpStatus::Completed };
    op.end_ns = Some(end_ns);
    op.result = Some(result);
    log::trace!(target: "async", "op {id} completed as {:?}", op.status);
    Some((op.variable_name.clone(), op.frame_index))
}

/// Whether reading `value` requires suspending the current step to await its
/// async operation (spec §4.5 step 2: "implicit await").
pub fn needs_await(state: &RuntimeState, value: &VibeValue) -> bool {
    match value.async_operation_id {
        Some(id) => state
            .async_operations
            .get(&id)
            .map(|op| !op.status.is_terminal())
            .unwrap_or(false),
        None => false,
    }
}

/// Resolve a placeholder to its terminal result, if available. Returns
/// `None` while still pending/running — the caller should instead suspend
/// via [`needs_await`].
pub fn resolve(state: &RuntimeState, value: &VibeValue) -> Option<VibeValue> {
    let id = value.async_operation_id?;
    let op = state.async_operations.get(&id)?;
    if op.status.is_terminal() { op.result.clone() } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_state() -> RuntimeState {
        RuntimeState::new(vec![], 2, None)
    }

    #[test]
    fn start_requests_bounded_by_max_parallel() {
        let mut state = fresh_state();
        for _ in 0..5 {
            begin_async(
                &mut state,
                AsyncOpKind::Ai,
                None,
                AsyncRequest::Ai {
                    prompt: "x".into(),
                    model: "m".into(),
                    context: crate::instruction::ContextSpec::Local,
                    op_kind: crate::instruction::AiOpKind::Do,
                },
            );
        }
        let started = drain_start_requests(&mut state);
        assert_eq!(started.len(), 2);
        let still_pending = state.pending_async_ids.len();
        assert_eq!(still_pending, 3);
    }

    #[test]
    fn completion_marks_terminal_and_resolves() {
        let mut state = fresh_state();
        let placeholder = begin_async(
            &mut state,
            AsyncOpKind::Call,
            Some("x".into()),
            AsyncRequest::Call { name: "f".into(), args: vec![] },
        );
        drain_start_requests(&mut state);
        assert!(needs_await(&state, &placeholder));

        let id = placeholder.async_operation_id.unwrap();
        complete_async(&mut state, id, VibeValue::number(42.0), 100);
        assert!(!needs_await(&state, &placeholder));
        assert_eq!(resolve(&state, &placeholder).unwrap().value, crate::value::Payload::Number(42.0));
    }

    #[test]
    fn failed_result_still_terminal() {
        let mut state = fresh_state();
        let placeholder = begin_async(
            &mut state,
            AsyncOpKind::Ts,
            None,
            AsyncRequest::Ts { params: vec![], body: "1".into(), args: vec![] },
        );
        let id = placeholder.async_operation_id.unwrap();
        let err = VibeValue::error(crate::value::VibeError::new(
            crate::value::ErrorKind::HostBlockError,
            "boom",
            crate::instruction::SourceLocation::unknown(),
        ));
        complete_async(&mut state, id, err, 5);
        assert!(state.async_operations.get(&id).unwrap().status == AsyncOpStatus::Failed);
        assert!(state.all_async_ops_terminal());
    }
}
