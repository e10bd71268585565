//! Script↔host handoff controller (spec §4.7).
//!
//! `ts_eval`, imported-`ts` calls, and tool bodies backed by a host block all
//! suspend the same way: the core hands a narrow request to the driver and
//! waits for a `HostEvaluator` to run it out-of-band, exactly like
//! `suspend_for_ai` does for AI calls. Grounded on `exec/host.rs`'s
//! `BaseHost` trait boundary, generalized from a single `advice_injector`
//! callback to the three handoff reasons spec §4.7 names, with
//! `host_call_depth` tracked the way `DebugExecutor` tracks `clk` across
//! nested calls.

use crate::instruction::HandoffReason;
use crate::state::{PendingTs, RuntimeState, Status};
use crate::value::VibeValue;

/// The external host-language contract (spec §6): `evaluate({params, body,
/// args}) -> {value}` for a `ts` block, or `invoke({name, args}) -> {value}`
/// for a tool/import call.
pub trait HostEvaluator {
    fn evaluate(&mut self, request: &HostRequest) -> HostResponse;
}

#[derive(Debug, Clone)]
pub struct HostRequest {
    pub reason: HandoffReason,
    pub params: Vec<String>,
    pub body: String,
    pub args: Vec<VibeValue>,
}

#[derive(Debug, Clone)]
pub struct HostResponse {
    pub value: serde_json::Value,
    pub err: Option<String>,
    pub stack: Option<Vec<String>>,
}

/// Suspend for a host-block evaluation (spec §4.7 step 1). Increments
/// `host_call_depth`-equivalent bookkeeping by pushing onto `pending_ts`;
/// nested handoffs are rejected by the driver rather than tracked here, since
/// the state machine only ever has one pending host request at a time.
pub fn suspend_for_host(state: &mut RuntimeState, params: Vec<String>, body: String, args: Vec<VibeValue>) {
    state.status = Status::AwaitingTs;
    state.pending_ts = Some(PendingTs { params, body, args });
}

/// `resume_with_ts_result(state, value)` (spec §6, §4.7 step 3): converts
/// the host's JSON reply (or captured exception) into a [`VibeValue`] and
/// resumes `running`.
pub fn resume_with_host_result(
    state: &mut RuntimeState,
    response: HostResponse,
) -> Result<VibeValue, crate::errors::RuntimeFault> {
    state.pending_ts.take().ok_or_else(|| crate::errors::RuntimeFault::InternalError {
        message: "resume_with_ts_result called with no pending host request".into(),
        location: crate::instruction::SourceLocation::unknown(),
    })?;

    let result = if let Some(message) = response.err {
        VibeValue::error(crate::value::VibeError {
            message,
            kind: crate::value::ErrorKind::HostBlockError,
            location: crate::instruction::SourceLocation::unknown(),
            stack: response.stack,
        })
    } else {
        json_to_vibe_value(&response.value)
    };

    state.last_result = Some(result.clone());
    state.status = Status::Running;
    Ok(result)
}

fn json_to_vibe_value(value: &serde_json::Value) -> VibeValue {
    match value {
        serde_json::Value::Null => VibeValue::null(),
        serde_json::Value::Bool(b) => VibeValue::boolean(*b),
        serde_json::Value::Number(n) => VibeValue::number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => VibeValue::text(s.clone()),
        serde_json::Value::Array(items) => {
            VibeValue::array(items.iter().map(json_to_vibe_value).collect())
        }
        serde_json::Value::Object(map) => {
            let mut obj = indexmap::IndexMap::new();
            for (k, v) in map {
                obj.insert(k.clone(), json_to_vibe_value(v));
            }
            VibeValue::new(crate::value::Payload::Object(obj))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_state() -> RuntimeState {
        RuntimeState::new(vec![], 4, None)
    }

    #[test]
    fn resume_converts_value_and_clears_pending() {
        let mut state = fresh_state();
        suspend_for_host(&mut state, vec!["x".into()], "return x + 1".into(), vec![VibeValue::number(1.0)]);
        assert_eq!(state.status, Status::AwaitingTs);

        let result = resume_with_host_result(
            &mut state,
            HostResponse { value: serde_json::json!(2.0), err: None, stack: None },
        )
        .unwrap();
        assert_eq!(result.value, crate::value::Payload::Number(2.0));
        assert_eq!(state.status, Status::Running);
        assert!(state.pending_ts.is_none());
    }

    #[test]
    fn resume_with_host_exception_carries_stack() {
        let mut state = fresh_state();
        suspend_for_host(&mut state, vec![], "throw new Error('x')".into(), vec![]);
        let result = resume_with_host_result(
            &mut state,
            HostResponse {
                value: serde_json::json!(null),
                err: Some("x".into()),
                stack: Some(vec!["at <ts>:1:1".into()]),
            },
        )
        .unwrap();
        assert!(result.is_error());
        assert_eq!(result.err.unwrap().stack, Some(vec!["at <ts>:1:1".into()]));
    }
}
