//! AI suspend/resume protocol (spec §4.4, §6).
//!
//! Grounded on `exec/host.rs`'s `BaseHost`/`SyncHost` split: the core never
//! talks to the outside world directly, it suspends and hands a narrow,
//! serializable request to a trait the driver implements. Tool-loop
//! vocabulary (`tool_rounds`, rounds of `{calls, results}`) is enrichment
//! from `other_examples`'s `YumchaLabs-siumai` orchestrator and
//! `lexlapax-rs-llmspell` debug-session naming.

use serde::{Deserialize, Serialize};

use crate::instruction::AiOpKind;
use crate::state::{PendingAi, RuntimeState, Status};
use crate::value::{UsageRecord, ValueSource, VibeValue};

/// One round of a tool-loop AI call: the tool calls the model requested, and
/// their results (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRound {
    pub calls: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub args: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub err: Option<String>,
    pub duration_ms: u64,
}

/// The external AI provider contract (spec §6):
/// `execute({prompt, context_text, tool_schemas?, expected_shape?}) ->
/// {value, tool_rounds?, usage?}`.
pub trait AiProvider {
    fn execute(&mut self, request: &AiRequest) -> AiResponse;
}

#[derive(Debug, Clone)]
pub struct AiRequest {
    pub prompt: String,
    pub context_text: String,
    pub model: String,
    pub op_kind: AiOpKind,
    pub tool_schemas: Vec<serde_json::Value>,
    pub expected_shape: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct AiResponse {
    pub value: serde_json::Value,
    pub tool_rounds: Vec<ToolRound>,
    pub usage: Option<UsageRecord>,
    pub err: Option<String>,
}

/// Begin an AI call: gather the request, transition to `awaiting_ai`, and
/// record it as `pending_ai` (spec §4.4 steps 1-2). The driver is
/// responsible for steps 3-5 (invoking the provider and any nested tool
/// handoffs), then calling [`resume_with_ai_response`].
pub fn suspend_for_ai(
    state: &mut RuntimeState,
    prompt: String,
    model: String,
    context: crate::instruction::ContextSpec,
    op_kind: AiOpKind,
    expected_fields: Option<Vec<String>>,
) {
    state.status = Status::AwaitingAi;
    state.pending_ai = Some(PendingAi { kind: op_kind, prompt, model, context, expected_fields });
}

/// Convert a JSON value returned by the provider into a [`VibeValue`],
/// honoring a declared/expected structural shape where present.
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

/// `resume_with_ai_response(state, value, tool_rounds?, usage?)` (spec §6,
/// §4.4 step 6): constructs a VibeValue with `source=ai`, attaches tool
/// calls and per-request usage, pushes a `prompt{…,response}` entry, updates
/// the model's accumulated usage log, and transitions back to `running`.
pub fn resume_with_ai_response(
    state: &mut RuntimeState,
    response: AiResponse,
) -> Result<(), crate::errors::RuntimeFault> {
    let pending = state.pending_ai.take().ok_or_else(|| crate::errors::RuntimeFault::InternalError {
        message: "resume_with_ai_response called with no pending AI request".into(),
        location: crate::instruction::SourceLocation::unknown(),
    })?;

    let mut result = if let Some(err_msg) = response.err {
        VibeValue::error(crate::value::VibeError::new(
            crate::value::ErrorKind::AIProviderError,
            err_msg,
            crate::instruction::SourceLocation::unknown(),
        ))
    } else {
        json_to_vibe_value(&response.value).with_source(ValueSource::Ai)
    };

    let tool_calls: Vec<crate::value::ToolCallRecord> = response
        .tool_rounds
        .iter()
        .flat_map(|round| round.calls.iter())
        .map(|call| crate::value::ToolCallRecord {
            name: call.name.clone(),
            args: call.args.clone(),
            result: call.result.clone(),
            err: call.err.as_ref().map(|msg| {
                crate::value::VibeError::new(
                    crate::value::ErrorKind::AIProviderError,
                    msg.clone(),
                    crate::instruction::SourceLocation::unknown(),
                )
            }),
            duration_ms: call.duration_ms,
        })
        .collect();
    result.tool_calls = tool_calls.clone();
    result.usage = response.usage.clone();

    state.current_frame_mut().ordered_entries.push(crate::frame::FrameEntry::Prompt {
        op_kind: pending.kind,
        prompt_text: pending.prompt,
        tool_calls,
        response: Some(result.clone()),
    });

    if let Some(usage) = response.usage {
        record_model_usage(state, &pending.model, usage);
    }
    state.last_used_model = Some(pending.model);
    state.last_result = Some(result);
    state.status = Status::Running;
    Ok(())
}

fn record_model_usage(state: &mut RuntimeState, model_name: &str, usage: UsageRecord) {
    for idx in 0..state.frame_arena.len() {
        if let Some(frame) = state.frame_arena.get_mut(idx) {
            if let Some(existing) = frame.locals.get_mut(model_name) {
                if let crate::value::Payload::Model(handle) = &mut existing.value {
                    handle.record_usage(usage);
                    return;
                }
            }
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
    fn resume_attaches_source_and_tool_calls() {
        let mut state = fresh_state();
        suspend_for_ai(
            &mut state,
            "what is 2+2?".into(),
            "m".into(),
            crate::instruction::ContextSpec::Local,
            AiOpKind::Do,
            None,
        );
        assert_eq!(state.status, Status::AwaitingAi);

        resume_with_ai_response(
            &mut state,
            AiResponse {
                value: serde_json::json!("four"),
                tool_rounds: vec![],
                usage: None,
                err: None,
            },
        )
        .unwrap();

        assert_eq!(state.status, Status::Running);
        let result = state.last_result.clone().unwrap();
        assert_eq!(result.value, crate::value::Payload::Text("four".into()));
        assert_eq!(result.source, Some(ValueSource::Ai));
    }

    #[test]
    fn resume_with_no_pending_is_internal_error() {
        let mut state = fresh_state();
        let err = resume_with_ai_response(
            &mut state,
            AiResponse { value: serde_json::json!(null), tool_rounds: vec![], usage: None, err: None },
        )
        .unwrap_err();
        assert!(matches!(err, crate::errors::RuntimeFault::InternalError { .. }));
    }

}
