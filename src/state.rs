//! The serializable runtime state machine carries between steps (spec §3).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ast::Stmt;
use crate::context::ContextEntry;
use crate::errors::RuntimeFault;
use crate::frame::{FrameArena, FrameIndex};
use crate::instruction::{AiOpKind, ContextSpec, Instruction};
use crate::value::VibeValue;

/// Execution status (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Running,
    Paused,
    AwaitingAi,
    AwaitingCompress,
    AwaitingUser,
    AwaitingTs,
    AwaitingTool,
    AwaitingAsync,
    Completed,
    Error,
}

/// A pending single-shot or tool-loop AI request (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAi {
    pub kind: AiOpKind,
    pub prompt: String,
    pub model: String,
    pub context: ContextSpec,
    pub expected_fields: Option<Vec<String>>,
}

/// A pending compress request, carrying what the compress instruction needs
/// on resume to perform the slice replacement atomically (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCompress {
    pub frame_index: FrameIndex,
    pub entry_index: usize,
    pub model: String,
    pub prompt: String,
    pub scope_kind: crate::instruction::ScopeKind,
    pub label: Option<String>,
}

/// A pending host-block (`ts_eval`) request (spec §4.4, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTs {
    pub params: Vec<String>,
    pub body: String,
    pub args: Vec<VibeValue>,
}

/// A pending tool invocation raised during a `vibe` tool-loop whose body is a
/// host block (spec §4.4, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTool {
    pub name: String,
    pub args: serde_json::Value,
}

/// A pending destructuring assignment re-queued while its source resolves
/// (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDestructuring {
    pub fields: Vec<String>,
    pub is_const: bool,
}

/// The kind of externally-executed unit an [`AsyncOp`] tracks (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncOpKind {
    Ai,
    Ts,
    Call,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncOpStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AsyncOpStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AsyncOpStatus::Completed | AsyncOpStatus::Failed)
    }
}

/// What the driver needs to actually start an [`AsyncOp`]; `StartRequest`
/// only carries the id and kind, so the driver looks the rest up here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AsyncRequest {
    Ai { prompt: String, model: String, context: ContextSpec, op_kind: AiOpKind },
    Ts { params: Vec<String>, body: String, args: Vec<VibeValue> },
    Call { name: String, args: Vec<VibeValue> },
}

/// An externally-executed unit tracked by id with a placeholder [`VibeValue`]
/// until completion (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncOp {
    pub id: u64,
    pub kind: AsyncOpKind,
    pub status: AsyncOpStatus,
    pub variable_name: Option<String>,
    pub frame_index: Option<FrameIndex>,
    pub request: AsyncRequest,
    pub result: Option<VibeValue>,
    pub start_ns: u64,
    pub end_ns: Option<u64>,
}

/// A request for the driver to begin an async operation (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub id: u64,
    pub kind: AsyncOpKind,
}

/// Bookkeeping for an in-progress loop, so `break` can apply the loop's
/// declared context mode without re-deriving it from the instruction that
/// is no longer on the stack (spec §4.2 "Break/return with pending async",
/// §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopContext {
    pub scope_kind: crate::instruction::ScopeKind,
    pub label: Option<String>,
    pub entry_index: usize,
    pub saved_keys: Vec<String>,
    pub context_mode: crate::context::ContextModeSpec,
}

/// The full, serializable runtime state (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeState {
    pub status: Status,
    pub functions: BTreeMap<String, crate::ast::Stmt>,
    pub modules: BTreeMap<String, Vec<Stmt>>,
    pub call_stack: Vec<FrameIndex>,
    pub frame_arena: FrameArena,
    pub instruction_stack: Vec<Instruction>,
    pub value_stack: Vec<VibeValue>,
    pub last_result: Option<VibeValue>,
    pub ai_history: Vec<String>,
    pub execution_log: Vec<String>,
    #[serde(skip)]
    pub local_context: Vec<ContextEntry>,
    #[serde(skip)]
    pub global_context: Vec<ContextEntry>,
    pub pending_ai: Option<PendingAi>,
    pub pending_compress: Option<PendingCompress>,
    pub pending_ts: Option<PendingTs>,
    pub pending_tool: Option<PendingTool>,
    pub pending_destructuring: Option<PendingDestructuring>,
    pub async_operations: BTreeMap<u64, AsyncOp>,
    pub pending_async_ids: BTreeSet<u64>,
    pub pending_async_starts: Vec<StartRequest>,
    pub awaiting_async_ids: Vec<u64>,
    pub max_parallel: usize,
    pub last_used_model: Option<String>,
    pub root_dir: Option<String>,
    pub error: Option<String>,
    pub next_async_id: u64,
    /// `instruction_stack` length recorded at each active call's entry, so
    /// `return_value` can discard the rest of the callee's compiled body in
    /// one truncation instead of unwinding instruction-by-instruction.
    pub return_markers: Vec<usize>,
    /// Active loops, innermost last, so `break` can apply the right context
    /// mode and discard the rest of the loop's queued instructions.
    pub loop_contexts: Vec<LoopContext>,
    pub loop_instr_markers: Vec<usize>,
}

impl RuntimeState {
    pub fn new(program: Vec<Stmt>, max_parallel: usize, root_dir: Option<String>) -> Self {
        let mut arena = FrameArena::default();
        let root_frame = crate::frame::StackFrame::new("<module>", None);
        let root_idx = arena.push(root_frame);

        let instruction_stack = program
            .into_iter()
            .rev()
            .map(|stmt| {
                Instruction::new(crate::instruction::SourceLocation::unknown(), crate::instruction::Op::ExecStatement(stmt))
            })
            .collect();

        Self {
            status: Status::Running,
            functions: BTreeMap::new(),
            modules: BTreeMap::new(),
            call_stack: vec![root_idx],
            frame_arena: arena,
            instruction_stack,
            value_stack: Vec::new(),
            last_result: None,
            ai_history: Vec::new(),
            execution_log: Vec::new(),
            local_context: Vec::new(),
            global_context: Vec::new(),
            pending_ai: None,
            pending_compress: None,
            pending_ts: None,
            pending_tool: None,
            pending_destructuring: None,
            async_operations: BTreeMap::new(),
            pending_async_ids: BTreeSet::new(),
            pending_async_starts: Vec::new(),
            awaiting_async_ids: Vec::new(),
            max_parallel,
            last_used_model: None,
            root_dir,
            error: None,
            next_async_id: 0,
            return_markers: Vec::new(),
            loop_contexts: Vec::new(),
            loop_instr_markers: Vec::new(),
        }
    }

    pub fn current_frame_index(&self) -> FrameIndex {
        *self.call_stack.last().expect("call stack is never empty while running")
    }

    pub fn current_frame(&self) -> &crate::frame::StackFrame {
        self.frame_arena.get(self.current_frame_index()).expect("current frame exists")
    }

    pub fn current_frame_mut(&mut self) -> &mut crate::frame::StackFrame {
        let idx = self.current_frame_index();
        self.frame_arena.get_mut(idx).expect("current frame exists")
    }

    pub fn allocate_async_id(&mut self) -> u64 {
        let id = self.next_async_id;
        self.next_async_id += 1;
        id
    }

    pub fn refresh_contexts(&mut self) {
        let assembled = crate::context::assemble(&self.frame_arena, &self.call_stack);
        self.local_context = assembled.local;
        self.global_context = assembled.global;
    }

    /// Program reaches `completed` only when all async ops are terminal
    /// (spec §4.5, §8).
    pub fn all_async_ops_terminal(&self) -> bool {
        self.async_operations.values().all(|op| op.status.is_terminal())
    }

    pub fn set_fault(&mut self, fault: &RuntimeFault) {
        self.status = Status::Error;
        self.error = Some(fault.to_string());
    }
}
