//! A stepwise, resumable instruction machine for a scripting language with
//! first-class AI calls and inline host-language blocks, each suspended and
//! resumed as an ordinary expression (spec §1).
//!
//! Lexing, parsing, semantic analysis, the AI provider transport, the host
//! evaluator, and any IDE surface are deliberately outside this crate's
//! boundary — callers hand in an already-built [`ast::Stmt`] program and
//! implement [`ai::AiProvider`]/[`handoff::HostEvaluator`] themselves.

pub mod ai;
pub mod ast;
pub mod async_scheduler;
pub mod context;
pub mod debug;
pub mod driver;
pub mod errors;
pub mod frame;
pub mod handoff;
pub mod instruction;
pub mod state;
pub mod stepper;
pub mod value;

pub use ast::{Expr, Stmt};
pub use driver::{create_initial_state, run_debug, run_until_pause, step, step_n};
pub use errors::RuntimeFault;
pub use state::{RuntimeState, Status};
pub use value::{Payload, VibeError, VibeValue};
