//! The statement/expression shapes the stepper consumes.
//!
//! This is a data contract at the core's boundary, not a parser: lexing,
//! parsing, and semantic analysis are explicitly out of scope (spec §1),
//! exactly as `miden_core::Program`/`MastNode` are an opaque, already-built
//! input that `miden-processor` consumes without re-deriving them
//! (`exec/executor.rs::Executor::into_debug` takes `&Program`). Nothing in
//! this module lexes text; it only names the node shapes `exec_statement`/
//! `exec_expression` (spec §4.1) dispatch over.

use serde::{Deserialize, Serialize};

use crate::context::ContextModeSpec;
use crate::instruction::{AiOpKind, BinaryOperator, ContextSpec, TemplatePart, UnaryOperator};
use crate::value::{TypeAnnotation, VibeValue};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Let {
        name: String,
        is_const: bool,
        is_private: bool,
        ty: Option<TypeAnnotation>,
        value: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Destructure {
        fields: Vec<String>,
        is_const: bool,
        value: Expr,
    },
    Async {
        binding: Option<String>,
        value: Expr,
    },
    ExprStmt(Expr),
    Return(Option<Expr>),
    Throw(Expr),
    If {
        condition: Expr,
        consequent: Vec<Stmt>,
        alternate: Option<Vec<Stmt>>,
    },
    ForIn {
        var: String,
        items: Expr,
        body: Vec<Stmt>,
        context_mode: ContextModeSpec,
        label: Option<String>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
        context_mode: ContextModeSpec,
        label: Option<String>,
    },
    Break {
        label: Option<String>,
    },
    Block(Vec<Stmt>),
    FunctionDecl {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    ToolDecl {
        name: String,
        params: Vec<String>,
        host_body: String,
    },
    ModelDecl {
        name: String,
        provider_model: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(VibeValue),
    Identifier(String),
    Binary { op: BinaryOperator, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnaryOperator, operand: Box<Expr> },
    Index { target: Box<Expr>, index: Box<Expr> },
    Slice { target: Box<Expr>, start: Option<Box<Expr>>, end: Option<Box<Expr>> },
    Member { target: Box<Expr>, prop: String },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Range { start: Box<Expr>, end: Box<Expr> },
    Interpolation(Vec<TemplatePart>),
    PromptInterpolation(Vec<TemplatePart>),
    Ai { model: String, context_spec: ContextSpec, op_kind: AiOpKind, prompt: Box<Expr> },
    TsBlock { params: Vec<String>, body: String },
    ImportedTsCall { name: String, args: Vec<Expr> },
}
