//! `step(state) -> state`: pop one instruction, dispatch it, return (spec §4.2).
//!
//! Grounded on `exec/executor.rs`'s `DebugExecutor::step`, which pops one
//! VM operation, applies it to `ExecutionContext`, and returns — generalized
//! from a fixed-width opcode tape to the compiled [`Instruction`] stream this
//! core steps through. Statements and expressions are compiled to flat
//! instruction sequences lazily, one [`crate::ast::Stmt`]/[`crate::ast::Expr`]
//! at a time, so suspension (AI call, host handoff, pending async read) can
//! land between any two instructions without unwinding a native call stack.

use crate::ast::{Expr, Stmt};
use crate::context::ContextModeSpec;
use crate::errors::RuntimeFault;
use crate::instruction::{
    AiOpKind, BinaryOperator, ContextSpec, Instruction, Op, ScopeKind, SourceLocation,
    TemplatePart, UnaryOperator,
};
use crate::state::{
    AsyncRequest, LoopContext, PendingCompress, PendingDestructuring, RuntimeState, Status,
};
use crate::value::{ErrorKind, Payload, TypeAnnotation, ValueSource, VibeError, VibeValue};

/// Advance the machine by exactly one instruction (spec §4.2 steps 1-3).
pub fn step(mut state: RuntimeState) -> RuntimeState {
    if state.status != Status::Running {
        return state;
    }
    state.refresh_contexts();

    let Some(instr) = state.instruction_stack.pop() else {
        state.status = Status::Completed;
        state.refresh_contexts();
        log::debug!(target: "stepper", "program complete");
        return state;
    };

    log::trace!(target: "stepper", "  executing `{:?}` at {}:{}", instr.op, instr.location.file, instr.location.line);
    if let Err(fault) = dispatch(&mut state, instr) {
        log::debug!(target: "stepper", "fault: {fault}");
        state.set_fault(&fault);
    }
    state
}

/// Run `step` until the machine leaves `running` (suspended or terminal).
pub fn run_until_pause(mut state: RuntimeState) -> RuntimeState {
    loop {
        if state.status != Status::Running {
            return state;
        }
        state = step(state);
    }
}

pub fn step_n(mut state: RuntimeState, n: usize) -> RuntimeState {
    for _ in 0..n {
        if state.status != Status::Running {
            break;
        }
        state = step(state);
    }
    state
}

fn push_ahead(state: &mut RuntimeState, instrs: Vec<Instruction>) {
    for instr in instrs.into_iter().rev() {
        state.instruction_stack.push(instr);
    }
}

fn at(loc: &SourceLocation, op: Op) -> Instruction {
    Instruction::new(loc.clone(), op)
}

fn dispatch(state: &mut RuntimeState, instr: Instruction) -> Result<(), RuntimeFault> {
    let loc = instr.location.clone();
    match instr.op {
        Op::ExecStatement(stmt) => exec_statement(state, &loc, stmt),
        Op::ExecExpression(expr) => {
            let compiled = compile_expr(state, &loc, expr)?;
            push_ahead(state, compiled);
            Ok(())
        }
        Op::ExecStatements { stmts, index } => {
            if index >= stmts.len() {
                return Ok(());
            }
            let next = at(&loc, Op::ExecStatements { stmts: stmts.clone(), index: index + 1 });
            push_ahead(state, vec![at(&loc, Op::ExecStatement(stmts[index].clone())), next]);
            Ok(())
        }

        Op::DeclareVar { name, is_const, ty, is_private } => {
            let mut value = state.last_result.clone().unwrap_or_else(VibeValue::null);
            if value.is_pending_async() {
                return suspend_for_pending_async(state, &loc, value, move |s| {
                    s.instruction_stack.push(at(
                        &SourceLocation::unknown(),
                        Op::DeclareVar { name, is_const, ty, is_private },
                    ));
                });
            }
            value.is_const = is_const;
            check_type(&value, ty.as_ref(), &loc)?;
            state.current_frame_mut().declare(name, value, ty, is_const, is_private);
            Ok(())
        }
        Op::AssignVar { name } => {
            let value = state.last_result.clone().unwrap_or_else(VibeValue::null);
            state
                .current_frame_mut()
                .assign(&name, value)
                .map_err(|_| RuntimeFault::ConstAssignError { name: name.clone(), location: loc.clone() })
        }
        Op::DestructureAssign { fields, is_const } => {
            let value = state.last_result.clone().unwrap_or_else(VibeValue::null);
            if value.is_pending_async() {
                state.pending_destructuring = Some(PendingDestructuring { fields, is_const });
                return suspend_for_pending_async(state, &loc, value, |_| {});
            }
            destructure(state, &loc, &fields, is_const, &value)
        }

        Op::CallFunction { name, argc } => call_function(state, &loc, &name, argc),
        Op::PushFrame { name } => {
            let parent = Some(0);
            let idx = state.frame_arena.push(crate::frame::StackFrame::new(name, parent));
            state.call_stack.push(idx);
            Ok(())
        }
        Op::PopFrame => {
            state.call_stack.pop();
            if let Some(marker) = state.return_markers.pop() {
                state.instruction_stack.truncate(marker);
            }
            Ok(())
        }
        Op::ReturnValue => {
            if let Some(marker) = state.return_markers.pop() {
                state.instruction_stack.truncate(marker);
            }
            state.call_stack.pop();
            Ok(())
        }
        Op::ThrowError => {
            let value = state.last_result.clone().unwrap_or_else(VibeValue::null);
            match value.err {
                Some(err) => Err(RuntimeFault::from_vibe_error(&err)),
                None => Err(RuntimeFault::InternalError {
                    message: "throw requires an error value".into(),
                    location: loc,
                }),
            }
        }

        Op::EnterBlock { .. } => Ok(()),
        Op::ExitBlock { saved_keys } => {
            let entry_index = state.current_frame().ordered_entries.len();
            state.current_frame_mut().truncate_to(entry_index, &saved_keys);
            Ok(())
        }

        Op::IfBranch { consequent, alternate } => {
            let cond = state.last_result.clone().unwrap_or_else(VibeValue::null);
            if let Some(err) = &cond.err {
                return Err(RuntimeFault::from_vibe_error(err));
            }
            let taken = match cond.value {
                Payload::Bool(b) => b,
                other => {
                    return Err(RuntimeFault::TypeError {
                        message: format!("if condition must be boolean, got {}", other.type_name()),
                        location: loc,
                    });
                }
            };
            let branch = if taken { consequent } else { alternate.unwrap_or_default() };
            push_ahead(state, vec![at(&loc, Op::ExecStatements { stmts: branch, index: 0 })]);
            Ok(())
        }

        Op::ForInInit { stmt } => for_in_init(state, &loc, *stmt),
        Op::ForInIterate { var, items, index, body, saved_keys, context_mode, label, entry_index } => {
            for_in_iterate(state, &loc, var, items, index, body, saved_keys, context_mode, label, entry_index)
        }
        Op::WhileInit { condition, body } => while_init(state, &loc, *condition, body),
        Op::WhileCheck { condition, body, saved_keys, context_mode, label, entry_index }
        | Op::WhileIterate { condition, body, saved_keys, context_mode, label, entry_index } => {
            while_check(state, &loc, *condition, body, saved_keys, context_mode, label, entry_index)
        }
        Op::BreakLoop { .. } => break_loop(state, &loc),

        Op::AiVibe { model, context_spec, op_kind, prompt: _ } => {
            let prompt_val = state.last_result.clone().unwrap_or_else(VibeValue::null);
            let prompt_text = render_scalar(&prompt_val);
            crate::ai::suspend_for_ai(state, prompt_text, model, context_spec, op_kind, None);
            Ok(())
        }
        Op::TsEval { params, body } => {
            let args = params
                .iter()
                .map(|p| state.current_frame().locals.get(p).cloned().unwrap_or_else(VibeValue::null))
                .collect();
            crate::handoff::suspend_for_host(state, params, body, args);
            Ok(())
        }
        Op::CallImportedTs { name, argc } => {
            let args = pop_n(state, argc);
            crate::handoff::suspend_for_host(state, vec![], format!("__import__{name}"), args);
            Ok(())
        }
        Op::ExecToolDeclaration { name, body } => {
            state.functions.insert(
                name.clone(),
                Stmt::ToolDecl { name, params: Vec::new(), host_body: body },
            );
            Ok(())
        }
        Op::DeclareModel { name, provider_model } => {
            let value = VibeValue::new(Payload::Model(crate::value::ModelHandle::new(provider_model)));
            state.current_frame_mut().declare(name, value, Some(TypeAnnotation::Model), false, false);
            Ok(())
        }

        Op::PushValue => {
            let v = state.last_result.clone().unwrap_or_else(VibeValue::null);
            state.value_stack.push(v);
            Ok(())
        }
        Op::LoadVar(name) => {
            let value = lookup_var(state, &name).ok_or_else(|| RuntimeFault::ReferenceError {
                message: format!("undeclared identifier '{name}'"),
                location: loc.clone(),
            })?;
            state.last_result = Some(value);
            Ok(())
        }
        Op::Literal(v) => {
            state.last_result = Some(v);
            Ok(())
        }
        Op::BuildObject { keys } => {
            let mut values = pop_n(state, keys.len());
            let mut obj = indexmap::IndexMap::new();
            for key in keys {
                obj.insert(key, values.remove(0));
            }
            state.last_result = Some(VibeValue::new(Payload::Object(obj)));
            Ok(())
        }
        Op::BuildArray { count } => {
            let values = pop_n(state, count);
            state.last_result = Some(VibeValue::array(values));
            Ok(())
        }
        Op::BuildRange => {
            let end = state.last_result.clone().unwrap_or_else(VibeValue::null);
            let start = state.value_stack.pop().unwrap_or_else(VibeValue::null);
            let (s, e) = match (&start.value, &end.value) {
                (Payload::Number(s), Payload::Number(e)) => (*s as i64, *e as i64),
                _ => {
                    return Err(RuntimeFault::TypeError {
                        message: "range bounds must be numbers".into(),
                        location: loc,
                    });
                }
            };
            let items = (s..e).map(|n| VibeValue::number(n as f64)).collect();
            state.last_result = Some(VibeValue::array(items));
            Ok(())
        }
        Op::CollectArgs { count } => {
            let values = pop_n(state, count);
            state.last_result = Some(VibeValue::array(values));
            Ok(())
        }
        Op::BinaryOp(op) => {
            let right = state.last_result.clone().unwrap_or_else(VibeValue::null);
            let left = state.value_stack.pop().unwrap_or_else(VibeValue::null);
            state.last_result = Some(apply_binary_op(op, left, right, &loc)?);
            Ok(())
        }
        Op::UnaryOp(op) => {
            let operand = state.last_result.clone().unwrap_or_else(VibeValue::null);
            state.last_result = Some(apply_unary_op(op, operand, &loc)?);
            Ok(())
        }
        Op::IndexAccess => {
            let index = state.last_result.clone().unwrap_or_else(VibeValue::null);
            let target = state.value_stack.pop().unwrap_or_else(VibeValue::null);
            state.last_result = Some(apply_index(target, index, &loc)?);
            Ok(())
        }
        Op::SliceAccess { has_start, has_end } => {
            let (target, start, end) = match (has_start, has_end) {
                (false, false) => (state.last_result.clone().unwrap_or_else(VibeValue::null), None, None),
                (true, false) => {
                    let start = state.last_result.clone();
                    let target = state.value_stack.pop().unwrap_or_else(VibeValue::null);
                    (target, start, None)
                }
                (false, true) => {
                    let end = state.last_result.clone();
                    let target = state.value_stack.pop().unwrap_or_else(VibeValue::null);
                    (target, None, end)
                }
                (true, true) => {
                    let end = state.last_result.clone();
                    let start = state.value_stack.pop();
                    let target = state.value_stack.pop().unwrap_or_else(VibeValue::null);
                    (target, start, end)
                }
            };
            state.last_result = Some(apply_slice(target, start, end, &loc)?);
            Ok(())
        }
        Op::MemberAccess { prop } => {
            let target = state.last_result.clone().unwrap_or_else(VibeValue::null);
            state.last_result = Some(apply_member(target, &prop));
            Ok(())
        }
        Op::InterpolateString { template } => {
            let rendered = render_template(state, &template)?;
            state.last_result = Some(VibeValue::text(rendered));
            Ok(())
        }
        Op::InterpolatePromptString { template } => {
            let rendered = render_template(state, &template)?;
            state.last_result = Some(VibeValue::text(rendered).with_type(Some(TypeAnnotation::Prompt)));
            Ok(())
        }
        Op::ClearPromptContext | Op::ClearAsyncContext => Ok(()),
    }
}

fn suspend_for_pending_async(
    state: &mut RuntimeState,
    _loc: &SourceLocation,
    value: VibeValue,
    requeue: impl FnOnce(&mut RuntimeState),
) -> Result<(), RuntimeFault> {
    let id = value.async_operation_id.expect("caller checked is_pending_async");
    state.status = Status::AwaitingAsync;
    state.awaiting_async_ids.push(id);
    requeue(state);
    Ok(())
}

fn pop_n(state: &mut RuntimeState, count: usize) -> Vec<VibeValue> {
    if count == 0 {
        return Vec::new();
    }
    let last = state.last_result.clone().unwrap_or_else(VibeValue::null);
    let mut rest = Vec::with_capacity(count - 1);
    for _ in 0..count.saturating_sub(1) {
        rest.push(state.value_stack.pop().unwrap_or_else(VibeValue::null));
    }
    rest.reverse();
    rest.push(last);
    rest
}

fn lookup_var(state: &RuntimeState, name: &str) -> Option<VibeValue> {
    let mut idx = Some(state.current_frame_index());
    while let Some(i) = idx {
        let frame = state.frame_arena.get(i)?;
        if let Some(v) = frame.locals.get(name) {
            return Some(v.clone());
        }
        idx = frame.parent_frame_index;
    }
    None
}

fn check_type(value: &VibeValue, ty: Option<&TypeAnnotation>, loc: &SourceLocation) -> Result<(), RuntimeFault> {
    let Some(ty) = ty else { return Ok(()) };
    if value.is_error() {
        return Ok(());
    }
    let matches = matches!(
        (ty, &value.value),
        (TypeAnnotation::Text, Payload::Text(_))
            | (TypeAnnotation::Number, Payload::Number(_))
            | (TypeAnnotation::Boolean, Payload::Bool(_))
            | (TypeAnnotation::Json, Payload::Object(_) | Payload::Array(_))
            | (TypeAnnotation::Prompt, Payload::Text(_))
            | (TypeAnnotation::Model, Payload::Model(_))
            | (TypeAnnotation::Named(_), _)
            | (TypeAnnotation::ArrayOf(_), Payload::Array(_))
    );
    if matches {
        Ok(())
    } else {
        Err(RuntimeFault::TypeError {
            message: format!("expected {:?}, got {}", ty, value.value.type_name()),
            location: loc.clone(),
        })
    }
}

fn destructure(
    state: &mut RuntimeState,
    loc: &SourceLocation,
    fields: &[String],
    is_const: bool,
    value: &VibeValue,
) -> Result<(), RuntimeFault> {
    if let Some(err) = &value.err {
        return Err(RuntimeFault::from_vibe_error(err));
    }
    let Payload::Object(obj) = &value.value else {
        return Err(RuntimeFault::TypeError {
            message: "destructuring target must be an object".into(),
            location: loc.clone(),
        });
    };
    for field in fields {
        let field_value = obj.get(field).cloned().ok_or_else(|| RuntimeFault::MissingFieldError {
            field: field.clone(),
            location: loc.clone(),
        })?;
        state.current_frame_mut().declare(field.clone(), field_value.with_const(is_const), None, is_const, false);
    }
    Ok(())
}

fn call_function(state: &mut RuntimeState, loc: &SourceLocation, name: &str, argc: usize) -> Result<(), RuntimeFault> {
    let args = pop_n(state, argc);

    if let Some(result) = try_builtin_method(name, &args, loc)? {
        state.last_result = Some(result);
        return Ok(());
    }

    match state.functions.get(name).cloned() {
        Some(Stmt::FunctionDecl { params, body, .. }) => {
            let marker = state.instruction_stack.len();
            state.return_markers.push(marker);
            let idx = state.frame_arena.push(crate::frame::StackFrame::new(name, Some(0)));
            state.call_stack.push(idx);
            for (p, v) in params.iter().zip(args.into_iter()) {
                state.current_frame_mut().declare(p.clone(), v, None, false, false);
            }
            push_ahead(state, vec![
                at(loc, Op::ExecStatements { stmts: body, index: 0 }),
                at(loc, Op::PopFrame),
            ]);
            Ok(())
        }
        Some(Stmt::ToolDecl { params, host_body, .. }) => {
            crate::handoff::suspend_for_host(state, params, host_body, args);
            Ok(())
        }
        _ => Err(RuntimeFault::ReferenceError {
            message: format!("undeclared function '{name}'"),
            location: loc.clone(),
        }),
    }
}

fn try_builtin_method(name: &str, args: &[VibeValue], loc: &SourceLocation) -> Result<Option<VibeValue>, RuntimeFault> {
    let Some(receiver) = args.first() else { return Ok(None) };
    match name {
        "len" => match &receiver.value {
            Payload::Array(items) => Ok(Some(VibeValue::number(items.len() as f64))),
            Payload::Text(s) => Ok(Some(VibeValue::number(s.chars().count() as f64))),
            _ => Ok(None),
        },
        "toString" => Ok(Some(VibeValue::text(render_scalar(receiver)))),
        "push" => {
            if receiver.is_const {
                return Err(RuntimeFault::ConstAssignError { name: "push".into(), location: loc.clone() });
            }
            match &receiver.value {
                Payload::Array(items) => {
                    let mut items = items.clone();
                    items.extend(args.iter().skip(1).cloned());
                    Ok(Some(VibeValue::array(items)))
                }
                _ => Ok(None),
            }
        }
        "pop" => {
            if receiver.is_const {
                return Err(RuntimeFault::ConstAssignError { name: "pop".into(), location: loc.clone() });
            }
            match &receiver.value {
                Payload::Array(items) => {
                    let mut items = items.clone();
                    items.pop();
                    Ok(Some(VibeValue::array(items)))
                }
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

fn for_in_init(state: &mut RuntimeState, loc: &SourceLocation, stmt: Stmt) -> Result<(), RuntimeFault> {
    let Stmt::ForIn { var, body, context_mode, label, .. } = stmt else {
        return Err(RuntimeFault::InternalError { message: "for_in_init on non-for-in stmt".into(), location: loc.clone() });
    };
    let source = state.last_result.clone().unwrap_or_else(VibeValue::null);
    let items = materialize_iterable(&source, loc)?;

    let entry_index = state.current_frame().ordered_entries.len();
    let saved_keys: Vec<String> = state.current_frame().locals.keys().cloned().collect();
    state
        .current_frame_mut()
        .ordered_entries
        .push(crate::frame::FrameEntry::ScopeEnter { scope_kind: ScopeKind::For, label: label.clone() });

    state.loop_instr_markers.push(state.instruction_stack.len());
    state.loop_contexts.push(LoopContext {
        scope_kind: ScopeKind::For,
        label: label.clone(),
        entry_index,
        saved_keys: saved_keys.clone(),
        context_mode: context_mode.clone(),
    });

    let items_exprs: Vec<Expr> = items.into_iter().map(Expr::Literal).collect();
    push_ahead(state, vec![at(loc, Op::ForInIterate {
        var,
        items: items_exprs,
        index: 0,
        body,
        saved_keys,
        context_mode,
        label,
        entry_index,
    })]);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn for_in_iterate(
    state: &mut RuntimeState,
    loc: &SourceLocation,
    var: String,
    items: Vec<Expr>,
    index: usize,
    body: Vec<Stmt>,
    saved_keys: Vec<String>,
    context_mode: ContextModeSpec,
    label: Option<String>,
    entry_index: usize,
) -> Result<(), RuntimeFault> {
    if index >= items.len() {
        return finish_loop(state, loc, ScopeKind::For, label, entry_index, saved_keys, context_mode);
    }
    let Expr::Literal(value) = items[index].clone() else {
        return Err(RuntimeFault::InternalError { message: "for-in item not a literal".into(), location: loc.clone() });
    };
    state.current_frame_mut().declare(var.clone(), value, None, false, false);
    push_ahead(state, vec![
        at(loc, Op::ExecStatements { stmts: body.clone(), index: 0 }),
        at(loc, Op::ForInIterate {
            var,
            items,
            index: index + 1,
            body,
            saved_keys,
            context_mode,
            label,
            entry_index,
        }),
    ]);
    Ok(())
}

fn while_init(state: &mut RuntimeState, loc: &SourceLocation, _condition: Expr, _body: Vec<Stmt>) -> Result<(), RuntimeFault> {
    Err(RuntimeFault::InternalError {
        message: "while_init must be seeded via exec_statement(Stmt::While)".into(),
        location: loc.clone(),
    })
}

#[allow(clippy::too_many_arguments)]
fn while_check(
    state: &mut RuntimeState,
    loc: &SourceLocation,
    condition: Expr,
    body: Vec<Stmt>,
    saved_keys: Vec<String>,
    context_mode: ContextModeSpec,
    label: Option<String>,
    entry_index: usize,
) -> Result<(), RuntimeFault> {
    let cond_value = eval_expr_sync(state, &condition, loc)?;
    if let Some(err) = &cond_value.err {
        return Err(RuntimeFault::from_vibe_error(err));
    }
    let keep_going = matches!(cond_value.value, Payload::Bool(true));
    if !keep_going {
        return finish_loop(state, loc, ScopeKind::While, label, entry_index, saved_keys, context_mode);
    }
    push_ahead(state, vec![
        at(loc, Op::ExecStatements { stmts: body.clone(), index: 0 }),
        at(loc, Op::WhileCheck {
            condition: Box::new(condition),
            body,
            saved_keys,
            context_mode,
            label,
            entry_index,
        }),
    ]);
    Ok(())
}

fn finish_loop(
    state: &mut RuntimeState,
    loc: &SourceLocation,
    scope_kind: ScopeKind,
    label: Option<String>,
    entry_index: usize,
    saved_keys: Vec<String>,
    context_mode: ContextModeSpec,
) -> Result<(), RuntimeFault> {
    state.loop_contexts.pop();
    state.loop_instr_markers.pop();
    apply_scope_exit(state, loc, scope_kind, label, entry_index, saved_keys, context_mode)
}

fn apply_scope_exit(
    state: &mut RuntimeState,
    loc: &SourceLocation,
    scope_kind: ScopeKind,
    label: Option<String>,
    entry_index: usize,
    saved_keys: Vec<String>,
    context_mode: ContextModeSpec,
) -> Result<(), RuntimeFault> {
    match context_mode {
        ContextModeSpec::Compress { arg1, arg2 } => {
            let model = arg2.or(arg1).or_else(|| state.last_used_model.clone()).ok_or_else(|| {
                RuntimeFault::CompressError { message: "no model available for compress".into(), location: loc.clone() }
            })?;
            let frame_index = state.current_frame_index();
            state.pending_compress = Some(PendingCompress {
                frame_index,
                entry_index,
                model,
                prompt: "Summarize the preceding scope concisely.".into(),
                scope_kind,
                label,
            });
            state.status = Status::AwaitingCompress;
            Ok(())
        }
        mode => {
            let frame = state.current_frame_mut();
            crate::context::apply_forget_or_verbose(frame, &mode, entry_index, &saved_keys, scope_kind, label);
            Ok(())
        }
    }
}

fn break_loop(state: &mut RuntimeState, loc: &SourceLocation) -> Result<(), RuntimeFault> {
    let Some(ctx) = state.loop_contexts.pop() else {
        return Err(RuntimeFault::InternalError { message: "break outside of loop".into(), location: loc.clone() });
    };
    if let Some(marker) = state.loop_instr_markers.pop() {
        state.instruction_stack.truncate(marker);
    }
    apply_scope_exit(state, loc, ctx.scope_kind, ctx.label, ctx.entry_index, ctx.saved_keys, ctx.context_mode)
}

fn materialize_iterable(value: &VibeValue, loc: &SourceLocation) -> Result<Vec<VibeValue>, RuntimeFault> {
    if let Some(err) = &value.err {
        return Err(RuntimeFault::from_vibe_error(err));
    }
    match &value.value {
        Payload::Array(items) => Ok(items.clone()),
        Payload::Number(n) => Ok((1..=(*n as i64)).map(|i| VibeValue::number(i as f64)).collect()),
        other => Err(RuntimeFault::TypeError {
            message: format!("cannot iterate over {}", other.type_name()),
            location: loc.clone(),
        }),
    }
}

fn render_template(state: &RuntimeState, template: &[TemplatePart]) -> Result<String, RuntimeFault> {
    let mut out = String::new();
    for part in template {
        match part {
            TemplatePart::Literal(s) => out.push_str(s),
            TemplatePart::Expr(e) => {
                let v = eval_expr_sync(state, e, &SourceLocation::unknown())?;
                out.push_str(&render_scalar(&v));
            }
        }
    }
    Ok(out)
}

fn render_scalar(v: &VibeValue) -> String {
    if let Some(err) = &v.err {
        return format!("<error: {}>", err.message);
    }
    match &v.value {
        Payload::Null => String::new(),
        Payload::Bool(b) => b.to_string(),
        Payload::Number(n) => n.to_string(),
        Payload::Text(s) => s.clone(),
        Payload::Array(_) | Payload::Object(_) => serde_json::to_string(&v.value).unwrap_or_default(),
        Payload::Model(m) => format!("<model {}>", m.name),
        Payload::Tool(t) => format!("<tool {}>", t.name),
    }
}

fn apply_binary_op(op: BinaryOperator, left: VibeValue, right: VibeValue, loc: &SourceLocation) -> Result<VibeValue, RuntimeFault> {
    if let Some(err) = left.err.clone() {
        return Ok(VibeValue::error(err));
    }
    if let Some(err) = right.err.clone() {
        return Ok(VibeValue::error(err));
    }
    use BinaryOperator::*;
    let result = match op {
        Add => return Ok(apply_add(left, right, loc)),
        Sub | Mul | Div | Mod => {
            let (Payload::Number(a), Payload::Number(b)) = (&left.value, &right.value) else {
                return Ok(type_error_value(format!("arithmetic requires numbers, got {} and {}", left.value.type_name(), right.value.type_name()), loc));
            };
            match op {
                Sub => VibeValue::number(a - b),
                Mul => VibeValue::number(a * b),
                Div => {
                    if *b == 0.0 {
                        return Ok(type_error_value("division by zero".into(), loc));
                    }
                    VibeValue::number(a / b)
                }
                Mod => VibeValue::number(a % b),
                _ => unreachable!(),
            }
        }
        Eq => VibeValue::boolean(left.value == right.value),
        NotEq => VibeValue::boolean(left.value != right.value),
        Lt | LtEq | Gt | GtEq => {
            let (Payload::Number(a), Payload::Number(b)) = (&left.value, &right.value) else {
                return Ok(type_error_value("comparison requires numbers".into(), loc));
            };
            VibeValue::boolean(match op {
                Lt => a < b,
                LtEq => a <= b,
                Gt => a > b,
                GtEq => a >= b,
                _ => unreachable!(),
            })
        }
        And | Or => {
            let (Payload::Bool(a), Payload::Bool(b)) = (&left.value, &right.value) else {
                return Ok(type_error_value("logical operators require booleans".into(), loc));
            };
            VibeValue::boolean(match op {
                And => *a && *b,
                Or => *a || *b,
                _ => unreachable!(),
            })
        }
    };
    Ok(result)
}

fn apply_add(left: VibeValue, right: VibeValue, loc: &SourceLocation) -> VibeValue {
    match (&left.value, &right.value) {
        (Payload::Number(a), Payload::Number(b)) => VibeValue::number(a + b),
        (Payload::Array(a), Payload::Array(b)) => {
            let mut items = a.clone();
            items.extend(b.clone());
            VibeValue::array(items)
        }
        (Payload::Text(_), _) | (_, Payload::Text(_)) => {
            let a = if matches!(left.value, Payload::Null) { String::new() } else { render_scalar(&left) };
            let b = if matches!(right.value, Payload::Null) { String::new() } else { render_scalar(&right) };
            VibeValue::text(a + &b)
        }
        _ => type_error_value(
            format!("cannot add {} and {}", left.value.type_name(), right.value.type_name()),
            loc,
        ),
    }
}

fn type_error_value(message: String, loc: &SourceLocation) -> VibeValue {
    VibeValue::error(VibeError::new(ErrorKind::TypeError, message, loc.clone()))
}

fn apply_unary_op(op: UnaryOperator, operand: VibeValue, loc: &SourceLocation) -> Result<VibeValue, RuntimeFault> {
    if let Some(err) = operand.err {
        return Ok(VibeValue::error(err));
    }
    let result = match (op, &operand.value) {
        (UnaryOperator::Neg, Payload::Number(n)) => VibeValue::number(-n),
        (UnaryOperator::Not, Payload::Bool(b)) => VibeValue::boolean(!b),
        _ => type_error_value(format!("invalid operand for unary op: {}", operand.value.type_name()), loc),
    };
    Ok(result)
}

fn normalize_index(i: i64, len: usize) -> i64 {
    if i < 0 { len as i64 + i } else { i }
}

fn apply_index(target: VibeValue, index: VibeValue, loc: &SourceLocation) -> Result<VibeValue, RuntimeFault> {
    if let Some(err) = target.err {
        return Ok(VibeValue::error(err));
    }
    if let Some(err) = index.err {
        return Ok(VibeValue::error(err));
    }
    let Payload::Number(raw_idx) = index.value else {
        return Ok(type_error_value("index must be a number".into(), loc));
    };
    match target.value {
        Payload::Array(items) => {
            let idx = normalize_index(raw_idx as i64, items.len());
            if idx < 0 || idx as usize >= items.len() {
                return Ok(VibeValue::error(VibeError::new(
                    ErrorKind::RangeError,
                    format!("index {idx} out of bounds for length {}", items.len()),
                    loc.clone(),
                )));
            }
            Ok(items[idx as usize].clone())
        }
        Payload::Text(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(raw_idx as i64, chars.len());
            if idx < 0 || idx as usize >= chars.len() {
                return Ok(VibeValue::error(VibeError::new(
                    ErrorKind::RangeError,
                    format!("index {idx} out of bounds for length {}", chars.len()),
                    loc.clone(),
                )));
            }
            Ok(VibeValue::text(chars[idx as usize].to_string()))
        }
        other => Ok(type_error_value(format!("cannot index into {}", other.type_name()), loc)),
    }
}

fn apply_slice(target: VibeValue, start: Option<VibeValue>, end: Option<VibeValue>, loc: &SourceLocation) -> Result<VibeValue, RuntimeFault> {
    if let Some(err) = &target.err {
        return Ok(VibeValue::error(err.clone()));
    }
    let Payload::Array(items) = &target.value else {
        return Ok(type_error_value("slice target must be an array".into(), loc));
    };
    let len = items.len() as i64;
    let s = match start {
        Some(v) => match v.value {
            Payload::Number(n) => normalize_index(n as i64, items.len()).clamp(0, len),
            _ => return Ok(type_error_value("slice start must be a number".into(), loc)),
        },
        None => 0,
    };
    let e = match end {
        Some(v) => match v.value {
            Payload::Number(n) => normalize_index(n as i64, items.len()).clamp(0, len),
            _ => return Ok(type_error_value("slice end must be a number".into(), loc)),
        },
        None => len,
    };
    if s >= e {
        return Ok(VibeValue::array(Vec::new()));
    }
    Ok(VibeValue::array(items[s as usize..e as usize].to_vec()))
}

fn apply_member(target: VibeValue, prop: &str) -> VibeValue {
    if let Some(reserved) = target.reserved_member(prop) {
        return reserved;
    }
    match &target.value {
        Payload::Object(obj) => obj.get(prop).cloned().unwrap_or_else(VibeValue::null),
        _ if matches!(prop, "len" | "push" | "pop" | "toString") => {
            VibeValue::new(Payload::Tool(crate::value::ToolHandle {
                name: prop.to_string(),
                bound_receiver: Some(Box::new(target)),
            }))
        }
        _ => VibeValue::null(),
    }
}

/// Compile one expression into a flat instruction sequence ending with the
/// value in `last_result` (spec §4.1/§4.2). AI/host/import expressions
/// compile to their suspending instruction directly.
fn compile_expr(_state: &RuntimeState, loc: &SourceLocation, expr: Expr) -> Result<Vec<Instruction>, RuntimeFault> {
    let mut out = Vec::new();
    compile_expr_into(loc, expr, &mut out);
    Ok(out)
}

fn compile_expr_into(loc: &SourceLocation, expr: Expr, out: &mut Vec<Instruction>) {
    match expr {
        Expr::Literal(v) => out.push(at(loc, Op::Literal(v))),
        Expr::Identifier(name) => out.push(at(loc, Op::LoadVar(name))),
        Expr::Binary { op, left, right } => {
            compile_expr_into(loc, *left, out);
            out.push(at(loc, Op::PushValue));
            compile_expr_into(loc, *right, out);
            out.push(at(loc, Op::BinaryOp(op)));
        }
        Expr::Unary { op, operand } => {
            compile_expr_into(loc, *operand, out);
            out.push(at(loc, Op::UnaryOp(op)));
        }
        Expr::Index { target, index } => {
            compile_expr_into(loc, *target, out);
            out.push(at(loc, Op::PushValue));
            compile_expr_into(loc, *index, out);
            out.push(at(loc, Op::IndexAccess));
        }
        Expr::Slice { target, start, end } => {
            compile_expr_into(loc, *target, out);
            let has_start = start.is_some();
            let has_end = end.is_some();
            if has_start || has_end {
                out.push(at(loc, Op::PushValue));
            }
            if let Some(s) = start {
                compile_expr_into(loc, *s, out);
                if has_end {
                    out.push(at(loc, Op::PushValue));
                }
            }
            if let Some(e) = end {
                compile_expr_into(loc, *e, out);
            }
            out.push(at(loc, Op::SliceAccess { has_start, has_end }));
        }
        Expr::Member { target, prop } => {
            compile_expr_into(loc, *target, out);
            out.push(at(loc, Op::MemberAccess { prop }));
        }
        Expr::Call { callee, args } => {
            let (name, prelude_pushes) = match *callee {
                Expr::Identifier(name) => (name, 0),
                Expr::Member { target, prop } => {
                    compile_expr_into(loc, *target, out);
                    out.push(at(loc, Op::PushValue));
                    (prop, 1)
                }
                _ => {
                    out.push(at(loc, Op::Literal(VibeValue::error(VibeError::new(
                        ErrorKind::SemanticError,
                        "call target must be a name or member".into(),
                        loc.clone(),
                    )))));
                    return;
                }
            };
            let argc = args.len();
            for a in args {
                compile_expr_into(loc, a, out);
                out.push(at(loc, Op::PushValue));
            }
            // undo the trailing PushValue for the final pushed value so it
            // lands in last_result for pop_n's convention.
            if argc > 0 || prelude_pushes > 0 {
                out.pop();
            }
            out.push(at(loc, Op::CallFunction { name, argc: argc + prelude_pushes }));
        }
        Expr::Array(items) => {
            let count = items.len();
            for (i, item) in items.into_iter().enumerate() {
                compile_expr_into(loc, item, out);
                if i + 1 < count {
                    out.push(at(loc, Op::PushValue));
                }
            }
            out.push(at(loc, Op::BuildArray { count }));
        }
        Expr::Object(pairs) => {
            let keys: Vec<String> = pairs.iter().map(|(k, _)| k.clone()).collect();
            let count = pairs.len();
            for (i, (_, value)) in pairs.into_iter().enumerate() {
                compile_expr_into(loc, value, out);
                if i + 1 < count {
                    out.push(at(loc, Op::PushValue));
                }
            }
            out.push(at(loc, Op::BuildObject { keys }));
        }
        Expr::Range { start, end } => {
            compile_expr_into(loc, *start, out);
            out.push(at(loc, Op::PushValue));
            compile_expr_into(loc, *end, out);
            out.push(at(loc, Op::BuildRange));
        }
        Expr::Interpolation(template) => out.push(at(loc, Op::InterpolateString { template })),
        Expr::PromptInterpolation(template) => out.push(at(loc, Op::InterpolatePromptString { template })),
        Expr::Ai { model, context_spec, op_kind, prompt } => {
            compile_expr_into(loc, *prompt.clone(), out);
            out.push(at(loc, Op::AiVibe { model, context_spec, op_kind, prompt }));
        }
        Expr::TsBlock { params, body } => out.push(at(loc, Op::TsEval { params, body })),
        Expr::ImportedTsCall { name, args } => {
            let argc = args.len();
            for (i, a) in args.into_iter().enumerate() {
                compile_expr_into(loc, a, out);
                if i + 1 < argc {
                    out.push(at(loc, Op::PushValue));
                }
            }
            out.push(at(loc, Op::CallImportedTs { name, argc }));
        }
    }
}

/// Evaluate an expression immediately, without suspension. Used only where
/// the language guarantees no AI/host/async boundary can occur: loop
/// conditions and interpolation segments (spec §4.2 "While: symmetric to
/// for-in"). An `Ai`/`TsBlock`/`ImportedTsCall` reachable from here is a
/// semantic error, not a runtime suspend.
pub(crate) fn eval_expr_sync(state: &RuntimeState, expr: &Expr, loc: &SourceLocation) -> Result<VibeValue, RuntimeFault> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Identifier(name) => lookup_var(state, name).ok_or_else(|| RuntimeFault::ReferenceError {
            message: format!("undeclared identifier '{name}'"),
            location: loc.clone(),
        }),
        Expr::Binary { op, left, right } => {
            let l = eval_expr_sync(state, left, loc)?;
            let r = eval_expr_sync(state, right, loc)?;
            apply_binary_op(*op, l, r, loc)
        }
        Expr::Unary { op, operand } => {
            let v = eval_expr_sync(state, operand, loc)?;
            apply_unary_op(*op, v, loc)
        }
        Expr::Index { target, index } => {
            let t = eval_expr_sync(state, target, loc)?;
            let i = eval_expr_sync(state, index, loc)?;
            apply_index(t, i, loc)
        }
        Expr::Slice { target, start, end } => {
            let t = eval_expr_sync(state, target, loc)?;
            let s = start.as_ref().map(|e| eval_expr_sync(state, e, loc)).transpose()?;
            let e = end.as_ref().map(|e| eval_expr_sync(state, e, loc)).transpose()?;
            apply_slice(t, s, e, loc)
        }
        Expr::Member { target, prop } => {
            let t = eval_expr_sync(state, target, loc)?;
            Ok(apply_member(t, prop))
        }
        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr_sync(state, item, loc)?);
            }
            Ok(VibeValue::array(values))
        }
        Expr::Object(pairs) => {
            let mut obj = indexmap::IndexMap::new();
            for (k, v) in pairs {
                obj.insert(k.clone(), eval_expr_sync(state, v, loc)?);
            }
            Ok(VibeValue::new(Payload::Object(obj)))
        }
        Expr::Range { start, end } => {
            let s = eval_expr_sync(state, start, loc)?;
            let e = eval_expr_sync(state, end, loc)?;
            let (Payload::Number(s), Payload::Number(e)) = (s.value, e.value) else {
                return Ok(type_error_value("range bounds must be numbers".into(), loc));
            };
            Ok(VibeValue::array((s as i64..e as i64).map(|n| VibeValue::number(n as f64)).collect()))
        }
        Expr::Interpolation(t) | Expr::PromptInterpolation(t) => Ok(VibeValue::text(render_template_sync(state, t, loc)?)),
        Expr::Call { .. } | Expr::Ai { .. } | Expr::TsBlock { .. } | Expr::ImportedTsCall { .. } => {
            Err(RuntimeFault::SemanticError {
                message: "AI calls, host blocks, and function calls are not permitted inside loop conditions".into(),
                location: loc.clone(),
            })
        }
    }
}

/// Render a template's literal/expr parts against `state`'s current frame
/// (spec §4.6 log-message breakpoints reuse this same mechanism).
pub(crate) fn render_template_sync(state: &RuntimeState, parts: &[TemplatePart], loc: &SourceLocation) -> Result<String, RuntimeFault> {
    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(s) => out.push_str(s),
            TemplatePart::Expr(e) => out.push_str(&render_scalar(&eval_expr_sync(state, e, loc)?)),
        }
    }
    Ok(out)
}

fn begin_async_statement(state: &mut RuntimeState, loc: &SourceLocation, binding: Option<String>, value: Expr) -> Result<(), RuntimeFault> {
    use crate::state::AsyncOpKind;
    let (kind, request) = match value {
        Expr::Ai { model, context_spec, op_kind, prompt } => {
            let prompt_val = eval_expr_sync(state, &prompt, loc)?;
            (AsyncOpKind::Ai, AsyncRequest::Ai { prompt: render_scalar(&prompt_val), model, context: context_spec, op_kind })
        }
        Expr::TsBlock { params, body } => {
            let args = params.iter().map(|p| state.current_frame().locals.get(p).cloned().unwrap_or_else(VibeValue::null)).collect();
            (AsyncOpKind::Ts, AsyncRequest::Ts { params, body, args })
        }
        Expr::ImportedTsCall { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for a in &args {
                values.push(eval_expr_sync(state, a, loc)?);
            }
            (AsyncOpKind::Ts, AsyncRequest::Ts { params: Vec::new(), body: format!("__import__{name}"), args: values })
        }
        Expr::Call { callee, args } => {
            let Expr::Identifier(name) = *callee else {
                return Err(RuntimeFault::SemanticError { message: "async call target must be a plain function name".into(), location: loc.clone() });
            };
            let mut values = Vec::with_capacity(args.len());
            for a in &args {
                values.push(eval_expr_sync(state, a, loc)?);
            }
            (AsyncOpKind::Call, AsyncRequest::Call { name, args: values })
        }
        other => {
            let v = eval_expr_sync(state, &other, loc)?;
            if let Some(name) = binding {
                state.current_frame_mut().declare(name, v, None, false, false);
            }
            return Ok(());
        }
    };
    let placeholder = crate::async_scheduler::begin_async(state, kind, binding.clone(), request);
    if let Some(name) = binding {
        state.current_frame_mut().declare(name, placeholder, None, false, false);
    }
    Ok(())
}

fn exec_statement(state: &mut RuntimeState, loc: &SourceLocation, stmt: Stmt) -> Result<(), RuntimeFault> {
    match stmt {
        Stmt::Let { name, is_const, is_private, ty, value } => {
            let compiled = compile_expr(state, loc, value)?;
            let mut instrs = compiled;
            instrs.push(at(loc, Op::DeclareVar { name, is_const, ty, is_private }));
            push_ahead(state, instrs);
            Ok(())
        }
        Stmt::Assign { name, value } => {
            let mut instrs = compile_expr(state, loc, value)?;
            instrs.push(at(loc, Op::AssignVar { name }));
            push_ahead(state, instrs);
            Ok(())
        }
        Stmt::Destructure { fields, is_const, value } => {
            let mut instrs = compile_expr(state, loc, value)?;
            instrs.push(at(loc, Op::DestructureAssign { fields, is_const }));
            push_ahead(state, instrs);
            Ok(())
        }
        Stmt::Async { binding, value } => begin_async_statement(state, loc, binding, value),
        Stmt::ExprStmt(expr) => {
            let instrs = compile_expr(state, loc, expr)?;
            push_ahead(state, instrs);
            Ok(())
        }
        Stmt::Return(expr) => {
            let mut instrs = match expr {
                Some(e) => compile_expr(state, loc, e)?,
                None => vec![at(loc, Op::Literal(VibeValue::null()))],
            };
            instrs.push(at(loc, Op::ReturnValue));
            push_ahead(state, instrs);
            Ok(())
        }
        Stmt::Throw(expr) => {
            let mut instrs = compile_expr(state, loc, expr)?;
            instrs.push(at(loc, Op::ThrowError));
            push_ahead(state, instrs);
            Ok(())
        }
        Stmt::If { condition, consequent, alternate } => {
            let mut instrs = compile_expr(state, loc, condition)?;
            instrs.push(at(loc, Op::IfBranch { consequent, alternate }));
            push_ahead(state, instrs);
            Ok(())
        }
        Stmt::ForIn { var, items, body, context_mode, label } => {
            let mut instrs = compile_expr(state, loc, items)?;
            instrs.push(at(loc, Op::ForInInit {
                stmt: Box::new(Stmt::ForIn { var, items: Expr::Literal(VibeValue::null()), body, context_mode, label }),
            }));
            push_ahead(state, instrs);
            Ok(())
        }
        Stmt::While { condition, body, context_mode, label } => {
            let entry_index = state.current_frame().ordered_entries.len();
            let saved_keys: Vec<String> = state.current_frame().locals.keys().cloned().collect();
            state.current_frame_mut().ordered_entries.push(crate::frame::FrameEntry::ScopeEnter {
                scope_kind: ScopeKind::While,
                label: label.clone(),
            });
            state.loop_instr_markers.push(state.instruction_stack.len());
            state.loop_contexts.push(LoopContext {
                scope_kind: ScopeKind::While,
                label: label.clone(),
                entry_index,
                saved_keys: saved_keys.clone(),
                context_mode: context_mode.clone(),
            });
            push_ahead(state, vec![at(loc, Op::WhileCheck {
                condition: Box::new(condition),
                body,
                saved_keys,
                context_mode,
                label,
                entry_index,
            })]);
            Ok(())
        }
        Stmt::Break { label: _ } => {
            push_ahead(state, vec![at(loc, Op::BreakLoop {
                saved_keys: Vec::new(),
                context_mode: ContextModeSpec::Forget,
                label: None,
                entry_index: 0,
                scope_kind: ScopeKind::Block,
            })]);
            Ok(())
        }
        Stmt::Block(stmts) => {
            let saved_keys: Vec<String> = state.current_frame().locals.keys().cloned().collect();
            push_ahead(state, vec![
                at(loc, Op::ExecStatements { stmts, index: 0 }),
                at(loc, Op::ExitBlock { saved_keys }),
            ]);
            Ok(())
        }
        Stmt::FunctionDecl { ref name, .. } => {
            state.functions.insert(name.clone(), stmt);
            Ok(())
        }
        Stmt::ToolDecl { ref name, .. } => {
            state.functions.insert(name.clone(), stmt);
            Ok(())
        }
        Stmt::ModelDecl { name, provider_model } => {
            push_ahead(state, vec![at(loc, Op::DeclareModel { name, provider_model })]);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::BinaryOperator;

    fn loc() -> SourceLocation {
        SourceLocation::unknown()
    }

    #[test]
    fn let_binding_runs_to_completion() {
        let program = vec![Stmt::Let {
            name: "x".into(),
            is_const: false,
            is_private: false,
            ty: None,
            value: Expr::Literal(VibeValue::number(10.0)),
        }];
        let mut state = RuntimeState::new(program, 4, None);
        state = run_until_pause(state);
        assert_eq!(state.status, Status::Completed);
        let x = state.frame_arena.get(0).unwrap().locals.get("x").unwrap();
        assert_eq!(x.value, Payload::Number(10.0));
        assert!(x.err.is_none());
    }

    #[test]
    fn binary_op_first_error_wins() {
        let err = VibeError::new(ErrorKind::TypeError, "boom", loc());
        let left = VibeValue::error(err.clone());
        let right = VibeValue::number(2.0);
        let result = apply_binary_op(BinaryOperator::Add, left, right, &loc()).unwrap();
        assert_eq!(result.err.unwrap().message, "boom");
    }

    #[test]
    fn negative_index_normalizes_from_end() {
        let arr = VibeValue::array(vec![VibeValue::number(1.0), VibeValue::number(2.0), VibeValue::number(3.0)]);
        let result = apply_index(arr, VibeValue::number(-1.0), &loc()).unwrap();
        assert_eq!(result.value, Payload::Number(3.0));
    }

    #[test]
    fn slice_drop_last_element() {
        let arr = VibeValue::array(vec![VibeValue::number(1.0), VibeValue::number(2.0), VibeValue::number(3.0)]);
        let result = apply_slice(arr, None, Some(VibeValue::number(-1.0)), &loc()).unwrap();
        assert_eq!(result.value, Payload::Array(vec![VibeValue::number(1.0), VibeValue::number(2.0)]));
    }

    #[test]
    fn ai_call_suspends_then_resumes_with_source_ai() {
        let program = vec![Stmt::Let {
            name: "r".into(),
            is_const: true,
            is_private: false,
            ty: None,
            value: Expr::Ai {
                model: "m".into(),
                context_spec: ContextSpec::Local,
                op_kind: AiOpKind::Do,
                prompt: Box::new(Expr::Literal(VibeValue::text("what is 2+2?"))),
            },
        }];
        let mut state = RuntimeState::new(program, 4, None);
        state = run_until_pause(state);
        assert_eq!(state.status, Status::AwaitingAi);

        crate::ai::resume_with_ai_response(
            &mut state,
            crate::ai::AiResponse {
                value: serde_json::json!("four"),
                tool_rounds: vec![],
                usage: None,
                err: None,
            },
        )
        .unwrap();
        state = run_until_pause(state);
        assert_eq!(state.status, Status::Completed);
        let r = state.frame_arena.get(0).unwrap().locals.get("r").unwrap();
        assert_eq!(r.value, Payload::Text("four".into()));
        assert_eq!(r.source, Some(ValueSource::Ai));
    }

    #[test]
    fn const_push_fails_without_mutating() {
        let program = vec![
            Stmt::Let {
                name: "xs".into(),
                is_const: false,
                is_private: false,
                ty: None,
                value: Expr::Array(vec![Expr::Literal(VibeValue::number(1.0))]),
            },
            Stmt::Let {
                name: "y".into(),
                is_const: true,
                is_private: false,
                ty: None,
                value: Expr::Identifier("xs".into()),
            },
            Stmt::ExprStmt(Expr::Call {
                callee: Box::new(Expr::Member { target: Box::new(Expr::Identifier("y".into())), prop: "push".into() }),
                args: vec![Expr::Literal(VibeValue::number(4.0))],
            }),
        ];
        let mut state = RuntimeState::new(program, 4, None);
        state = run_until_pause(state);
        assert_eq!(state.status, Status::Error);
        let xs = state.frame_arena.get(0).unwrap().locals.get("xs").unwrap();
        assert_eq!(xs.value, Payload::Array(vec![VibeValue::number(1.0)]));
    }

    #[test]
    fn private_let_never_enters_rendered_context() {
        let program = vec![
            Stmt::Let { name: "k".into(), is_const: false, is_private: true, ty: None, value: Expr::Literal(VibeValue::text("secret")) },
        ];
        let mut state = RuntimeState::new(program, 4, None);
        state = run_until_pause(state);
        let wire = crate::context::render_wire(&state.local_context);
        assert!(!wire.contains("secret"));
    }

    #[cfg(feature = "proptest")]
    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // "First-error-wins" (spec §4.2/§8): whichever side carries an
            // error, the binary op short-circuits to it untouched, for any
            // operator and any well-formed right-hand operand.
            #[test]
            fn left_error_always_wins(n in -1e6f64..1e6f64, op in prop_oneof![
                Just(BinaryOperator::Add), Just(BinaryOperator::Sub), Just(BinaryOperator::Mul),
                Just(BinaryOperator::Eq), Just(BinaryOperator::Lt), Just(BinaryOperator::And),
            ]) {
                let err = VibeError::new(ErrorKind::TypeError, "boom", loc());
                let left = VibeValue::error(err.clone());
                let right = VibeValue::number(n);
                let result = apply_binary_op(op, left, right, &loc()).unwrap();
                prop_assert_eq!(result.err.unwrap().message, "boom");
            }

            // Negative indices normalize from the end and never panic, for
            // any index and any non-empty array length (spec §4 boundary
            // behavior).
            #[test]
            fn negative_index_never_panics(len in 1usize..20, idx in -40i64..40i64) {
                let arr = VibeValue::array((0..len as i64).map(|i| VibeValue::number(i as f64)).collect());
                let _ = apply_index(arr, VibeValue::number(idx as f64), &loc());
            }
        }
    }
}
