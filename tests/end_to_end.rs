//! End-to-end coverage of the driver API against full programs, exercising
//! paths the in-module unit tests don't: multi-statement control flow,
//! parallel async start batching, breakpoint-gated `run_debug`, watch
//! refresh, and `RuntimeState` serialization round-trips.

use vibe_runtime::ast::{Expr, Stmt};
use vibe_runtime::context::ContextModeSpec;
use vibe_runtime::debug::{BreakpointType, DebugController};
use vibe_runtime::driver;
use vibe_runtime::instruction::BinaryOperator;
use vibe_runtime::state::{AsyncOpKind, Status};
use vibe_runtime::value::{Payload, VibeValue};

fn lit_num(n: f64) -> Expr {
    Expr::Literal(VibeValue::number(n))
}

#[test]
fn control_flow_program_runs_to_completion() {
    // let total = 0
    // let i = 0
    // while i < 3 { total = total + i; i = i + 1 }
    let program = vec![
        Stmt::Let { name: "total".into(), is_const: false, is_private: false, ty: None, value: lit_num(0.0) },
        Stmt::Let { name: "i".into(), is_const: false, is_private: false, ty: None, value: lit_num(0.0) },
        Stmt::While {
            condition: Expr::Binary {
                op: BinaryOperator::Lt,
                left: Box::new(Expr::Identifier("i".into())),
                right: Box::new(lit_num(3.0)),
            },
            body: vec![
                Stmt::Assign {
                    name: "total".into(),
                    value: Expr::Binary {
                        op: BinaryOperator::Add,
                        left: Box::new(Expr::Identifier("total".into())),
                        right: Box::new(Expr::Identifier("i".into())),
                    },
                },
                Stmt::Assign {
                    name: "i".into(),
                    value: Expr::Binary {
                        op: BinaryOperator::Add,
                        left: Box::new(Expr::Identifier("i".into())),
                        right: Box::new(lit_num(1.0)),
                    },
                },
            ],
            context_mode: ContextModeSpec::Forget,
            label: None,
        },
    ];

    let state = driver::create_initial_state(program, 4, None);
    let state = driver::run_until_pause(state);

    assert_eq!(state.status, Status::Completed);
    let total = state.frame_arena.get(0).unwrap().locals.get("total").unwrap();
    assert_eq!(total.value, Payload::Number(3.0));
}

#[test]
fn parallel_async_calls_start_together_under_max_parallel() {
    // two independent `async` function calls, max_parallel = 2: both should
    // be handed back from a single `drain_async_starts` batch rather than
    // one waiting for the other to finish first (spec §4.5 parallel-start
    // guarantee).
    let program = vec![
        Stmt::Async { binding: Some("a".into()), value: Expr::Call { callee: Box::new(Expr::Identifier("slow".into())), args: vec![] } },
        Stmt::Async { binding: Some("b".into()), value: Expr::Call { callee: Box::new(Expr::Identifier("slow".into())), args: vec![] } },
    ];

    let state = driver::create_initial_state(program, 2, None);
    let mut state = driver::step_n(state, 2);

    let starts = driver::drain_async_starts(&mut state);
    assert_eq!(starts.len(), 2, "both async calls should start in the same batch");
    assert!(starts.iter().all(|s| s.kind == AsyncOpKind::Call));

    let completions = starts
        .iter()
        .map(|s| driver::AsyncCompletion { id: s.id, result: VibeValue::number(1.0), end_ns: 1 })
        .collect();
    driver::resume_with_async_results(&mut state, completions);

    let state = driver::run_until_pause(state);
    assert_eq!(state.status, Status::Completed);
    let a = state.frame_arena.get(0).unwrap().locals.get("a").unwrap();
    let b = state.frame_arena.get(0).unwrap().locals.get("b").unwrap();
    assert_eq!(a.value, Payload::Number(1.0));
    assert_eq!(b.value, Payload::Number(1.0));
}

#[test]
fn run_debug_pauses_on_function_entry_breakpoint() {
    let program = vec![
        Stmt::Let { name: "a".into(), is_const: false, is_private: false, ty: None, value: lit_num(1.0) },
        Stmt::Let { name: "b".into(), is_const: false, is_private: false, ty: None, value: lit_num(2.0) },
    ];
    let state = driver::create_initial_state(program, 4, None);
    let mut controller = DebugController::new();
    let bp_type: BreakpointType = "in <module>".parse().expect("function breakpoint spec parses");
    controller.set_breakpoint(bp_type);

    let state = driver::run_debug(state, &mut controller);
    // a single top-level <module> frame is only entered once, so with the
    // default (always-fire) hit condition the very first instruction pauses.
    assert_eq!(state.status, Status::Paused);
}

#[test]
fn watches_refresh_after_stepping() {
    let program = vec![Stmt::Let {
        name: "x".into(),
        is_const: false,
        is_private: false,
        ty: None,
        value: lit_num(7.0),
    }];
    let mut state = driver::create_initial_state(program, 4, None);
    let mut controller = DebugController::new();
    controller.add_watch("x");

    state = driver::run_until_pause(state);
    assert_eq!(state.status, Status::Completed);

    vibe_runtime::debug::refresh_watches(&mut controller, &state.frame_arena, 0);
    let watch = &controller.watches()[0];
    assert_eq!(watch.last_value.as_ref().unwrap().value, Payload::Number(7.0));
}

#[test]
fn runtime_state_round_trips_through_json() {
    let program = vec![
        Stmt::Let { name: "x".into(), is_const: false, is_private: false, ty: None, value: lit_num(5.0) },
    ];
    let state = driver::create_initial_state(program, 4, None);
    let state = driver::run_until_pause(state);
    assert_eq!(state.status, Status::Completed);

    let json = serde_json::to_string(&state).expect("RuntimeState serializes");
    let restored: vibe_runtime::RuntimeState = serde_json::from_str(&json).expect("RuntimeState deserializes");

    assert_eq!(restored.status, Status::Completed);
    let x = restored.frame_arena.get(0).unwrap().locals.get("x").unwrap();
    assert_eq!(x.value, Payload::Number(5.0));
}

#[test]
fn function_call_returns_value_through_call_stack() {
    // function add(a, b) { return a + b }
    // let r = add(2, 3)
    let program = vec![
        Stmt::FunctionDecl {
            name: "add".into(),
            params: vec!["a".into(), "b".into()],
            body: vec![Stmt::Return(Some(Expr::Binary {
                op: BinaryOperator::Add,
                left: Box::new(Expr::Identifier("a".into())),
                right: Box::new(Expr::Identifier("b".into())),
            }))],
        },
        Stmt::Let {
            name: "r".into(),
            is_const: false,
            is_private: false,
            ty: None,
            value: Expr::Call {
                callee: Box::new(Expr::Identifier("add".into())),
                args: vec![lit_num(2.0), lit_num(3.0)],
            },
        },
    ];

    let state = driver::create_initial_state(program, 4, None);
    let state = driver::run_until_pause(state);

    assert_eq!(state.status, Status::Completed);
    let r = state.frame_arena.get(0).unwrap().locals.get("r").unwrap();
    assert_eq!(r.value, Payload::Number(6.0));
}
