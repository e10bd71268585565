use rustyline::{DefaultEditor, error::ReadlineError};

use vibe_runtime::ai::{AiProvider, AiRequest, AiResponse};
use vibe_runtime::debug::{BreakpointType, DebugController};
use vibe_runtime::handoff::{HostEvaluator, HostRequest, HostResponse};
use vibe_runtime::state::Status;
use vibe_runtime::{Stmt, driver};

use super::commands::ReplCommand;
use crate::config::RunnerConfig;

/// Stands in for the AI provider transport this crate deliberately leaves
/// out of scope: prints the request and reads the reply from the operator.
struct ConsoleAiProvider;

impl AiProvider for ConsoleAiProvider {
    fn execute(&mut self, request: &AiRequest) -> AiResponse {
        println!("\x1b[35m[ai {:?}]\x1b[0m model={} prompt={:?}", request.op_kind, request.model, request.prompt);
        let reply = read_reply("ai value (JSON, or plain text)> ");
        let value = serde_json::from_str(&reply).unwrap_or_else(|_| serde_json::Value::String(reply));
        AiResponse { value, tool_rounds: Vec::new(), usage: None, err: None }
    }
}

/// Stands in for the host-language evaluator this crate deliberately leaves
/// out of scope: prints the request and reads the reply from the operator.
struct ConsoleHostEvaluator;

impl HostEvaluator for ConsoleHostEvaluator {
    fn evaluate(&mut self, request: &HostRequest) -> HostResponse {
        println!("\x1b[35m[host {:?}]\x1b[0m body={:?} args={}", request.reason, request.body, request.args.len());
        let reply = read_reply("host value (JSON, or plain text)> ");
        let value = serde_json::from_str(&reply).unwrap_or_else(|_| serde_json::Value::String(reply));
        HostResponse { value, err: None, stack: None }
    }
}

fn read_reply(prompt: &str) -> String {
    use std::io::Write;
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    line.trim().to_string()
}

/// Interactive REPL session driving the stepwise runtime (spec.md §5, §6).
pub struct ReplSession {
    state: vibe_runtime::RuntimeState,
    controller: DebugController,
    ai: ConsoleAiProvider,
    host: ConsoleHostEvaluator,
    editor: DefaultEditor,
    terminated: bool,
}

impl ReplSession {
    pub fn new(config: Box<RunnerConfig>) -> Result<Self, Box<dyn std::error::Error>> {
        let bytes = config.input.bytes().ok_or("could not read input program")?;
        let program: Vec<Stmt> = serde_json::from_slice(&bytes)?;

        let mut state = driver::create_initial_state(program, config.max_parallel, config.root_dir());
        let mut controller = DebugController::new();
        if config.stop_on_entry {
            state.status = Status::Paused;
        }
        if let Some(name) = config.entrypoint.clone() {
            controller.set_breakpoint(BreakpointType::Function(name));
        }

        let editor = DefaultEditor::new()?;
        Ok(Self { state, controller, ai: ConsoleAiProvider, host: ConsoleHostEvaluator, editor, terminated: false })
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.print_welcome();
        self.print_location();

        loop {
            let prompt = self.make_prompt();
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = self.editor.add_history_entry(line);

                    match line.parse::<ReplCommand>() {
                        Ok(cmd) => {
                            if matches!(cmd, ReplCommand::Quit) {
                                println!("\x1b[36mGoodbye!\x1b[0m");
                                break;
                            }
                            if let Err(e) = self.execute_command(cmd) {
                                eprintln!("\x1b[31mError:\x1b[0m {e}");
                            }
                        }
                        Err(e) => eprintln!("\x1b[31mError:\x1b[0m {e}"),
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("\x1b[36mGoodbye!\x1b[0m");
                    break;
                }
                Err(e) => {
                    eprintln!("\x1b[31mError reading line:\x1b[0m {e}");
                    break;
                }
            }
        }

        Ok(())
    }

    fn print_welcome(&self) {
        println!("\x1b[1;36mvibe runtime REPL\x1b[0m");
        println!("Type \x1b[33mhelp\x1b[0m for available commands.");
        println!();
    }

    fn make_prompt(&self) -> String {
        match self.state.status {
            Status::Completed => "\x1b[36m[\x1b[0m\x1b[1;32mEND\x1b[0m\x1b[36m]\x1b[0m > ".into(),
            Status::Error => "\x1b[36m[\x1b[0m\x1b[1;31mERR\x1b[0m\x1b[36m]\x1b[0m > ".into(),
            Status::Paused => "\x1b[36m[\x1b[0m\x1b[1;33mSTOP\x1b[0m\x1b[36m]\x1b[0m > ".into(),
            _ => "\x1b[36m[\x1b[0mrunning\x1b[36m]\x1b[0m > ".into(),
        }
    }

    fn print_location(&self) {
        let trace = driver::get_stack_trace(&self.state);
        if let Some(top) = trace.frames.first() {
            println!("at {}:{}:{} in {}", top.location.file, top.location.line, top.location.col, top.name);
        }
    }

    fn execute_command(&mut self, cmd: ReplCommand) -> Result<(), String> {
        match cmd {
            ReplCommand::Step => self.cmd_step(1),
            ReplCommand::StepN(n) => self.cmd_step(n),
            ReplCommand::StepInto => self.cmd_step_mode(|c| c.set_step_into()),
            ReplCommand::StepOver => {
                let depth = self.state.call_stack.len();
                self.cmd_step_mode(move |c| c.set_step_over(depth))
            }
            ReplCommand::StepOut => {
                let depth = self.state.call_stack.len();
                self.cmd_step_mode(move |c| c.set_step_out(depth))
            }
            ReplCommand::Continue => self.cmd_continue(),
            ReplCommand::Break(ty) => self.cmd_break(ty),
            ReplCommand::Breakpoints => self.cmd_breakpoints(),
            ReplCommand::Delete(id) => self.cmd_delete(id),
            ReplCommand::Watch(expr) => self.cmd_watch(expr),
            ReplCommand::Watches => self.cmd_watches(),
            ReplCommand::Unwatch(id) => self.cmd_unwatch(id),
            ReplCommand::Locals => self.cmd_scope(false),
            ReplCommand::Vars => self.cmd_scope(true),
            ReplCommand::Where => self.cmd_where(),
            ReplCommand::Backtrace => self.cmd_backtrace(),
            ReplCommand::Help => self.cmd_help(),
            ReplCommand::Quit => unreachable!("quit handled in run loop"),
        }
    }

    /// Drive the machine forward, serving any AI/host suspension points with
    /// the console stand-ins along the way (spec.md §4.4, §4.7).
    fn pump(&mut self) {
        loop {
            if self.state.status == Status::Running {
                let state = self.state.clone();
                self.state = driver::run_debug(state, &mut self.controller);
            }
            match self.state.status {
                Status::AwaitingAi => {
                    let request = self.state.pending_ai.as_ref().map(|p| AiRequest {
                        prompt: p.prompt.clone(),
                        context_text: String::new(),
                        model: p.model.clone(),
                        op_kind: p.kind,
                        tool_schemas: Vec::new(),
                        expected_shape: p.expected_fields.clone(),
                    });
                    if let Some(request) = request {
                        let response = self.ai.execute(&request);
                        if let Err(e) = driver::resume_with_ai_response(&mut self.state, response) {
                            eprintln!("\x1b[31mAI resume error:\x1b[0m {e}");
                            break;
                        }
                    } else {
                        break;
                    }
                }
                Status::AwaitingTs => {
                    let request = self.state.pending_ts.as_ref().map(|p| HostRequest {
                        reason: vibe_runtime::instruction::HandoffReason::TsBlock,
                        params: p.params.clone(),
                        body: p.body.clone(),
                        args: p.args.clone(),
                    });
                    if let Some(request) = request {
                        let response = self.host.evaluate(&request);
                        if let Err(e) = driver::resume_with_ts_result(&mut self.state, response) {
                            eprintln!("\x1b[31mHost resume error:\x1b[0m {e}");
                            break;
                        }
                    } else {
                        break;
                    }
                }
                Status::AwaitingCompress => {
                    println!("\x1b[35m[compress]\x1b[0m scope exiting, summarizing before discard");
                    let summary = read_reply("summary text> ");
                    if let Err(e) = driver::resume_with_compress(&mut self.state, summary) {
                        eprintln!("\x1b[31mCompress resume error:\x1b[0m {e}");
                        break;
                    }
                }
                Status::AwaitingAsync => {
                    let starts = driver::drain_async_starts(&mut self.state);
                    if starts.is_empty() {
                        break;
                    }
                    // The console driver resolves async starts synchronously and
                    // immediately, in request order, rather than truly concurrently.
                    let completions = starts
                        .into_iter()
                        .map(|start| driver::AsyncCompletion { id: start.id, result: vibe_runtime::VibeValue::null(), end_ns: 0 })
                        .collect();
                    driver::resume_with_async_results(&mut self.state, completions);
                }
                _ => break,
            }
        }
        if self.state.status == Status::Completed || self.state.status == Status::Error {
            self.terminated = true;
        }
    }

    fn cmd_step(&mut self, n: usize) -> Result<(), String> {
        if self.terminated {
            return Err("program has terminated, cannot step".into());
        }
        let state = self.state.clone();
        self.state = driver::step_n(state, n);
        self.pump();
        self.print_location();
        Ok(())
    }

    fn cmd_step_mode(&mut self, set: impl FnOnce(&mut DebugController)) -> Result<(), String> {
        if self.terminated {
            return Err("program has terminated, cannot step".into());
        }
        set(&mut self.controller);
        driver::resume_execution(&mut self.state);
        self.pump();
        self.print_location();
        Ok(())
    }

    fn cmd_continue(&mut self) -> Result<(), String> {
        if self.terminated {
            return Err("program has terminated, cannot continue".into());
        }
        driver::resume_execution(&mut self.state);
        self.pump();
        if self.terminated {
            match self.state.status {
                Status::Error => println!("Program terminated with error: {}", self.state.error.as_deref().unwrap_or("unknown")),
                _ => println!("Program terminated successfully"),
            }
        } else {
            self.print_location();
        }
        Ok(())
    }

    fn cmd_break(&mut self, ty: BreakpointType) -> Result<(), String> {
        let id = self.controller.set_breakpoint(ty.clone());
        println!("Breakpoint {id} created: {ty:?}");
        Ok(())
    }

    fn cmd_breakpoints(&mut self) -> Result<(), String> {
        if self.controller.breakpoints().is_empty() {
            println!("No breakpoints set");
            return Ok(());
        }
        println!("Breakpoints:");
        for bp in self.controller.breakpoints() {
            println!("  [{}] {:?} (hit {} times)", bp.id, bp.ty, bp.hit_count);
        }
        Ok(())
    }

    fn cmd_delete(&mut self, id: Option<u32>) -> Result<(), String> {
        match id {
            Some(id) => {
                if self.controller.clear_breakpoint(id) {
                    println!("Deleted breakpoint {id}");
                } else {
                    return Err(format!("no breakpoint with id {id}"));
                }
            }
            None => {
                self.controller.clear_all_breakpoints();
                println!("Deleted all breakpoints");
            }
        }
        Ok(())
    }

    fn cmd_watch(&mut self, expr: String) -> Result<(), String> {
        let id = self.controller.add_watch(expr.clone());
        println!("Watch {id} created: {expr}");
        Ok(())
    }

    fn cmd_watches(&mut self) -> Result<(), String> {
        let frame = self.state.current_frame_index();
        vibe_runtime::debug::refresh_watches(&mut self.controller, &self.state.frame_arena, frame);
        if self.controller.watches().is_empty() {
            println!("No watch expressions");
            return Ok(());
        }
        for w in self.controller.watches() {
            match &w.last_value {
                Some(v) => println!("  [{}] {} = {:?}", w.id, w.expr, v.value),
                None => println!("  [{}] {} = <unresolved>", w.id, w.expr),
            }
        }
        Ok(())
    }

    fn cmd_unwatch(&mut self, id: u32) -> Result<(), String> {
        self.controller.remove_watch(id);
        println!("Removed watch {id}");
        Ok(())
    }

    fn cmd_scope(&mut self, global: bool) -> Result<(), String> {
        let frame = self.state.current_frame_index();
        let scopes = driver::get_scopes(&self.state, frame);
        let scope = scopes.iter().find(|s| (s.name == "global") == global).ok_or("no such scope")?;
        let vars = driver::get_variables(&self.state, scope.variables_reference);
        if vars.is_empty() {
            println!("(no variables)");
        }
        for v in vars {
            println!("  {} = {:?}", v.name, v.value.value);
        }
        Ok(())
    }

    fn cmd_where(&mut self) -> Result<(), String> {
        self.print_location();
        Ok(())
    }

    fn cmd_backtrace(&mut self) -> Result<(), String> {
        let trace = driver::get_stack_trace(&self.state);
        if trace.frames.is_empty() {
            println!("No call stack");
            return Ok(());
        }
        println!("Backtrace ({} frames):", trace.frames.len());
        for (i, frame) in trace.frames.iter().enumerate() {
            println!("  #{} {} at {}:{}:{}", i, frame.name, frame.location.file, frame.location.line, frame.location.col);
        }
        Ok(())
    }

    fn cmd_help(&mut self) -> Result<(), String> {
        println!("{}", ReplCommand::help_text());
        Ok(())
    }
}
