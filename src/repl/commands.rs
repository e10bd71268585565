use std::str::FromStr;

use vibe_runtime::debug::BreakpointType;

/// Commands available in the REPL (spec.md §5, §6).
#[derive(Debug, Clone)]
pub enum ReplCommand {
    /// Execute one step of the machine
    Step,
    /// Execute N steps
    StepN(usize),
    /// Step into the next call
    StepInto,
    /// Step over the next statement, not descending into calls
    StepOver,
    /// Run until the current frame returns
    StepOut,
    /// Run until breakpoint, suspension, or completion
    Continue,
    /// Set a breakpoint
    Break(BreakpointType),
    /// List all breakpoints
    Breakpoints,
    /// Delete breakpoint(s) - None means delete all
    Delete(Option<u32>),
    /// Register a watch expression
    Watch(String),
    /// List watch expressions and their last-known values
    Watches,
    /// Remove a watch expression
    Unwatch(u32),
    /// Show the local scope of the current frame
    Locals,
    /// Show the global (lexical ancestor) scope of the current frame
    Vars,
    /// Show the current source location
    Where,
    /// Show the call stack
    Backtrace,
    /// Show help
    Help,
    /// Exit the REPL
    Quit,
}

impl FromStr for ReplCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty command".into());
        }

        let (cmd, args) = match s.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, Some(args.trim())),
            None => (s, None),
        };

        match cmd {
            // Stepping
            "s" | "step" => match args {
                Some(n) => {
                    let n = n.parse::<usize>().map_err(|e| format!("invalid step count: {e}"))?;
                    Ok(ReplCommand::StepN(n))
                }
                None => Ok(ReplCommand::Step),
            },
            "into" => Ok(ReplCommand::StepInto),
            "n" | "next" | "over" => Ok(ReplCommand::StepOver),
            "out" | "finish" => Ok(ReplCommand::StepOut),
            "c" | "continue" => Ok(ReplCommand::Continue),

            // Breakpoints
            "b" | "break" | "breakpoint" => {
                let args = args.ok_or("breakpoint requires a specification")?;
                let bp_type = args.parse::<BreakpointType>().map_err(|e| e.to_string())?;
                Ok(ReplCommand::Break(bp_type))
            }
            "bp" | "breakpoints" => Ok(ReplCommand::Breakpoints),
            "d" | "delete" => match args {
                Some(id) => {
                    let id = id.parse::<u32>().map_err(|e| format!("invalid breakpoint id: {e}"))?;
                    Ok(ReplCommand::Delete(Some(id)))
                }
                None => Ok(ReplCommand::Delete(None)),
            },

            // Watches
            "watch" => {
                let args = args.ok_or("watch requires an expression")?;
                Ok(ReplCommand::Watch(args.to_string()))
            }
            "watches" => Ok(ReplCommand::Watches),
            "unwatch" => {
                let args = args.ok_or("unwatch requires a watch id")?;
                let id = args.parse::<u32>().map_err(|e| format!("invalid watch id: {e}"))?;
                Ok(ReplCommand::Unwatch(id))
            }

            // Inspection
            "locals" => Ok(ReplCommand::Locals),
            "vars" | "variables" => Ok(ReplCommand::Vars),
            "where" | "w" => Ok(ReplCommand::Where),
            "bt" | "backtrace" => Ok(ReplCommand::Backtrace),

            // Other
            "h" | "help" | "?" => Ok(ReplCommand::Help),
            "q" | "quit" | "exit" => Ok(ReplCommand::Quit),

            _ => Err(format!("unknown command: {cmd}")),
        }
    }
}

impl ReplCommand {
    /// Returns the help text for all commands.
    pub fn help_text() -> &'static str {
        r#"Available commands:

Execution:
  s, step [N]        Execute one (or N) step(s) of the machine
  into               Step into the next call
  n, next, over       Step over the next statement
  out, finish        Run until the current frame returns
  c, continue        Run until breakpoint, suspension, or completion

Breakpoints:
  b, break <spec>    Set a breakpoint
                     Specs: <file>:<line>, in <function>, exception [kind]
  bp, breakpoints    List all breakpoints
  d, delete [id]     Delete breakpoint by id, or all if no id given

Watches:
  watch <expr>       Track a dotted-path expression after every step
  watches            List watch expressions and their last-known values
  unwatch <id>       Remove a watch expression

Inspection:
  locals             Show the local scope of the current frame
  vars               Show the global (lexical ancestor) scope
  where, w           Show the current source location
  bt, backtrace      Show the call stack

Other:
  h, help, ?         Show this help
  q, quit, exit      Exit the REPL
"#
    }
}
