mod commands;
mod session;

use self::session::ReplSession;
use crate::config::RunnerConfig;

/// Run the REPL/runner with the given configuration (spec.md §6).
pub fn run(config: Box<RunnerConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = ReplSession::new(config)?;
    session.run()
}
