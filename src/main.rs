mod config;
mod input;
#[cfg(feature = "repl")]
mod repl;

use std::env;

use clap::Parser;

pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger, but do not install it until the REPL is ready to run.
    let mut builder = env_logger::Builder::from_env("VIBE_TRACE");
    builder.format_indent(Some(2));
    if let Ok(precision) = env::var("VIBE_TRACE_TIMING") {
        match precision.as_str() {
            "s" => builder.format_timestamp_secs(),
            "ms" => builder.format_timestamp_millis(),
            "us" => builder.format_timestamp_micros(),
            "ns" => builder.format_timestamp_nanos(),
            other => {
                return Err(format!(
                    "invalid VIBE_TRACE_TIMING precision, expected one of [s, ms, us, ns], got '{other}'"
                )
                .into());
            }
        };
    } else {
        builder.format_timestamp(None);
    }

    let logger = builder.build();
    let max_level = logger.filter();
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(max_level))?;

    let config = Box::new(config::RunnerConfig::parse());
    repl::run(config)
}
