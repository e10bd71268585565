use std::path::PathBuf;
use std::str::FromStr;

use crate::input::InputFile;

/// Run a vibe script under the stepwise runtime, optionally stopping in the
/// debugger (spec.md §6, SPEC_FULL.md §A.3).
#[derive(Default, Debug)]
#[cfg_attr(feature = "repl", derive(clap::Parser))]
#[cfg_attr(
    feature = "repl",
    command(author, version, about = "The vibe runtime REPL", long_about = None)
)]
pub struct RunnerConfig {
    /// Specify the path to a vibe script file to run.
    ///
    /// You may use `-` as a file name to read the script from stdin.
    #[cfg_attr(feature = "repl", arg(required(true), value_name = "FILE"))]
    pub input: InputFile,
    /// Specify the function to call as the entrypoint, instead of running
    /// top-level statements directly.
    #[cfg_attr(feature = "repl", arg(long, help_heading = "Execution"))]
    pub entrypoint: Option<String>,
    /// The maximum number of async operations allowed to be in flight at
    /// once (spec.md §4.5's parallel-start guarantee).
    #[cfg_attr(
        feature = "repl",
        arg(long, value_name = "N", default_value_t = 4, help_heading = "Execution")
    )]
    pub max_parallel: usize,
    /// The root directory host-language blocks and imports are resolved
    /// against.
    ///
    /// By default this is the working directory the runtime is started from.
    #[cfg_attr(feature = "repl", arg(long, value_name = "DIR", help_heading = "Execution"))]
    pub root_dir: Option<PathBuf>,
    /// Pause before running the first statement, as if a breakpoint were set
    /// on the program's entry.
    #[cfg_attr(feature = "repl", arg(long, help_heading = "Execution"))]
    pub stop_on_entry: bool,
    /// Whether, and how, to color terminal output
    #[cfg_attr(
        feature = "repl",
        arg(
            long,
            value_enum,
            default_value_t = ColorChoice::Auto,
            default_missing_value = "auto",
            num_args(0..=1),
            help_heading = "Output"
        )
    )]
    pub color: ColorChoice,
    /// Run in REPL mode instead of running the program to completion.
    #[cfg_attr(feature = "repl", arg(long, short = 'r'))]
    pub repl: bool,
}

/// ColorChoice represents the color preferences of an end user.
///
/// The `Default` implementation for this type will select `Auto`, which tries
/// to do the right thing based on the current environment.
///
/// The `FromStr` implementation for this type converts a lowercase kebab-case
/// string of the variant name to the corresponding variant. Any other string
/// results in an error.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "repl", derive(clap::ValueEnum))]
pub enum ColorChoice {
    /// Try very hard to emit colors. This includes emitting ANSI colors
    /// on Windows if the console API is unavailable.
    Always,
    /// AlwaysAnsi is like Always, except it never tries to use anything other
    /// than emitting ANSI color codes.
    AlwaysAnsi,
    /// Try to use colors, but don't force the issue. If the console isn't
    /// available on Windows, or if TERM=dumb, or if `NO_COLOR` is defined, for
    /// example, then don't use colors.
    #[default]
    Auto,
    /// Never emit colors.
    Never,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid color choice: {0}")]
pub struct ColorChoiceParseError(std::borrow::Cow<'static, str>);

impl FromStr for ColorChoice {
    type Err = ColorChoiceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" => Ok(ColorChoice::Always),
            "always-ansi" => Ok(ColorChoice::AlwaysAnsi),
            "never" => Ok(ColorChoice::Never),
            "auto" => Ok(ColorChoice::Auto),
            unknown => Err(ColorChoiceParseError(unknown.to_string().into())),
        }
    }
}

impl ColorChoice {
    /// Returns true if we should attempt to write colored output.
    pub fn should_attempt_color(&self) -> bool {
        match *self {
            ColorChoice::Always => true,
            ColorChoice::AlwaysAnsi => true,
            ColorChoice::Never => false,
            #[cfg(feature = "std")]
            ColorChoice::Auto => self.env_allows_color(),
            #[cfg(not(feature = "std"))]
            ColorChoice::Auto => false,
        }
    }

    #[cfg(all(feature = "repl", not(windows)))]
    pub fn env_allows_color(&self) -> bool {
        match std::env::var_os("TERM") {
            // If TERM isn't set, then we are in a weird environment that
            // probably doesn't support colors.
            None => return false,
            Some(k) => {
                if k == "dumb" {
                    return false;
                }
            }
        }
        // If TERM != dumb, then the only way we don't allow colors at this
        // point is if NO_COLOR is set.
        if std::env::var_os("NO_COLOR").is_some() {
            return false;
        }
        true
    }

    #[cfg(all(feature = "repl", windows))]
    pub fn env_allows_color(&self) -> bool {
        // On Windows, if TERM isn't set, then we shouldn't automatically
        // assume that colors aren't allowed. This is unlike Unix environments
        // where TERM is more rigorously set.
        if let Some(k) = std::env::var_os("TERM") {
            if k == "dumb" {
                return false;
            }
        }
        // If TERM != dumb, then the only way we don't allow colors at this
        // point is if NO_COLOR is set.
        if std::env::var_os("NO_COLOR").is_some() {
            return false;
        }
        true
    }

    /// Returns true if this choice should forcefully use ANSI color codes.
    ///
    /// It's possible that ANSI is still the correct choice even if this
    /// returns false.
    #[cfg(all(feature = "repl", windows))]
    pub fn should_ansi(&self) -> bool {
        match *self {
            ColorChoice::Always => false,
            ColorChoice::AlwaysAnsi => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => {
                match std::env::var("TERM") {
                    Err(_) => false,
                    // cygwin doesn't seem to support ANSI escape sequences
                    // and instead has its own variety. However, the Windows
                    // console API may be available.
                    Ok(k) => k != "dumb" && k != "cygwin",
                }
            }
        }
    }

    /// Returns true if this choice should forcefully use ANSI color codes.
    ///
    /// It's possible that ANSI is still the correct choice even if this
    /// returns false.
    #[cfg(not(feature = "repl"))]
    pub fn should_ansi(&self) -> bool {
        match *self {
            ColorChoice::Always => false,
            ColorChoice::AlwaysAnsi => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => false,
        }
    }
}

impl RunnerConfig {
    pub fn root_dir(&self) -> Option<String> {
        self.root_dir.as_ref().map(|p| p.display().to_string())
    }
}
