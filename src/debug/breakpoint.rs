//! Breakpoints and the hit-condition mini-grammar (spec §5.1).
//!
//! Grounded on `debug/breakpoint.rs`'s `Breakpoint`/`BreakpointType` (cycle-
//! and procedure-based stop conditions with a one-shot `Next`/`Finish`
//! variant); generalized from VM-cycle conditions to source-location and
//! expression conditions, with the `hit_condition` grammar added as
//! enrichment since the teacher's breakpoints had no analogous counter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ast::Expr;
use crate::instruction::{SourceLocation, TemplatePart};

/// What a breakpoint stops on (spec §5.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BreakpointType {
    /// Stop at a specific source line.
    Line { file: String, line: u32 },
    /// Stop on entry to a named function.
    Function(String),
    /// Stop when an uncaught runtime fault of a given kind occurs (spec §5.1
    /// "exception breakpoints"); `None` matches any fault.
    Exception(Option<String>),
}

impl fmt::Display for BreakpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakpointType::Line { file, line } => write!(f, "{file}:{line}"),
            BreakpointType::Function(name) => write!(f, "in {name}"),
            BreakpointType::Exception(None) => write!(f, "on any exception"),
            BreakpointType::Exception(Some(kind)) => write!(f, "on exception {kind}"),
        }
    }
}

impl FromStr for BreakpointType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("in ") {
            return Ok(BreakpointType::Function(rest.trim().to_string()));
        }
        if let Some(rest) = s.strip_prefix("exception") {
            let kind = rest.trim();
            return Ok(BreakpointType::Exception(if kind.is_empty() { None } else { Some(kind.to_string()) }));
        }
        match s.rsplit_once(':') {
            Some((file, line)) => {
                let line = line.parse::<u32>().map_err(|e| format!("invalid line number: {e}"))?;
                Ok(BreakpointType::Line { file: file.to_string(), line })
            }
            None => Err(format!("invalid breakpoint spec: {s}")),
        }
    }
}

/// A hit-count gate, parsed from the mini-grammar `>=N` / `==N` / `%N` / `N`
/// (spec §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum HitCondition {
    AtLeast(u32),
    Equals(u32),
    Multiple(u32),
}

impl HitCondition {
    pub fn is_satisfied(&self, hit_count: u32) -> bool {
        match self {
            HitCondition::AtLeast(n) => hit_count >= *n,
            HitCondition::Equals(n) => hit_count == *n,
            HitCondition::Multiple(n) => *n != 0 && hit_count % n == 0,
        }
    }
}

impl FromStr for HitCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix(">=") {
            return rest.trim().parse().map(HitCondition::AtLeast).map_err(|e| format!("invalid hit condition: {e}"));
        }
        if let Some(rest) = s.strip_prefix("==") {
            return rest.trim().parse().map(HitCondition::Equals).map_err(|e| format!("invalid hit condition: {e}"));
        }
        if let Some(rest) = s.strip_prefix('%') {
            return rest.trim().parse().map(HitCondition::Multiple).map_err(|e| format!("invalid hit condition: {e}"));
        }
        // A bare `N` triggers on all hits >= N (spec §5.1), not only the Nth.
        s.parse().map(HitCondition::AtLeast).map_err(|e| format!("invalid hit condition: {e}"))
    }
}

/// A single breakpoint (spec §5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: u32,
    pub ty: BreakpointType,
    /// Optional boolean expression, evaluated against the current frame —
    /// the breakpoint only fires if this evaluates true (spec §5.1).
    pub condition: Option<Expr>,
    pub hit_condition: Option<HitCondition>,
    /// Logged instead of stopping, when present (spec §5.1 "log_message").
    pub log_message: Option<Vec<TemplatePart>>,
    pub hit_count: u32,
}

impl Breakpoint {
    pub fn new(id: u32, ty: BreakpointType) -> Self {
        Self { id, ty, condition: None, hit_condition: None, log_message: None, hit_count: 0 }
    }

    pub fn matches_location(&self, loc: &SourceLocation) -> bool {
        matches!(&self.ty, BreakpointType::Line { file, line } if file == &loc.file && *line == loc.line)
    }

    pub fn matches_function(&self, name: &str) -> bool {
        matches!(&self.ty, BreakpointType::Function(f) if f == name)
    }

    pub fn matches_exception(&self, kind: &str) -> bool {
        matches!(&self.ty, BreakpointType::Exception(None)) || matches!(&self.ty, BreakpointType::Exception(Some(k)) if k == kind)
    }

    /// Record a hit and report whether execution should actually stop here,
    /// honoring `hit_condition` and `log_message` (spec §5.1). The `condition`
    /// expression, if any, is evaluated by the caller against the current
    /// frame before this is consulted.
    pub fn record_hit(&mut self) -> bool {
        self.hit_count += 1;
        self.hit_condition_satisfied() && self.log_message.is_none()
    }

    /// Whether `hit_condition` passes at the current `hit_count` (no gate
    /// means every hit passes).
    pub fn hit_condition_satisfied(&self) -> bool {
        self.hit_condition.map(|c| c.is_satisfied(self.hit_count)).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_line_spec() {
        let bp: BreakpointType = "main.vibe:12".parse().unwrap();
        assert_eq!(bp, BreakpointType::Line { file: "main.vibe".into(), line: 12 });
    }

    #[test]
    fn parses_function_spec() {
        let bp: BreakpointType = "in greet".parse().unwrap();
        assert_eq!(bp, BreakpointType::Function("greet".into()));
    }

    #[test]
    fn hit_condition_multiple() {
        let hc: HitCondition = "%3".parse().unwrap();
        assert!(!hc.is_satisfied(2));
        assert!(hc.is_satisfied(3));
        assert!(hc.is_satisfied(6));
    }

    #[test]
    fn log_message_breakpoint_never_stops() {
        let mut bp = Breakpoint::new(1, BreakpointType::Line { file: "a".into(), line: 1 });
        bp.log_message = Some(vec![TemplatePart::Literal("hit!".into())]);
        assert!(!bp.record_hit());
        assert_eq!(bp.hit_count, 1);
    }

    #[test]
    fn hit_condition_gates_stop() {
        let mut bp = Breakpoint::new(1, BreakpointType::Line { file: "a".into(), line: 1 });
        bp.hit_condition = Some(HitCondition::AtLeast(2));
        assert!(!bp.record_hit());
        assert!(bp.record_hit());
    }

    #[test]
    fn bare_number_hit_condition_is_at_least() {
        let hc: HitCondition = "5".parse().unwrap();
        assert_eq!(hc, HitCondition::AtLeast(5));
        assert!(!hc.is_satisfied(4));
        assert!(hc.is_satisfied(5));
        assert!(hc.is_satisfied(6));
    }
}
