//! Watch expressions (spec §5.3).
//!
//! Grounded on `debug/variables.rs`'s `DebugVarTracker`, which keeps a named
//! map of currently-visible values the REPL can print on demand; generalized
//! here from "every tracked variable" to a user-selected subset re-evaluated
//! after each step.

use serde::{Deserialize, Serialize};

use crate::value::VibeValue;

/// A user-registered expression re-evaluated after every step (spec §5.3).
/// Only bare identifier and member-access expressions are supported, since
/// this core has no expression parser of its own (spec §1 — parsing is out
/// of scope); the debug controller resolves these directly against the
/// current frame chain rather than compiling them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchExpression {
    pub id: u32,
    pub expr: String,
    pub last_value: Option<VibeValue>,
}

impl WatchExpression {
    pub fn new(id: u32, expr: impl Into<String>) -> Self {
        Self { id, expr: expr.into(), last_value: None }
    }

    /// Split `a.b.c` into a root identifier and a chain of member accesses.
    pub fn path(&self) -> (&str, Vec<&str>) {
        let mut parts = self.expr.split('.');
        let root = parts.next().unwrap_or("");
        (root, parts.collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_splits_member_chain() {
        let w = WatchExpression::new(1, "user.profile.name");
        let (root, chain) = w.path();
        assert_eq!(root, "user");
        assert_eq!(chain, vec!["profile", "name"]);
    }

    #[test]
    fn path_with_no_members() {
        let w = WatchExpression::new(1, "x");
        let (root, chain) = w.path();
        assert_eq!(root, "x");
        assert!(chain.is_empty());
    }
}
