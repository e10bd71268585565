//! The runtime-fault taxonomy (spec §4.8, §7).
//!
//! Grounded on `config.rs::ColorChoiceParseError` and
//! `exec/trace.rs::MemoryReadError`: both are small `thiserror::Error` enums,
//! one variant per failure mode, each with an `#[error("...")]` format
//! string. `RuntimeFault` follows the same shape, one variant per entry in
//! spec §7's taxonomy, each carrying a [`SourceLocation`] so the
//! user-visible message always reads `<message> at <file>:<line>:<col>`.

use thiserror::Error;

use crate::instruction::SourceLocation;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeFault {
    #[error("parse error: {message} at {location}")]
    ParseError { message: String, location: SourceLocation },

    #[error("semantic error: {message} at {location}")]
    SemanticError { message: String, location: SourceLocation },

    #[error("type error: {message} at {location}")]
    TypeError { message: String, location: SourceLocation },

    #[error("reference error: {message} at {location}")]
    ReferenceError { message: String, location: SourceLocation },

    #[error("range error: {message} at {location}")]
    RangeError { message: String, location: SourceLocation },

    #[error("cannot assign to const binding '{name}' at {location}")]
    ConstAssignError { name: String, location: SourceLocation },

    #[error("missing field '{field}' at {location}")]
    MissingFieldError { field: String, location: SourceLocation },

    #[error("AI provider error: {message} at {location}")]
    AIProviderError { message: String, location: SourceLocation },

    #[error("host block error: {message} at {location}")]
    HostBlockError { message: String, location: SourceLocation, stack: Option<String> },

    #[error("compress error: {message} at {location}")]
    CompressError { message: String, location: SourceLocation },

    #[error("async operation canceled at {location}")]
    AsyncCanceledError { location: SourceLocation },

    #[error("breakpoint error: {message}")]
    BreakpointError { message: String },

    #[error("internal error: {message} at {location}")]
    InternalError { message: String, location: SourceLocation },
}

impl RuntimeFault {
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            RuntimeFault::ParseError { location, .. }
            | RuntimeFault::SemanticError { location, .. }
            | RuntimeFault::TypeError { location, .. }
            | RuntimeFault::ReferenceError { location, .. }
            | RuntimeFault::RangeError { location, .. }
            | RuntimeFault::ConstAssignError { location, .. }
            | RuntimeFault::MissingFieldError { location, .. }
            | RuntimeFault::AIProviderError { location, .. }
            | RuntimeFault::HostBlockError { location, .. }
            | RuntimeFault::CompressError { location, .. }
            | RuntimeFault::AsyncCanceledError { location }
            | RuntimeFault::InternalError { location, .. } => Some(location),
            RuntimeFault::BreakpointError { .. } => None,
        }
    }

    /// Wrap a [`crate::value::VibeError`] that reached `throw_error` into a
    /// runtime fault, reusing its message and location unchanged (spec §4.1,
    /// §4.8: "if a declared VibeValue error-object is already present, it is
    /// reused").
    pub fn from_vibe_error(err: &crate::value::VibeError) -> Self {
        use crate::value::ErrorKind::*;
        let location = err.location.clone();
        let message = err.message.clone();
        match err.kind {
            ParseError => RuntimeFault::ParseError { message, location },
            SemanticError => RuntimeFault::SemanticError { message, location },
            TypeError => RuntimeFault::TypeError { message, location },
            ReferenceError => RuntimeFault::ReferenceError { message, location },
            RangeError => RuntimeFault::RangeError { message, location },
            ConstAssignError => RuntimeFault::ConstAssignError { name: message, location },
            MissingFieldError => RuntimeFault::MissingFieldError { field: message, location },
            AIProviderError => RuntimeFault::AIProviderError { message, location },
            HostBlockError => RuntimeFault::HostBlockError { message, location, stack: err.stack.as_ref().map(|s| s.join("\n")) },
            CompressError => RuntimeFault::CompressError { message, location },
            AsyncCanceledError => RuntimeFault::AsyncCanceledError { location },
            BreakpointError => RuntimeFault::BreakpointError { message },
            InternalError => RuntimeFault::InternalError { message, location },
        }
    }
}
