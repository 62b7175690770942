//! Sandboxed interpreter for candidate solutions.
//!
//! Candidates are written in a JavaScript subset with optional TypeScript
//! annotations. Source is lexed and parsed into an AST, then evaluated by an
//! async tree-walker that owns its own promise job queue and a virtual clock,
//! so every run is deterministic and bounded by a step budget.

pub mod ast;
mod builtins;
pub mod interp;
pub mod lexer;
pub mod parser;
mod runtime;
pub mod value;

use thiserror::Error;

use lexer::Span;

pub use interp::{Interp, Limits};
pub use runtime::{is_promise, promise_outcome, LoopError};
pub use value::{Abrupt, Value};

/// A lexing or parsing failure with its source position.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} ({span})")]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}
