//! Hand-rolled compiler diagnostics. No `thiserror`/`anyhow`: a plain
//! struct with a manual `Display`, matching the rest of the workspace.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32) -> CompileError {
        CompileError { message: message.into(), line }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.message)
    }
}

impl std::error::Error for CompileError {}
