//! Hand-rolled runtime diagnostics, mirroring `ember_compiler::CompileError`.

use std::fmt;

/// One entry of a formatted stack trace, captured top-to-bottom at the
/// moment a runtime error is raised, before the VM unwinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub line: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub frames: Vec<FrameInfo>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, frames: Vec<FrameInfo>) -> RuntimeError {
        RuntimeError { message: message.into(), frames }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for frame in &self.frames {
            writeln!(f, "[line {}] in {}", frame.line, frame.name)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}
