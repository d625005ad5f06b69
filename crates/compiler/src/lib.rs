//! Scanner and single-pass Pratt compiler turning Ember source text into
//! a root `ObjFunction` ready for the VM to wrap in a closure and run.

mod compiler;
mod error;
mod scanner;

pub use compiler::compile;
pub use error::CompileError;
pub use scanner::{Scanner, Token, TokenKind};
