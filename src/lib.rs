//! lightvm - a stack-machine interpreter for lowered expression trees
//!
//! Programs are built with `compiler::InstructionList` (or assembled from
//! JSON by `compiler::asm`) and run by `vm::Interpreter`.

pub mod compiler;
pub mod config;
pub mod vm;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use vm::{BuildError, Exception, Interpreter, Program, Value};
