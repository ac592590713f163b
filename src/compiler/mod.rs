//! Program construction: the instruction builder, its labels and local
//! scopes, and the JSON assembler built on top of them.

pub mod asm;
mod instructions;
mod label;
mod locals;

pub use asm::{assemble, json_value, CatchSource, Op, ProgramSource, RefSource, Registry};
pub use instructions::{InstructionList, TryBlock};
pub use label::LabelId;
pub use locals::{LocalDefinition, LocalVariable, LocalVariables};
