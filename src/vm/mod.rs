mod byref;
mod closure;
pub mod debug;
mod error;
mod frame;
mod handler;
mod instruction;
mod interpreter;
mod member;
pub mod numeric;
mod program;
mod value;
mod verifier;

pub use byref::{ByRefUpdater, Slot};
pub use closure::{Capture, Closure};
pub use debug::DebugInfo;
pub use error::{BuildError, Category, ErrorKind, Exception, TraceFrame};
pub use frame::Frame;
pub use handler::{CatchHandler, FilterRegion, FinallyRegion, TryRegion};
pub use instruction::{Instruction, Jump};
pub use interpreter::Interpreter;
pub use member::{Field, MemberError, Method, NativeMethod, ObjectField, ObjectProperty, Property};
pub use numeric::{BinaryOp, CompareOp, NumericKind, UnaryOp};
pub use program::{Program, RuntimeLabel};
pub use value::{ArrayRef, Cell, ObjectRef, Value};
pub use verifier::Verifier;
