//! Runtime errors raised while interpreting, and build errors raised while
//! assembling a program.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use super::Value;

/// The category of a runtime error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Overflow,
    DivideByZero,
    IndexOutOfRange,
    InvalidArrayLength,
    InvalidCast,
    NullReference,
    InvalidOperation,
    /// Execution was stopped by the host (instruction budget). Never caught.
    Aborted,
    /// A non-error value raised by `Throw`.
    User,
    /// An error category named by the program or a host member.
    Custom(Arc<str>),
}

impl ErrorKind {
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Overflow => "overflow",
            ErrorKind::DivideByZero => "divide_by_zero",
            ErrorKind::IndexOutOfRange => "index_out_of_range",
            ErrorKind::InvalidArrayLength => "invalid_array_length",
            ErrorKind::InvalidCast => "invalid_cast",
            ErrorKind::NullReference => "null_reference",
            ErrorKind::InvalidOperation => "invalid_operation",
            ErrorKind::Aborted => "aborted",
            ErrorKind::User => "user",
            ErrorKind::Custom(name) => name,
        }
    }

    fn is_arithmetic(&self) -> bool {
        matches!(self, ErrorKind::Overflow | ErrorKind::DivideByZero)
    }
}

impl FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "overflow" => ErrorKind::Overflow,
            "divide_by_zero" => ErrorKind::DivideByZero,
            "index_out_of_range" => ErrorKind::IndexOutOfRange,
            "invalid_array_length" => ErrorKind::InvalidArrayLength,
            "invalid_cast" => ErrorKind::InvalidCast,
            "null_reference" => ErrorKind::NullReference,
            "invalid_operation" => ErrorKind::InvalidOperation,
            "aborted" => ErrorKind::Aborted,
            "user" => ErrorKind::User,
            other => ErrorKind::Custom(other.into()),
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set of errors a catch handler accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    /// Every catchable error.
    Any,
    /// `Overflow` and `DivideByZero`.
    Arithmetic,
    Kind(ErrorKind),
}

impl Category {
    /// `Aborted` is matched by no category.
    pub fn matches(&self, kind: &ErrorKind) -> bool {
        if *kind == ErrorKind::Aborted {
            return false;
        }
        match self {
            Category::Any => true,
            Category::Arithmetic => kind.is_arithmetic(),
            Category::Kind(expected) => expected == kind,
        }
    }
}

impl FromStr for Category {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "any" => Category::Any,
            "arithmetic" => Category::Arithmetic,
            other => Category::Kind(other.parse()?),
        })
    }
}

/// One entry of an error's diagnostic trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub program: Arc<str>,
    pub instruction: usize,
    /// Source line range, when debug info maps the instruction.
    pub lines: Option<(u32, u32)>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {} [{}]", self.program, self.instruction)?;
        if let Some((start, end)) = self.lines {
            if start == end {
                write!(f, " line {}", start)?;
            } else {
                write!(f, " lines {}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

struct ExceptionData {
    kind: ErrorKind,
    message: String,
    payload: Value,
    trace: Mutex<Vec<TraceFrame>>,
}

/// A runtime error in flight.
///
/// Cloning shares the same error: identity survives catch, rethrow, and
/// storage in locals, and is what `ptr_eq` compares.
#[derive(Clone)]
pub struct Exception(Arc<ExceptionData>);

impl Exception {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::with_payload(kind, message, Value::Null)
    }

    pub fn with_payload(kind: ErrorKind, message: impl Into<String>, payload: Value) -> Self {
        Exception(Arc::new(ExceptionData {
            kind,
            message: message.into(),
            payload,
            trace: Mutex::new(Vec::new()),
        }))
    }

    /// Wraps a thrown non-error value.
    pub fn user(payload: Value) -> Self {
        let message = payload.to_string();
        Self::with_payload(ErrorKind::User, message, payload)
    }

    pub fn overflow() -> Self {
        Self::new(ErrorKind::Overflow, "arithmetic operation resulted in an overflow")
    }

    pub fn divide_by_zero() -> Self {
        Self::new(ErrorKind::DivideByZero, "attempted to divide by zero")
    }

    pub fn index_out_of_range(index: i64, len: usize) -> Self {
        Self::new(
            ErrorKind::IndexOutOfRange,
            format!("index {} out of bounds (length {})", index, len),
        )
    }

    pub fn invalid_array_length(len: i64) -> Self {
        Self::new(
            ErrorKind::InvalidArrayLength,
            format!("invalid array length {}", len),
        )
    }

    pub fn invalid_cast(expected: &str, found: &Value) -> Self {
        Self::new(
            ErrorKind::InvalidCast,
            format!("expected {}, found {}", expected, found.type_name()),
        )
    }

    pub fn null_reference(what: &str) -> Self {
        Self::new(ErrorKind::NullReference, format!("{} is null", what))
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }

    pub fn aborted(budget: u64) -> Self {
        Self::new(
            ErrorKind::Aborted,
            format!("instruction budget of {} exhausted", budget),
        )
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn payload(&self) -> &Value {
        &self.0.payload
    }

    /// True if both handles refer to the same raised error.
    pub fn ptr_eq(&self, other: &Exception) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn trace(&self) -> Vec<TraceFrame> {
        self.0.trace.lock().clone()
    }

    pub(crate) fn push_trace(&self, frame: TraceFrame) {
        self.0.trace.lock().push(frame);
    }

    pub(crate) fn reset_trace(&self) {
        self.0.trace.lock().clear();
    }
}

impl PartialEq for Exception {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("kind", &self.0.kind)
            .field("message", &self.0.message)
            .finish()
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.0.kind, self.0.message)
    }
}

impl std::error::Error for Exception {}

/// Errors detected while building or verifying a program. None of these can
/// occur once a program has been built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("stack underflow at {index}: {name} requires {required} values, but only {actual} on stack")]
    StackUnderflow {
        index: usize,
        name: &'static str,
        required: usize,
        actual: usize,
    },
    #[error("continuation underflow at {index}: {name} has no continuation to consume")]
    ContinuationUnderflow { index: usize, name: &'static str },
    #[error("stack depth mismatch at label {label}: expected {expected}, got {actual}")]
    StackDepthMismatch {
        label: usize,
        expected: usize,
        actual: usize,
    },
    #[error("branch to label {0} crosses a try region boundary; use goto")]
    BranchAcrossRegion(usize),
    #[error("branch at {index} to {target} crosses a try region boundary")]
    BranchLeavesRegion { index: usize, target: usize },
    #[error("label {0} is marked twice")]
    LabelMarkedTwice(usize),
    #[error("label {0} is referenced but never marked")]
    UnmarkedLabel(usize),
    #[error("goto at {index} carries a value to label {label}, which has an empty stack")]
    GotoValueWithoutSlot { index: usize, label: usize },
    #[error("{operation} is not defined for {kind}")]
    UnsupportedKind {
        operation: &'static str,
        kind: &'static str,
    },
    #[error("try region {0} was never completed")]
    IncompleteTryRegion(usize),
    #[error("try block: {0}")]
    MalformedTry(&'static str),
    #[error("invalid jump target at {index}: target {target} is out of bounds")]
    InvalidJumpTarget { index: usize, target: isize },
    #[error("invalid label {label} referenced at {index}")]
    InvalidLabel { index: usize, label: usize },
    #[error("try region {region}: {reason}")]
    InvalidTryRegion { region: usize, reason: &'static str },
    #[error("stack height mismatch at {index}: expected {expected}, got {actual}")]
    StackHeightMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("stack depth {depth} exceeds limit {max}")]
    StackOverflow { depth: usize, max: usize },
    #[error("variable is not defined")]
    UndefinedVariable,
    #[error("closure variable cannot be boxed")]
    BoxedClosureVariable,
    #[error("local slot {0} is not boxed")]
    NotBoxed(usize),
    #[error("by-ref argument {argument} is out of range for {argc} arguments")]
    InvalidByRefArgument { argument: usize, argc: usize },
    #[error("by-ref operand '{0}' must be an unboxed local")]
    ByRefOperand(String),
    #[error("invalid constant: {0}")]
    InvalidConstant(String),
    #[error("unknown host method '{0}'")]
    UnknownMethod(String),
    #[error("unknown label '{0}'")]
    UnknownLabel(String),
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_matching() {
        assert!(Category::Any.matches(&ErrorKind::Overflow));
        assert!(Category::Arithmetic.matches(&ErrorKind::DivideByZero));
        assert!(!Category::Arithmetic.matches(&ErrorKind::InvalidCast));
        assert!(Category::Kind(ErrorKind::User).matches(&ErrorKind::User));
        assert!(!Category::Any.matches(&ErrorKind::Aborted));
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("any".parse::<Category>().unwrap(), Category::Any);
        assert_eq!(
            "overflow".parse::<Category>().unwrap(),
            Category::Kind(ErrorKind::Overflow)
        );
        assert_eq!(
            "io".parse::<Category>().unwrap(),
            Category::Kind(ErrorKind::Custom("io".into()))
        );
    }

    #[test]
    fn test_identity() {
        let a = Exception::overflow();
        let b = a.clone();
        let c = Exception::overflow();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.message(), c.message());
    }

    #[test]
    fn test_trace_is_shared() {
        let a = Exception::divide_by_zero();
        let b = a.clone();
        a.push_trace(TraceFrame {
            program: "main".into(),
            instruction: 3,
            lines: Some((4, 4)),
        });
        assert_eq!(b.trace().len(), 1);
        assert_eq!(b.trace()[0].to_string(), "at main [3] line 4");
        b.reset_trace();
        assert!(a.trace().is_empty());
    }
}
