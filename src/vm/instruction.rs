//! The instruction set.
//!
//! Every instruction has a fixed stack effect (`consumed_stack` values popped,
//! `produced_stack` pushed) and a fixed continuation effect, which the builder
//! uses to compute depths. `run` returns the offset to add to the
//! instruction pointer.

use std::fmt;
use std::sync::Arc;

use super::byref::{self, ByRefUpdater};
use super::closure::{self, Capture};
use super::error::{BuildError, ErrorKind, Exception};
use super::frame::Frame;
use super::handler;
use super::member::{self, Field, MemberError, Method, Property};
use super::numeric::{self, BinaryOp, CompareOp, NumericKind, UnaryOp};
use super::program::Program;
use super::{ArrayRef, Value};

/// A branch target: a label id until the label is marked, a relative
/// offset afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jump {
    Pending(usize),
    Offset(isize),
}

impl Jump {
    fn offset(self) -> Result<isize, Exception> {
        match self {
            Jump::Offset(offset) => Ok(offset),
            Jump::Pending(label) => Err(Exception::invalid_operation(format!(
                "branch to unmarked label {}",
                label
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Instruction {
    // ========================================
    // Constants and stack
    // ========================================
    /// Push a value from the program's object pool.
    LoadObject(usize),
    LoadNull,
    Pop,
    Dup,

    // ========================================
    // Locals
    // ========================================
    LoadLocal(usize),
    LoadLocalBoxed(usize),
    /// Push the cell of a boxed local itself.
    LoadLocalCell(usize),
    StoreLocal(usize),
    StoreLocalBoxed(usize),
    /// Store the top of the stack without popping it.
    AssignLocal(usize),
    AssignLocalBoxed(usize),
    InitLocal(usize),
    InitLocalBoxed(usize),
    InitParameter(usize),
    /// Move a bound argument into a fresh cell.
    InitParameterBoxed(usize),

    // ========================================
    // Closure cells
    // ========================================
    LoadClosure(usize),
    StoreClosure(usize),
    AssignClosure(usize),
    LoadClosureCell(usize),

    // ========================================
    // Numeric families
    // ========================================
    Binary {
        op: BinaryOp,
        kind: NumericKind,
        checked: bool,
    },
    Unary {
        op: UnaryOp,
        kind: NumericKind,
        checked: bool,
    },
    Compare {
        op: CompareOp,
        kind: NumericKind,
        lifted: bool,
    },
    Convert {
        from: NumericKind,
        to: NumericKind,
        checked: bool,
    },
    /// Equality over any values: numbers by kind and value, references by
    /// identity.
    ValueEqual,
    ValueNotEqual,

    // ========================================
    // Control flow
    // ========================================
    Branch(Jump),
    BranchTrue(Jump),
    BranchFalse(Jump),
    /// Jump to a label, routing through any finally blocks between here and
    /// the label. Carries the popped value to the label if `has_value`.
    Goto {
        label: usize,
        has_value: bool,
    },

    // ========================================
    // Exception handling
    // ========================================
    EnterTryCatchFinally {
        region: usize,
        has_finally: bool,
    },
    /// Accounts for the error value a filter starts with. Jumped over.
    EnterExceptionFilter,
    /// Pops the filter's verdict.
    LeaveExceptionFilter,
    /// Accounts for the error value a handler starts with. Jumped over.
    EnterExceptionHandler,
    EnterFinally {
        label: usize,
    },
    LeaveFinally,
    Throw,
    Rethrow,
    /// Pop a message and push a new error value of this kind.
    NewError(ErrorKind),
    /// Pop an error and push the value it was raised with.
    ErrorPayload,

    // ========================================
    // Members
    // ========================================
    Call {
        method: Arc<dyn Method>,
        argc: usize,
    },
    CallByRef {
        method: Arc<dyn Method>,
        argc: usize,
        updaters: Vec<ByRefUpdater>,
    },
    LoadField(Arc<dyn Field>),
    StoreField(Arc<dyn Field>),
    GetProperty(Arc<dyn Property>),
    SetProperty(Arc<dyn Property>),

    // ========================================
    // Arrays
    // ========================================
    NewArray,
    NewArrayInit(usize),
    GetArrayItem,
    SetArrayItem,
    ArrayLength,

    // ========================================
    // Closures
    // ========================================
    CreateClosure {
        body: Arc<Program>,
        captures: Arc<[Capture]>,
    },
    InvokeClosure(usize),
}

impl Instruction {
    pub fn consumed_stack(&self) -> usize {
        match self {
            Instruction::Pop
            | Instruction::Dup
            | Instruction::StoreLocal(_)
            | Instruction::StoreLocalBoxed(_)
            | Instruction::AssignLocal(_)
            | Instruction::AssignLocalBoxed(_)
            | Instruction::StoreClosure(_)
            | Instruction::AssignClosure(_)
            | Instruction::Unary { .. }
            | Instruction::Convert { .. }
            | Instruction::BranchTrue(_)
            | Instruction::BranchFalse(_)
            | Instruction::LeaveExceptionFilter
            | Instruction::Throw
            | Instruction::NewError(_)
            | Instruction::ErrorPayload
            | Instruction::LoadField(_)
            | Instruction::GetProperty(_)
            | Instruction::NewArray
            | Instruction::ArrayLength => 1,
            Instruction::Binary { .. }
            | Instruction::Compare { .. }
            | Instruction::ValueEqual
            | Instruction::ValueNotEqual
            | Instruction::StoreField(_)
            | Instruction::SetProperty(_)
            | Instruction::GetArrayItem => 2,
            Instruction::SetArrayItem => 3,
            Instruction::Goto { has_value, .. } => usize::from(*has_value),
            Instruction::Call { method, argc } | Instruction::CallByRef { method, argc, .. } => {
                argc + usize::from(!method.is_static())
            }
            Instruction::NewArrayInit(n) => *n,
            Instruction::InvokeClosure(argc) => argc + 1,
            _ => 0,
        }
    }

    pub fn produced_stack(&self) -> usize {
        match self {
            Instruction::LoadObject(_)
            | Instruction::LoadNull
            | Instruction::LoadLocal(_)
            | Instruction::LoadLocalBoxed(_)
            | Instruction::LoadLocalCell(_)
            | Instruction::AssignLocal(_)
            | Instruction::AssignLocalBoxed(_)
            | Instruction::LoadClosure(_)
            | Instruction::AssignClosure(_)
            | Instruction::LoadClosureCell(_)
            | Instruction::Binary { .. }
            | Instruction::Unary { .. }
            | Instruction::Compare { .. }
            | Instruction::Convert { .. }
            | Instruction::ValueEqual
            | Instruction::ValueNotEqual
            | Instruction::EnterExceptionFilter
            | Instruction::EnterExceptionHandler
            | Instruction::NewError(_)
            | Instruction::ErrorPayload
            | Instruction::LoadField(_)
            | Instruction::GetProperty(_)
            | Instruction::NewArray
            | Instruction::NewArrayInit(_)
            | Instruction::GetArrayItem
            | Instruction::ArrayLength
            | Instruction::CreateClosure { .. }
            | Instruction::InvokeClosure(_) => 1,
            Instruction::Dup => 2,
            Instruction::Call { method, .. } | Instruction::CallByRef { method, .. } => {
                usize::from(method.returns_value())
            }
            _ => 0,
        }
    }

    pub fn consumed_continuations(&self) -> usize {
        match self {
            Instruction::EnterFinally { .. } => 1,
            _ => 0,
        }
    }

    pub fn produced_continuations(&self) -> usize {
        match self {
            Instruction::EnterTryCatchFinally { has_finally, .. } => usize::from(*has_finally),
            _ => 0,
        }
    }

    /// True if control never falls through to the next instruction.
    pub fn is_unconditional(&self) -> bool {
        matches!(
            self,
            Instruction::Branch(_)
                | Instruction::Goto { .. }
                | Instruction::Throw
                | Instruction::Rethrow
        )
    }

    /// Reject a numeric instruction whose operation is undefined for its kind.
    pub fn check_kind(&self) -> Result<(), BuildError> {
        match self {
            Instruction::Binary { op, kind, .. } => op.check(*kind),
            Instruction::Unary { op, kind, .. } => op.check(*kind),
            Instruction::Compare { op, kind, .. } => op.check(*kind),
            Instruction::Convert { from, to, .. } => numeric::check_conversion(*from, *to),
            _ => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Instruction::LoadObject(_) => "LoadObject",
            Instruction::LoadNull => "LoadNull",
            Instruction::Pop => "Pop",
            Instruction::Dup => "Dup",
            Instruction::LoadLocal(_) => "LoadLocal",
            Instruction::LoadLocalBoxed(_) => "LoadLocalBoxed",
            Instruction::LoadLocalCell(_) => "LoadLocalCell",
            Instruction::StoreLocal(_) => "StoreLocal",
            Instruction::StoreLocalBoxed(_) => "StoreLocalBoxed",
            Instruction::AssignLocal(_) => "AssignLocal",
            Instruction::AssignLocalBoxed(_) => "AssignLocalBoxed",
            Instruction::InitLocal(_) => "InitLocal",
            Instruction::InitLocalBoxed(_) => "InitLocalBoxed",
            Instruction::InitParameter(_) => "InitParameter",
            Instruction::InitParameterBoxed(_) => "InitParameterBoxed",
            Instruction::LoadClosure(_) => "LoadClosure",
            Instruction::StoreClosure(_) => "StoreClosure",
            Instruction::AssignClosure(_) => "AssignClosure",
            Instruction::LoadClosureCell(_) => "LoadClosureCell",
            Instruction::Binary { op, .. } => op.name(),
            Instruction::Unary { op, .. } => op.name(),
            Instruction::Compare { op, .. } => op.name(),
            Instruction::Convert { .. } => "Convert",
            Instruction::ValueEqual => "ValueEqual",
            Instruction::ValueNotEqual => "ValueNotEqual",
            Instruction::Branch(_) => "Branch",
            Instruction::BranchTrue(_) => "BranchTrue",
            Instruction::BranchFalse(_) => "BranchFalse",
            Instruction::Goto { .. } => "Goto",
            Instruction::EnterTryCatchFinally { .. } => "EnterTryCatchFinally",
            Instruction::EnterExceptionFilter => "EnterExceptionFilter",
            Instruction::LeaveExceptionFilter => "LeaveExceptionFilter",
            Instruction::EnterExceptionHandler => "EnterExceptionHandler",
            Instruction::EnterFinally { .. } => "EnterFinally",
            Instruction::LeaveFinally => "LeaveFinally",
            Instruction::Throw => "Throw",
            Instruction::Rethrow => "Rethrow",
            Instruction::NewError(_) => "NewError",
            Instruction::ErrorPayload => "ErrorPayload",
            Instruction::Call { .. } => "Call",
            Instruction::CallByRef { .. } => "CallByRef",
            Instruction::LoadField(_) => "LoadField",
            Instruction::StoreField(_) => "StoreField",
            Instruction::GetProperty(_) => "GetProperty",
            Instruction::SetProperty(_) => "SetProperty",
            Instruction::NewArray => "NewArray",
            Instruction::NewArrayInit(_) => "NewArrayInit",
            Instruction::GetArrayItem => "GetArrayItem",
            Instruction::SetArrayItem => "SetArrayItem",
            Instruction::ArrayLength => "ArrayLength",
            Instruction::CreateClosure { .. } => "CreateClosure",
            Instruction::InvokeClosure(_) => "InvokeClosure",
        }
    }

    /// The boxed counterpart of this instruction if it accesses local
    /// `slot` directly.
    pub(crate) fn boxed(&self, slot: usize) -> Option<Instruction> {
        let boxed = match self {
            Instruction::LoadLocal(s) if *s == slot => Instruction::LoadLocalBoxed(slot),
            Instruction::StoreLocal(s) if *s == slot => Instruction::StoreLocalBoxed(slot),
            Instruction::AssignLocal(s) if *s == slot => Instruction::AssignLocalBoxed(slot),
            Instruction::InitLocal(s) if *s == slot => Instruction::InitLocalBoxed(slot),
            Instruction::InitParameter(s) if *s == slot => Instruction::InitParameterBoxed(slot),
            Instruction::CallByRef {
                method,
                argc,
                updaters,
            } => {
                if !updaters.iter().any(|u| u.boxed(slot).is_some()) {
                    return None;
                }
                Instruction::CallByRef {
                    method: method.clone(),
                    argc: *argc,
                    updaters: updaters
                        .iter()
                        .map(|u| u.boxed(slot).unwrap_or_else(|| u.clone()))
                        .collect(),
                }
            }
            _ => return None,
        };
        Some(boxed)
    }

    /// Replace a pending branch target with a resolved offset.
    pub(crate) fn resolve_jump(&mut self, offset: isize) -> bool {
        match self {
            Instruction::Branch(jump) | Instruction::BranchTrue(jump) | Instruction::BranchFalse(jump) => {
                *jump = Jump::Offset(offset);
                true
            }
            _ => false,
        }
    }

    pub fn run(&self, frame: &mut Frame) -> Result<isize, Exception> {
        match self {
            Instruction::LoadObject(index) => {
                let value = frame
                    .program()
                    .objects()
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| Exception::invalid_operation(format!("no object {}", index)))?;
                frame.push(value);
            }
            Instruction::LoadNull => frame.push(Value::Null),
            Instruction::Pop => {
                frame.pop()?;
            }
            Instruction::Dup => {
                let value = frame.peek()?;
                frame.push(value);
            }

            Instruction::LoadLocal(slot) => {
                let value = frame.local(*slot)?;
                frame.push(value);
            }
            Instruction::LoadLocalBoxed(slot) => {
                let value = frame.local_cell(*slot)?.get();
                frame.push(value);
            }
            Instruction::LoadLocalCell(slot) => {
                let cell = frame.local_cell(*slot)?;
                frame.push(Value::Cell(cell));
            }
            Instruction::StoreLocal(slot) => {
                let value = frame.pop()?;
                frame.set_local(*slot, value)?;
            }
            Instruction::StoreLocalBoxed(slot) => {
                let value = frame.pop()?;
                frame.local_cell(*slot)?.set(value);
            }
            Instruction::AssignLocal(slot) => {
                let value = frame.peek()?;
                frame.set_local(*slot, value)?;
            }
            Instruction::AssignLocalBoxed(slot) => {
                let value = frame.peek()?;
                frame.local_cell(*slot)?.set(value);
            }
            Instruction::InitLocal(slot) => frame.set_local(*slot, Value::Null)?,
            Instruction::InitLocalBoxed(slot) => {
                frame.set_local(*slot, Value::Cell(super::Cell::new(Value::Null)))?
            }
            Instruction::InitParameter(_) => {}
            Instruction::InitParameterBoxed(slot) => {
                let argument = frame.local(*slot)?;
                frame.set_local(*slot, Value::Cell(super::Cell::new(argument)))?;
            }

            Instruction::LoadClosure(index) => {
                let value = frame.closure_cell(*index)?.get();
                frame.push(value);
            }
            Instruction::StoreClosure(index) => {
                let value = frame.pop()?;
                frame.closure_cell(*index)?.set(value);
            }
            Instruction::AssignClosure(index) => {
                let value = frame.peek()?;
                frame.closure_cell(*index)?.set(value);
            }
            Instruction::LoadClosureCell(index) => {
                let cell = frame.closure_cell(*index)?;
                frame.push(Value::Cell(cell));
            }

            Instruction::Binary { op, kind, checked } => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame.push(numeric::binary(*op, *kind, *checked, &left, &right)?);
            }
            Instruction::Unary { op, kind, checked } => {
                let value = frame.pop()?;
                frame.push(numeric::unary(*op, *kind, *checked, &value)?);
            }
            Instruction::Compare { op, kind, lifted } => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                frame.push(numeric::compare(*op, *kind, *lifted, &left, &right)?);
            }
            Instruction::Convert { from, to, checked } => {
                let value = frame.pop()?;
                frame.push(numeric::convert(*from, *to, *checked, &value)?);
            }
            Instruction::ValueEqual | Instruction::ValueNotEqual => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let equal = left == right;
                frame.push(Value::Bool(equal == matches!(self, Instruction::ValueEqual)));
            }

            Instruction::Branch(jump) => return jump.offset(),
            Instruction::BranchTrue(jump) => {
                if condition(frame.pop()?)? {
                    return jump.offset();
                }
            }
            Instruction::BranchFalse(jump) => {
                if !condition(frame.pop()?)? {
                    return jump.offset();
                }
            }
            Instruction::Goto { label, has_value } => {
                let value = if *has_value { Some(frame.pop()?) } else { None };
                return frame.goto(*label, value);
            }

            Instruction::EnterTryCatchFinally { region, .. } => {
                return handler::run_try(frame, *region);
            }
            Instruction::EnterExceptionFilter | Instruction::EnterExceptionHandler => {
                let value = frame.handled().map_or(Value::Null, |e| Value::Error(e.clone()));
                frame.push(value);
            }
            Instruction::LeaveExceptionFilter => {
                let verdict = frame.pop()?;
                frame.filter_verdict = Some(matches!(verdict, Value::Bool(true)));
            }
            Instruction::EnterFinally { label } => return handler::enter_finally(frame, *label),
            Instruction::LeaveFinally => return handler::leave_finally(frame),
            Instruction::Throw => {
                let error = match frame.pop()? {
                    Value::Error(error) => {
                        error.reset_trace();
                        frame.clear_traced();
                        error
                    }
                    Value::Null => Exception::null_reference("thrown value"),
                    other => Exception::user(other),
                };
                return Err(error);
            }
            Instruction::Rethrow => {
                return Err(frame
                    .handled()
                    .cloned()
                    .ok_or_else(|| Exception::invalid_operation("rethrow outside of a handler"))?);
            }
            Instruction::NewError(kind) => {
                let message = frame.pop()?;
                frame.push(Value::Error(Exception::new(kind.clone(), message.to_string())));
            }
            Instruction::ErrorPayload => match frame.pop()? {
                Value::Error(error) => frame.push(error.payload().clone()),
                other => return Err(Exception::invalid_cast("error", &other)),
            },

            Instruction::Call { method, argc } => {
                let mut args = frame.pop_n(*argc)?;
                let instance = if method.is_static() {
                    None
                } else {
                    Some(frame.pop()?)
                };
                let result = method
                    .invoke(instance.as_ref(), &mut args)
                    .map_err(MemberError::into_exception)?;
                if method.returns_value() {
                    frame.push(result);
                }
            }
            Instruction::CallByRef {
                method,
                argc,
                updaters,
            } => return byref::call(frame, method, *argc, updaters),
            Instruction::LoadField(field) => {
                let target = frame.pop()?;
                frame.push(field.get(&target).map_err(MemberError::into_exception)?);
            }
            Instruction::StoreField(field) => {
                let value = frame.pop()?;
                let target = frame.pop()?;
                field.set(&target, value).map_err(MemberError::into_exception)?;
            }
            Instruction::GetProperty(property) => {
                let target = frame.pop()?;
                frame.push(property.get(&target).map_err(MemberError::into_exception)?);
            }
            Instruction::SetProperty(property) => {
                let value = frame.pop()?;
                let target = frame.pop()?;
                member::write_property(property.as_ref(), &target, value)?;
            }

            Instruction::NewArray => {
                let length = frame.pop()?;
                let n = length
                    .as_index()
                    .ok_or_else(|| Exception::invalid_cast("integer length", &length))?;
                frame.push(Value::array(null_elements(n)?));
            }
            Instruction::NewArrayInit(n) => {
                let elements = frame.pop_n(*n)?;
                frame.push(Value::array(elements));
            }
            Instruction::GetArrayItem => {
                let index = frame.pop()?;
                let array = frame.pop()?;
                let item = array_of(&array)?.get(index_of(&index)?)?;
                frame.push(item);
            }
            Instruction::SetArrayItem => {
                let value = frame.pop()?;
                let index = frame.pop()?;
                let array = frame.pop()?;
                array_of(&array)?.set(index_of(&index)?, value)?;
            }
            Instruction::ArrayLength => {
                let array = frame.pop()?;
                let len = array_of(&array)?.len();
                let len = i32::try_from(len).map_err(|_| Exception::overflow())?;
                frame.push(Value::I32(len));
            }

            Instruction::CreateClosure { body, captures } => {
                return closure::create(frame, body, captures);
            }
            Instruction::InvokeClosure(argc) => return closure::invoke(frame, *argc),
        }
        Ok(1)
    }
}

fn condition(value: Value) -> Result<bool, Exception> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Null => Err(Exception::null_reference("branch condition")),
        other => Err(Exception::invalid_cast("bool", &other)),
    }
}

fn array_of(value: &Value) -> Result<&ArrayRef, Exception> {
    match value {
        Value::Array(array) => Ok(array),
        Value::Null => Err(Exception::null_reference("array")),
        other => Err(Exception::invalid_cast("array", other)),
    }
}

/// Lengths are bounded by `i32::MAX`, the largest `ArrayLength` reports.
fn null_elements(len: i64) -> Result<Vec<Value>, Exception> {
    let n = usize::try_from(len)
        .ok()
        .filter(|&n| n <= i32::MAX as usize)
        .ok_or_else(|| Exception::invalid_array_length(len))?;
    let mut elements = Vec::new();
    elements
        .try_reserve_exact(n)
        .map_err(|_| Exception::invalid_array_length(len))?;
    elements.resize(n, Value::Null);
    Ok(elements)
}

fn index_of(value: &Value) -> Result<i64, Exception> {
    value
        .as_index()
        .ok_or_else(|| Exception::invalid_cast("integer index", value))
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        match self {
            Instruction::LoadObject(n)
            | Instruction::LoadLocal(n)
            | Instruction::LoadLocalBoxed(n)
            | Instruction::LoadLocalCell(n)
            | Instruction::StoreLocal(n)
            | Instruction::StoreLocalBoxed(n)
            | Instruction::AssignLocal(n)
            | Instruction::AssignLocalBoxed(n)
            | Instruction::InitLocal(n)
            | Instruction::InitLocalBoxed(n)
            | Instruction::InitParameter(n)
            | Instruction::InitParameterBoxed(n)
            | Instruction::LoadClosure(n)
            | Instruction::StoreClosure(n)
            | Instruction::AssignClosure(n)
            | Instruction::LoadClosureCell(n)
            | Instruction::NewArrayInit(n)
            | Instruction::InvokeClosure(n) => write!(f, "{} {}", name, n),
            Instruction::Binary { kind, checked, .. } | Instruction::Unary { kind, checked, .. } => {
                write!(f, "{}.{}{}", name, kind, if *checked { " checked" } else { "" })
            }
            Instruction::Compare { kind, lifted, .. } => {
                write!(f, "{}.{}{}", name, kind, if *lifted { " lifted" } else { "" })
            }
            Instruction::Convert { from, to, checked } => {
                write!(f, "{} {} -> {}{}", name, from, to, if *checked { " checked" } else { "" })
            }
            Instruction::Branch(jump) | Instruction::BranchTrue(jump) | Instruction::BranchFalse(jump) => {
                match jump {
                    Jump::Offset(offset) => write!(f, "{} {:+}", name, offset),
                    Jump::Pending(label) => write!(f, "{} L{}?", name, label),
                }
            }
            Instruction::Goto { label, has_value } => {
                write!(f, "{} L{}{}", name, label, if *has_value { " (value)" } else { "" })
            }
            Instruction::EnterTryCatchFinally { region, .. } => write!(f, "{} #{}", name, region),
            Instruction::EnterFinally { label } => write!(f, "{} L{}", name, label),
            Instruction::NewError(kind) => write!(f, "{} {}", name, kind),
            Instruction::Call { method, argc } | Instruction::CallByRef { method, argc, .. } => {
                write!(f, "{} {}/{}", name, method.name(), argc)
            }
            Instruction::LoadField(field) | Instruction::StoreField(field) => {
                write!(f, "{} {}", name, field.name())
            }
            Instruction::GetProperty(property) | Instruction::SetProperty(property) => {
                write!(f, "{} {}", name, property.name())
            }
            Instruction::CreateClosure { body, captures } => {
                write!(f, "{} {} ({} captured)", name, body.name(), captures.len())
            }
            _ => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_lengths_fit_i32() {
        assert_eq!(null_elements(3).unwrap().len(), 3);
        assert!(null_elements(0).unwrap().is_empty());
        for len in [-1, i64::from(i32::MAX) + 1, i64::MAX] {
            let error = null_elements(len).unwrap_err();
            assert_eq!(error.kind(), &ErrorKind::InvalidArrayLength);
        }
    }
}
