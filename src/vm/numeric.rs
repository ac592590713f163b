//! Fixed-width numeric operation families.
//!
//! Each family (add, subtract, ..., convert) is one enum variant tagged with
//! a `NumericKind`. The kind is validated once when the instruction is built
//! and then selects a generic evaluator; there is no per-kind instruction
//! type.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

use serde::{Deserialize, Serialize};

use super::error::{BuildError, Exception};
use super::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
}

impl NumericKind {
    pub const ALL: [NumericKind; 11] = [
        NumericKind::I8,
        NumericKind::I16,
        NumericKind::I32,
        NumericKind::I64,
        NumericKind::U8,
        NumericKind::U16,
        NumericKind::U32,
        NumericKind::U64,
        NumericKind::F32,
        NumericKind::F64,
        NumericKind::Bool,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NumericKind::I8 => "i8",
            NumericKind::I16 => "i16",
            NumericKind::I32 => "i32",
            NumericKind::I64 => "i64",
            NumericKind::U8 => "u8",
            NumericKind::U16 => "u16",
            NumericKind::U32 => "u32",
            NumericKind::U64 => "u64",
            NumericKind::F32 => "f32",
            NumericKind::F64 => "f64",
            NumericKind::Bool => "bool",
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, NumericKind::F32 | NumericKind::F64 | NumericKind::Bool)
    }

    pub fn is_float(self) -> bool {
        matches!(self, NumericKind::F32 | NumericKind::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            NumericKind::I8 | NumericKind::I16 | NumericKind::I32 | NumericKind::I64
        ) || self.is_float()
    }

    /// Every kind except `Bool`.
    pub fn is_arithmetic(self) -> bool {
        self != NumericKind::Bool
    }
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mul => "Mul",
            BinaryOp::Div => "Div",
            BinaryOp::Rem => "Rem",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
            BinaryOp::Shl => "Shl",
            BinaryOp::Shr => "Shr",
        }
    }

    pub fn check(self, kind: NumericKind) -> Result<(), BuildError> {
        let supported = match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                kind.is_arithmetic()
            }
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => !kind.is_float(),
            BinaryOp::Shl | BinaryOp::Shr => kind.is_integer(),
        };
        unsupported(supported, self.name(), kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Negate,
    Increment,
    Decrement,
    /// Logical not for `Bool`, ones' complement for integers.
    Not,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Negate => "Negate",
            UnaryOp::Increment => "Increment",
            UnaryOp::Decrement => "Decrement",
            UnaryOp::Not => "Not",
        }
    }

    pub fn check(self, kind: NumericKind) -> Result<(), BuildError> {
        let supported = match self {
            UnaryOp::Negate => kind.is_signed(),
            UnaryOp::Increment | UnaryOp::Decrement => kind.is_arithmetic(),
            UnaryOp::Not => !kind.is_float(),
        };
        unsupported(supported, self.name(), kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "Equal",
            CompareOp::Ne => "NotEqual",
            CompareOp::Lt => "LessThan",
            CompareOp::Le => "LessThanOrEqual",
            CompareOp::Gt => "GreaterThan",
            CompareOp::Ge => "GreaterThanOrEqual",
        }
    }

    pub fn check(self, kind: NumericKind) -> Result<(), BuildError> {
        let supported = matches!(self, CompareOp::Eq | CompareOp::Ne) || kind.is_arithmetic();
        unsupported(supported, self.name(), kind)
    }

    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CompareOp::Ne, None) => true,
            (_, None) => false,
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
            (CompareOp::Lt, Some(o)) => o == Ordering::Less,
            (CompareOp::Le, Some(o)) => o != Ordering::Greater,
            (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
            (CompareOp::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

fn unsupported(supported: bool, operation: &'static str, kind: NumericKind) -> Result<(), BuildError> {
    if supported {
        Ok(())
    } else {
        Err(BuildError::UnsupportedKind {
            operation,
            kind: kind.name(),
        })
    }
}

trait Integer:
    Copy + Ord + BitAnd<Output = Self> + BitOr<Output = Self> + BitXor<Output = Self> + Not<Output = Self>
{
    const ZERO: Self;
    const ONE: Self;
    fn unwrap(value: &Value) -> Option<Self>;
    fn wrap(self) -> Value;
    fn checked_add(self, rhs: Self) -> Option<Self>;
    fn checked_sub(self, rhs: Self) -> Option<Self>;
    fn checked_mul(self, rhs: Self) -> Option<Self>;
    fn checked_div(self, rhs: Self) -> Option<Self>;
    fn checked_rem(self, rhs: Self) -> Option<Self>;
    fn checked_neg(self) -> Option<Self>;
    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
    fn wrapping_div(self, rhs: Self) -> Self;
    fn wrapping_rem(self, rhs: Self) -> Self;
    fn wrapping_neg(self) -> Self;
    fn wrapping_shl(self, count: u32) -> Self;
    fn wrapping_shr(self, count: u32) -> Self;
}

macro_rules! integer {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Integer for $ty {
                const ZERO: Self = 0;
                const ONE: Self = 1;
                fn unwrap(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(n) => Some(*n),
                        _ => None,
                    }
                }
                fn wrap(self) -> Value { Value::$variant(self) }
                fn checked_add(self, rhs: Self) -> Option<Self> { <$ty>::checked_add(self, rhs) }
                fn checked_sub(self, rhs: Self) -> Option<Self> { <$ty>::checked_sub(self, rhs) }
                fn checked_mul(self, rhs: Self) -> Option<Self> { <$ty>::checked_mul(self, rhs) }
                fn checked_div(self, rhs: Self) -> Option<Self> { <$ty>::checked_div(self, rhs) }
                fn checked_rem(self, rhs: Self) -> Option<Self> { <$ty>::checked_rem(self, rhs) }
                fn checked_neg(self) -> Option<Self> { <$ty>::checked_neg(self) }
                fn wrapping_add(self, rhs: Self) -> Self { <$ty>::wrapping_add(self, rhs) }
                fn wrapping_sub(self, rhs: Self) -> Self { <$ty>::wrapping_sub(self, rhs) }
                fn wrapping_mul(self, rhs: Self) -> Self { <$ty>::wrapping_mul(self, rhs) }
                fn wrapping_div(self, rhs: Self) -> Self { <$ty>::wrapping_div(self, rhs) }
                fn wrapping_rem(self, rhs: Self) -> Self { <$ty>::wrapping_rem(self, rhs) }
                fn wrapping_neg(self) -> Self { <$ty>::wrapping_neg(self) }
                fn wrapping_shl(self, count: u32) -> Self { <$ty>::wrapping_shl(self, count) }
                fn wrapping_shr(self, count: u32) -> Self { <$ty>::wrapping_shr(self, count) }
            }
        )*
    };
}

integer!(
    i8 => I8, i16 => I16, i32 => I32, i64 => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64,
);

trait Float: Copy + PartialOrd {
    fn unwrap(value: &Value) -> Option<Self>;
    fn wrap(self) -> Value;
    fn apply(op: BinaryOp, l: Self, r: Self) -> Self;
    fn step(self, up: bool) -> Self;
    fn neg(self) -> Self;
}

macro_rules! float {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Float for $ty {
                fn unwrap(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(n) => Some(*n),
                        _ => None,
                    }
                }
                fn wrap(self) -> Value { Value::$variant(self) }
                fn apply(op: BinaryOp, l: Self, r: Self) -> Self {
                    match op {
                        BinaryOp::Add => l + r,
                        BinaryOp::Sub => l - r,
                        BinaryOp::Mul => l * r,
                        BinaryOp::Div => l / r,
                        _ => l % r,
                    }
                }
                fn step(self, up: bool) -> Self { if up { self + 1.0 } else { self - 1.0 } }
                fn neg(self) -> Self { -self }
            }
        )*
    };
}

float!(f32 => F32, f64 => F64);

fn operand<T>(value: &Value, kind: NumericKind, unwrap: fn(&Value) -> Option<T>) -> Result<T, Exception> {
    unwrap(value).ok_or_else(|| Exception::invalid_cast(kind.name(), value))
}

fn int_binary<T: Integer>(
    op: BinaryOp,
    kind: NumericKind,
    checked: bool,
    left: &Value,
    right: &Value,
) -> Result<Value, Exception> {
    let l = operand(left, kind, T::unwrap)?;
    let rhs = || operand(right, kind, T::unwrap);
    let overflowing = |r: T, result: Option<T>, wrapped: fn(T, T) -> T| match result {
        Some(v) => Ok(v),
        None if checked => Err(Exception::overflow()),
        None => Ok(wrapped(l, r)),
    };
    let result = match op {
        BinaryOp::Shl => l.wrapping_shl(shift_count(right)?),
        BinaryOp::Shr => l.wrapping_shr(shift_count(right)?),
        BinaryOp::Add => {
            let r = rhs()?;
            overflowing(r, l.checked_add(r), T::wrapping_add)?
        }
        BinaryOp::Sub => {
            let r = rhs()?;
            overflowing(r, l.checked_sub(r), T::wrapping_sub)?
        }
        BinaryOp::Mul => {
            let r = rhs()?;
            overflowing(r, l.checked_mul(r), T::wrapping_mul)?
        }
        BinaryOp::Div | BinaryOp::Rem => {
            let r = rhs()?;
            if r == T::ZERO {
                return Err(Exception::divide_by_zero());
            }
            if op == BinaryOp::Div {
                overflowing(r, l.checked_div(r), T::wrapping_div)?
            } else {
                overflowing(r, l.checked_rem(r), T::wrapping_rem)?
            }
        }
        BinaryOp::And => l & rhs()?,
        BinaryOp::Or => l | rhs()?,
        BinaryOp::Xor => l ^ rhs()?,
    };
    Ok(result.wrap())
}

/// An instruction built without its kind check reaches this at run time.
fn rejected(error: BuildError) -> Exception {
    Exception::invalid_operation(error.to_string())
}

/// Shift counts are masked to the operand width by the wrapping shifts.
fn shift_count(value: &Value) -> Result<u32, Exception> {
    value
        .as_index()
        .map(|n| n as u32)
        .ok_or_else(|| Exception::invalid_cast("integer shift count", value))
}

fn float_binary<T: Float>(op: BinaryOp, kind: NumericKind, left: &Value, right: &Value) -> Result<Value, Exception> {
    let l = operand(left, kind, T::unwrap)?;
    let r = operand(right, kind, T::unwrap)?;
    Ok(T::apply(op, l, r).wrap())
}

/// Three-valued `and`/`or`; `xor` propagates null.
fn bool_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Exception> {
    let lift = |v: &Value| match v {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(Exception::invalid_cast("bool", other)),
    };
    let (l, r) = (lift(left)?, lift(right)?);
    let result = match op {
        BinaryOp::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => match (l, r) {
            (Some(a), Some(b)) => Some(a ^ b),
            _ => None,
        },
    };
    Ok(result.map_or(Value::Null, Value::Bool))
}

/// Evaluates a binary family member. `left` was pushed first.
pub fn binary(
    op: BinaryOp,
    kind: NumericKind,
    checked: bool,
    left: &Value,
    right: &Value,
) -> Result<Value, Exception> {
    op.check(kind).map_err(rejected)?;
    match kind {
        NumericKind::Bool => bool_binary(op, left, right),
        _ if left.is_null() || right.is_null() => Ok(Value::Null),
        NumericKind::I8 => int_binary::<i8>(op, kind, checked, left, right),
        NumericKind::I16 => int_binary::<i16>(op, kind, checked, left, right),
        NumericKind::I32 => int_binary::<i32>(op, kind, checked, left, right),
        NumericKind::I64 => int_binary::<i64>(op, kind, checked, left, right),
        NumericKind::U8 => int_binary::<u8>(op, kind, checked, left, right),
        NumericKind::U16 => int_binary::<u16>(op, kind, checked, left, right),
        NumericKind::U32 => int_binary::<u32>(op, kind, checked, left, right),
        NumericKind::U64 => int_binary::<u64>(op, kind, checked, left, right),
        NumericKind::F32 => float_binary::<f32>(op, kind, left, right),
        NumericKind::F64 => float_binary::<f64>(op, kind, left, right),
    }
}

fn int_unary<T: Integer>(op: UnaryOp, kind: NumericKind, checked: bool, value: &Value) -> Result<Value, Exception> {
    let v = operand(value, kind, T::unwrap)?;
    let result = match op {
        UnaryOp::Negate => match v.checked_neg() {
            Some(n) => n,
            None if checked => return Err(Exception::overflow()),
            None => v.wrapping_neg(),
        },
        UnaryOp::Increment => match v.checked_add(T::ONE) {
            Some(n) => n,
            None if checked => return Err(Exception::overflow()),
            None => v.wrapping_add(T::ONE),
        },
        UnaryOp::Decrement => match v.checked_sub(T::ONE) {
            Some(n) => n,
            None if checked => return Err(Exception::overflow()),
            None => v.wrapping_sub(T::ONE),
        },
        UnaryOp::Not => !v,
    };
    Ok(result.wrap())
}

fn float_unary<T: Float>(op: UnaryOp, kind: NumericKind, value: &Value) -> Result<Value, Exception> {
    let v = operand(value, kind, T::unwrap)?;
    let result = match op {
        UnaryOp::Negate => v.neg(),
        UnaryOp::Increment => v.step(true),
        UnaryOp::Decrement => v.step(false),
        UnaryOp::Not => {
            return Err(rejected(BuildError::UnsupportedKind {
                operation: op.name(),
                kind: kind.name(),
            }));
        }
    };
    Ok(result.wrap())
}

pub fn unary(op: UnaryOp, kind: NumericKind, checked: bool, value: &Value) -> Result<Value, Exception> {
    op.check(kind).map_err(rejected)?;
    if value.is_null() {
        return Ok(Value::Null);
    }
    match kind {
        NumericKind::Bool => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(Exception::invalid_cast("bool", other)),
        },
        NumericKind::I8 => int_unary::<i8>(op, kind, checked, value),
        NumericKind::I16 => int_unary::<i16>(op, kind, checked, value),
        NumericKind::I32 => int_unary::<i32>(op, kind, checked, value),
        NumericKind::I64 => int_unary::<i64>(op, kind, checked, value),
        NumericKind::U8 => int_unary::<u8>(op, kind, checked, value),
        NumericKind::U16 => int_unary::<u16>(op, kind, checked, value),
        NumericKind::U32 => int_unary::<u32>(op, kind, checked, value),
        NumericKind::U64 => int_unary::<u64>(op, kind, checked, value),
        NumericKind::F32 => float_unary::<f32>(op, kind, value),
        NumericKind::F64 => float_unary::<f64>(op, kind, value),
    }
}

fn ordering<T: PartialOrd>(kind: NumericKind, left: &Value, right: &Value, unwrap: fn(&Value) -> Option<T>) -> Result<Option<Ordering>, Exception> {
    let l = operand(left, kind, unwrap)?;
    let r = operand(right, kind, unwrap)?;
    Ok(l.partial_cmp(&r))
}

/// Compares two operands of one kind. An absent operand makes relational
/// comparisons false (or null when `lifted_to_null`); two absent operands
/// are equal.
pub fn compare(
    op: CompareOp,
    kind: NumericKind,
    lifted_to_null: bool,
    left: &Value,
    right: &Value,
) -> Result<Value, Exception> {
    op.check(kind).map_err(rejected)?;
    if left.is_null() || right.is_null() {
        if lifted_to_null {
            return Ok(Value::Null);
        }
        let both = left.is_null() && right.is_null();
        let result = match op {
            CompareOp::Eq => both,
            CompareOp::Ne => !both,
            _ => false,
        };
        return Ok(Value::Bool(result));
    }
    let order = match kind {
        NumericKind::Bool => ordering(kind, left, right, Value::as_bool)?,
        NumericKind::I8 => ordering(kind, left, right, <i8 as Integer>::unwrap)?,
        NumericKind::I16 => ordering(kind, left, right, <i16 as Integer>::unwrap)?,
        NumericKind::I32 => ordering(kind, left, right, <i32 as Integer>::unwrap)?,
        NumericKind::I64 => ordering(kind, left, right, <i64 as Integer>::unwrap)?,
        NumericKind::U8 => ordering(kind, left, right, <u8 as Integer>::unwrap)?,
        NumericKind::U16 => ordering(kind, left, right, <u16 as Integer>::unwrap)?,
        NumericKind::U32 => ordering(kind, left, right, <u32 as Integer>::unwrap)?,
        NumericKind::U64 => ordering(kind, left, right, <u64 as Integer>::unwrap)?,
        NumericKind::F32 => ordering(kind, left, right, <f32 as Float>::unwrap)?,
        NumericKind::F64 => ordering(kind, left, right, <f64 as Float>::unwrap)?,
    };
    Ok(Value::Bool(op.holds(order)))
}

pub fn check_conversion(from: NumericKind, to: NumericKind) -> Result<(), BuildError> {
    if from == NumericKind::Bool || to == NumericKind::Bool {
        return Err(BuildError::UnsupportedKind {
            operation: "Convert",
            kind: "bool",
        });
    }
    Ok(())
}

enum Wide {
    Int(i128),
    Float(f64),
}

fn widen(value: &Value) -> Option<Wide> {
    Some(match value {
        Value::I8(n) => Wide::Int(*n as i128),
        Value::I16(n) => Wide::Int(*n as i128),
        Value::I32(n) => Wide::Int(*n as i128),
        Value::I64(n) => Wide::Int(*n as i128),
        Value::U8(n) => Wide::Int(*n as i128),
        Value::U16(n) => Wide::Int(*n as i128),
        Value::U32(n) => Wide::Int(*n as i128),
        Value::U64(n) => Wide::Int(*n as i128),
        Value::F32(n) => Wide::Float(*n as f64),
        Value::F64(n) => Wide::Float(*n),
        _ => return None,
    })
}

fn narrow(to: NumericKind, value: i128, checked: bool) -> Result<Value, Exception> {
    macro_rules! fit {
        ($ty:ty, $variant:ident) => {
            if checked {
                <$ty>::try_from(value)
                    .map(Value::$variant)
                    .map_err(|_| Exception::overflow())
            } else {
                Ok(Value::$variant(value as $ty))
            }
        };
    }
    match to {
        NumericKind::I8 => fit!(i8, I8),
        NumericKind::I16 => fit!(i16, I16),
        NumericKind::I32 => fit!(i32, I32),
        NumericKind::I64 => fit!(i64, I64),
        NumericKind::U8 => fit!(u8, U8),
        NumericKind::U16 => fit!(u16, U16),
        NumericKind::U32 => fit!(u32, U32),
        NumericKind::U64 => fit!(u64, U64),
        NumericKind::F32 => Ok(Value::F32(value as f32)),
        NumericKind::F64 => Ok(Value::F64(value as f64)),
        NumericKind::Bool => Err(Exception::invalid_cast("number", &Value::Bool(false))),
    }
}

/// Converts between numeric kinds. Checked integer narrowing and checked
/// float-to-integer conversion raise `Overflow` when the value does not fit;
/// unchecked integer narrowing wraps and unchecked float conversion
/// saturates.
pub fn convert(from: NumericKind, to: NumericKind, checked: bool, value: &Value) -> Result<Value, Exception> {
    check_conversion(from, to).map_err(rejected)?;
    if value.is_null() {
        return Ok(Value::Null);
    }
    if value.numeric_kind() != Some(from) {
        return Err(Exception::invalid_cast(from.name(), value));
    }
    match widen(value) {
        Some(Wide::Int(n)) => narrow(to, n, checked),
        Some(Wide::Float(f)) => match to {
            NumericKind::F32 => Ok(Value::F32(f as f32)),
            NumericKind::F64 => Ok(Value::F64(f)),
            _ if checked => {
                let t = f.trunc();
                if t.is_nan() {
                    return Err(Exception::overflow());
                }
                narrow(to, t as i128, true)
            }
            _ => narrow(to, f as i128, false),
        },
        None => Err(Exception::invalid_cast(from.name(), value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::ErrorKind;

    fn is_overflow(result: Result<Value, Exception>) -> bool {
        matches!(result, Err(e) if *e.kind() == ErrorKind::Overflow)
    }

    #[test]
    fn test_unsupported_kind_raises_instead_of_panicking() {
        let is_invalid = |result: Result<Value, Exception>| {
            matches!(result, Err(e) if *e.kind() == ErrorKind::InvalidOperation)
        };
        assert!(is_invalid(unary(UnaryOp::Not, NumericKind::F64, false, &Value::F64(1.0))));
        assert!(is_invalid(unary(UnaryOp::Negate, NumericKind::Bool, false, &Value::Bool(true))));
        assert!(is_invalid(binary(BinaryOp::Shl, NumericKind::Bool, false, &Value::Bool(true), &Value::I32(1))));
        assert!(is_invalid(binary(BinaryOp::And, NumericKind::F32, false, &Value::F32(1.0), &Value::F32(2.0))));
        assert!(is_invalid(compare(CompareOp::Lt, NumericKind::Bool, false, &Value::Bool(false), &Value::Bool(true))));
        assert!(is_invalid(convert(NumericKind::Bool, NumericKind::I32, false, &Value::Bool(true))));
    }

    #[test]
    fn test_checked_add_overflows_per_kind() {
        let cases = [
            (NumericKind::I8, Value::I8(i8::MAX), Value::I8(1)),
            (NumericKind::I16, Value::I16(i16::MAX), Value::I16(1)),
            (NumericKind::I32, Value::I32(i32::MAX), Value::I32(1)),
            (NumericKind::I64, Value::I64(i64::MAX), Value::I64(1)),
            (NumericKind::U8, Value::U8(u8::MAX), Value::U8(1)),
            (NumericKind::U16, Value::U16(u16::MAX), Value::U16(1)),
            (NumericKind::U32, Value::U32(u32::MAX), Value::U32(1)),
            (NumericKind::U64, Value::U64(u64::MAX), Value::U64(1)),
        ];
        for (kind, l, r) in cases {
            assert!(is_overflow(binary(BinaryOp::Add, kind, true, &l, &r)), "{}", kind);
        }
    }

    #[test]
    fn test_unchecked_wraps() {
        assert_eq!(
            binary(BinaryOp::Add, NumericKind::I8, false, &Value::I8(127), &Value::I8(1)).unwrap(),
            Value::I8(-128)
        );
        assert_eq!(
            binary(BinaryOp::Sub, NumericKind::U16, false, &Value::U16(0), &Value::U16(1)).unwrap(),
            Value::U16(u16::MAX)
        );
        assert_eq!(
            binary(BinaryOp::Mul, NumericKind::I32, false, &Value::I32(0x4000_0000), &Value::I32(4)).unwrap(),
            Value::I32(0)
        );
        assert_eq!(
            unary(UnaryOp::Increment, NumericKind::U8, false, &Value::U8(255)).unwrap(),
            Value::U8(0)
        );
    }

    #[test]
    fn test_checked_unary() {
        assert!(is_overflow(unary(UnaryOp::Negate, NumericKind::I32, true, &Value::I32(i32::MIN))));
        assert_eq!(
            unary(UnaryOp::Negate, NumericKind::I32, false, &Value::I32(i32::MIN)).unwrap(),
            Value::I32(i32::MIN)
        );
        assert!(is_overflow(unary(UnaryOp::Decrement, NumericKind::U32, true, &Value::U32(0))));
    }

    #[test]
    fn test_division() {
        let err = binary(BinaryOp::Div, NumericKind::I32, false, &Value::I32(1), &Value::I32(0)).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::DivideByZero);
        assert!(is_overflow(binary(BinaryOp::Div, NumericKind::I64, true, &Value::I64(i64::MIN), &Value::I64(-1))));
        assert_eq!(
            binary(BinaryOp::Div, NumericKind::I64, false, &Value::I64(i64::MIN), &Value::I64(-1)).unwrap(),
            Value::I64(i64::MIN)
        );
        assert_eq!(
            binary(BinaryOp::Rem, NumericKind::I32, true, &Value::I32(7), &Value::I32(3)).unwrap(),
            Value::I32(1)
        );
        assert_eq!(
            binary(BinaryOp::Div, NumericKind::F64, true, &Value::F64(1.0), &Value::F64(0.0)).unwrap(),
            Value::F64(f64::INFINITY)
        );
    }

    #[test]
    fn test_null_propagation() {
        for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::And, BinaryOp::Xor, BinaryOp::Shl] {
            assert_eq!(binary(op, NumericKind::I32, true, &Value::Null, &Value::I32(1)).unwrap(), Value::Null);
            assert_eq!(binary(op, NumericKind::I32, true, &Value::I32(1), &Value::Null).unwrap(), Value::Null);
        }
        assert_eq!(unary(UnaryOp::Not, NumericKind::Bool, false, &Value::Null).unwrap(), Value::Null);
        assert_eq!(
            binary(BinaryOp::Xor, NumericKind::Bool, false, &Value::Null, &Value::Bool(true)).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_three_valued_logic() {
        let t = Value::Bool(true);
        let f = Value::Bool(false);
        let n = Value::Null;
        let and = |l: &Value, r: &Value| binary(BinaryOp::And, NumericKind::Bool, false, l, r).unwrap();
        let or = |l: &Value, r: &Value| binary(BinaryOp::Or, NumericKind::Bool, false, l, r).unwrap();
        assert_eq!(and(&n, &f), f);
        assert_eq!(and(&f, &n), f);
        assert_eq!(and(&n, &t), n);
        assert_eq!(and(&n, &n), n);
        assert_eq!(or(&n, &t), t);
        assert_eq!(or(&t, &n), t);
        assert_eq!(or(&n, &f), n);
        assert_eq!(and(&t, &t), t);
        assert_eq!(or(&f, &f), f);
    }

    #[test]
    fn test_bitwise_and_shifts() {
        assert_eq!(
            binary(BinaryOp::And, NumericKind::U8, false, &Value::U8(0b1100), &Value::U8(0b1010)).unwrap(),
            Value::U8(0b1000)
        );
        assert_eq!(
            binary(BinaryOp::Shl, NumericKind::I32, false, &Value::I32(1), &Value::I32(33)).unwrap(),
            Value::I32(2)
        );
        assert_eq!(
            binary(BinaryOp::Shr, NumericKind::I16, false, &Value::I16(-8), &Value::I32(1)).unwrap(),
            Value::I16(-4)
        );
        assert_eq!(
            binary(BinaryOp::Shr, NumericKind::U16, false, &Value::U16(0x8000), &Value::I32(15)).unwrap(),
            Value::U16(1)
        );
        assert_eq!(unary(UnaryOp::Not, NumericKind::U8, false, &Value::U8(0x0f)).unwrap(), Value::U8(0xf0));
    }

    #[test]
    fn test_operand_kind_mismatch_is_invalid_cast() {
        let err = binary(BinaryOp::Add, NumericKind::I32, true, &Value::I64(1), &Value::I32(1)).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::InvalidCast);
    }

    #[test]
    fn test_compare() {
        let lt = |l, r| compare(CompareOp::Lt, NumericKind::I32, false, &l, &r).unwrap();
        assert_eq!(lt(Value::I32(1), Value::I32(2)), Value::Bool(true));
        assert_eq!(lt(Value::Null, Value::I32(2)), Value::Bool(false));
        assert_eq!(
            compare(CompareOp::Lt, NumericKind::I32, true, &Value::Null, &Value::I32(2)).unwrap(),
            Value::Null
        );
        assert_eq!(
            compare(CompareOp::Eq, NumericKind::I32, false, &Value::Null, &Value::Null).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            compare(CompareOp::Ne, NumericKind::F64, false, &Value::F64(f64::NAN), &Value::F64(f64::NAN)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            compare(CompareOp::Ge, NumericKind::U64, false, &Value::U64(u64::MAX), &Value::U64(1)).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_convert() {
        assert_eq!(convert(NumericKind::I32, NumericKind::I8, false, &Value::I32(300)).unwrap(), Value::I8(44));
        assert!(is_overflow(convert(NumericKind::I32, NumericKind::I8, true, &Value::I32(300))));
        assert!(is_overflow(convert(NumericKind::I32, NumericKind::U32, true, &Value::I32(-1))));
        assert_eq!(convert(NumericKind::F64, NumericKind::I32, true, &Value::F64(-2.7)).unwrap(), Value::I32(-2));
        assert!(is_overflow(convert(NumericKind::F64, NumericKind::I32, true, &Value::F64(f64::NAN))));
        assert!(is_overflow(convert(NumericKind::F64, NumericKind::I64, true, &Value::F64(1e19))));
        assert_eq!(convert(NumericKind::U8, NumericKind::F32, true, &Value::U8(7)).unwrap(), Value::F32(7.0));
        assert_eq!(convert(NumericKind::I16, NumericKind::I64, true, &Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_kind_checks() {
        assert!(BinaryOp::Add.check(NumericKind::Bool).is_err());
        assert!(BinaryOp::Shl.check(NumericKind::F64).is_err());
        assert!(BinaryOp::And.check(NumericKind::Bool).is_ok());
        assert!(UnaryOp::Negate.check(NumericKind::U32).is_err());
        assert!(UnaryOp::Not.check(NumericKind::F32).is_err());
        assert!(CompareOp::Lt.check(NumericKind::Bool).is_err());
        assert!(CompareOp::Eq.check(NumericKind::Bool).is_ok());
        assert!(check_conversion(NumericKind::Bool, NumericKind::I32).is_err());
    }
}
