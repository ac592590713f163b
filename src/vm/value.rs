use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::closure::Closure;
use super::error::Exception;
use super::numeric::NumericKind;

/// A dynamically typed runtime value.
///
/// Numeric values carry their fixed width; `Null` is the absent-value
/// marker used for null propagation. Arrays, objects, and cells are shared
/// by reference.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(Arc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Cell(Cell),
    Closure(Arc<Closure>),
    Error(Exception),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(s.into())
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(ArrayRef::new(elements))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The numeric kind of this value, if it is a number or a bool.
    pub fn numeric_kind(&self) -> Option<NumericKind> {
        match self {
            Value::Bool(_) => Some(NumericKind::Bool),
            Value::I8(_) => Some(NumericKind::I8),
            Value::I16(_) => Some(NumericKind::I16),
            Value::I32(_) => Some(NumericKind::I32),
            Value::I64(_) => Some(NumericKind::I64),
            Value::U8(_) => Some(NumericKind::U8),
            Value::U16(_) => Some(NumericKind::U16),
            Value::U32(_) => Some(NumericKind::U32),
            Value::U64(_) => Some(NumericKind::U64),
            Value::F32(_) => Some(NumericKind::F32),
            Value::F64(_) => Some(NumericKind::F64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer values widened to `i64` for use as an index or length.
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Value::I8(n) => Some(*n as i64),
            Value::I16(n) => Some(*n as i64),
            Value::I32(n) => Some(*n as i64),
            Value::I64(n) => Some(*n),
            Value::U8(n) => Some(*n as i64),
            Value::U16(n) => Some(*n as i64),
            Value::U32(n) => Some(*n as i64),
            Value::U64(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&Exception> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Get the type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Cell(_) => "cell",
            Value::Closure(_) => "closure",
            Value::Error(_) => "error",
        }
    }
}

/// Numbers compare by kind and value, strings by contents, and every
/// reference type by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Cell(a), Value::Cell(b)) => a.ptr_eq(b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Array(a) => write!(f, "Array({:?})", a.to_vec()),
            Value::Error(e) => write!(f, "Error({})", e),
            other => write!(f, "{}({})", other.type_name(), other),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I8(n) => write!(f, "{}", n),
            Value::I16(n) => write!(f, "{}", n),
            Value::I32(n) => write!(f, "{}", n),
            Value::I64(n) => write!(f, "{}", n),
            Value::U8(n) => write!(f, "{}", n),
            Value::U16(n) => write!(f, "{}", n),
            Value::U32(n) => write!(f, "{}", n),
            Value::U64(n) => write!(f, "{}", n),
            Value::F32(n) => write_float(f, *n as f64),
            Value::F64(n) => write_float(f, *n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.to_vec().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Object(o) => write!(f, "<{}>", o.class()),
            Value::Cell(c) => write!(f, "cell({})", c.get()),
            Value::Closure(c) => write!(f, "<closure {}>", c.name()),
            Value::Error(e) => write!(f, "{}", e),
        }
    }
}

fn write_float(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 {
        write!(f, "{}.0", n)
    } else {
        write!(f, "{}", n)
    }
}

/// A shared, mutable array.
#[derive(Clone)]
pub struct ArrayRef(Arc<Mutex<Vec<Value>>>);

impl ArrayRef {
    pub fn new(elements: Vec<Value>) -> Self {
        ArrayRef(Arc::new(Mutex::new(elements)))
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn get(&self, index: i64) -> Result<Value, Exception> {
        let elements = self.0.lock();
        usize::try_from(index)
            .ok()
            .and_then(|i| elements.get(i).cloned())
            .ok_or_else(|| Exception::index_out_of_range(index, elements.len()))
    }

    pub fn set(&self, index: i64, value: Value) -> Result<(), Exception> {
        let mut elements = self.0.lock();
        let len = elements.len();
        match usize::try_from(index).ok().and_then(|i| elements.get_mut(i)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Exception::index_out_of_range(index, len)),
        }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.lock().clone()
    }

    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

struct ObjectData {
    class: Arc<str>,
    slots: BTreeMap<String, Value>,
}

/// A host object with named slots, reached through the member traits.
#[derive(Clone)]
pub struct ObjectRef(Arc<Mutex<ObjectData>>);

impl ObjectRef {
    pub fn new(class: &str) -> Self {
        ObjectRef(Arc::new(Mutex::new(ObjectData {
            class: class.into(),
            slots: BTreeMap::new(),
        })))
    }

    pub fn class(&self) -> Arc<str> {
        self.0.lock().class.clone()
    }

    /// Missing slots read as `Null`.
    pub fn get(&self, name: &str) -> Value {
        self.0.lock().slots.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&self, name: &str, value: Value) {
        self.0.lock().slots.insert(name.to_string(), value);
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A single shared storage location: the home of a boxed local or a
/// closure-captured variable.
#[derive(Clone)]
pub struct Cell(Arc<Mutex<Value>>);

impl Cell {
    pub fn new(value: Value) -> Self {
        Cell(Arc::new(Mutex::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.lock().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.lock() = value;
    }

    pub fn ptr_eq(&self, other: &Cell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cell({:?})", self.get())
    }
}
