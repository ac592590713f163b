//! Host member access consumed by the call, field, and property
//! instructions.
//!
//! Members report failures as `MemberError`. Every instruction and updater
//! unwraps that error exactly once, right after the access, so the
//! exception-handling protocol only ever sees the inner `Exception`.

use std::fmt;
use std::sync::Arc;

use super::error::Exception;
use super::Value;

#[derive(Debug, Clone)]
pub enum MemberError {
    /// The member ran and raised an error; the wrapped error is the cause.
    Invocation(Exception),
    /// The member could not be reached (null target, wrong target type,
    /// read-only property).
    Access(Exception),
}

impl MemberError {
    pub fn into_exception(self) -> Exception {
        match self {
            MemberError::Invocation(e) | MemberError::Access(e) => e,
        }
    }
}

impl From<Exception> for MemberError {
    fn from(e: Exception) -> Self {
        MemberError::Invocation(e)
    }
}

pub trait Method: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn parameter_count(&self) -> usize;

    /// Instance methods take their target from the stack below the arguments.
    fn is_static(&self) -> bool {
        true
    }

    fn returns_value(&self) -> bool {
        true
    }

    /// Invoke the method. `args` may be mutated in place; by-reference
    /// updaters read the final values back out.
    fn invoke(&self, instance: Option<&Value>, args: &mut [Value]) -> Result<Value, MemberError>;
}

pub trait Field: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn get(&self, target: &Value) -> Result<Value, MemberError>;
    fn set(&self, target: &Value, value: Value) -> Result<(), MemberError>;
}

pub trait Property: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn can_write(&self) -> bool {
        true
    }

    fn get(&self, target: &Value) -> Result<Value, MemberError>;
    fn set(&self, target: &Value, value: Value) -> Result<(), MemberError>;
}

/// Store through `property`. A property that cannot be written is refused
/// before its setter runs.
pub(crate) fn write_property(property: &dyn Property, target: &Value, value: Value) -> Result<(), Exception> {
    if !property.can_write() {
        return Err(Exception::invalid_operation(format!(
            "property '{}' has no setter",
            property.name()
        )));
    }
    property.set(target, value).map_err(MemberError::into_exception)
}

type NativeFn = dyn Fn(Option<&Value>, &mut [Value]) -> Result<Value, Exception> + Send + Sync;

/// A method backed by a Rust closure.
#[derive(Clone)]
pub struct NativeMethod {
    name: String,
    parameter_count: usize,
    is_static: bool,
    returns_value: bool,
    func: Arc<NativeFn>,
}

impl NativeMethod {
    pub fn new<F>(name: &str, parameter_count: usize, func: F) -> Self
    where
        F: Fn(&mut [Value]) -> Result<Value, Exception> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            parameter_count,
            is_static: true,
            returns_value: true,
            func: Arc::new(move |_, args| func(args)),
        }
    }

    pub fn instance<F>(name: &str, parameter_count: usize, func: F) -> Self
    where
        F: Fn(&Value, &mut [Value]) -> Result<Value, Exception> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            parameter_count,
            is_static: false,
            returns_value: true,
            func: Arc::new(move |instance, args| match instance {
                Some(target) => func(target, args),
                None => Err(Exception::null_reference("instance")),
            }),
        }
    }

    /// Discard the closure's return value.
    pub fn void(mut self) -> Self {
        self.returns_value = false;
        self
    }
}

impl fmt::Debug for NativeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeMethod")
            .field("name", &self.name)
            .field("parameter_count", &self.parameter_count)
            .finish()
    }
}

impl Method for NativeMethod {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    fn is_static(&self) -> bool {
        self.is_static
    }

    fn returns_value(&self) -> bool {
        self.returns_value
    }

    fn invoke(&self, instance: Option<&Value>, args: &mut [Value]) -> Result<Value, MemberError> {
        if !self.is_static && matches!(instance, None | Some(Value::Null)) {
            return Err(MemberError::Access(Exception::null_reference(&self.name)));
        }
        (self.func)(instance, args).map_err(MemberError::Invocation)
    }
}

fn object_target<'a>(target: &'a Value, member: &str) -> Result<&'a super::ObjectRef, MemberError> {
    match target {
        Value::Object(o) => Ok(o),
        Value::Null => Err(MemberError::Access(Exception::null_reference(member))),
        other => Err(MemberError::Access(Exception::invalid_cast("object", other))),
    }
}

/// A named slot on a host object.
#[derive(Debug, Clone)]
pub struct ObjectField {
    name: String,
}

impl ObjectField {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Field for ObjectField {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, target: &Value) -> Result<Value, MemberError> {
        Ok(object_target(target, &self.name)?.get(&self.name))
    }

    fn set(&self, target: &Value, value: Value) -> Result<(), MemberError> {
        object_target(target, &self.name)?.set(&self.name, value);
        Ok(())
    }
}

/// A property stored in an object slot, optionally read-only.
#[derive(Debug, Clone)]
pub struct ObjectProperty {
    name: String,
    read_only: bool,
}

impl ObjectProperty {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            read_only: false,
        }
    }

    pub fn read_only(name: &str) -> Self {
        Self {
            name: name.to_string(),
            read_only: true,
        }
    }
}

impl Property for ObjectProperty {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_write(&self) -> bool {
        !self.read_only
    }

    fn get(&self, target: &Value) -> Result<Value, MemberError> {
        Ok(object_target(target, &self.name)?.get(&self.name))
    }

    fn set(&self, target: &Value, value: Value) -> Result<(), MemberError> {
        let object = object_target(target, &self.name)?;
        if self.read_only {
            return Err(MemberError::Access(Exception::invalid_operation(format!(
                "property '{}' has no setter",
                self.name
            ))));
        }
        object.set(&self.name, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{ErrorKind, ObjectRef};

    #[test]
    fn test_invocation_error_unwraps_to_cause() {
        let cause = Exception::divide_by_zero();
        let raised = cause.clone();
        let method = NativeMethod::new("fail", 0, move |_| Err(raised.clone()));
        let err = method.invoke(None, &mut []).unwrap_err();
        assert!(matches!(err, MemberError::Invocation(_)));
        assert!(err.into_exception().ptr_eq(&cause));
    }

    #[test]
    fn test_instance_method_on_null() {
        let method = NativeMethod::instance("len", 0, |_, _| Ok(Value::I32(0)));
        let err = method.invoke(Some(&Value::Null), &mut []).unwrap_err();
        assert!(matches!(err, MemberError::Access(_)));
        assert_eq!(*err.into_exception().kind(), ErrorKind::NullReference);
    }

    #[test]
    fn test_object_members() {
        let object = Value::Object(ObjectRef::new("Point"));
        let field = ObjectField::new("x");
        field.set(&object, Value::I32(4)).unwrap();
        assert_eq!(field.get(&object).unwrap(), Value::I32(4));

        let property = ObjectProperty::read_only("x");
        assert_eq!(property.get(&object).unwrap(), Value::I32(4));
        let err = property.set(&object, Value::I32(5)).unwrap_err().into_exception();
        assert_eq!(*err.kind(), ErrorKind::InvalidOperation);

        let err = field.get(&Value::I32(1)).unwrap_err().into_exception();
        assert_eq!(*err.kind(), ErrorKind::InvalidCast);
    }

    #[derive(Debug)]
    struct Sealed {
        writes: std::sync::atomic::AtomicUsize,
    }

    impl Property for Sealed {
        fn name(&self) -> &str {
            "sealed"
        }

        fn can_write(&self) -> bool {
            false
        }

        fn get(&self, _: &Value) -> Result<Value, MemberError> {
            Ok(Value::Null)
        }

        fn set(&self, _: &Value, _: Value) -> Result<(), MemberError> {
            self.writes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_write_property_checks_can_write() {
        let sealed = Sealed {
            writes: Default::default(),
        };
        let object = Value::Object(ObjectRef::new("Box"));
        let err = write_property(&sealed, &object, Value::I32(1)).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::InvalidOperation);
        assert_eq!(sealed.writes.load(std::sync::atomic::Ordering::SeqCst), 0);

        let open = ObjectProperty::new("x");
        write_property(&open, &object, Value::I32(2)).unwrap();
        assert_eq!(open.get(&object).unwrap(), Value::I32(2));
    }
}
