//! Write-back of by-reference call arguments.

use std::sync::Arc;

use super::error::Exception;
use super::frame::Frame;
use super::member::{self, Field, MemberError, Method, Property};
use super::Value;

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Local(usize),
    /// A local slot holding a `Cell`.
    Boxed(usize),
    Closure(usize),
}

/// Writes one by-reference argument back to its origin after a call.
///
/// Array, target, and index operands were evaluated once before the call
/// and parked in temporary local slots; the updater reads them from there.
#[derive(Debug, Clone)]
pub enum ByRefUpdater {
    ArrayElement {
        array: usize,
        index: usize,
        argument: usize,
    },
    Field {
        target: usize,
        field: Arc<dyn Field>,
        argument: usize,
    },
    Property {
        target: usize,
        property: Arc<dyn Property>,
        argument: usize,
    },
    Local {
        slot: Slot,
        argument: usize,
    },
    /// Calls `setter` on `target` with the saved index values followed by
    /// the new value.
    Indexer {
        target: usize,
        setter: Arc<dyn Method>,
        indexes: Vec<usize>,
        argument: usize,
    },
}

impl ByRefUpdater {
    pub fn argument(&self) -> usize {
        match self {
            ByRefUpdater::ArrayElement { argument, .. }
            | ByRefUpdater::Field { argument, .. }
            | ByRefUpdater::Property { argument, .. }
            | ByRefUpdater::Local { argument, .. }
            | ByRefUpdater::Indexer { argument, .. } => *argument,
        }
    }

    /// The updater for a local that has just been boxed, if this one writes
    /// to `slot`.
    pub(crate) fn boxed(&self, slot: usize) -> Option<ByRefUpdater> {
        match self {
            ByRefUpdater::Local {
                slot: Slot::Local(s),
                argument,
            } if *s == slot => Some(ByRefUpdater::Local {
                slot: Slot::Boxed(slot),
                argument: *argument,
            }),
            _ => None,
        }
    }

    pub fn update(&self, frame: &mut Frame, value: Value) -> Result<(), Exception> {
        match self {
            ByRefUpdater::ArrayElement { array, index, .. } => {
                let target = frame.local(*array)?;
                let index = frame.local(*index)?;
                let array = match &target {
                    Value::Array(a) => a,
                    Value::Null => return Err(Exception::null_reference("array")),
                    other => return Err(Exception::invalid_cast("array", other)),
                };
                let index = index
                    .as_index()
                    .ok_or_else(|| Exception::invalid_cast("integer index", &index))?;
                array.set(index, value)
            }
            ByRefUpdater::Field { target, field, .. } => {
                let target = frame.local(*target)?;
                field.set(&target, value).map_err(MemberError::into_exception)
            }
            ByRefUpdater::Property {
                target, property, ..
            } => {
                let target = frame.local(*target)?;
                member::write_property(property.as_ref(), &target, value)
            }
            ByRefUpdater::Local { slot, .. } => frame.store_slot(*slot, value),
            ByRefUpdater::Indexer {
                target,
                setter,
                indexes,
                ..
            } => {
                let target = frame.local(*target)?;
                let mut args = indexes
                    .iter()
                    .map(|slot| frame.local(*slot))
                    .collect::<Result<Vec<_>, _>>()?;
                args.push(value);
                let instance = if setter.is_static() { None } else { Some(&target) };
                setter
                    .invoke(instance, &mut args)
                    .map(|_| ())
                    .map_err(MemberError::into_exception)
            }
        }
    }
}

/// Run a by-reference call: pop the arguments (and the instance), invoke,
/// then write every by-reference argument back whether or not the call
/// failed. An updater failure replaces the call's outcome and skips the
/// remaining updaters.
pub(crate) fn call(
    frame: &mut Frame,
    method: &Arc<dyn Method>,
    argc: usize,
    updaters: &[ByRefUpdater],
) -> Result<isize, Exception> {
    let mut args = frame.pop_n(argc)?;
    let instance = if method.is_static() {
        None
    } else {
        Some(frame.pop()?)
    };
    let outcome = method
        .invoke(instance.as_ref(), &mut args)
        .map_err(MemberError::into_exception);

    for updater in updaters {
        let value = args
            .get(updater.argument())
            .cloned()
            .ok_or_else(|| Exception::invalid_operation("by-ref argument out of range"))?;
        updater.update(frame, value)?;
    }

    let result = outcome?;
    if method.returns_value() {
        frame.push(result);
    }
    Ok(1)
}
