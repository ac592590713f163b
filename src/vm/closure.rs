use std::fmt;
use std::sync::Arc;

use super::error::Exception;
use super::frame::Frame;
use super::program::Program;
use super::{Cell, Value};

/// A program body paired with the cells it captured.
pub struct Closure {
    program: Arc<Program>,
    cells: Vec<Cell>,
}

impl Closure {
    pub fn new(program: Arc<Program>, cells: Vec<Cell>) -> Self {
        Self { program, cells }
    }

    pub fn name(&self) -> &str {
        self.program.name()
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("name", &self.name())
            .field("cells", &self.cells.len())
            .finish()
    }
}

/// One captured variable of a closure being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// A boxed local of the creating frame.
    Local(usize),
    /// A cell the creating frame itself captured.
    Closure(usize),
}

pub(crate) fn create(frame: &mut Frame, body: &Arc<Program>, captures: &[Capture]) -> Result<isize, Exception> {
    let cells = captures
        .iter()
        .map(|capture| match capture {
            Capture::Local(slot) => match frame.local(*slot)? {
                Value::Cell(cell) => Ok(cell),
                other => Err(Exception::invalid_operation(format!(
                    "captured local {} is not boxed (found {})",
                    slot,
                    other.type_name()
                ))),
            },
            Capture::Closure(index) => frame.closure_cell(*index),
        })
        .collect::<Result<Vec<_>, _>>()?;
    frame.push(Value::Closure(Arc::new(Closure::new(body.clone(), cells))));
    Ok(1)
}

/// Invoke the closure below `argc` arguments in a fresh frame. The callee
/// shares the caller's instruction budget.
pub(crate) fn invoke(frame: &mut Frame, argc: usize) -> Result<isize, Exception> {
    let args = frame.pop_n(argc)?;
    let closure = match frame.pop()? {
        Value::Closure(c) => c,
        Value::Null => return Err(Exception::null_reference("closure")),
        other => return Err(Exception::invalid_cast("closure", &other)),
    };
    let mut callee = frame.nested(closure.program.clone(), closure.cells.clone());
    callee.bind_arguments(args)?;
    let outcome = callee.run();
    frame.inherit_budget(&callee);
    outcome?;
    frame.push(callee.result().unwrap_or(Value::Null));
    Ok(1)
}
