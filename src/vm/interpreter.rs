use std::sync::Arc;

use tracing::debug;

use super::error::Exception;
use super::frame::Frame;
use super::program::Program;
use super::{Cell, Value};
use crate::config::RuntimeConfig;

/// Runs a shared `Program`. Each invocation gets its own `Frame`, so one
/// interpreter may be used from many threads at once.
#[derive(Debug, Clone)]
pub struct Interpreter {
    program: Arc<Program>,
    config: RuntimeConfig,
}

impl Interpreter {
    pub fn new(program: Arc<Program>) -> Self {
        Self::with_config(program, RuntimeConfig::default())
    }

    pub fn with_config(program: Arc<Program>, config: RuntimeConfig) -> Self {
        Self { program, config }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// A fresh frame over this interpreter's program.
    pub fn frame(&self, closure: Vec<Cell>) -> Frame {
        Frame::new(self.program.clone(), closure)
            .with_budget(self.config.instruction_budget)
            .with_trace(self.config.trace_execution)
    }

    /// Run `frame` until the instruction pointer leaves the program. The
    /// result, if any, is left on top of the frame's stack.
    pub fn run(&self, frame: &mut Frame) -> Result<(), Exception> {
        frame.run().inspect_err(|error| {
            debug!(program = %self.program.name(), %error, "unhandled error");
        })
    }

    /// Bind `args` to the parameters, run, and return the top stack value.
    pub fn invoke(&self, args: Vec<Value>, closure: Vec<Cell>) -> Result<Option<Value>, Exception> {
        let mut frame = self.frame(closure);
        frame.bind_arguments(args)?;
        self.run(&mut frame)?;
        Ok(frame.result())
    }
}
