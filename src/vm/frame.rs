use std::ops::Range;
use std::sync::Arc;

use tracing::trace;

use super::byref::Slot;
use super::debug::DebugInfo;
use super::error::{Exception, TraceFrame};
use super::program::{Program, RuntimeLabel};
use super::{Cell, Value};

/// Frame state saved around a filter run and restored afterwards, whether
/// or not the filter accepts.
pub(crate) struct Checkpoint {
    stack_index: usize,
    ip: usize,
    continuations: usize,
    saved_pending: usize,
    pending_continuation: Option<usize>,
    pending_value: Option<Value>,
    traced: Option<Exception>,
}

/// The mutable state of one invocation of a `Program`.
///
/// Locals occupy the bottom `local_count` slots of `data`; the value stack
/// grows above them. A frame is owned by exactly one running invocation.
pub struct Frame {
    program: Arc<Program>,
    data: Vec<Value>,
    stack_index: usize,
    pub(crate) ip: usize,
    closure: Vec<Cell>,
    /// Label indexes of the finally blocks that must run before control
    /// leaves the enclosing try regions.
    pub(crate) continuations: Vec<usize>,
    /// A jump (label index) waiting for finally blocks to complete.
    pub(crate) pending_continuation: Option<usize>,
    pub(crate) pending_value: Option<Value>,
    /// Pending jumps of the finally blocks currently running, innermost last.
    pub(crate) saved_pending: Vec<(Option<usize>, Option<Value>)>,
    /// The error the innermost running handler caught.
    pub(crate) handled: Option<Exception>,
    pub(crate) filter_verdict: Option<bool>,
    /// Set when a finally block completes without a pending jump.
    pub(crate) finally_exit: bool,
    /// The last error whose trace this frame extended.
    traced: Option<Exception>,
    budget: Option<u64>,
    budget_limit: u64,
    trace_execution: bool,
}

impl Frame {
    pub fn new(program: Arc<Program>, closure: Vec<Cell>) -> Self {
        let local_count = program.local_count();
        let data = vec![Value::Null; local_count + program.max_stack_depth()];
        Self {
            program,
            data,
            stack_index: local_count,
            ip: 0,
            closure,
            continuations: Vec::new(),
            pending_continuation: None,
            pending_value: None,
            saved_pending: Vec::new(),
            handled: None,
            filter_verdict: None,
            finally_exit: false,
            traced: None,
            budget: None,
            budget_limit: 0,
            trace_execution: false,
        }
    }

    /// Limit the number of instructions this frame (and frames it calls)
    /// may execute.
    pub fn with_budget(mut self, budget: Option<u64>) -> Self {
        self.budget = budget;
        self.budget_limit = budget.unwrap_or(0);
        self
    }

    pub fn with_trace(mut self, trace_execution: bool) -> Self {
        self.trace_execution = trace_execution;
        self
    }

    /// A frame for a callee that shares this frame's budget and tracing.
    pub(crate) fn nested(&self, program: Arc<Program>, closure: Vec<Cell>) -> Frame {
        let mut frame = Frame::new(program, closure).with_trace(self.trace_execution);
        frame.budget = self.budget;
        frame.budget_limit = self.budget_limit;
        frame
    }

    pub(crate) fn inherit_budget(&mut self, callee: &Frame) {
        self.budget = callee.budget;
    }

    pub(crate) fn suspend_budget(&mut self) -> Option<u64> {
        self.budget.take()
    }

    pub(crate) fn resume_budget(&mut self, budget: Option<u64>) {
        if budget.is_some() {
            self.budget = budget;
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Number of values on the stack above the locals.
    pub fn stack_depth(&self) -> usize {
        self.stack_index - self.program.local_count()
    }

    pub fn stack(&self) -> &[Value] {
        &self.data[self.program.local_count()..self.stack_index]
    }

    pub fn handled(&self) -> Option<&Exception> {
        self.handled.as_ref()
    }

    /// The value on top of the stack, if any.
    pub fn result(&self) -> Option<Value> {
        self.stack().last().cloned()
    }

    pub fn bind_arguments(&mut self, args: Vec<Value>) -> Result<(), Exception> {
        let expected = self.program.parameter_count();
        if args.len() != expected {
            return Err(Exception::invalid_operation(format!(
                "{} expects {} arguments, got {}",
                self.program.name(),
                expected,
                args.len()
            )));
        }
        for (slot, arg) in args.into_iter().enumerate() {
            self.data[slot] = arg;
        }
        Ok(())
    }

    // ========================================
    // Value stack
    // ========================================

    pub fn push(&mut self, value: Value) {
        if self.stack_index < self.data.len() {
            self.data[self.stack_index] = value;
        } else {
            self.data.push(value);
        }
        self.stack_index += 1;
    }

    pub fn pop(&mut self) -> Result<Value, Exception> {
        if self.stack_index <= self.program.local_count() {
            return Err(Exception::invalid_operation("stack underflow"));
        }
        self.stack_index -= 1;
        Ok(std::mem::replace(&mut self.data[self.stack_index], Value::Null))
    }

    pub fn peek(&self) -> Result<Value, Exception> {
        self.stack()
            .last()
            .cloned()
            .ok_or_else(|| Exception::invalid_operation("stack underflow"))
    }

    /// Pop `n` values, returned in the order they were pushed.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Exception> {
        if self.stack_depth() < n {
            return Err(Exception::invalid_operation("stack underflow"));
        }
        let start = self.stack_index - n;
        let values = self.data[start..self.stack_index]
            .iter_mut()
            .map(|v| std::mem::replace(v, Value::Null))
            .collect();
        self.stack_index = start;
        Ok(values)
    }

    fn set_top(&mut self, value: Value) -> Result<(), Exception> {
        if self.stack_depth() == 0 {
            return Err(Exception::invalid_operation("no stack slot for jump value"));
        }
        self.data[self.stack_index - 1] = value;
        Ok(())
    }

    pub(crate) fn set_stack_depth(&mut self, depth: usize) {
        let index = self.program.local_count() + depth;
        if index > self.data.len() {
            self.data.resize(index, Value::Null);
        }
        self.stack_index = index;
    }

    // ========================================
    // Locals and closure cells
    // ========================================

    pub fn local(&self, slot: usize) -> Result<Value, Exception> {
        self.local_ref(slot).cloned()
    }

    fn local_ref(&self, slot: usize) -> Result<&Value, Exception> {
        if slot >= self.program.local_count() {
            return Err(Exception::invalid_operation(format!("no local {}", slot)));
        }
        Ok(&self.data[slot])
    }

    pub fn set_local(&mut self, slot: usize, value: Value) -> Result<(), Exception> {
        if slot >= self.program.local_count() {
            return Err(Exception::invalid_operation(format!("no local {}", slot)));
        }
        self.data[slot] = value;
        Ok(())
    }

    pub(crate) fn local_cell(&self, slot: usize) -> Result<Cell, Exception> {
        match self.local_ref(slot)? {
            Value::Cell(cell) => Ok(cell.clone()),
            other => Err(Exception::invalid_operation(format!(
                "local {} is not boxed (found {})",
                slot,
                other.type_name()
            ))),
        }
    }

    pub(crate) fn closure_cell(&self, index: usize) -> Result<Cell, Exception> {
        self.closure
            .get(index)
            .cloned()
            .ok_or_else(|| Exception::invalid_operation(format!("no closure variable {}", index)))
    }

    pub(crate) fn store_slot(&mut self, slot: Slot, value: Value) -> Result<(), Exception> {
        match slot {
            Slot::Local(slot) => self.set_local(slot, value),
            Slot::Boxed(slot) => {
                self.local_cell(slot)?.set(value);
                Ok(())
            }
            Slot::Closure(index) => {
                self.closure_cell(index)?.set(value);
                Ok(())
            }
        }
    }

    // ========================================
    // Labels and continuations
    // ========================================

    pub(crate) fn label(&self, index: usize) -> Result<RuntimeLabel, Exception> {
        self.program
            .label(index)
            .copied()
            .ok_or_else(|| Exception::invalid_operation(format!("no label {}", index)))
    }

    fn offset_to(&self, index: usize) -> isize {
        index as isize - self.ip as isize
    }

    /// Jump to a label. A label at the current continuation depth is
    /// reached directly; otherwise the jump becomes pending and control
    /// passes to the innermost finally block.
    pub fn goto(&mut self, label_index: usize, value: Option<Value>) -> Result<isize, Exception> {
        let label = self.label(label_index)?;
        if self.continuations.len() == label.continuation_depth {
            self.set_stack_depth(label.stack_depth);
            if let Some(value) = value {
                self.set_top(value)?;
            }
            return Ok(self.offset_to(label.index));
        }
        self.pending_continuation = Some(label_index);
        self.pending_value = value;
        self.yield_to_current_continuation()
    }

    /// Enter a handler or filter at its label with the error on the stack.
    pub(crate) fn jump_to(&mut self, label_index: usize, value: Value) -> Result<(), Exception> {
        let label = self.label(label_index)?;
        self.set_stack_depth(label.stack_depth);
        self.set_top(value)?;
        self.ip = label.index;
        Ok(())
    }

    pub(crate) fn yield_to_current_continuation(&mut self) -> Result<isize, Exception> {
        let index = *self
            .continuations
            .last()
            .ok_or_else(|| Exception::invalid_operation("no finally block to run"))?;
        let target = self.label(index)?;
        self.set_stack_depth(target.stack_depth);
        Ok(self.offset_to(target.index))
    }

    /// Resume the pending jump, or run the next outer finally block first if
    /// the jump leaves it too.
    pub(crate) fn yield_to_pending_continuation(&mut self) -> Result<isize, Exception> {
        let index = self
            .pending_continuation
            .ok_or_else(|| Exception::invalid_operation("no pending jump"))?;
        let pending = self.label(index)?;
        if pending.continuation_depth < self.continuations.len() {
            return self.yield_to_current_continuation();
        }
        self.set_stack_depth(pending.stack_depth);
        if let Some(value) = self.pending_value.take() {
            self.set_top(value)?;
        }
        self.pending_continuation = None;
        Ok(self.offset_to(pending.index))
    }

    pub(crate) fn push_continuation(&mut self, label_index: usize) {
        self.continuations.push(label_index);
    }

    pub(crate) fn pop_continuation(&mut self) -> Result<usize, Exception> {
        self.continuations
            .pop()
            .ok_or_else(|| Exception::invalid_operation("continuation stack underflow"))
    }

    pub(crate) fn save_pending(&mut self) {
        let pending = (self.pending_continuation.take(), self.pending_value.take());
        self.saved_pending.push(pending);
    }

    pub(crate) fn restore_pending(&mut self) {
        if let Some((continuation, value)) = self.saved_pending.pop() {
            self.pending_continuation = continuation;
            self.pending_value = value;
        }
    }

    pub(crate) fn clear_pending(&mut self) {
        self.pending_continuation = None;
        self.pending_value = None;
    }

    pub(crate) fn unwind_to(&mut self, continuations: usize, saved_pending: usize) {
        self.continuations.truncate(continuations);
        self.saved_pending.truncate(saved_pending);
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            stack_index: self.stack_index,
            ip: self.ip,
            continuations: self.continuations.len(),
            saved_pending: self.saved_pending.len(),
            pending_continuation: self.pending_continuation,
            pending_value: self.pending_value.clone(),
            traced: self.traced.clone(),
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: Checkpoint) {
        self.stack_index = checkpoint.stack_index;
        self.ip = checkpoint.ip;
        self.unwind_to(checkpoint.continuations, checkpoint.saved_pending);
        self.pending_continuation = checkpoint.pending_continuation;
        self.pending_value = checkpoint.pending_value;
        self.traced = checkpoint.traced;
    }

    // ========================================
    // Dispatch
    // ========================================

    pub(crate) fn clear_traced(&mut self) {
        self.traced = None;
    }

    /// Record this frame's position in the error's trace, once per error.
    fn save_trace(&mut self, error: &Exception, ip: usize) {
        if self.traced.as_ref().is_some_and(|t| t.ptr_eq(error)) {
            return;
        }
        let lines = DebugInfo::lookup(self.program.debug_info(), ip).map(|r| (r.start_line, r.end_line));
        error.push_trace(TraceFrame {
            program: self.program.name().clone(),
            instruction: ip,
            lines,
        });
        self.traced = Some(error.clone());
    }

    fn tick(&mut self) -> Result<(), Exception> {
        if let Some(remaining) = self.budget.as_mut() {
            if *remaining == 0 {
                return Err(Exception::aborted(self.budget_limit));
            }
            *remaining -= 1;
        }
        Ok(())
    }

    /// Execute instructions while the instruction pointer stays inside
    /// `range`.
    pub(crate) fn run_range(&mut self, range: Range<usize>) -> Result<(), Exception> {
        let program = self.program.clone();
        while range.contains(&self.ip) {
            let ip = self.ip;
            let Some(instruction) = program.instructions.get(ip) else {
                break;
            };
            if self.trace_execution {
                trace!(
                    program = %program.name,
                    ip,
                    depth = self.stack_depth(),
                    "{}",
                    instruction
                );
            }
            match self.tick().and_then(|_| instruction.run(self)) {
                Ok(delta) => self.ip = ip.checked_add_signed(delta).unwrap_or(usize::MAX),
                Err(error) => {
                    self.save_trace(&error, ip);
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Run the whole program from the current instruction pointer.
    pub fn run(&mut self) -> Result<(), Exception> {
        let len = self.program.len();
        self.run_range(0..len)
    }
}
