//! The instruction builder.
//!
//! `InstructionList` appends instructions while tracking the value-stack
//! and continuation-stack depths, resolves labels, lays out try regions,
//! and finally produces an immutable `Program`.

use std::sync::Arc;

use tracing::debug;

use super::label::{BranchLabel, LabelId};
use super::locals::LocalVariable;
use crate::vm::numeric::{BinaryOp, CompareOp, NumericKind, UnaryOp};
use crate::vm::{
    BuildError, ByRefUpdater, Capture, Category, CatchHandler, DebugInfo, FilterRegion,
    FinallyRegion, Instruction, Jump, Method, Program, TryRegion, Value,
};

#[derive(Debug, Default)]
pub struct InstructionList {
    instructions: Vec<Instruction>,
    objects: Vec<Value>,
    labels: Vec<BranchLabel>,
    /// `None` while a region is still being built.
    try_regions: Vec<Option<TryRegion>>,
    debug_info: Vec<DebugInfo>,
    stack_depth: usize,
    max_stack_depth: usize,
    continuation_depth: usize,
    max_continuation_depth: usize,
    /// Set after an unconditional instruction until a label is marked.
    unreachable: bool,
    return_label: Option<LabelId>,
    returns_value: bool,
    /// Gotos that carry a value, as (instruction, label).
    value_gotos: Vec<(usize, usize)>,
    /// Open blocks of try regions, innermost last. Block 0 is the code
    /// outside every region.
    blocks: Vec<usize>,
    next_block: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Try,
    Filter,
    Handler(usize),
    Finally(usize),
}

/// A try region under construction. Obtained from `begin_try` and handed
/// back to the list for each following block; `end_try` completes it.
#[derive(Debug)]
pub struct TryBlock {
    region: usize,
    entry_depth: usize,
    try_start: usize,
    try_end: Option<usize>,
    goto_end: LabelId,
    finally_label: Option<LabelId>,
    handlers: Vec<CatchHandler>,
    filter: Option<(LabelId, usize)>,
    section: Section,
}

impl TryBlock {
    pub fn region(&self) -> usize {
        self.region
    }

    /// Label marked after the whole region; a goto to it leaves the region.
    pub fn end_label(&self) -> LabelId {
        self.goto_end
    }
}

impl InstructionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.instructions.len()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack_depth
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub fn continuation_depth(&self) -> usize {
        self.continuation_depth
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    fn current_block(&self) -> usize {
        self.blocks.last().copied().unwrap_or(0)
    }

    fn enter_block(&mut self) {
        self.next_block += 1;
        self.blocks.push(self.next_block);
    }

    fn leave_block(&mut self) {
        self.blocks.pop();
    }

    fn set_stack_depth(&mut self, depth: usize) {
        self.stack_depth = depth;
        self.max_stack_depth = self.max_stack_depth.max(depth);
    }

    fn label_mut(&mut self, label: LabelId) -> Result<&mut BranchLabel, BuildError> {
        let index = self.instructions.len();
        self.labels
            .get_mut(label.0)
            .ok_or(BuildError::InvalidLabel {
                index,
                label: label.0,
            })
    }

    /// Append an instruction, applying its stack and continuation effects.
    pub fn emit(&mut self, instruction: Instruction) -> Result<usize, BuildError> {
        let index = self.instructions.len();
        instruction.check_kind()?;
        let consumed = instruction.consumed_stack();
        if consumed > self.stack_depth {
            return Err(BuildError::StackUnderflow {
                index,
                name: instruction.name(),
                required: consumed,
                actual: self.stack_depth,
            });
        }
        let consumed_continuations = instruction.consumed_continuations();
        if consumed_continuations > self.continuation_depth {
            return Err(BuildError::ContinuationUnderflow {
                index,
                name: instruction.name(),
            });
        }
        self.set_stack_depth(self.stack_depth - consumed + instruction.produced_stack());
        self.continuation_depth =
            self.continuation_depth - consumed_continuations + instruction.produced_continuations();
        self.max_continuation_depth = self.max_continuation_depth.max(self.continuation_depth);
        self.unreachable = instruction.is_unconditional();
        self.instructions.push(instruction);
        Ok(index)
    }

    // ========================================
    // Constants and arithmetic
    // ========================================

    pub fn emit_load(&mut self, value: Value) -> Result<usize, BuildError> {
        if value.is_null() {
            return self.emit(Instruction::LoadNull);
        }
        let object = self.objects.len();
        self.objects.push(value);
        self.emit(Instruction::LoadObject(object))
    }

    pub fn emit_pop(&mut self) -> Result<usize, BuildError> {
        self.emit(Instruction::Pop)
    }

    pub fn emit_dup(&mut self) -> Result<usize, BuildError> {
        self.emit(Instruction::Dup)
    }

    pub fn emit_binary(
        &mut self,
        op: BinaryOp,
        kind: NumericKind,
        checked: bool,
    ) -> Result<usize, BuildError> {
        self.emit(Instruction::Binary { op, kind, checked })
    }

    pub fn emit_unary(
        &mut self,
        op: UnaryOp,
        kind: NumericKind,
        checked: bool,
    ) -> Result<usize, BuildError> {
        self.emit(Instruction::Unary { op, kind, checked })
    }

    pub fn emit_compare(
        &mut self,
        op: CompareOp,
        kind: NumericKind,
        lifted: bool,
    ) -> Result<usize, BuildError> {
        self.emit(Instruction::Compare { op, kind, lifted })
    }

    pub fn emit_convert(
        &mut self,
        from: NumericKind,
        to: NumericKind,
        checked: bool,
    ) -> Result<usize, BuildError> {
        self.emit(Instruction::Convert { from, to, checked })
    }

    // ========================================
    // Labels and control flow
    // ========================================

    pub fn make_label(&mut self) -> LabelId {
        let id = self.labels.len();
        self.labels.push(BranchLabel::new(id));
        LabelId(id)
    }

    /// Mark `label` at the next instruction. After an unconditional
    /// instruction the stack depth is taken from the label's branches.
    pub fn mark_label(&mut self, label: LabelId) -> Result<(), BuildError> {
        let index = self.instructions.len();
        let depth = self.stack_depth;
        let continuation_depth = self.continuation_depth;
        let block = self.current_block();
        let after_unconditional = self.unreachable;
        let target = self.labels.get_mut(label.0).ok_or(BuildError::InvalidLabel {
            index,
            label: label.0,
        })?;
        let depth = target.mark(
            &mut self.instructions,
            index,
            depth,
            continuation_depth,
            block,
            after_unconditional,
        )?;
        self.set_stack_depth(depth);
        self.unreachable = false;
        Ok(())
    }

    /// Make a label and mark it here.
    pub fn mark_runtime_label(&mut self) -> Result<LabelId, BuildError> {
        let label = self.make_label();
        self.mark_label(label)?;
        Ok(label)
    }

    fn emit_jump(
        &mut self,
        label: LabelId,
        make: fn(Jump) -> Instruction,
    ) -> Result<usize, BuildError> {
        self.label_mut(label)?;
        let index = self.emit(make(Jump::Pending(label.0)))?;
        let depth = self.stack_depth;
        let block = self.current_block();
        let target = self.labels.get_mut(label.0).ok_or(BuildError::InvalidLabel {
            index,
            label: label.0,
        })?;
        target.add_branch(&mut self.instructions, index, depth, block)?;
        Ok(index)
    }

    pub fn emit_branch(&mut self, label: LabelId) -> Result<usize, BuildError> {
        self.emit_jump(label, Instruction::Branch)
    }

    pub fn emit_branch_true(&mut self, label: LabelId) -> Result<usize, BuildError> {
        self.emit_jump(label, Instruction::BranchTrue)
    }

    pub fn emit_branch_false(&mut self, label: LabelId) -> Result<usize, BuildError> {
        self.emit_jump(label, Instruction::BranchFalse)
    }

    /// Jump to `label`, running any finally blocks in between. Unlike a
    /// branch, a goto may leave try regions. With
    /// `has_value` the top of the stack is carried to the label.
    pub fn emit_goto(&mut self, label: LabelId, has_value: bool) -> Result<usize, BuildError> {
        self.label_mut(label)?.reference();
        let index = self.emit(Instruction::Goto {
            label: label.0,
            has_value,
        })?;
        if has_value {
            self.value_gotos.push((index, label.0));
        }
        Ok(index)
    }

    /// Leave the program. The return label is created on first use and
    /// marked by `finish`.
    pub fn emit_return(&mut self, has_value: bool) -> Result<usize, BuildError> {
        let label = match self.return_label {
            Some(label) => label,
            None => {
                let label = self.make_label();
                self.return_label = Some(label);
                label
            }
        };
        self.returns_value |= has_value;
        self.emit_goto(label, has_value)
    }

    pub fn emit_throw(&mut self) -> Result<usize, BuildError> {
        self.emit(Instruction::Throw)
    }

    pub fn emit_rethrow(&mut self) -> Result<usize, BuildError> {
        self.emit(Instruction::Rethrow)
    }

    // ========================================
    // Try regions
    // ========================================

    pub fn begin_try(&mut self, has_finally: bool) -> Result<TryBlock, BuildError> {
        let region = self.try_regions.len();
        let goto_end = self.make_label();
        let finally_label = if has_finally {
            let label = self.make_label();
            self.label_mut(label)?.reference();
            Some(label)
        } else {
            None
        };
        let entry_depth = self.stack_depth;
        self.emit(Instruction::EnterTryCatchFinally {
            region,
            has_finally,
        })?;
        self.try_regions.push(None);
        self.enter_block();
        Ok(TryBlock {
            region,
            entry_depth,
            try_start: self.count(),
            try_end: None,
            goto_end,
            finally_label,
            handlers: Vec::new(),
            filter: None,
            section: Section::Try,
        })
    }

    /// End the try body or a handler body with a goto past the region.
    fn close_section(&mut self, block: &mut TryBlock) -> Result<(), BuildError> {
        match block.section {
            Section::Try => {
                self.emit_goto(block.goto_end, false)?;
                block.try_end = Some(self.count());
            }
            Section::Handler(handler) => {
                self.emit_goto(block.goto_end, false)?;
                let end = self.count();
                if let Some(handler) = block.handlers.get_mut(handler) {
                    handler.end = end;
                }
            }
            Section::Filter => return Err(BuildError::MalformedTry("filter must be followed by its catch")),
            Section::Finally(_) => return Err(BuildError::MalformedTry("finally must be the last block")),
        }
        Ok(())
    }

    /// Start a filter for the next catch. The error is on the stack; the
    /// filter must replace it with exactly one verdict.
    pub fn begin_filter(&mut self, block: &mut TryBlock) -> Result<(), BuildError> {
        self.close_section(block)?;
        self.leave_block();
        self.set_stack_depth(block.entry_depth);
        self.emit(Instruction::EnterExceptionFilter)?;
        self.enter_block();
        let label = self.mark_runtime_label()?;
        block.filter = Some((label, self.count()));
        block.section = Section::Filter;
        Ok(())
    }

    /// Start a catch handler. The error is on the stack when it runs.
    pub fn begin_catch(&mut self, block: &mut TryBlock, category: Category) -> Result<(), BuildError> {
        let filter = if block.section == Section::Filter {
            if self.stack_depth != block.entry_depth + 1 {
                return Err(BuildError::MalformedTry("filter must leave exactly one verdict"));
            }
            self.emit(Instruction::LeaveExceptionFilter)?;
            self.leave_block();
            let (label, start) = block
                .filter
                .take()
                .ok_or(BuildError::MalformedTry("filter was never started"))?;
            Some(FilterRegion {
                label: label.0,
                start,
                end: self.count(),
            })
        } else {
            self.close_section(block)?;
            self.leave_block();
            None
        };
        self.set_stack_depth(block.entry_depth);
        self.emit(Instruction::EnterExceptionHandler)?;
        self.enter_block();
        let label = self.mark_runtime_label()?;
        let start = self.count();
        block.handlers.push(CatchHandler {
            category,
            label: label.0,
            start,
            end: start,
            filter,
        });
        block.section = Section::Handler(block.handlers.len() - 1);
        Ok(())
    }

    pub fn begin_finally(&mut self, block: &mut TryBlock) -> Result<(), BuildError> {
        let label = block
            .finally_label
            .ok_or(BuildError::MalformedTry("region was opened without a finally"))?;
        self.close_section(block)?;
        self.leave_block();
        self.set_stack_depth(block.entry_depth);
        let start = self.count();
        self.enter_block();
        self.mark_label(label)?;
        self.emit(Instruction::EnterFinally { label: label.0 })?;
        block.section = Section::Finally(start);
        Ok(())
    }

    pub fn end_try(&mut self, mut block: TryBlock) -> Result<(), BuildError> {
        let finally = match (block.section, block.finally_label) {
            (Section::Finally(start), Some(label)) => {
                self.emit(Instruction::LeaveFinally)?;
                self.leave_block();
                Some(FinallyRegion {
                    label: label.0,
                    start,
                    end: self.count(),
                })
            }
            (_, Some(_)) => return Err(BuildError::MalformedTry("finally block is missing")),
            (_, None) => {
                self.close_section(&mut block)?;
                self.leave_block();
                None
            }
        };
        if block.handlers.is_empty() && finally.is_none() {
            return Err(BuildError::MalformedTry("no catch or finally block"));
        }
        let try_end = block
            .try_end
            .ok_or(BuildError::MalformedTry("try body was never closed"))?;
        self.set_stack_depth(block.entry_depth);
        self.mark_label(block.goto_end)?;
        let region = TryRegion {
            try_start: block.try_start,
            try_end,
            goto_end_label: block.goto_end.0,
            handlers: block.handlers,
            finally,
        };
        match self.try_regions.get_mut(block.region) {
            Some(slot) => *slot = Some(region),
            None => return Err(BuildError::IncompleteTryRegion(block.region)),
        }
        Ok(())
    }

    // ========================================
    // Locals
    // ========================================

    pub fn emit_load_local(&mut self, variable: &LocalVariable) -> Result<usize, BuildError> {
        let index = variable.index;
        self.emit(match (variable.in_closure, variable.is_boxed) {
            (true, _) => Instruction::LoadClosure(index),
            (false, true) => Instruction::LoadLocalBoxed(index),
            (false, false) => Instruction::LoadLocal(index),
        })
    }

    pub fn emit_store_local(&mut self, variable: &LocalVariable) -> Result<usize, BuildError> {
        let index = variable.index;
        self.emit(match (variable.in_closure, variable.is_boxed) {
            (true, _) => Instruction::StoreClosure(index),
            (false, true) => Instruction::StoreLocalBoxed(index),
            (false, false) => Instruction::StoreLocal(index),
        })
    }

    /// Store and leave the value on the stack.
    pub fn emit_assign_local(&mut self, variable: &LocalVariable) -> Result<usize, BuildError> {
        let index = variable.index;
        self.emit(match (variable.in_closure, variable.is_boxed) {
            (true, _) => Instruction::AssignClosure(index),
            (false, true) => Instruction::AssignLocalBoxed(index),
            (false, false) => Instruction::AssignLocal(index),
        })
    }

    pub fn emit_init_local(&mut self, variable: &LocalVariable) -> Result<usize, BuildError> {
        if variable.in_closure {
            return Err(BuildError::BoxedClosureVariable);
        }
        self.emit(if variable.is_boxed {
            Instruction::InitLocalBoxed(variable.index)
        } else {
            Instruction::InitLocal(variable.index)
        })
    }

    pub fn emit_init_parameter(&mut self, variable: &LocalVariable) -> Result<usize, BuildError> {
        if variable.in_closure {
            return Err(BuildError::BoxedClosureVariable);
        }
        self.emit(if variable.is_boxed {
            Instruction::InitParameterBoxed(variable.index)
        } else {
            Instruction::InitParameter(variable.index)
        })
    }

    /// Push the cell of a boxed variable.
    pub fn emit_load_cell(&mut self, variable: &LocalVariable) -> Result<usize, BuildError> {
        match (variable.in_closure, variable.is_boxed) {
            (true, _) => self.emit(Instruction::LoadClosureCell(variable.index)),
            (false, true) => self.emit(Instruction::LoadLocalCell(variable.index)),
            (false, false) => Err(BuildError::NotBoxed(variable.index)),
        }
    }

    /// Rewrite the instruction at `index` to its boxed form if it accesses
    /// local `slot`.
    pub(crate) fn switch_to_boxed(&mut self, slot: usize, index: usize) {
        if let Some(instruction) = self.instructions.get_mut(index) {
            if let Some(boxed) = instruction.boxed(slot) {
                *instruction = boxed;
            }
        }
    }

    // ========================================
    // Calls and closures
    // ========================================

    pub fn emit_call(&mut self, method: Arc<dyn Method>) -> Result<usize, BuildError> {
        let argc = method.parameter_count();
        self.emit(Instruction::Call { method, argc })
    }

    pub fn emit_call_by_ref(
        &mut self,
        method: Arc<dyn Method>,
        mut updaters: Vec<ByRefUpdater>,
    ) -> Result<usize, BuildError> {
        let argc = method.parameter_count();
        if let Some(updater) = updaters.iter().find(|u| u.argument() >= argc) {
            return Err(BuildError::InvalidByRefArgument {
                argument: updater.argument(),
                argc,
            });
        }
        updaters.sort_by_key(ByRefUpdater::argument);
        self.emit(Instruction::CallByRef {
            method,
            argc,
            updaters,
        })
    }

    pub fn emit_create_closure(
        &mut self,
        body: Arc<Program>,
        captures: Vec<Capture>,
    ) -> Result<usize, BuildError> {
        self.emit(Instruction::CreateClosure {
            body,
            captures: captures.into(),
        })
    }

    pub fn emit_invoke_closure(&mut self, argc: usize) -> Result<usize, BuildError> {
        self.emit(Instruction::InvokeClosure(argc))
    }

    // ========================================
    // Debug info
    // ========================================

    /// Map the instructions from here on to `start_line..=end_line`.
    pub fn add_debug_info(&mut self, start_line: u32, end_line: u32, file: Option<Arc<str>>) {
        let mut record = DebugInfo::new(self.count(), start_line, end_line);
        record.file = file;
        self.push_debug_info(record);
    }

    pub fn clear_debug_info(&mut self) {
        self.push_debug_info(DebugInfo::clear(self.count()));
    }

    fn push_debug_info(&mut self, record: DebugInfo) {
        match self.debug_info.last_mut() {
            Some(last) if last.index == record.index => *last = record,
            _ => self.debug_info.push(record),
        }
    }

    // ========================================
    // Finish
    // ========================================

    pub fn finish(
        mut self,
        name: &str,
        local_count: usize,
        parameter_count: usize,
    ) -> Result<Program, BuildError> {
        if let Some(region) = self.try_regions.iter().position(Option::is_none) {
            return Err(BuildError::IncompleteTryRegion(region));
        }
        if let Some(label) = self.return_label {
            if self.returns_value {
                if self.unreachable {
                    self.stack_depth = 1;
                } else if self.stack_depth == 0 {
                    self.emit(Instruction::LoadNull)?;
                }
            }
            self.mark_label(label)?;
        }

        let end = self.instructions.len();
        let labels = self
            .labels
            .into_iter()
            .map(|label| label.freeze(end))
            .collect::<Result<Vec<_>, _>>()?;
        for (index, label) in self.value_gotos {
            if labels.get(label).is_none_or(|l| l.stack_depth == 0) {
                return Err(BuildError::GotoValueWithoutSlot { index, label });
            }
        }

        debug!(
            program = name,
            instructions = end,
            labels = labels.len(),
            max_stack_depth = self.max_stack_depth,
            max_continuation_depth = self.max_continuation_depth,
            "program built"
        );

        Ok(Program {
            name: name.into(),
            instructions: self.instructions,
            objects: self.objects,
            labels,
            try_regions: self.try_regions.into_iter().flatten().collect(),
            debug_info: self.debug_info,
            local_count,
            parameter_count,
            max_stack_depth: self.max_stack_depth,
            max_continuation_depth: self.max_continuation_depth,
        })
    }
}
