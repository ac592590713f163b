use std::fmt;
use std::sync::Arc;

use super::debug::DebugInfo;
use super::handler::TryRegion;
use super::instruction::Instruction;
use super::Value;

/// A resolved jump target. Produced once, when a build-time label is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLabel {
    pub index: usize,
    /// Value-stack depth at the label, relative to the first stack slot above
    /// the locals.
    pub stack_depth: usize,
    pub continuation_depth: usize,
}

/// An immutable, runnable instruction sequence.
///
/// A `Program` is shared read-only by every frame that runs it; all
/// mutable state lives in the `Frame`.
#[derive(Debug)]
pub struct Program {
    pub(crate) name: Arc<str>,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) objects: Vec<Value>,
    pub(crate) labels: Vec<RuntimeLabel>,
    pub(crate) try_regions: Vec<TryRegion>,
    pub(crate) debug_info: Vec<DebugInfo>,
    pub(crate) local_count: usize,
    pub(crate) parameter_count: usize,
    pub(crate) max_stack_depth: usize,
    pub(crate) max_continuation_depth: usize,
}

impl Program {
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn objects(&self) -> &[Value] {
        &self.objects
    }

    pub fn labels(&self) -> &[RuntimeLabel] {
        &self.labels
    }

    pub fn label(&self, index: usize) -> Option<&RuntimeLabel> {
        self.labels.get(index)
    }

    pub fn try_regions(&self) -> &[TryRegion] {
        &self.try_regions
    }

    pub fn debug_info(&self) -> &[DebugInfo] {
        &self.debug_info
    }

    pub fn local_count(&self) -> usize {
        self.local_count
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn max_stack_depth(&self) -> usize {
        self.max_stack_depth
    }

    pub fn max_continuation_depth(&self) -> usize {
        self.max_continuation_depth
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "== {} (params: {}, locals: {}, stack: {}, continuations: {}) ==",
            self.name,
            self.parameter_count,
            self.local_count,
            self.max_stack_depth,
            self.max_continuation_depth
        )?;
        for (i, instruction) in self.instructions.iter().enumerate() {
            for (l, label) in self.labels.iter().enumerate() {
                if label.index == i {
                    writeln!(f, "L{}: (depth {})", l, label.stack_depth)?;
                }
            }
            writeln!(f, "  {:04} {}", i, instruction)?;
        }
        for (i, region) in self.try_regions.iter().enumerate() {
            writeln!(f, "try #{}: {}", i, region)?;
        }
        Ok(())
    }
}
