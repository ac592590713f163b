//! Program verifier.
//!
//! Checks a built `Program` before it runs:
//! - Control flow: branch targets, labels, and try regions lie inside the
//!   program, region labels point at their region starts, and no branch
//!   crosses a region boundary (only `Goto` may leave a region)
//! - Stack height consistency: every instruction is reached with one height
//! - Stack effect: no underflow, and no height above `max_stack_depth`

use std::collections::VecDeque;

use super::error::BuildError;
use super::instruction::{Instruction, Jump};
use super::program::Program;

/// Program verifier
pub struct Verifier {
    /// Maximum stack depth (configurable, default 1024)
    pub max_stack_depth: usize,
}

impl Default for Verifier {
    fn default() -> Self {
        Self { max_stack_depth: 1024 }
    }
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify(&self, program: &Program) -> Result<(), BuildError> {
        self.verify_labels(program)?;
        self.verify_try_regions(program)?;
        self.verify_branch_regions(program)?;
        self.verify_stack_heights(program)
    }

    fn verify_labels(&self, program: &Program) -> Result<(), BuildError> {
        let len = program.len();
        for (index, label) in program.labels().iter().enumerate() {
            if label.index > len {
                return Err(BuildError::InvalidJumpTarget {
                    index,
                    target: label.index as isize,
                });
            }
        }
        for (index, instruction) in program.instructions().iter().enumerate() {
            instruction.check_kind()?;
            match instruction {
                Instruction::Branch(jump) | Instruction::BranchTrue(jump) | Instruction::BranchFalse(jump) => {
                    match jump {
                        Jump::Pending(label) => return Err(BuildError::UnmarkedLabel(*label)),
                        Jump::Offset(offset) => {
                            let target = index as isize + offset;
                            if target < 0 || target > len as isize {
                                return Err(BuildError::InvalidJumpTarget { index, target });
                            }
                        }
                    }
                }
                Instruction::Goto { label, .. } | Instruction::EnterFinally { label } => {
                    if program.label(*label).is_none() {
                        return Err(BuildError::InvalidLabel { index, label: *label });
                    }
                }
                Instruction::EnterTryCatchFinally { region, has_finally } => {
                    let valid = program
                        .try_regions()
                        .get(*region)
                        .is_some_and(|r| r.try_start == index + 1 && r.finally.is_some() == *has_finally);
                    if !valid {
                        return Err(BuildError::InvalidTryRegion {
                            region: *region,
                            reason: "does not start after its entry instruction",
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn verify_try_regions(&self, program: &Program) -> Result<(), BuildError> {
        let len = program.len();
        let label_at = |label: usize, start: usize| program.label(label).is_some_and(|l| l.index == start);
        for (region_index, region) in program.try_regions().iter().enumerate() {
            let invalid = |reason| BuildError::InvalidTryRegion {
                region: region_index,
                reason,
            };
            if region.try_start > region.try_end || region.try_end > len {
                return Err(invalid("try range out of bounds"));
            }
            if program.label(region.goto_end_label).is_none() {
                return Err(invalid("end label is undefined"));
            }
            if region.handlers.is_empty() && region.finally.is_none() {
                return Err(invalid("no handler or finally block"));
            }
            for handler in &region.handlers {
                if handler.start > handler.end || handler.end > len || handler.start < region.try_end {
                    return Err(invalid("handler range out of bounds"));
                }
                if !label_at(handler.label, handler.start) {
                    return Err(invalid("handler label does not point at the handler"));
                }
                if let Some(filter) = &handler.filter {
                    if filter.start > filter.end || filter.end > handler.start {
                        return Err(invalid("filter range out of bounds"));
                    }
                    if !label_at(filter.label, filter.start) {
                        return Err(invalid("filter label does not point at the filter"));
                    }
                }
            }
            if let Some(finally) = &region.finally {
                if finally.start > finally.end || finally.end > len || finally.start < region.try_end {
                    return Err(invalid("finally range out of bounds"));
                }
                if !label_at(finally.label, finally.start) {
                    return Err(invalid("finally label does not point at the finally block"));
                }
            }
        }
        Ok(())
    }

    /// A branch and its target must share the innermost try body, filter,
    /// handler, or finally range enclosing them.
    fn verify_branch_regions(&self, program: &Program) -> Result<(), BuildError> {
        let ranges: Vec<(usize, usize)> = program
            .try_regions()
            .iter()
            .flat_map(|region| {
                let handlers = region.handlers.iter().flat_map(|handler| {
                    std::iter::once((handler.start, handler.end))
                        .chain(handler.filter.as_ref().map(|filter| (filter.start, filter.end)))
                });
                std::iter::once((region.try_start, region.try_end))
                    .chain(handlers)
                    .chain(region.finally.as_ref().map(|finally| (finally.start, finally.end)))
            })
            .collect();
        let innermost = |index: usize| {
            ranges
                .iter()
                .filter(|(start, end)| (*start..*end).contains(&index))
                .min_by_key(|(start, end)| end - start)
                .copied()
        };
        for (index, instruction) in program.instructions().iter().enumerate() {
            let (Instruction::Branch(Jump::Offset(offset))
            | Instruction::BranchTrue(Jump::Offset(offset))
            | Instruction::BranchFalse(Jump::Offset(offset))) = instruction
            else {
                continue;
            };
            let target = (index as isize + offset) as usize;
            if innermost(index) != innermost(target) {
                return Err(BuildError::BranchLeavesRegion { index, target });
            }
        }
        Ok(())
    }

    /// Propagate stack heights from the entry point and every region entry
    /// label, checking each instruction is reached with a single height.
    fn verify_stack_heights(&self, program: &Program) -> Result<(), BuildError> {
        let max = self.max_stack_depth;
        if program.max_stack_depth() > max {
            return Err(BuildError::StackOverflow {
                depth: program.max_stack_depth(),
                max,
            });
        }

        let code = program.instructions();
        let len = code.len();
        let mut flow = HeightFlow {
            heights: vec![None; len + 1],
            worklist: VecDeque::new(),
            max,
        };

        flow.enqueue(0, 0)?;
        for region in program.try_regions() {
            let entries = region
                .handlers
                .iter()
                .flat_map(|h| std::iter::once(h.label).chain(h.filter.as_ref().map(|f| f.label)))
                .chain(region.finally.as_ref().map(|f| f.label));
            for label in entries {
                if let Some(label) = program.label(label) {
                    flow.enqueue(label.index, label.stack_depth)?;
                }
            }
        }

        while let Some(index) = flow.worklist.pop_front() {
            if index == len {
                continue;
            }
            let height = flow.heights[index].unwrap_or(0);
            let instruction = &code[index];
            let consumed = instruction.consumed_stack();
            if consumed > height {
                return Err(BuildError::StackUnderflow {
                    index,
                    name: instruction.name(),
                    required: consumed,
                    actual: height,
                });
            }
            let after = height - consumed + instruction.produced_stack();

            match instruction {
                Instruction::Branch(Jump::Offset(offset)) => {
                    flow.enqueue((index as isize + offset) as usize, after)?;
                }
                Instruction::BranchTrue(Jump::Offset(offset)) | Instruction::BranchFalse(Jump::Offset(offset)) => {
                    flow.enqueue((index as isize + offset) as usize, after)?;
                    flow.enqueue(index + 1, after)?;
                }
                Instruction::Goto { label, .. } => {
                    if let Some(label) = program.label(*label) {
                        flow.enqueue(label.index, label.stack_depth)?;
                    }
                }
                Instruction::Throw | Instruction::Rethrow => {}
                _ => flow.enqueue(index + 1, after)?,
            }
        }
        Ok(())
    }
}

struct HeightFlow {
    heights: Vec<Option<usize>>,
    worklist: VecDeque<usize>,
    max: usize,
}

impl HeightFlow {
    fn enqueue(&mut self, index: usize, height: usize) -> Result<(), BuildError> {
        if index >= self.heights.len() {
            return Ok(());
        }
        if height > self.max {
            return Err(BuildError::StackOverflow {
                depth: height,
                max: self.max,
            });
        }
        match self.heights[index] {
            Some(expected) if expected != height => Err(BuildError::StackHeightMismatch {
                index,
                expected,
                actual: height,
            }),
            Some(_) => Ok(()),
            None => {
                self.heights[index] = Some(height);
                self.worklist.push_back(index);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::numeric::{BinaryOp, NumericKind, UnaryOp};
    use crate::vm::{FinallyRegion, TryRegion};
    use crate::vm::program::RuntimeLabel;
    use crate::vm::Value;

    fn make_program(instructions: Vec<Instruction>, max_stack_depth: usize) -> Program {
        Program {
            name: "test".into(),
            instructions,
            objects: vec![Value::I32(1), Value::I32(2)],
            labels: Vec::new(),
            try_regions: Vec::new(),
            debug_info: Vec::new(),
            local_count: 0,
            parameter_count: 0,
            max_stack_depth,
            max_continuation_depth: 0,
        }
    }

    fn add() -> Instruction {
        Instruction::Binary {
            op: BinaryOp::Add,
            kind: NumericKind::I32,
            checked: true,
        }
    }

    #[test]
    fn test_simple_program() {
        let verifier = Verifier::new();
        let program = make_program(
            vec![Instruction::LoadObject(0), Instruction::LoadObject(1), add()],
            2,
        );
        assert!(verifier.verify(&program).is_ok());
    }

    #[test]
    fn test_stack_underflow() {
        let verifier = Verifier::new();
        let program = make_program(vec![Instruction::LoadObject(0), add()], 1);
        assert!(matches!(
            verifier.verify(&program),
            Err(BuildError::StackUnderflow { index: 1, .. })
        ));
    }

    #[test]
    fn test_stack_height_mismatch() {
        let verifier = Verifier::new();
        // if c { push 1 } else { push 1; push 2 }
        let program = make_program(
            vec![
                Instruction::LoadObject(0),                // 0
                Instruction::BranchFalse(Jump::Offset(3)), // 1 -> 4
                Instruction::LoadObject(0),                // 2
                Instruction::Branch(Jump::Offset(3)),      // 3 -> 6
                Instruction::LoadObject(0),                // 4
                Instruction::LoadObject(1),                // 5
                Instruction::Pop,                          // 6: reached with 1 and 2
            ],
            2,
        );
        assert!(matches!(
            verifier.verify(&program),
            Err(BuildError::StackHeightMismatch { index: 6, .. })
        ));
    }

    #[test]
    fn test_invalid_jump_target() {
        let verifier = Verifier::new();
        let program = make_program(vec![Instruction::Branch(Jump::Offset(100))], 0);
        assert!(matches!(
            verifier.verify(&program),
            Err(BuildError::InvalidJumpTarget { index: 0, target: 100 })
        ));
    }

    #[test]
    fn test_unresolved_branch() {
        let verifier = Verifier::new();
        let program = make_program(vec![Instruction::Branch(Jump::Pending(3))], 0);
        assert!(matches!(verifier.verify(&program), Err(BuildError::UnmarkedLabel(3))));
    }

    #[test]
    fn test_invalid_goto_label() {
        let verifier = Verifier::new();
        let mut program = make_program(
            vec![Instruction::Goto {
                label: 1,
                has_value: false,
            }],
            0,
        );
        program.labels.push(RuntimeLabel {
            index: 1,
            stack_depth: 0,
            continuation_depth: 0,
        });
        assert!(matches!(
            verifier.verify(&program),
            Err(BuildError::InvalidLabel { index: 0, label: 1 })
        ));
    }

    #[test]
    fn test_stack_limit() {
        let verifier = Verifier { max_stack_depth: 1 };
        let program = make_program(
            vec![Instruction::LoadObject(0), Instruction::LoadObject(1), add()],
            2,
        );
        assert!(matches!(
            verifier.verify(&program),
            Err(BuildError::StackOverflow { depth: 2, max: 1 })
        ));
    }

    #[test]
    fn test_branch_out_of_try_region() {
        let verifier = Verifier::new();
        let mut program = make_program(
            vec![
                Instruction::EnterTryCatchFinally { region: 0, has_finally: true }, // 0
                Instruction::Branch(Jump::Offset(5)),                               // 1 -> 6
                Instruction::Goto { label: 0, has_value: false },                   // 2
                Instruction::EnterFinally { label: 1 },                             // 3
                Instruction::LeaveFinally,                                          // 4
                Instruction::LoadNull,                                              // 5
                Instruction::Pop,                                                   // 6
            ],
            1,
        );
        program.labels = vec![
            RuntimeLabel { index: 5, stack_depth: 0, continuation_depth: 0 },
            RuntimeLabel { index: 3, stack_depth: 0, continuation_depth: 0 },
        ];
        program.try_regions.push(TryRegion {
            try_start: 1,
            try_end: 3,
            goto_end_label: 0,
            handlers: Vec::new(),
            finally: Some(FinallyRegion { label: 1, start: 3, end: 5 }),
        });
        program.max_continuation_depth = 1;
        assert_eq!(
            verifier.verify(&program),
            Err(BuildError::BranchLeavesRegion { index: 1, target: 6 })
        );

        program.instructions[1] = Instruction::Branch(Jump::Offset(1));
        assert!(verifier.verify(&program).is_ok());
    }

    #[test]
    fn test_unsupported_kind_is_rejected() {
        let verifier = Verifier::new();
        let program = make_program(
            vec![
                Instruction::LoadObject(0),
                Instruction::Unary {
                    op: UnaryOp::Not,
                    kind: NumericKind::F64,
                    checked: false,
                },
            ],
            1,
        );
        assert!(matches!(
            verifier.verify(&program),
            Err(BuildError::UnsupportedKind { operation: "Not", kind: "f64" })
        ));
    }

    #[test]
    fn test_loop() {
        let verifier = Verifier::new();
        let mut program = make_program(
            vec![
                Instruction::LoadObject(0),                  // 0
                Instruction::BranchFalse(Jump::Offset(2)),   // 1: exit
                Instruction::Branch(Jump::Offset(-2)),       // 2: back to start
                Instruction::LoadNull,                       // 3
            ],
            1,
        );
        program.objects[0] = Value::Bool(false);
        assert!(verifier.verify(&program).is_ok());
    }
}
