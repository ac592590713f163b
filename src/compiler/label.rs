//! Build-time labels.
//!
//! A `BranchLabel` collects the branches that target it until it is marked,
//! then patches each with `target - branch`. Branches and the label must
//! sit in the same block of code: the same try body, filter, handler, or
//! finally block, or all outside any region. `freeze` turns it into the
//! `RuntimeLabel` a `Program` carries; nothing converts back.

use crate::vm::{BuildError, Instruction, RuntimeLabel};

/// Handle to a label of one `InstructionList`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub(crate) usize);

impl LabelId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
pub(crate) struct BranchLabel {
    label: usize,
    target: Option<usize>,
    /// Fixed by the first branch or by marking, whichever comes first.
    stack_depth: Option<usize>,
    continuation_depth: usize,
    /// Block of the first branch or of the mark.
    block: Option<usize>,
    fixups: Vec<usize>,
    referenced: bool,
}

impl BranchLabel {
    pub(crate) fn new(label: usize) -> Self {
        Self {
            label,
            target: None,
            stack_depth: None,
            continuation_depth: 0,
            block: None,
            fixups: Vec::new(),
            referenced: false,
        }
    }

    pub(crate) fn is_marked(&self) -> bool {
        self.target.is_some()
    }

    /// Note a non-branch reference (goto, finally continuation).
    pub(crate) fn reference(&mut self) {
        self.referenced = true;
    }

    fn enter_block(&mut self, block: usize) -> Result<(), BuildError> {
        match self.block {
            Some(expected) if expected != block => Err(BuildError::BranchAcrossRegion(self.label)),
            Some(_) => Ok(()),
            None => {
                self.block = Some(block);
                Ok(())
            }
        }
    }

    /// Record the branch at `branch`, taken with `depth` values on the stack
    /// from inside `block`.
    pub(crate) fn add_branch(
        &mut self,
        instructions: &mut [Instruction],
        branch: usize,
        depth: usize,
        block: usize,
    ) -> Result<(), BuildError> {
        self.referenced = true;
        self.enter_block(block)?;
        match self.stack_depth {
            Some(expected) if expected != depth => {
                return Err(BuildError::StackDepthMismatch {
                    label: self.label,
                    expected,
                    actual: depth,
                });
            }
            Some(_) => {}
            None => self.stack_depth = Some(depth),
        }
        match self.target {
            Some(target) => patch(instructions, branch, target),
            None => self.fixups.push(branch),
        }
        Ok(())
    }

    /// Mark the label at `index` and patch every pending branch. Returns the
    /// stack depth in effect at the label: the branches' depth if control
    /// cannot fall through into it, otherwise `depth`, which must agree.
    pub(crate) fn mark(
        &mut self,
        instructions: &mut [Instruction],
        index: usize,
        depth: usize,
        continuation_depth: usize,
        block: usize,
        after_unconditional: bool,
    ) -> Result<usize, BuildError> {
        if self.is_marked() {
            return Err(BuildError::LabelMarkedTwice(self.label));
        }
        self.enter_block(block)?;
        let depth = match self.stack_depth {
            Some(expected) if after_unconditional => expected,
            Some(expected) if expected != depth => {
                return Err(BuildError::StackDepthMismatch {
                    label: self.label,
                    expected,
                    actual: depth,
                });
            }
            _ => depth,
        };
        self.target = Some(index);
        self.stack_depth = Some(depth);
        self.continuation_depth = continuation_depth;
        for branch in self.fixups.drain(..) {
            patch(instructions, branch, index);
        }
        Ok(depth)
    }

    /// Labels nothing referenced may stay unmarked; they resolve to `end`.
    pub(crate) fn freeze(self, end: usize) -> Result<RuntimeLabel, BuildError> {
        match self.target {
            Some(index) => Ok(RuntimeLabel {
                index,
                stack_depth: self.stack_depth.unwrap_or(0),
                continuation_depth: self.continuation_depth,
            }),
            None if self.referenced => Err(BuildError::UnmarkedLabel(self.label)),
            None => Ok(RuntimeLabel {
                index: end,
                stack_depth: 0,
                continuation_depth: 0,
            }),
        }
    }
}

fn patch(instructions: &mut [Instruction], branch: usize, target: usize) {
    if let Some(instruction) = instructions.get_mut(branch) {
        instruction.resolve_jump(target as isize - branch as isize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Jump;

    fn branches(n: usize) -> Vec<Instruction> {
        (0..n).map(|_| Instruction::Branch(Jump::Pending(0))).collect()
    }

    #[test]
    fn test_forward_branch_offset() {
        let mut code = branches(6);
        let mut label = BranchLabel::new(0);
        label.add_branch(&mut code, 1, 0, 0).unwrap();
        label.add_branch(&mut code, 3, 0, 0).unwrap();
        label.mark(&mut code, 5, 0, 0, 0, true).unwrap();
        assert!(matches!(code[1], Instruction::Branch(Jump::Offset(4))));
        assert!(matches!(code[3], Instruction::Branch(Jump::Offset(2))));
        assert!(matches!(code[0], Instruction::Branch(Jump::Pending(0))));
    }

    #[test]
    fn test_backward_branch_is_patched_immediately() {
        let mut code = branches(4);
        let mut label = BranchLabel::new(0);
        label.mark(&mut code, 1, 0, 0, 0, false).unwrap();
        label.add_branch(&mut code, 3, 0, 0).unwrap();
        assert!(matches!(code[3], Instruction::Branch(Jump::Offset(-2))));
    }

    #[test]
    fn test_mark_twice() {
        let mut code = branches(1);
        let mut label = BranchLabel::new(7);
        label.mark(&mut code, 0, 0, 0, 0, false).unwrap();
        assert_eq!(
            label.mark(&mut code, 1, 0, 0, 0, false),
            Err(BuildError::LabelMarkedTwice(7))
        );
    }

    #[test]
    fn test_depth_mismatch() {
        let mut code = branches(3);
        let mut label = BranchLabel::new(2);
        label.add_branch(&mut code, 0, 1, 0).unwrap();
        assert!(matches!(
            label.add_branch(&mut code, 1, 2, 0),
            Err(BuildError::StackDepthMismatch { label: 2, expected: 1, actual: 2 })
        ));
        assert!(label.mark(&mut code, 2, 0, 0, 0, false).is_err());
        assert_eq!(label.mark(&mut code, 2, 0, 0, 0, true), Ok(1));
    }

    #[test]
    fn test_branch_must_stay_in_block() {
        let mut code = branches(4);
        let mut label = BranchLabel::new(3);
        label.add_branch(&mut code, 0, 0, 1).unwrap();
        assert_eq!(
            label.add_branch(&mut code, 1, 0, 2),
            Err(BuildError::BranchAcrossRegion(3))
        );
        assert_eq!(
            label.mark(&mut code, 3, 0, 0, 0, true),
            Err(BuildError::BranchAcrossRegion(3))
        );

        let mut backward = BranchLabel::new(4);
        backward.mark(&mut code, 0, 0, 1, 1, false).unwrap();
        assert_eq!(
            backward.add_branch(&mut code, 2, 0, 0),
            Err(BuildError::BranchAcrossRegion(4))
        );
    }

    #[test]
    fn test_freeze() {
        let mut code = branches(1);
        let mut label = BranchLabel::new(0);
        label.add_branch(&mut code, 0, 0, 0).unwrap();
        assert_eq!(label.freeze(1), Err(BuildError::UnmarkedLabel(0)));

        let unused = BranchLabel::new(1);
        assert_eq!(unused.freeze(9).unwrap().index, 9);
    }
}
