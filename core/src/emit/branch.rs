//! Branch sizing.
//!
//! Branch targets are labels, so the width of each branch displacement is
//! only known once every offset is known, and every widened branch shifts
//! the offsets after it. Layout starts with every branch short and widens
//! branches until nothing changes. Widening is monotonic, so the loop ends
//! after at most one pass per branch.

use super::instruction::{Instruction, Label};

/// A branch may be short when its target is at most this many bytes ahead of
/// the start of the branch instruction.
pub const LONG_BRANCH_THRESHOLD: isize = 127;

/// Furthest backwards a short branch can reach, measured from its start.
const SHORT_BRANCH_BACKWARD_LIMIT: isize = i8::MIN as isize + 2;

/// Whether a branch starting at `branch_offset` needs the long form to reach
/// `target_offset`.
pub fn is_long_branch(branch_offset: usize, target_offset: usize) -> bool {
    let distance = target_offset as isize - branch_offset as isize;
    distance > LONG_BRANCH_THRESHOLD || distance < SHORT_BRANCH_BACKWARD_LIMIT
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchForm {
    Short,
    Long,
}

/// A branch instruction and the label it targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchRecord {
    /// Index of the branch in the instruction stream.
    pub source: usize,
    pub target: Label,
    pub form: BranchForm,
}

/// Result of branch resolution: final byte offsets and branch forms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchLayout {
    /// Byte offset of every instruction, plus the end of the code.
    pub offsets: Vec<usize>,
    /// Every branch, in instruction order.
    pub branches: Vec<BranchRecord>,
    /// Number of measuring passes until the layout stopped changing.
    pub passes: usize,
}

impl BranchLayout {
    pub fn form_of(&self, source: usize) -> Option<BranchForm> {
        self.branches
            .iter()
            .find(|branch| branch.source == source)
            .map(|branch| branch.form)
    }

    pub fn code_len(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }
}

fn measure(instructions: &[Instruction], long: &[bool]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0;
    for (instruction, &is_long) in instructions.iter().zip(long) {
        offsets.push(offset);
        offset += instruction.encoded_len(is_long);
    }
    offsets.push(offset);
    offsets
}

/// Resolve branch forms to a fixed point.
///
/// `label_positions[label]` is the instruction index each label marks.
/// Branches already `Long` in `seed` stay long.
pub(crate) fn resolve(
    instructions: &[Instruction],
    label_positions: &[usize],
    seed: &[BranchRecord],
) -> BranchLayout {
    let mut long = vec![false; instructions.len()];
    for record in seed {
        if record.form == BranchForm::Long && record.source < long.len() {
            long[record.source] = true;
        }
    }

    let mut passes = 0;
    loop {
        passes += 1;
        let offsets = measure(instructions, &long);
        let mut widened = 0;
        for (index, instruction) in instructions.iter().enumerate() {
            let Some(label) = instruction.target() else {
                continue;
            };
            if long[index] {
                continue;
            }
            let target = offsets[label_positions[label.index()]];
            if is_long_branch(offsets[index], target) {
                long[index] = true;
                widened += 1;
            }
        }
        tracing::debug!(pass = passes, widened, "Branch layout pass");

        if widened == 0 {
            let branches = instructions
                .iter()
                .enumerate()
                .filter_map(|(source, instruction)| {
                    instruction.target().map(|target| BranchRecord {
                        source,
                        target,
                        form: if long[source] {
                            BranchForm::Long
                        } else {
                            BranchForm::Short
                        },
                    })
                })
                .collect();
            return BranchLayout {
                offsets,
                branches,
                passes,
            };
        }
    }
}
