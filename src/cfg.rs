use std::collections::BTreeSet;

use crate::ir::{Instruction, Operands};
use crate::opcodes;

/// Offsets that start a basic block: the method entry, every branch or
/// switch target, and the instruction after a branch or exit.
///
/// Exception handler entries are not included; the driver treats them
/// separately because their stack holds the caught exception.
pub fn block_leaders(instructions: &[Instruction]) -> BTreeSet<u32> {
    let mut leaders = BTreeSet::new();
    leaders.insert(0);
    for (index, inst) in instructions.iter().enumerate() {
        let ends_block = match &inst.operands {
            Operands::Branch(target) => {
                leaders.insert(*target);
                true
            }
            Operands::Switch(targets) => {
                leaders.extend(targets.iter().copied());
                true
            }
            _ => is_exit_opcode(inst.opcode),
        };
        if ends_block {
            if let Some(next) = instructions.get(index + 1) {
                leaders.insert(next.offset);
            }
        }
    }
    leaders
}

fn is_exit_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::IRETURN
            | opcodes::LRETURN
            | opcodes::FRETURN
            | opcodes::DRETURN
            | opcodes::ARETURN
            | opcodes::RETURN
            | opcodes::ATHROW
            | opcodes::RET
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::decode_instructions;

    #[test]
    fn leaders_include_targets_and_fall_through() {
        let code = [
            opcodes::ILOAD_0,
            opcodes::IFEQ,
            0x00,
            0x05,
            opcodes::ICONST_1,
            opcodes::IRETURN,
            opcodes::ICONST_0,
            opcodes::IRETURN,
        ];
        let instructions = decode_instructions(&code).expect("decode");

        let leaders = block_leaders(&instructions);

        assert_eq!(vec![0, 4, 6], leaders.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn straight_line_code_is_one_block() {
        let code = [opcodes::ICONST_1, opcodes::ICONST_2, opcodes::IADD, opcodes::IRETURN];
        let instructions = decode_instructions(&code).expect("decode");

        assert_eq!(vec![0], block_leaders(&instructions).into_iter().collect::<Vec<_>>());
    }
}
