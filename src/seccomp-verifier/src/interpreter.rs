// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Interpreter for the subset of classic BPF that seccomp filters are compiled to.
//!
//! Only the instructions a seccomp filter compiler emits are modelled: absolute word loads from
//! `struct seccomp_data`, arithmetic with a constant operand, forward jumps and constant returns.
//! Anything else (index register, scratch memory, packet length loads, `BPF_RET|BPF_A`, ...) is
//! rejected when the program is loaded rather than approximated.

use crate::common::{
    sock_filter, BpfProgramRef, BPF_ABS, BPF_ADD, BPF_ALU, BPF_AND, BPF_DIV, BPF_JA, BPF_JEQ,
    BPF_JGE, BPF_JGT, BPF_JMP, BPF_JSET, BPF_K, BPF_LD, BPF_LSH, BPF_MAX_LEN, BPF_MOD, BPF_MUL,
    BPF_NEG, BPF_OR, BPF_RET, BPF_RSH, BPF_SUB, BPF_W, BPF_XOR,
};
use crate::disposition::Disposition;
use crate::input::{Field, SeccompData};

/// Default bound on the number of instructions a single run may execute.
///
/// Classic BPF only jumps forward, so a well-formed program never executes more instructions than
/// it contains.
pub const DEFAULT_INSTRUCTION_LIMIT: usize = BPF_MAX_LEN;

// Masks used to split an opcode into its class and operation.
const BPF_CLASS_MASK: u16 = 0x07;
const BPF_OP_MASK: u16 = 0xf0;

/// Errors raised while loading or running a BPF program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum InterpreterError {
    /// The BPF program is empty.
    EmptyProgram,
    /// The BPF program has {0} instructions, more than the maximum of 4096.
    ProgramTooLong(usize),
    /// Unknown or unsupported BPF opcode {code:#06x} at instruction {pc}.
    UnsupportedOpcode {
        /// The offending operation code.
        code: u16,
        /// Index of the instruction.
        pc: usize,
    },
    /// Invalid seccomp_data offset {offset} loaded at instruction {pc}.
    InvalidLoadOffset {
        /// The offset that was loaded.
        offset: u32,
        /// Index of the instruction.
        pc: usize,
    },
    /// Jump at instruction {pc} targets instruction {target}, outside of the {len} instructions long program.
    JumpOutOfRange {
        /// Index of the jump instruction.
        pc: usize,
        /// Index the jump would land on.
        target: usize,
        /// Length of the program.
        len: usize,
    },
    /// Division by zero at instruction {0}.
    DivisionByZero(usize),
    /// Invalid shift by {shift} bits at instruction {pc}.
    InvalidShift {
        /// The shift amount.
        shift: u32,
        /// Index of the instruction.
        pc: usize,
    },
    /// The last instruction of the BPF program is not a return.
    MissingReturn,
    /// Instruction limit of {0} exceeded.
    InstructionLimitExceeded(usize),
}

/// Arithmetic operation applied to the accumulator with a constant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    /// `A += k`
    Add,
    /// `A -= k`
    Sub,
    /// `A *= k`
    Mul,
    /// `A /= k`
    Div,
    /// `A %= k`
    Mod,
    /// `A |= k`
    Or,
    /// `A &= k`
    And,
    /// `A ^= k`
    Xor,
    /// `A <<= k`
    Lsh,
    /// `A >>= k`
    Rsh,
    /// `A = -A`
    Neg,
}

impl AluOp {
    pub(crate) fn apply(self, acc: u32, k: u32) -> u32 {
        // Division by zero and oversized shifts are rejected when the program is loaded.
        match self {
            AluOp::Add => acc.wrapping_add(k),
            AluOp::Sub => acc.wrapping_sub(k),
            AluOp::Mul => acc.wrapping_mul(k),
            AluOp::Div => acc.checked_div(k).unwrap_or(0),
            AluOp::Mod => acc.checked_rem(k).unwrap_or(0),
            AluOp::Or => acc | k,
            AluOp::And => acc & k,
            AluOp::Xor => acc ^ k,
            AluOp::Lsh => acc.checked_shl(k).unwrap_or(0),
            AluOp::Rsh => acc.checked_shr(k).unwrap_or(0),
            AluOp::Neg => acc.wrapping_neg(),
        }
    }
}

/// Comparison of a conditional jump, always against the constant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpCond {
    /// `A == k`
    Eq,
    /// `A > k`
    Gt,
    /// `A >= k`
    Ge,
    /// `A & k != 0`
    Set,
}

impl JumpCond {
    /// Evaluates the comparison, unsigned.
    pub fn holds(self, acc: u32, k: u32) -> bool {
        match self {
            JumpCond::Eq => acc == k,
            JumpCond::Gt => acc > k,
            JumpCond::Ge => acc >= k,
            JumpCond::Set => acc & k != 0,
        }
    }
}

/// A decoded BPF instruction. Jump targets are absolute and already validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// `BPF_LD|BPF_W|BPF_ABS`: loads a word of `struct seccomp_data` into the accumulator.
    Load(Field),
    /// `BPF_ALU|op|BPF_K`.
    Alu {
        /// The operation.
        op: AluOp,
        /// The constant operand.
        k: u32,
    },
    /// `BPF_JMP|BPF_JA`.
    Jump(usize),
    /// `BPF_JMP|cond|BPF_K`.
    Branch {
        /// The comparison.
        cond: JumpCond,
        /// The constant the accumulator is compared against.
        k: u32,
        /// Target if the comparison holds.
        jt: usize,
        /// Target if the comparison does not hold.
        jf: usize,
    },
    /// `BPF_RET|BPF_K`.
    Return(u32),
}

impl Instruction {
    /// Decodes the raw instruction found at index `pc` of a program of length `len`.
    pub fn decode(insn: &sock_filter, pc: usize, len: usize) -> Result<Self, InterpreterError> {
        let code = insn.code;
        let unsupported = InterpreterError::UnsupportedOpcode { code, pc };
        let op = code & BPF_OP_MASK;

        match code & BPF_CLASS_MASK {
            BPF_LD if code == BPF_LD + BPF_W + BPF_ABS => Field::from_offset(insn.k)
                .map(Instruction::Load)
                .ok_or(InterpreterError::InvalidLoadOffset { offset: insn.k, pc }),
            // Only the constant source form is supported, so `code` must not carry other bits.
            BPF_ALU if code == BPF_ALU + op + BPF_K => {
                let op = match op {
                    BPF_ADD => AluOp::Add,
                    BPF_SUB => AluOp::Sub,
                    BPF_MUL => AluOp::Mul,
                    BPF_DIV => AluOp::Div,
                    BPF_MOD => AluOp::Mod,
                    BPF_OR => AluOp::Or,
                    BPF_AND => AluOp::And,
                    BPF_XOR => AluOp::Xor,
                    BPF_LSH => AluOp::Lsh,
                    BPF_RSH => AluOp::Rsh,
                    BPF_NEG => AluOp::Neg,
                    _ => return Err(unsupported),
                };
                match op {
                    AluOp::Div | AluOp::Mod if insn.k == 0 => {
                        Err(InterpreterError::DivisionByZero(pc))
                    }
                    AluOp::Lsh | AluOp::Rsh if insn.k >= 32 => {
                        Err(InterpreterError::InvalidShift { shift: insn.k, pc })
                    }
                    _ => Ok(Instruction::Alu { op, k: insn.k }),
                }
            }
            BPF_JMP if code == BPF_JMP + op + BPF_K => {
                let cond = match op {
                    BPF_JA => {
                        let offset = usize::try_from(insn.k).unwrap_or(usize::MAX);
                        return jump_target(pc, offset, len).map(Instruction::Jump);
                    }
                    BPF_JEQ => JumpCond::Eq,
                    BPF_JGT => JumpCond::Gt,
                    BPF_JGE => JumpCond::Ge,
                    BPF_JSET => JumpCond::Set,
                    _ => return Err(unsupported),
                };
                Ok(Instruction::Branch {
                    cond,
                    k: insn.k,
                    jt: jump_target(pc, usize::from(insn.jt), len)?,
                    jf: jump_target(pc, usize::from(insn.jf), len)?,
                })
            }
            BPF_RET if code == BPF_RET + BPF_K => Ok(Instruction::Return(insn.k)),
            _ => Err(unsupported),
        }
    }
}

/// Resolves a relative jump taken from `pc`. Jumps are relative to the next instruction.
fn jump_target(pc: usize, offset: usize, len: usize) -> Result<usize, InterpreterError> {
    let target = pc.saturating_add(1).saturating_add(offset);
    if target >= len {
        return Err(InterpreterError::JumpOutOfRange { pc, target, len });
    }
    Ok(target)
}

/// A BPF program that passed the load-time checks and can be run against any input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    /// Decodes and validates a raw program.
    ///
    /// The checks mirror the ones the kernel performs when a classic BPF program is attached,
    /// so a program accepted here cannot fail structurally at run time.
    pub fn new(filter: BpfProgramRef) -> Result<Self, InterpreterError> {
        if filter.is_empty() {
            return Err(InterpreterError::EmptyProgram);
        }
        if filter.len() > BPF_MAX_LEN {
            return Err(InterpreterError::ProgramTooLong(filter.len()));
        }

        let len = filter.len();
        let instructions = filter
            .iter()
            .enumerate()
            .map(|(pc, insn)| Instruction::decode(insn, pc, len))
            .collect::<Result<Vec<_>, _>>()?;

        if !matches!(instructions.last(), Some(Instruction::Return(_))) {
            return Err(InterpreterError::MissingReturn);
        }

        Ok(Self { instructions })
    }

    /// The decoded instructions.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions in the program.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the program has no instructions. Never true for a loaded program.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Runs the program and returns the raw value of the `BPF_RET` instruction it reached.
    pub fn run(
        &self,
        data: &SeccompData,
        instruction_limit: usize,
    ) -> Result<u32, InterpreterError> {
        let mut acc: u32 = 0;
        let mut pc = 0;

        for _ in 0..instruction_limit {
            let insn = self.instructions[pc];
            log::trace!("pc {pc}: {insn:?}, A = {acc:#x}");

            // `Program::new` guarantees every target is in range and that the last instruction
            // returns, so falling through always lands on a valid index.
            pc = match insn {
                Instruction::Load(field) => {
                    acc = data.word(field);
                    pc + 1
                }
                Instruction::Alu { op, k } => {
                    acc = op.apply(acc, k);
                    pc + 1
                }
                Instruction::Jump(target) => target,
                Instruction::Branch { cond, k, jt, jf } => {
                    if cond.holds(acc, k) {
                        jt
                    } else {
                        jf
                    }
                }
                Instruction::Return(value) => return Ok(value),
            };
        }

        Err(InterpreterError::InstructionLimitExceeded(instruction_limit))
    }

    /// Runs the program and decodes its result.
    pub fn evaluate(
        &self,
        data: &SeccompData,
        instruction_limit: usize,
    ) -> Result<Disposition, InterpreterError> {
        self.run(data, instruction_limit).map(Disposition::from)
    }
}

/// Evaluates a raw BPF program for one input.
///
/// This is a standalone entry point for inspecting a single input; callers running many inputs
/// against the same program should load it once with [`Program::new`].
pub fn run_program(
    program: BpfProgramRef,
    data: &SeccompData,
) -> Result<Disposition, InterpreterError> {
    Program::new(program)?.evaluate(data, DEFAULT_INSTRUCTION_LIMIT)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::common::{BPF_JUMP, BPF_STMT};

    const ALLOW: u32 = 0x7fff_0000;
    const EPERM: u32 = 0x0005_0001;

    fn data_with_args(nr: i32, args: [u64; 6]) -> SeccompData {
        SeccompData::new(nr, 0xc000_003e, args)
    }

    // Allows syscall 1 only if its first argument is 1, allows syscall 0, denies the rest.
    fn write_filter() -> Vec<sock_filter> {
        vec![
            BPF_STMT(BPF_LD + BPF_W + BPF_ABS, 0),
            BPF_JUMP(BPF_JMP + BPF_JEQ + BPF_K, 0, 4, 0),
            BPF_JUMP(BPF_JMP + BPF_JEQ + BPF_K, 1, 0, 2),
            BPF_STMT(BPF_LD + BPF_W + BPF_ABS, 16),
            BPF_JUMP(BPF_JMP + BPF_JEQ + BPF_K, 1, 1, 0),
            BPF_STMT(BPF_RET + BPF_K, EPERM),
            BPF_STMT(BPF_RET + BPF_K, ALLOW),
        ]
    }

    #[test]
    fn test_run_program() {
        let filter = write_filter();

        let read = data_with_args(0, [7, 0, 0, 0, 0, 0]);
        assert_eq!(run_program(&filter, &read), Ok(Disposition::Allow));

        let write_stdout = data_with_args(1, [1, 0, 0, 0, 0, 0]);
        assert_eq!(run_program(&filter, &write_stdout), Ok(Disposition::Allow));

        let write_other = data_with_args(1, [2, 0, 0, 0, 0, 0]);
        assert_eq!(run_program(&filter, &write_other), Ok(Disposition::Errno(1)));

        // Only the low half is compared.
        let write_high = data_with_args(1, [0x1_0000_0001, 0, 0, 0, 0, 0]);
        assert_eq!(run_program(&filter, &write_high), Ok(Disposition::Allow));

        let other = data_with_args(2, [1, 0, 0, 0, 0, 0]);
        assert_eq!(run_program(&filter, &other), Ok(Disposition::Errno(1)));
    }

    #[test]
    fn test_jump_conditions() {
        assert!(JumpCond::Eq.holds(5, 5));
        assert!(!JumpCond::Eq.holds(5, 6));
        assert!(JumpCond::Gt.holds(6, 5));
        assert!(!JumpCond::Gt.holds(5, 5));
        assert!(JumpCond::Ge.holds(5, 5));
        assert!(!JumpCond::Ge.holds(4, 5));
        // Comparisons are unsigned.
        assert!(JumpCond::Gt.holds(0x8000_0000, 1));
        assert!(JumpCond::Set.holds(0b0110, 0b0100));
        assert!(!JumpCond::Set.holds(0b0010, 0b0100));
    }

    #[test]
    fn test_alu() {
        assert_eq!(AluOp::Add.apply(u32::MAX, 2), 1);
        assert_eq!(AluOp::Sub.apply(0, 1), u32::MAX);
        assert_eq!(AluOp::Mul.apply(0x8000_0000, 2), 0);
        assert_eq!(AluOp::Div.apply(7, 2), 3);
        assert_eq!(AluOp::Mod.apply(7, 2), 1);
        assert_eq!(AluOp::Or.apply(0b01, 0b10), 0b11);
        assert_eq!(AluOp::And.apply(0b11, 0b10), 0b10);
        assert_eq!(AluOp::Xor.apply(0b11, 0b10), 0b01);
        assert_eq!(AluOp::Lsh.apply(1, 31), 0x8000_0000);
        assert_eq!(AluOp::Rsh.apply(0x8000_0000, 31), 1);
        assert_eq!(AluOp::Neg.apply(1, 0), u32::MAX);

        // Masks the high half of argument 2 and returns it.
        let filter = vec![
            BPF_STMT(BPF_LD + BPF_W + BPF_ABS, 36),
            BPF_STMT(BPF_ALU + BPF_AND + BPF_K, 0xff),
            BPF_JUMP(BPF_JMP + BPF_JEQ + BPF_K, 0x12, 0, 1),
            BPF_STMT(BPF_RET + BPF_K, ALLOW),
            BPF_STMT(BPF_RET + BPF_K, EPERM),
        ];
        let program = Program::new(&filter).unwrap();
        let data = data_with_args(0, [0, 0, 0xab12_0000_0000, 0, 0, 0]);
        assert_eq!(
            program.evaluate(&data, DEFAULT_INSTRUCTION_LIMIT),
            Ok(Disposition::Allow)
        );
        let data = data_with_args(0, [0, 0, 0x13_0000_0000, 0, 0, 0]);
        assert_eq!(
            program.evaluate(&data, DEFAULT_INSTRUCTION_LIMIT),
            Ok(Disposition::Errno(1))
        );
    }

    #[test]
    fn test_unconditional_jump() {
        let filter = vec![
            BPF_STMT(BPF_JMP + BPF_JA, 1),
            BPF_STMT(BPF_RET + BPF_K, EPERM),
            BPF_STMT(BPF_RET + BPF_K, ALLOW),
        ];
        assert_eq!(
            run_program(&filter, &SeccompData::default()),
            Ok(Disposition::Allow)
        );
    }

    #[test]
    fn test_malformed_programs() {
        assert_eq!(
            Program::new(&[]).unwrap_err(),
            InterpreterError::EmptyProgram
        );
        assert_eq!(
            Program::new(&vec![BPF_STMT(BPF_RET + BPF_K, ALLOW); BPF_MAX_LEN + 1]).unwrap_err(),
            InterpreterError::ProgramTooLong(BPF_MAX_LEN + 1)
        );

        // Index register, scratch memory and accumulator return are not modelled.
        for code in [0x01, 0x02, 0x03, 0x07, 0x16, 0x28, 0x00, 0x1d, 0x0c, 0xf4, 0xe5] {
            assert_eq!(
                Program::new(&[BPF_STMT(code, 0), BPF_STMT(BPF_RET + BPF_K, ALLOW)]).unwrap_err(),
                InterpreterError::UnsupportedOpcode { code, pc: 0 }
            );
        }

        // Misaligned load and load past the end of `struct seccomp_data`.
        for offset in [2, 64] {
            assert_eq!(
                Program::new(&[
                    BPF_STMT(BPF_LD + BPF_W + BPF_ABS, offset),
                    BPF_STMT(BPF_RET + BPF_K, ALLOW),
                ])
                .unwrap_err(),
                InterpreterError::InvalidLoadOffset { offset, pc: 0 }
            );
        }

        assert_eq!(
            Program::new(&[
                BPF_STMT(BPF_ALU + BPF_DIV + BPF_K, 0),
                BPF_STMT(BPF_RET + BPF_K, ALLOW),
            ])
            .unwrap_err(),
            InterpreterError::DivisionByZero(0)
        );
        assert_eq!(
            Program::new(&[
                BPF_STMT(BPF_ALU + BPF_LSH + BPF_K, 32),
                BPF_STMT(BPF_RET + BPF_K, ALLOW),
            ])
            .unwrap_err(),
            InterpreterError::InvalidShift { shift: 32, pc: 0 }
        );
        assert_eq!(
            Program::new(&[BPF_STMT(BPF_LD + BPF_W + BPF_ABS, 0)]).unwrap_err(),
            InterpreterError::MissingReturn
        );
    }

    #[test]
    fn test_jump_out_of_range() {
        let mut filter = write_filter();
        // The jump-true offset of the syscall number check now points past the end.
        filter[1].jt = 5;

        let expected = InterpreterError::JumpOutOfRange {
            pc: 1,
            target: 7,
            len: 7,
        };
        for nr in [0, 1, 2] {
            for arg in [0, 1, u64::MAX] {
                let data = data_with_args(nr, [arg, 0, 0, 0, 0, 0]);
                assert_eq!(run_program(&filter, &data), Err(expected.clone()));
            }
        }

        // Unconditional jumps are checked as well, even with a huge offset.
        let filter = vec![
            BPF_STMT(BPF_JMP + BPF_JA, u32::MAX),
            BPF_STMT(BPF_RET + BPF_K, ALLOW),
        ];
        assert!(matches!(
            run_program(&filter, &SeccompData::default()),
            Err(InterpreterError::JumpOutOfRange { pc: 0, .. })
        ));
    }

    #[test]
    fn test_instruction_limit() {
        let program = Program::new(&write_filter()).unwrap();
        let data = data_with_args(1, [1, 0, 0, 0, 0, 0]);

        // Syscall 1 executes 6 instructions before returning.
        assert_eq!(program.run(&data, 6), Ok(ALLOW));
        assert_eq!(
            program.run(&data, 5),
            Err(InterpreterError::InstructionLimitExceeded(5))
        );
        assert_eq!(
            program.run(&data, 0),
            Err(InterpreterError::InstructionLimitExceeded(0))
        );
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            InterpreterError::UnsupportedOpcode { code: 0x16, pc: 3 }.to_string(),
            "Unknown or unsupported BPF opcode 0x0016 at instruction 3."
        );
        assert_eq!(
            InterpreterError::InstructionLimitExceeded(10).to_string(),
            "Instruction limit of 10 exceeded."
        );
        assert_eq!(
            InterpreterError::JumpOutOfRange {
                pc: 1,
                target: 9,
                len: 7,
            }
            .to_string(),
            "Jump at instruction 1 targets instruction 9, outside of the 7 instructions long \
             program."
        );
    }

    proptest! {
        #[test]
        fn test_run_is_deterministic(nr in 0i32..4, args in any::<[u64; 6]>()) {
            let program = Program::new(&write_filter()).unwrap();
            let data = data_with_args(nr, args);
            let first = program.run(&data, DEFAULT_INSTRUCTION_LIMIT);
            prop_assert_eq!(first.clone(), program.run(&data, DEFAULT_INSTRUCTION_LIMIT));
            prop_assert_eq!(first.map(Disposition::from), run_program(&write_filter(), &data));
        }
    }
}
