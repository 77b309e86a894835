// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Translation of a [`SeccompFilter`] into the BPF program the kernel runs.
//!
//! Layout of a compiled filter:
//!
//! ```text
//! architecture check
//! load syscall number
//! for every syscall:    jeq nr            (falls into the rule chain, or skips it)
//!     for every rule:   ja 1              (enter the rule)
//!                       ja <rule end + 1> (hop to the skip jump of the next rule)
//!                       conditions        (a failed condition jumps to the next rule)
//!                       ret <action>
//!                       ret <default>     (all rules failed)
//! ret <default>                           (no syscall matched)
//! ```

use crate::arch::TargetArch;
use crate::common::{
    sock_filter, BpfProgram, BPF_ABS, BPF_ALU, BPF_AND, BPF_JA, BPF_JEQ, BPF_JGE, BPF_JGT,
    BPF_JMP, BPF_JUMP, BPF_K, BPF_LD, BPF_MAX_LEN, BPF_RET, BPF_STMT, BPF_W,
    SECCOMP_RET_KILL_PROCESS,
};
use crate::filter::{
    FilterError, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter, SeccompRule,
};
use crate::input::{high_word, low_word, Field};
use crate::policy::Policy;

// The maximum number of BPF statements that a condition will be translated into.
const CONDITION_MAX_LEN: u8 = 6;

/// Compiles a filter into a BPF program.
pub fn compile(filter: &SeccompFilter) -> Result<BpfProgram, FilterError> {
    let default_action = u32::from(filter.default_action());
    let mut program = arch_check(filter.target_arch());

    // Without rules the filter always returns the default action.
    if filter.rules().is_empty() {
        program.push(BPF_STMT(BPF_RET + BPF_K, default_action));
        return Ok(program);
    }

    program.push(load(Field::Nr));
    for (syscall_number, rules) in filter.rules() {
        let number = u32::try_from(*syscall_number)
            .map_err(|_| FilterError::InvalidSyscallNumber(*syscall_number))?;

        program.push(BPF_JUMP(BPF_JMP + BPF_JEQ + BPF_K, number, 0, 1));
        for rule in rules {
            program.extend(rule_bpf(rule));
        }
        program.push(BPF_STMT(BPF_RET + BPF_K, default_action));

        if program.len() > BPF_MAX_LEN {
            return Err(FilterError::FilterTooLarge);
        }
    }
    program.push(BPF_STMT(BPF_RET + BPF_K, default_action));

    if program.len() > BPF_MAX_LEN {
        return Err(FilterError::FilterTooLarge);
    }

    Ok(program)
}

/// Kills the process if the syscall was made through a foreign calling convention.
fn arch_check(target_arch: TargetArch) -> BpfProgram {
    vec![
        load(Field::Arch),
        BPF_JUMP(BPF_JMP + BPF_JEQ + BPF_K, target_arch.audit_value(), 1, 0),
        BPF_STMT(BPF_RET + BPF_K, SECCOMP_RET_KILL_PROCESS),
    ]
}

fn load(field: Field) -> sock_filter {
    BPF_STMT(BPF_LD + BPF_W + BPF_ABS, field.offset())
}

fn jump(op: u16, k: u32, jt: u8, jf: u8) -> sock_filter {
    BPF_JUMP(BPF_JMP + op + BPF_K, k, jt, jf)
}

/// Translates a rule.
///
/// The rule is assembled back to front so that every condition knows how far the start of the
/// next rule is. `offset` is the number of instructions between the end of the condition being
/// emitted and the landing spot of a failed condition.
fn rule_bpf(rule: &SeccompRule) -> BpfProgram {
    let mut blocks: Vec<Vec<sock_filter>> =
        vec![vec![BPF_STMT(BPF_RET + BPF_K, u32::from(rule.action))]];
    let mut offset: u8 = 1;

    for condition in rule.conditions.iter().rev() {
        // Conditional jumps reach at most 255 instructions. Before that limit is hit, three
        // helper jumps relay: continue into the rest of the rule, jump to the next rule, and
        // hop over the next rule for the skip jump of this rule.
        if offset.checked_add(CONDITION_MAX_LEN + 1).is_none() {
            blocks.push(vec![
                BPF_STMT(BPF_JMP + BPF_JA, 2),
                BPF_STMT(BPF_JMP + BPF_JA, u32::from(offset) + 1),
                BPF_STMT(BPF_JMP + BPF_JA, u32::from(offset) + 1),
            ]);
            offset = 1;
        }

        let block = condition_bpf(condition, offset);
        // A condition is at most `CONDITION_MAX_LEN` instructions long.
        #[allow(clippy::cast_possible_truncation)]
        let block_len = block.len() as u8;
        offset += block_len;
        blocks.push(block);
    }

    blocks.push(vec![
        BPF_STMT(BPF_JMP + BPF_JA, 1),
        BPF_STMT(BPF_JMP + BPF_JA, u32::from(offset) + 1),
    ]);

    blocks.into_iter().rev().flatten().collect()
}

/// Translates a condition. A failed condition jumps `offset` instructions past its last one.
///
/// The argument is compared one 32-bit half at a time, most significant half first, since the
/// accumulator holds 4 bytes whereas an argument holds 8. Dword conditions only compare the least
/// significant half.
fn condition_bpf(condition: &SeccompCondition, offset: u8) -> Vec<sock_filter> {
    let index = usize::from(condition.arg_number);
    let (hi_field, lo_field) = (Field::ArgHi(index), Field::ArgLo(index));
    let (hi, lo) = (high_word(condition.value), low_word(condition.value));
    let qword = condition.arg_len == SeccompCmpArgLen::Qword;

    let mut bpf = Vec::with_capacity(usize::from(CONDITION_MAX_LEN));
    match condition.operator {
        SeccompCmpOp::Eq => {
            if qword {
                bpf.extend([load(hi_field), jump(BPF_JEQ, hi, 0, offset + 2)]);
            }
            bpf.extend([load(lo_field), jump(BPF_JEQ, lo, 0, offset)]);
        }
        SeccompCmpOp::Ne => {
            if qword {
                bpf.extend([load(hi_field), jump(BPF_JEQ, hi, 0, 2)]);
            }
            bpf.extend([load(lo_field), jump(BPF_JEQ, lo, offset, 0)]);
        }
        SeccompCmpOp::Ge | SeccompCmpOp::Gt => {
            if qword {
                bpf.extend([
                    load(hi_field),
                    jump(BPF_JGT, hi, 3, 0),
                    jump(BPF_JEQ, hi, 0, offset + 2),
                ]);
            }
            let op = if condition.operator == SeccompCmpOp::Ge {
                BPF_JGE
            } else {
                BPF_JGT
            };
            bpf.extend([load(lo_field), jump(op, lo, 0, offset)]);
        }
        SeccompCmpOp::Le | SeccompCmpOp::Lt => {
            if qword {
                bpf.extend([
                    load(hi_field),
                    jump(BPF_JGT, hi, offset + 3, 0),
                    jump(BPF_JEQ, hi, 0, 2),
                ]);
            }
            let op = if condition.operator == SeccompCmpOp::Le {
                BPF_JGT
            } else {
                BPF_JGE
            };
            bpf.extend([load(lo_field), jump(op, lo, offset, 0)]);
        }
        SeccompCmpOp::MaskedEq(mask) => {
            let masked = condition.value & mask;
            if qword {
                bpf.extend([
                    load(hi_field),
                    BPF_STMT(BPF_ALU + BPF_AND + BPF_K, high_word(mask)),
                    jump(BPF_JEQ, high_word(masked), 0, offset + 3),
                ]);
            }
            bpf.extend([
                load(lo_field),
                BPF_STMT(BPF_ALU + BPF_AND + BPF_K, low_word(mask)),
                jump(BPF_JEQ, low_word(masked), 0, offset),
            ]);
        }
    }

    bpf
}
