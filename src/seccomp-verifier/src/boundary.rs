// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Boundary-covering inputs.
//!
//! A filter only looks at an argument through comparisons against constants, so its decision is a
//! step function of every argument word. Sampling each argument at, below and above every
//! constant it is compared against covers every step. Constants come from two places: the policy,
//! which knows what it compares, and the program itself, whose reachable comparisons are found by
//! walking every path with the arguments left symbolic.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::input::{join_words, Field, SyscallArgs, ARG_COUNT};
use crate::interpreter::{AluOp, Instruction, Program};

/// Constants a program compares each `struct seccomp_data` word against.
pub(crate) type FieldConstants = BTreeMap<Field, BTreeSet<u32>>;

/// Abstract accumulator: either a value known on the current path, or something computed from a
/// word of the input that the scan does not fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Acc {
    Known(u32),
    Derived(Field),
}

/// Collects the comparison constants on every path of `program` reachable for the given
/// architecture and syscall number.
///
/// With `nr` set to `None` the syscall number is symbolic as well, and the constants recorded for
/// [`Field::Nr`] are the syscall numbers the program tells apart.
///
/// Constants compared after arithmetic other than a mask are recorded as is. They still mark the
/// neighbourhood of a decision, only less precisely.
pub(crate) fn scan_constants(program: &Program, arch: u32, nr: Option<u32>) -> FieldConstants {
    let instructions = program.instructions();
    let mut constants = FieldConstants::new();
    let mut visited = HashSet::new();
    let mut pending = vec![(0usize, Acc::Known(0))];

    while let Some((pc, acc)) = pending.pop() {
        if !visited.insert((pc, acc)) {
            continue;
        }
        let Some(insn) = instructions.get(pc) else {
            continue;
        };

        match *insn {
            Instruction::Load(field) => {
                let acc = match (field, nr) {
                    (Field::Arch, _) => Acc::Known(arch),
                    (Field::Nr, Some(nr)) => Acc::Known(nr),
                    _ => Acc::Derived(field),
                };
                pending.push((pc + 1, acc));
            }
            Instruction::Alu { op, k } => {
                let acc = match acc {
                    Acc::Known(value) => Acc::Known(op.apply(value, k)),
                    Acc::Derived(field) => {
                        if op == AluOp::And {
                            constants.entry(field).or_default().insert(k);
                        }
                        Acc::Derived(field)
                    }
                };
                pending.push((pc + 1, acc));
            }
            Instruction::Jump(target) => pending.push((target, acc)),
            Instruction::Branch { cond, k, jt, jf } => match acc {
                Acc::Known(value) => {
                    let target = if cond.holds(value, k) { jt } else { jf };
                    pending.push((target, acc));
                }
                Acc::Derived(field) => {
                    constants.entry(field).or_default().insert(k);
                    pending.push((jf, acc));
                    pending.push((jt, acc));
                }
            },
            Instruction::Return(_) => {}
        }
    }

    constants
}

/// Appends `values` to `list`, skipping the ones already present.
fn push_unique<T: Copy + PartialEq>(list: &mut Vec<T>, values: impl IntoIterator<Item = T>) {
    for value in values {
        if !list.contains(&value) {
            list.push(value);
        }
    }
}

/// Candidates for one 32-bit half: the constants, their neighbours, then both extremes.
fn half_candidates(constants: Option<&BTreeSet<u32>>) -> Vec<u32> {
    let mut list = Vec::new();
    let Some(constants) = constants else {
        return vec![0, u32::MAX];
    };

    push_unique(&mut list, constants.iter().copied());
    for c in constants {
        push_unique(&mut list, [c.wrapping_sub(1), c.wrapping_add(1)]);
    }
    push_unique(&mut list, [0, u32::MAX]);
    list
}

/// Ordered candidate values of one argument.
///
/// The order is: the policy constants ascending, then the values built from the program's
/// constants (most significant half slowest), then the neighbours of the policy constants, then
/// `0` and `u64::MAX`. Duplicates keep their first position.
pub(crate) fn arg_candidates(
    policy_constants: &[u64],
    low: Option<&BTreeSet<u32>>,
    high: Option<&BTreeSet<u32>>,
) -> Vec<u64> {
    let policy_constants: BTreeSet<u64> = policy_constants.iter().copied().collect();
    let mut list = Vec::new();

    push_unique(&mut list, policy_constants.iter().copied());

    if low.is_some() || high.is_some() {
        let lows = half_candidates(low);
        for high in half_candidates(high) {
            push_unique(&mut list, lows.iter().map(|low| join_words(high, *low)));
        }
    }

    for v in &policy_constants {
        push_unique(&mut list, [v.wrapping_sub(1), v.wrapping_add(1)]);
    }
    push_unique(&mut list, [0, u64::MAX]);
    list
}

/// Candidate values of every argument of a syscall, given the policy constants per argument and
/// the constants scanned from the program.
pub(crate) fn syscall_candidates(
    policy_constants: impl Fn(usize) -> Vec<u64>,
    scanned: &FieldConstants,
) -> [Vec<u64>; ARG_COUNT] {
    std::array::from_fn(|index| {
        arg_candidates(
            &policy_constants(index),
            scanned.get(&Field::ArgLo(index)),
            scanned.get(&Field::ArgHi(index)),
        )
    })
}

/// Lexicographic enumeration of argument tuples, the first argument varying slowest, capped to a
/// number of cases.
#[derive(Debug, Clone)]
pub(crate) struct Cases {
    candidates: [Vec<u64>; ARG_COUNT],
    indices: Option<[usize; ARG_COUNT]>,
    remaining: usize,
}

impl Cases {
    pub(crate) fn new(candidates: [Vec<u64>; ARG_COUNT], limit: usize) -> Self {
        let indices = candidates
            .iter()
            .all(|list| !list.is_empty())
            .then_some([0; ARG_COUNT]);
        Self {
            candidates,
            indices,
            remaining: limit,
        }
    }

    /// Size of the full cross product, saturating.
    pub(crate) fn total(&self) -> usize {
        self.candidates
            .iter()
            .fold(1usize, |total, list| total.saturating_mul(list.len()))
    }
}

impl Iterator for Cases {
    type Item = SyscallArgs;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let mut indices = self.indices?;
        let args = std::array::from_fn(|arg| self.candidates[arg][indices[arg]]);
        self.remaining -= 1;

        // Odometer step, the last argument turns fastest.
        self.indices = None;
        for arg in (0..ARG_COUNT).rev() {
            indices[arg] += 1;
            if indices[arg] < self.candidates[arg].len() {
                self.indices = Some(indices);
                break;
            }
            indices[arg] = 0;
        }

        Some(args)
    }
}
