// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Equivalence check of a compiled program against the policy it was compiled from.
//!
//! Cases are checked in a fixed order and the first divergence is reported:
//!
//! 1. every syscall the policy lists, in the policy's order, over its boundary-covering argument
//!    tuples in lexicographic order;
//! 2. syscall numbers the policy does not list, ascending, against the default disposition, over
//!    the boundary-covering argument tuples of the comparisons the program makes for them;
//! 3. if enabled, inputs carrying a foreign architecture, against the arch mismatch disposition.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, info, warn};
use serde::Serialize;

use crate::arch::TargetArch;
use crate::boundary::{arg_candidates, scan_constants, syscall_candidates, Cases};
use crate::common::BpfProgramRef;
use crate::config::VerifierConfig;
use crate::disposition::Disposition;
use crate::input::{DisplayArgs, Field, SeccompData, SyscallArgs};
use crate::interpreter::{InterpreterError, Program};
use crate::policy::{Policy, PolicyError};

// Syscall numbers at the signed and unsigned extremes, always probed.
const EXTREME_SYSCALL_NUMBERS: [u32; 3] = [0x7fff_ffff, 0x8000_0000, 0xffff_ffff];

// Arguments of the foreign architecture probes.
const PROBE_ARGS: [SyscallArgs; 2] = [[0; 6], [u64::MAX; 6]];

/// Input on which a program and its policy were compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterexample {
    /// Syscall number.
    pub syscall: i64,
    /// Syscall name, if the policy knows it.
    pub name: Option<String>,
    /// `AUDIT_ARCH_*` value of the input.
    pub arch: u32,
    /// Syscall arguments.
    pub args: SyscallArgs,
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.syscall)?,
            None => write!(f, "syscall {}", self.syscall)?,
        }
        write!(
            f,
            " with args {} on arch {:#x}",
            DisplayArgs(&self.args),
            self.arch
        )
    }
}

/// Reasons a program fails verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum VerificationError {
    /// Cannot run the program for {counterexample}: {source}
    Interpreter {
        /// First input the failure was observed on.
        counterexample: Counterexample,
        /// The interpreter error.
        source: InterpreterError,
    },
    /// Mismatch for {counterexample}: expected {expected}, got {actual}.
    Mismatch {
        /// The diverging input.
        counterexample: Counterexample,
        /// Disposition according to the policy.
        expected: Disposition,
        /// Disposition returned by the program.
        actual: Disposition,
    },
    /// Policy error: {0}
    Policy(#[from] PolicyError),
    /// Syscall number {0} cannot be represented in seccomp_data.
    InvalidSyscallNumber(i64),
    /// Invalid verifier configuration: {0}
    InvalidConfig(String),
}

/// Summary of a successful verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Number of listed syscalls checked.
    pub syscalls_checked: usize,
    /// Number of argument tuples checked over all listed syscalls.
    pub cases_checked: usize,
    /// Number of unlisted syscall numbers checked against the default disposition.
    pub unlisted_probes: usize,
    /// Number of inputs checked with a foreign architecture.
    pub arch_mismatch_probes: usize,
    /// Listed syscalls whose input set was cut at the case limit.
    pub truncated: Vec<i64>,
}

/// The word the program sees when loading the syscall number.
fn syscall_word(syscall: i64) -> Result<u32, VerificationError> {
    u32::try_from(syscall)
        .or_else(|_| i32::try_from(syscall).map(|nr| u32::from_ne_bytes(nr.to_ne_bytes())))
        .map_err(|_| VerificationError::InvalidSyscallNumber(syscall))
}

/// Runs a loaded program against the inputs of one policy.
struct Checker<'a, P: ?Sized> {
    program: &'a Program,
    policy: &'a P,
    config: &'a VerifierConfig,
    arch: TargetArch,
}

impl<P: Policy + ?Sized> Checker<'_, P> {
    fn counterexample(&self, syscall: i64, arch: u32, args: SyscallArgs) -> Counterexample {
        Counterexample {
            syscall,
            name: self.policy.syscall_name(syscall).map(str::to_string),
            arch,
            args,
        }
    }

    /// Runs one input and compares the result with `expected`.
    fn check(
        &self,
        syscall: i64,
        arch: u32,
        args: SyscallArgs,
        expected: impl FnOnce() -> Result<Disposition, PolicyError>,
    ) -> Result<(), VerificationError> {
        let nr = i32::from_ne_bytes(syscall_word(syscall)?.to_ne_bytes());
        let data = SeccompData::new(nr, arch, args);

        let actual = self
            .program
            .evaluate(&data, self.config.instruction_limit)
            .map_err(|source| VerificationError::Interpreter {
                counterexample: self.counterexample(syscall, arch, args),
                source,
            })?;
        let expected = expected()?;

        if actual != expected {
            return Err(VerificationError::Mismatch {
                counterexample: self.counterexample(syscall, arch, args),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn check_listed(
        &self,
        syscall: i64,
        report: &mut VerificationReport,
    ) -> Result<(), VerificationError> {
        let arch = self.arch.audit_value();
        let scanned = scan_constants(self.program, arch, Some(syscall_word(syscall)?));
        let candidates = syscall_candidates(
            |index| self.policy.comparison_constants(syscall, index),
            &scanned,
        );
        let cases = Cases::new(candidates, self.config.case_limit);

        let total = cases.total();
        if total > self.config.case_limit {
            warn!(
                "Checking {} of {total} argument tuples of syscall {syscall}.",
                self.config.case_limit
            );
            report.truncated.push(syscall);
        }

        let mut checked = 0;
        for args in cases {
            self.check(syscall, arch, args, || self.policy.evaluate(syscall, &args))?;
            checked += 1;
        }

        debug!("Syscall {syscall}: {checked} argument tuples match the policy.");
        report.syscalls_checked += 1;
        report.cases_checked += checked;
        Ok(())
    }

    fn check_unlisted(
        &self,
        listed: &[i64],
        report: &mut VerificationReport,
    ) -> Result<(), VerificationError> {
        let arch = self.arch.audit_value();
        let declared = listed
            .iter()
            .map(|syscall| syscall_word(*syscall))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut probes: BTreeSet<u32> = (0..self.config.syscall_probe_limit).collect();
        if let Some(numbers) = scan_constants(self.program, arch, None).get(&Field::Nr) {
            for number in numbers {
                probes.extend([number.wrapping_sub(1), *number, number.wrapping_add(1)]);
            }
        }
        probes.extend(EXTREME_SYSCALL_NUMBERS);

        let default_disposition = self.policy.default_disposition();
        for probe in probes.difference(&declared) {
            let syscall = i64::from(*probe);
            // The policy has no rules for it, only the program's comparisons give constants.
            let scanned = scan_constants(self.program, arch, Some(*probe));
            let cases = Cases::new(
                syscall_candidates(|_| Vec::new(), &scanned),
                self.config.case_limit,
            );
            if cases.total() > self.config.case_limit {
                debug!(
                    "Checking {} of {} argument tuples of unlisted syscall {syscall}.",
                    self.config.case_limit,
                    cases.total()
                );
            }

            for args in cases {
                self.check(syscall, arch, args, || Ok(default_disposition))?;
            }
            report.unlisted_probes += 1;
        }

        debug!(
            "{} unlisted syscalls return {default_disposition}.",
            report.unlisted_probes
        );
        Ok(())
    }

    fn check_arch_mismatch(
        &self,
        listed: &[i64],
        report: &mut VerificationReport,
    ) -> Result<(), VerificationError> {
        let expected = self.policy.arch_mismatch_disposition();
        let mut syscalls = listed.to_vec();
        if !syscalls.contains(&0) {
            syscalls.push(0);
        }

        for arch in self.arch.foreign_audit_values() {
            for syscall in &syscalls {
                for args in PROBE_ARGS {
                    self.check(*syscall, arch, args, || Ok(expected))?;
                    report.arch_mismatch_probes += 1;
                }
            }
        }

        debug!("Foreign architectures return {expected}.");
        Ok(())
    }
}

/// Checks that `program` makes the same decision as `policy` on every boundary-covering input.
///
/// Returns a summary of what was checked, or the first input on which the program fails to run
/// or disagrees with the policy. A program that cannot be loaded is reported against the first
/// input that would have been checked. A configuration rejected by [`VerifierConfig::validate`]
/// fails before anything runs.
pub fn verify_program<P: Policy + ?Sized>(
    program: BpfProgramRef,
    policy: &P,
    config: &VerifierConfig,
) -> Result<VerificationReport, VerificationError> {
    config
        .validate()
        .map_err(|err| VerificationError::InvalidConfig(err.to_string()))?;

    let arch = policy.target_arch();
    let listed = policy.syscalls();

    let program = match Program::new(program) {
        Ok(program) => program,
        Err(source) => {
            let syscall = listed.first().copied().unwrap_or(0);
            let args = std::array::from_fn(|index| {
                arg_candidates(&policy.comparison_constants(syscall, index), None, None)
                    .first()
                    .copied()
                    .unwrap_or(0)
            });
            return Err(VerificationError::Interpreter {
                counterexample: Counterexample {
                    syscall,
                    name: policy.syscall_name(syscall).map(str::to_string),
                    arch: arch.audit_value(),
                    args,
                },
                source,
            });
        }
    };

    let checker = Checker {
        program: &program,
        policy,
        config,
        arch,
    };
    let mut report = VerificationReport::default();

    for syscall in &listed {
        checker.check_listed(*syscall, &mut report)?;
    }
    checker.check_unlisted(&listed, &mut report)?;
    if config.check_arch_mismatch {
        checker.check_arch_mismatch(&listed, &mut report)?;
    }

    info!(
        "Program matches the policy for {} syscalls ({} argument tuples), {} unlisted syscalls \
         and {} foreign architecture inputs.",
        report.syscalls_checked,
        report.cases_checked,
        report.unlisted_probes,
        report.arch_mismatch_probes
    );
    Ok(report)
}
