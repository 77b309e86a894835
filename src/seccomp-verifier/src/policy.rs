// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::arch::TargetArch;
use crate::disposition::Disposition;
use crate::input::SyscallArgs;

/// Errors a policy reports when it cannot answer a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum PolicyError {
    /// The policy has no rules for syscall {0}.
    UnknownSyscall(i64),
    /// The policy cannot evaluate syscall {0}: {1}
    Evaluation(i64, String),
}

/// The declarative side of a seccomp filter, queried directly instead of through its compiled
/// program.
///
/// A verifier only reads a policy. Implementations must answer consistently for the duration of
/// a verification run.
pub trait Policy {
    /// Syscall numbers the policy has explicit rules for, in the order they should be checked.
    fn syscalls(&self) -> Vec<i64>;

    /// Expected disposition for a syscall with the given arguments.
    fn evaluate(&self, syscall: i64, args: &SyscallArgs) -> Result<Disposition, PolicyError>;

    /// Disposition of every syscall the policy does not list.
    fn default_disposition(&self) -> Disposition;

    /// Architecture the policy is meant for. Inputs are built with its audit value.
    fn target_arch(&self) -> TargetArch;

    /// Disposition expected for a syscall made through a foreign calling convention.
    fn arch_mismatch_disposition(&self) -> Disposition {
        Disposition::KillProcess
    }

    /// Constants the rules of `syscall` compare argument `arg_index` against.
    ///
    /// Used to pick boundary inputs. The verifier also scans the program for constants, so
    /// returning nothing is correct, only less thorough.
    fn comparison_constants(&self, _syscall: i64, _arg_index: usize) -> Vec<u64> {
        Vec::new()
    }

    /// Human readable name of a syscall, used in diagnostics.
    fn syscall_name(&self, _syscall: i64) -> Option<&str> {
        None
    }
}
