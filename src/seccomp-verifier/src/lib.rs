// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Host side verifier for compiled seccomp filters.
//!
//! A seccomp filter is a classic BPF program that the kernel runs on every syscall of a sandboxed
//! process. The program is compiled from a declarative policy, and a compiler bug silently opens a
//! hole in the sandbox. This crate checks a compiled program against the policy it was compiled
//! from, without installing anything in the kernel:
//!
//! - [`run_program`] interprets a program for one [`SeccompData`] input.
//! - [`verify_program`] runs the program over every boundary-covering input of the policy and
//!   compares each result with the policy's own evaluation, reporting the first divergence.
//!
//! Policies are anything implementing [`Policy`]. The crate ships a rule based one,
//! [`SeccompFilter`], together with a [`compile`] function producing its BPF program.
//!
//! ## Example
//!
//! ```
//! use seccomp_verifier::{compile, verify_program, SeccompFilter, VerifierConfig};
//!
//! let filter = SeccompFilter::from_json(
//!     r#"{
//!         "default_action": {"errno": 1},
//!         "filter_action": "allow",
//!         "target_arch": "x86_64",
//!         "filter": [
//!             {"syscall": 0, "name": "read"},
//!             {
//!                 "syscall": 1,
//!                 "name": "write",
//!                 "args": [{"index": 0, "type": "dword", "op": "eq", "val": 1}]
//!             }
//!         ]
//!     }"#,
//! )
//! .unwrap();
//! let program = compile(&filter).unwrap();
//!
//! let report = verify_program(&program, &filter, &VerifierConfig::default()).unwrap();
//! assert_eq!(report.syscalls_checked, 2);
//! ```

mod arch;
mod boundary;
mod checker;
mod common;
mod compiler;
mod config;
mod disposition;
mod filter;
mod input;
mod interpreter;
mod policy;

pub use arch::TargetArch;
pub use checker::{verify_program, Counterexample, VerificationError, VerificationReport};
pub use common::{
    program_from_raw, program_to_raw, sock_filter, BpfProgram, BpfProgramRef, BPF_JUMP,
    BPF_MAX_LEN, BPF_STMT,
};
pub use compiler::compile;
pub use config::{
    VerifierConfig, VerifierConfigError, DEFAULT_CASE_LIMIT, DEFAULT_SYSCALL_PROBE_LIMIT,
};
pub use disposition::Disposition;
pub use filter::{
    Comment, FilterError, JsonFilter, JsonFilterError, JsonSyscallRule, SeccompCmpArgLen,
    SeccompCmpOp, SeccompCondition, SeccompFilter, SeccompRule, SeccompRuleMap,
};
pub use input::{DisplayArgs, Field, SeccompData, SyscallArgs, ARG_COUNT};
pub use interpreter::{
    run_program, AluOp, Instruction, InterpreterError, JumpCond, Program,
    DEFAULT_INSTRUCTION_LIMIT,
};
pub use policy::{Policy, PolicyError};
