// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::tests_outside_test_module)]

use proptest::prelude::*;
use seccomp_verifier::SeccompCmpArgLen::{Dword, Qword};
use seccomp_verifier::SeccompCmpOp::*;
use seccomp_verifier::{
    compile, program_from_raw, program_to_raw, run_program, verify_program, Disposition,
    Policy, SeccompCondition, SeccompData, SeccompFilter, SeccompRule, TargetArch,
    VerificationError, VerifierConfig, BPF_STMT,
};

const POLICY: &str = r#"{
    "default_action": {"errno": 1},
    "filter_action": "allow",
    "target_arch": "x86_64",
    "filter": [
        {"syscall": 0, "name": "read"},
        {
            "syscall": 1,
            "name": "write",
            "args": [{"index": 0, "type": "dword", "op": "eq", "val": 1}]
        },
        {
            "syscall": 1,
            "name": "write",
            "args": [{"index": 0, "type": "dword", "op": "eq", "val": 2}]
        },
        {
            "syscall": 9,
            "name": "mmap",
            "comment": "No executable mappings.",
            "args": [
                {"index": 2, "type": "dword", "op": {"masked_eq": 4}, "val": 0},
                {"index": 1, "type": "qword", "op": "le", "val": 4294967306}
            ]
        },
        {
            "syscall": 16,
            "name": "ioctl",
            "args": [
                {"index": 1, "type": "qword", "op": "ge", "val": 21505},
                {"index": 1, "type": "qword", "op": "lt", "val": 21600}
            ]
        },
        {
            "syscall": 231,
            "name": "exit_group"
        }
    ]
}"#;

fn test_config() -> VerifierConfig {
    VerifierConfig {
        case_limit: 4096,
        syscall_probe_limit: 64,
        ..Default::default()
    }
}

#[test]
fn test_json_policy() {
    let filter = SeccompFilter::from_json(POLICY).unwrap();
    let program = compile(&filter).unwrap();

    let report = verify_program(&program, &filter, &VerifierConfig::default()).unwrap();
    assert_eq!(report.syscalls_checked, 5);
    assert!(report.truncated.is_empty());

    let arch = TargetArch::x86_64.audit_value();
    let run = |nr, args| run_program(&program, &SeccompData::new(nr, arch, args)).unwrap();
    assert_eq!(run(1, [2, 0, 0, 0, 0, 0]), Disposition::Allow);
    assert_eq!(run(1, [3, 0, 0, 0, 0, 0]), Disposition::Errno(1));
    assert_eq!(run(9, [0, 0x1_0000_000a, 3, 0, 0, 0]), Disposition::Allow);
    assert_eq!(run(9, [0, 0x1_0000_000a, 7, 0, 0, 0]), Disposition::Errno(1));
    assert_eq!(run(9, [0, 0x1_0000_000b, 3, 0, 0, 0]), Disposition::Errno(1));
    assert_eq!(run(16, [0, 21599, 0, 0, 0, 0]), Disposition::Allow);
    assert_eq!(run(16, [0, 21600, 0, 0, 0, 0]), Disposition::Errno(1));
    assert_eq!(run(42, [0; 6]), Disposition::Errno(1));
}

#[test]
fn test_raw_program() {
    let filter = SeccompFilter::from_json(POLICY).unwrap();
    let raw = program_to_raw(&compile(&filter).unwrap());

    let program = program_from_raw(&raw);
    verify_program(&program, &filter, &test_config()).unwrap();
}

#[test]
fn test_mutated_constants() {
    let filter = SeccompFilter::from_json(POLICY).unwrap();
    let program = compile(&filter).unwrap();

    // Every argument comparison constant moved by one is caught.
    for (index, insn) in program.iter().enumerate() {
        // Conditional jumps on the least significant half of an argument.
        if insn.code != 0x15 && insn.code != 0x25 && insn.code != 0x35 {
            continue;
        }
        let loaded = program[..index]
            .iter()
            .rev()
            .find(|insn| insn.code == 0x20)
            .map(|load| load.k);
        if !loaded.is_some_and(|offset| offset >= 16 && offset % 8 == 0) {
            continue;
        }

        for k in [insn.k.wrapping_sub(1), insn.k.wrapping_add(1)] {
            let mut mutated = program.clone();
            mutated[index].k = k;
            let result = verify_program(&mutated, &filter, &test_config());
            assert!(
                matches!(result, Err(VerificationError::Mismatch { .. })),
                "constant {:#x} at instruction {index} changed to {k:#x}: {result:?}",
                insn.k
            );
        }
    }
}

fn interesting_value() -> impl Strategy<Value = u64> {
    prop_oneof![
        Just(0u64),
        Just(1),
        Just(5),
        Just(0xffff_ffff),
        Just(0x1_0000_0000),
        Just(u64::MAX),
        any::<u64>(),
    ]
}

fn random_condition() -> impl Strategy<Value = SeccompCondition> {
    (
        0u8..6,
        any::<bool>(),
        0usize..7,
        interesting_value(),
        interesting_value(),
    )
        .prop_map(|(arg_number, qword, op, value, mask)| {
            let arg_len = if qword { Qword } else { Dword };
            let operator = match op {
                0 => Eq,
                1 => Ne,
                2 => Ge,
                3 => Gt,
                4 => Le,
                5 => Lt,
                _ => MaskedEq(mask),
            };
            SeccompCondition::new(arg_number, arg_len, operator, value).unwrap()
        })
}

fn random_rule() -> impl Strategy<Value = SeccompRule> {
    (
        prop::collection::vec(random_condition(), 1..4),
        prop_oneof![
            Just(Disposition::Allow),
            Just(Disposition::Log),
            Just(Disposition::Trap),
            (1u16..200).prop_map(Disposition::Trace),
        ],
    )
        .prop_map(|(conditions, action)| SeccompRule::new(conditions, action))
}

fn random_filter() -> impl Strategy<Value = SeccompFilter> {
    (
        prop::collection::btree_map(0i64..40, prop::collection::vec(random_rule(), 1..4), 1..4),
        prop::sample::select(TargetArch::ALL.to_vec()),
    )
        .prop_map(|(rules, arch)| SeccompFilter::new(rules, Disposition::Errno(1), arch).unwrap())
}

#[test]
fn test_compiled_filters_verify() {
    let cfg = ProptestConfig::with_cases(32);
    proptest!(cfg, |(filter in random_filter())| {
        let program = compile(&filter).unwrap();
        let result = verify_program(&program, &filter, &test_config());
        prop_assert!(result.is_ok(), "{:?}", result);
    });
}

#[test]
fn test_changed_default_action_is_caught() {
    let cfg = ProptestConfig::with_cases(32);
    proptest!(cfg, |(filter in random_filter())| {
        let mut program = compile(&filter).unwrap();
        let last = program.len() - 1;
        program[last] = BPF_STMT(0x06, 0x7fff_0000);

        // At most 3 of the 64 probed syscall numbers are listed.
        let result = verify_program(&program, &filter, &test_config());
        match result {
            Err(VerificationError::Mismatch { counterexample, expected, actual }) => {
                prop_assert!(!filter.syscalls().contains(&counterexample.syscall));
                prop_assert_eq!(expected, Disposition::Errno(1));
                prop_assert_eq!(actual, Disposition::Allow);
            }
            other => prop_assert!(false, "{:?}", other),
        }
    });
}
