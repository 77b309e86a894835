// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

// Architecture identifiers.
// See /usr/include/linux/audit.h .

// Defined as:
// `#define AUDIT_ARCH_X86_64	(EM_X86_64|__AUDIT_ARCH_64BIT|__AUDIT_ARCH_LE)`
const AUDIT_ARCH_X86_64: u32 = 62 | 0x8000_0000 | 0x4000_0000;

// Defined as:
// `#define AUDIT_ARCH_AARCH64	(EM_AARCH64|__AUDIT_ARCH_64BIT|__AUDIT_ARCH_LE)`
const AUDIT_ARCH_AARCH64: u32 = 183 | 0x8000_0000 | 0x4000_0000;

// Defined as:
// `#define AUDIT_ARCH_RISCV64	(EM_RISCV|__AUDIT_ARCH_64BIT|__AUDIT_ARCH_LE)`
const AUDIT_ARCH_RISCV64: u32 = 243 | 0x8000_0000 | 0x4000_0000;

/// Supported target architectures.
#[allow(non_camel_case_types)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetArch {
    /// x86_64 arch
    x86_64,
    /// aarch64 arch
    aarch64,
    /// riscv64 arch
    riscv64,
}

impl TargetArch {
    /// All architectures a filter can be compiled for.
    pub const ALL: [TargetArch; 3] = [TargetArch::x86_64, TargetArch::aarch64, TargetArch::riscv64];

    /// Get the arch audit value, as found in `seccomp_data.arch`.
    pub fn audit_value(self) -> u32 {
        match self {
            TargetArch::x86_64 => AUDIT_ARCH_X86_64,
            TargetArch::aarch64 => AUDIT_ARCH_AARCH64,
            TargetArch::riscv64 => AUDIT_ARCH_RISCV64,
        }
    }

    /// Get the string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TargetArch::x86_64 => "x86_64",
            TargetArch::aarch64 => "aarch64",
            TargetArch::riscv64 => "riscv64",
        }
    }

    /// Audit values that must be rejected by a filter built for this architecture.
    pub(crate) fn foreign_audit_values(self) -> Vec<u32> {
        let mut values: Vec<u32> = Self::ALL
            .iter()
            .filter(|arch| **arch != self)
            .map(|arch| arch.audit_value())
            .collect();
        values.extend([0, u32::MAX]);
        values
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
