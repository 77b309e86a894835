// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::interpreter::DEFAULT_INSTRUCTION_LIMIT;

/// Default maximum number of argument tuples checked per syscall.
pub const DEFAULT_CASE_LIMIT: usize = 65536;
/// Default upper bound (exclusive) of the syscall numbers probed for the default disposition.
pub const DEFAULT_SYSCALL_PROBE_LIMIT: u32 = 1024;

/// Errors associated with loading a verifier configuration.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum VerifierConfigError {
    /// Cannot deserialize verifier configuration: {0}
    Deserialize(#[from] serde_json::Error),
    /// The case limit must be at least 1.
    InvalidCaseLimit,
}

/// Tunables of a verification run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Maximum number of instructions a single run of the program may execute.
    pub instruction_limit: usize,
    /// Maximum number of argument tuples checked per syscall. Larger input sets are truncated.
    pub case_limit: usize,
    /// Syscall numbers below this bound that the policy does not list are checked against the
    /// default disposition.
    pub syscall_probe_limit: u32,
    /// Whether inputs carrying a foreign architecture are checked.
    pub check_arch_mismatch: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            instruction_limit: DEFAULT_INSTRUCTION_LIMIT,
            case_limit: DEFAULT_CASE_LIMIT,
            syscall_probe_limit: DEFAULT_SYSCALL_PROBE_LIMIT,
            check_arch_mismatch: true,
        }
    }
}

impl VerifierConfig {
    /// Parses a configuration, missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self, VerifierConfigError> {
        let config: VerifierConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values a verification run cannot work with.
    pub fn validate(&self) -> Result<(), VerifierConfigError> {
        if self.case_limit == 0 {
            return Err(VerifierConfigError::InvalidCaseLimit);
        }
        Ok(())
    }
}
