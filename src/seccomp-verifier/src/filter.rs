// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Rule based seccomp policy: conditions over syscall arguments grouped into rules, and rules
//! grouped per syscall number into a filter.
//!
//! A [`SeccompFilter`] is evaluated directly through the [`Policy`] trait, and compiled into BPF
//! by [`compile`](crate::compiler::compile). Filters are usually loaded from JSON:
//!
//! ```json
//! {
//!     "default_action": "trap",
//!     "filter_action": "allow",
//!     "target_arch": "x86_64",
//!     "filter": [
//!         { "syscall": 0, "name": "read" },
//!         {
//!             "syscall": 1,
//!             "name": "write",
//!             "args": [{ "index": 0, "type": "dword", "op": "eq", "val": 1 }]
//!         }
//!     ]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::arch::TargetArch;
use crate::disposition::Disposition;
use crate::input::{SyscallArgs, ARG_COUNT};
use crate::policy::{Policy, PolicyError};

// The maximum number of a syscall argument.
// A syscall can have at most 6 arguments.
// Arguments are numbered from 0 to 5.
const ARG_NUMBER_MAX: u8 = 5;

const DWORD_MASK: u64 = 0xFFFF_FFFF;

/// Dummy placeholder type for a JSON comment. Holds no value.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Comment;

impl<'de> Deserialize<'de> for Comment {
    fn deserialize<D>(deserializer: D) -> Result<Comment, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?;

        Ok(Comment {})
    }
}

/// Seccomp filter errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub enum FilterError {
    /// The seccomp rules vector is empty.
    EmptyRulesVector,
    /// The seccomp filter contains too many BPF instructions.
    FilterTooLarge,
    /// The seccomp rule contains an invalid argument number.
    InvalidArgumentNumber,
    /// Syscall {0} has conflicting rules.
    ConflictingRules(i64),
    /// Syscall number {0} is out of range.
    InvalidSyscallNumber(i64),
    /// `filter_action` and `default_action` are equal.
    IdenticalActions,
}

/// Errors loading a filter from JSON.
#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum JsonFilterError {
    /// Cannot deserialize json: {0}
    JsonDeserialize(#[from] serde_json::Error),
    /// {0}
    Filter(#[from] FilterError),
}

/// Comparison to perform when matching a condition.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeccompCmpOp {
    /// Argument value is equal to the specified value.
    Eq,
    /// Argument value is greater than or equal to the specified value.
    Ge,
    /// Argument value is greater than specified value.
    Gt,
    /// Argument value is less than or equal to the specified value.
    Le,
    /// Argument value is less than specified value.
    Lt,
    /// Masked bits of argument value are equal to masked bits of specified value.
    MaskedEq(u64),
    /// Argument value is not equal to specified value.
    Ne,
}

/// Seccomp argument value length.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeccompCmpArgLen {
    /// Argument value length is 4 bytes. Only the least significant half is compared.
    Dword,
    /// Argument value length is 8 bytes.
    Qword,
}

/// Condition that syscall must match in order to satisfy a rule.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeccompCondition {
    /// Index of the argument that is to be compared.
    #[serde(rename = "index")]
    pub(crate) arg_number: u8,
    /// Length of the argument value that is to be compared.
    #[serde(rename = "type")]
    pub(crate) arg_len: SeccompCmpArgLen,
    /// Comparison to perform.
    #[serde(rename = "op")]
    pub(crate) operator: SeccompCmpOp,
    /// The value that will be compared with the argument value.
    #[serde(rename = "val")]
    pub(crate) value: u64,
    /// Optional empty value, represents a `comment` property in the JSON file.
    comment: Option<Comment>,
}

impl SeccompCondition {
    /// Creates a new condition on argument `arg_number`.
    pub fn new(
        arg_number: u8,
        arg_len: SeccompCmpArgLen,
        operator: SeccompCmpOp,
        value: u64,
    ) -> Result<Self, FilterError> {
        let instance = Self {
            arg_number,
            arg_len,
            operator,
            value,
            comment: None,
        };

        instance.validate()?;
        Ok(instance)
    }

    /// Validates the SeccompCondition data.
    pub fn validate(&self) -> Result<(), FilterError> {
        if self.arg_number > ARG_NUMBER_MAX {
            return Err(FilterError::InvalidArgumentNumber);
        }

        Ok(())
    }

    /// Width mask applied to argument, value and mask before comparing.
    fn width_mask(&self) -> u64 {
        match self.arg_len {
            SeccompCmpArgLen::Dword => DWORD_MASK,
            SeccompCmpArgLen::Qword => u64::MAX,
        }
    }

    /// Evaluates the condition against concrete syscall arguments.
    pub fn matches(&self, args: &SyscallArgs) -> bool {
        let Some(arg) = args.get(usize::from(self.arg_number)) else {
            return false;
        };
        let width = self.width_mask();
        let (arg, value) = (arg & width, self.value & width);

        match self.operator {
            SeccompCmpOp::Eq => arg == value,
            SeccompCmpOp::Ne => arg != value,
            SeccompCmpOp::Ge => arg >= value,
            SeccompCmpOp::Gt => arg > value,
            SeccompCmpOp::Le => arg <= value,
            SeccompCmpOp::Lt => arg < value,
            SeccompCmpOp::MaskedEq(mask) => {
                let mask = mask & width;
                arg & mask == value & mask
            }
        }
    }

    /// Constants the argument is effectively compared against.
    pub fn constants(&self) -> Vec<u64> {
        let width = self.width_mask();
        match self.operator {
            SeccompCmpOp::MaskedEq(mask) => {
                let mask = mask & width;
                vec![self.value & mask, mask]
            }
            _ => vec![self.value & width],
        }
    }

    /// Index of the compared argument.
    pub fn arg_number(&self) -> u8 {
        self.arg_number
    }
}

/// Rule that `seccomp` attempts to match for a syscall.
///
/// If all conditions match then rule gets matched.
/// The action of the first rule that matches will be applied to the calling process.
/// If no rule matches the default action is applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeccompRule {
    /// Conditions of rule that need to match in order for the rule to get matched.
    pub(crate) conditions: Vec<SeccompCondition>,
    /// Action applied to calling process if rule gets matched.
    pub(crate) action: Disposition,
}

impl SeccompRule {
    /// Creates a new rule. Rules with 0 conditions always match.
    pub fn new(conditions: Vec<SeccompCondition>, action: Disposition) -> Self {
        Self { conditions, action }
    }

    /// The action of the rule if every condition matches, `None` to continue with the next rule.
    pub fn evaluate(&self, args: &SyscallArgs) -> Option<Disposition> {
        self.conditions
            .iter()
            .all(|condition| condition.matches(args))
            .then_some(self.action)
    }
}

/// Type that associates the syscall number to its SeccompRules.
pub type SeccompRuleMap = BTreeMap<i64, Vec<SeccompRule>>;

/// Filter containing rules assigned to syscall numbers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeccompFilter {
    /// Map of syscall numbers and corresponding rule chains.
    rules: SeccompRuleMap,
    /// Default action to apply to syscall numbers that do not exist in the map.
    default_action: Disposition,
    /// Target architecture of the generated BPF filter.
    target_arch: TargetArch,
    /// Optional syscall names, for diagnostics.
    names: BTreeMap<i64, String>,
}

impl SeccompFilter {
    /// Creates a new filter with a set of rules and a default action.
    ///
    /// # Arguments
    ///
    /// * `rules` - Map of syscall numbers and the rules that will be applied to each of them.
    /// * `default_action` - Action taken for all syscalls that do not match any rule.
    /// * `target_arch` - Target architecture of the generated BPF filter.
    pub fn new(
        rules: SeccompRuleMap,
        default_action: Disposition,
        target_arch: TargetArch,
    ) -> Result<Self, FilterError> {
        let instance = Self {
            rules,
            default_action,
            target_arch,
            names: BTreeMap::new(),
        };

        instance.validate()?;

        Ok(instance)
    }

    /// Attaches a human readable name to a syscall number.
    pub fn with_name(mut self, syscall_number: i64, name: &str) -> Self {
        self.names.insert(syscall_number, name.to_string());
        self
    }

    /// Performs semantic checks on the SeccompFilter.
    fn validate(&self) -> Result<(), FilterError> {
        for (syscall_number, syscall_rules) in self.rules.iter() {
            // The syscall number is compared as a 32-bit word.
            if u32::try_from(*syscall_number).is_err() {
                return Err(FilterError::InvalidSyscallNumber(*syscall_number));
            }

            // All inserted syscalls must have at least one rule, otherwise BPF code will break.
            if syscall_rules.is_empty() {
                return Err(FilterError::EmptyRulesVector);
            }

            // An unconditional rule shadows every other rule, so it must be the only one.
            let unconditional = syscall_rules
                .iter()
                .filter(|rule| rule.conditions.is_empty())
                .count();
            if unconditional > 1 || (unconditional == 1 && syscall_rules.len() > 1) {
                return Err(FilterError::ConflictingRules(*syscall_number));
            }

            syscall_rules
                .iter()
                .flat_map(|rule| rule.conditions.iter())
                .try_for_each(SeccompCondition::validate)?;
        }

        Ok(())
    }

    /// Rules of every syscall, ordered by syscall number.
    pub fn rules(&self) -> &SeccompRuleMap {
        &self.rules
    }

    /// Action for syscalls without rules and for syscalls whose rules all fail.
    pub fn default_action(&self) -> Disposition {
        self.default_action
    }

    /// Loads a filter from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, JsonFilterError> {
        let filter: JsonFilter = serde_json::from_str(json)?;
        Ok(SeccompFilter::try_from(filter)?)
    }
}

impl Policy for SeccompFilter {
    fn syscalls(&self) -> Vec<i64> {
        self.rules.keys().copied().collect()
    }

    fn evaluate(&self, syscall: i64, args: &SyscallArgs) -> Result<Disposition, PolicyError> {
        let rules = self
            .rules
            .get(&syscall)
            .ok_or(PolicyError::UnknownSyscall(syscall))?;

        Ok(rules
            .iter()
            .find_map(|rule| rule.evaluate(args))
            .unwrap_or(self.default_action))
    }

    fn default_disposition(&self) -> Disposition {
        self.default_action
    }

    fn target_arch(&self) -> TargetArch {
        self.target_arch
    }

    fn comparison_constants(&self, syscall: i64, arg_index: usize) -> Vec<u64> {
        if arg_index >= ARG_COUNT {
            return Vec::new();
        }

        self.rules
            .get(&syscall)
            .into_iter()
            .flatten()
            .flat_map(|rule| rule.conditions.iter())
            .filter(|condition| usize::from(condition.arg_number) == arg_index)
            .flat_map(SeccompCondition::constants)
            .collect()
    }

    fn syscall_name(&self, syscall: i64) -> Option<&str> {
        self.names.get(&syscall).map(String::as_str)
    }
}

/// Deserializable object that represents a JSON filter.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonFilter {
    /// Action of syscalls that match no rule.
    pub default_action: Disposition,
    /// Action of syscalls that match a rule.
    pub filter_action: Disposition,
    /// Architecture the filter is built for.
    pub target_arch: TargetArch,
    /// Rules, several entries for the same syscall form its rule chain.
    pub filter: Vec<JsonSyscallRule>,
}

/// One entry of the `filter` array of a JSON filter.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonSyscallRule {
    /// Syscall number.
    pub syscall: i64,
    /// Optional syscall name.
    pub name: Option<String>,
    /// Conditions of the rule, none means the syscall is matched unconditionally.
    pub args: Option<Vec<SeccompCondition>>,
    /// Optional empty value, represents a `comment` property in the JSON file.
    pub comment: Option<Comment>,
}

impl TryFrom<JsonFilter> for SeccompFilter {
    type Error = FilterError;

    fn try_from(json: JsonFilter) -> Result<Self, Self::Error> {
        if json.default_action == json.filter_action {
            return Err(FilterError::IdenticalActions);
        }

        let mut rule_map = SeccompRuleMap::new();
        let mut names = BTreeMap::new();
        for entry in json.filter {
            rule_map
                .entry(entry.syscall)
                .or_default()
                .push(SeccompRule::new(entry.args.unwrap_or_default(), json.filter_action));
            if let Some(name) = entry.name {
                names.insert(entry.syscall, name);
            }
        }

        let mut filter = SeccompFilter::new(rule_map, json.default_action, json.target_arch)?;
        filter.names = names;
        Ok(filter)
    }
}
