// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The input a seccomp filter sees: the kernel's `struct seccomp_data`.

use std::fmt;

use crate::common::{
    SECCOMP_DATA_ARCH_OFFSET, SECCOMP_DATA_ARGS_OFFSET, SECCOMP_DATA_ARG_SIZE,
    SECCOMP_DATA_IP_OFFSET, SECCOMP_DATA_NR_OFFSET, SECCOMP_DATA_SIZE,
};

/// Number of syscall arguments exposed to a filter.
pub const ARG_COUNT: usize = 6;

/// Argument values of one syscall invocation.
pub type SyscallArgs = [u64; ARG_COUNT];

/// A 32-bit word of `struct seccomp_data` that a `BPF_LD|BPF_W|BPF_ABS` instruction can load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    /// Syscall number.
    Nr,
    /// Audit architecture value.
    Arch,
    /// Least significant half of the instruction pointer.
    InstructionPointerLo,
    /// Most significant half of the instruction pointer.
    InstructionPointerHi,
    /// Least significant half of the argument with the given index.
    ArgLo(usize),
    /// Most significant half of the argument with the given index.
    ArgHi(usize),
}

impl Field {
    /// Decodes an absolute load offset into the field it selects.
    ///
    /// Returns `None` for offsets that are not 4-byte aligned or fall outside the structure.
    pub fn from_offset(offset: u32) -> Option<Self> {
        if offset % 4 != 0 || offset >= SECCOMP_DATA_SIZE {
            return None;
        }

        let field = match offset {
            SECCOMP_DATA_NR_OFFSET => Field::Nr,
            SECCOMP_DATA_ARCH_OFFSET => Field::Arch,
            SECCOMP_DATA_IP_OFFSET => Field::InstructionPointerLo,
            o if o == SECCOMP_DATA_IP_OFFSET + 4 => Field::InstructionPointerHi,
            o => {
                // Cannot underflow, offsets below the arguments were matched above.
                let rel = o - SECCOMP_DATA_ARGS_OFFSET;
                let index = usize::try_from(rel / SECCOMP_DATA_ARG_SIZE).ok()?;
                if rel % SECCOMP_DATA_ARG_SIZE == 0 {
                    Field::ArgLo(index)
                } else {
                    Field::ArgHi(index)
                }
            }
        };

        Some(field)
    }

    /// Offset of the field inside `struct seccomp_data`.
    pub fn offset(self) -> u32 {
        match self {
            Field::Nr => SECCOMP_DATA_NR_OFFSET,
            Field::Arch => SECCOMP_DATA_ARCH_OFFSET,
            Field::InstructionPointerLo => SECCOMP_DATA_IP_OFFSET,
            Field::InstructionPointerHi => SECCOMP_DATA_IP_OFFSET + 4,
            Field::ArgLo(index) | Field::ArgHi(index) => {
                // Argument indexes are always below `ARG_COUNT`.
                #[allow(clippy::cast_possible_truncation)]
                let base = SECCOMP_DATA_ARGS_OFFSET + index as u32 * SECCOMP_DATA_ARG_SIZE;
                match self {
                    Field::ArgHi(_) => base + SECCOMP_DATA_ARG_SIZE / 2,
                    _ => base,
                }
            }
        }
    }
}

/// Simulated `struct seccomp_data` handed to the filter for one syscall invocation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SeccompData {
    /// The syscall number.
    pub nr: i32,
    /// `AUDIT_ARCH_*` value of the calling convention.
    pub arch: u32,
    /// Instruction pointer at the time of the syscall.
    pub instruction_pointer: u64,
    /// Syscall arguments.
    pub args: SyscallArgs,
}

impl SeccompData {
    /// Creates the input for syscall `nr` with the given arguments.
    pub fn new(nr: i32, arch: u32, args: SyscallArgs) -> Self {
        Self {
            nr,
            arch,
            instruction_pointer: 0,
            args,
        }
    }

    /// Reads the 32-bit word of the given field.
    pub fn word(&self, field: Field) -> u32 {
        match field {
            Field::Nr => u32::from_ne_bytes(self.nr.to_ne_bytes()),
            Field::Arch => self.arch,
            Field::InstructionPointerLo => low_word(self.instruction_pointer),
            Field::InstructionPointerHi => high_word(self.instruction_pointer),
            Field::ArgLo(index) => low_word(self.args[index]),
            Field::ArgHi(index) => high_word(self.args[index]),
        }
    }
}

/// Least significant half of a 64-bit value.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn low_word(value: u64) -> u32 {
    (value & 0xFFFF_FFFF) as u32
}

/// Most significant half of a 64-bit value.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn high_word(value: u64) -> u32 {
    (value >> 32) as u32
}

/// Rebuilds a 64-bit value from its halves.
pub(crate) fn join_words(high: u32, low: u32) -> u64 {
    (u64::from(high) << 32) | u64::from(low)
}

/// Display helper for argument tuples, printed in hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayArgs<'a>(pub &'a SyscallArgs);

impl fmt::Display for DisplayArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (index, arg) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg:#x}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets() {
        assert_eq!(Field::from_offset(0), Some(Field::Nr));
        assert_eq!(Field::from_offset(4), Some(Field::Arch));
        assert_eq!(Field::from_offset(8), Some(Field::InstructionPointerLo));
        assert_eq!(Field::from_offset(12), Some(Field::InstructionPointerHi));
        assert_eq!(Field::from_offset(16), Some(Field::ArgLo(0)));
        assert_eq!(Field::from_offset(20), Some(Field::ArgHi(0)));
        assert_eq!(Field::from_offset(56), Some(Field::ArgLo(5)));
        assert_eq!(Field::from_offset(60), Some(Field::ArgHi(5)));

        // Misaligned or past the end of the structure.
        assert_eq!(Field::from_offset(2), None);
        assert_eq!(Field::from_offset(17), None);
        assert_eq!(Field::from_offset(64), None);
        assert_eq!(Field::from_offset(u32::MAX), None);

        for offset in (0..64).step_by(4) {
            assert_eq!(Field::from_offset(offset).unwrap().offset(), offset);
        }
    }

    #[test]
    fn test_words() {
        let data = SeccompData {
            nr: -1,
            arch: 0xc000_003e,
            instruction_pointer: 0x1122_3344_5566_7788,
            args: [0x0000_0001_0000_0002, 0, 0, 0, 0, u64::MAX],
        };

        assert_eq!(data.word(Field::Nr), u32::MAX);
        assert_eq!(data.word(Field::Arch), 0xc000_003e);
        assert_eq!(data.word(Field::InstructionPointerLo), 0x5566_7788);
        assert_eq!(data.word(Field::InstructionPointerHi), 0x1122_3344);
        assert_eq!(data.word(Field::ArgLo(0)), 2);
        assert_eq!(data.word(Field::ArgHi(0)), 1);
        assert_eq!(data.word(Field::ArgHi(5)), u32::MAX);
        assert_eq!(join_words(1, 2), 0x0000_0001_0000_0002);
    }

    #[test]
    fn test_display_args() {
        let args = [1, 0, 0, 0, 0, 0xff];
        assert_eq!(
            DisplayArgs(&args).to_string(),
            "[0x1, 0x0, 0x0, 0x0, 0x0, 0xff]"
        );
    }
}
