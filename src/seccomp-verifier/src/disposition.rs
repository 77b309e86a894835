// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{
    SECCOMP_RET_ACTION_FULL, SECCOMP_RET_ALLOW, SECCOMP_RET_DATA, SECCOMP_RET_ERRNO,
    SECCOMP_RET_KILL_PROCESS, SECCOMP_RET_KILL_THREAD, SECCOMP_RET_LOG, SECCOMP_RET_TRACE,
    SECCOMP_RET_TRAP, SECCOMP_RET_USER_NOTIF,
};

/// Outcome that `seccomp` applies to the process calling a syscall.
///
/// Both a BPF program (through its return value) and a policy (through direct evaluation of its
/// rules) assign a disposition to every input, and the two must agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Allows syscall.
    Allow,
    /// Returns from syscall with specified error number.
    Errno(u16),
    /// Kills calling thread.
    KillThread,
    /// Kills calling process.
    KillProcess,
    /// Same as allow but logs call.
    Log,
    /// Notifies tracing process of the caller with respective number.
    Trace(u16),
    /// Sends `SIGSYS` to the calling process.
    Trap,
    /// Forwards the syscall to a user space supervisor.
    UserNotif,
}

impl From<Disposition> for u32 {
    /// Return codes of the BPF program for each disposition.
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Allow => SECCOMP_RET_ALLOW,
            Disposition::Errno(x) => SECCOMP_RET_ERRNO | u32::from(x),
            Disposition::KillThread => SECCOMP_RET_KILL_THREAD,
            Disposition::KillProcess => SECCOMP_RET_KILL_PROCESS,
            Disposition::Log => SECCOMP_RET_LOG,
            Disposition::Trace(x) => SECCOMP_RET_TRACE | u32::from(x),
            Disposition::Trap => SECCOMP_RET_TRAP,
            Disposition::UserNotif => SECCOMP_RET_USER_NOTIF,
        }
    }
}

impl From<u32> for Disposition {
    /// Decodes the value a BPF program returned.
    ///
    /// Only the action bits select the disposition; the data bits are kept for `errno` and
    /// `trace`. Unknown actions are handled by the kernel like `SECCOMP_RET_KILL_PROCESS`.
    fn from(ret: u32) -> Self {
        // Masking with `SECCOMP_RET_DATA` keeps the value within 16 bits.
        #[allow(clippy::cast_possible_truncation)]
        let data = (ret & SECCOMP_RET_DATA) as u16;
        match ret & SECCOMP_RET_ACTION_FULL {
            SECCOMP_RET_ALLOW => Disposition::Allow,
            SECCOMP_RET_ERRNO => Disposition::Errno(data),
            SECCOMP_RET_KILL_THREAD => Disposition::KillThread,
            SECCOMP_RET_LOG => Disposition::Log,
            SECCOMP_RET_TRACE => Disposition::Trace(data),
            SECCOMP_RET_TRAP => Disposition::Trap,
            SECCOMP_RET_USER_NOTIF => Disposition::UserNotif,
            _ => Disposition::KillProcess,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Allow => write!(f, "allow"),
            Disposition::Errno(x) => write!(f, "errno({x})"),
            Disposition::KillThread => write!(f, "kill_thread"),
            Disposition::KillProcess => write!(f, "kill_process"),
            Disposition::Log => write!(f, "log"),
            Disposition::Trace(x) => write!(f, "trace({x})"),
            Disposition::Trap => write!(f, "trap"),
            Disposition::UserNotif => write!(f, "user_notif"),
        }
    }
}
