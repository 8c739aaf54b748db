/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use nix::sys::signal;
use nix::sys::signal::SigHandler;
use nix::sys::signal::SigSet;
use nix::sys::signal::SigmaskHow;
use nix::sys::signal::Signal;

/// Bit set in an [`ExitStatus::encoded`] value when the process was killed by
/// a signal.
pub const SIGNALED_BIT: i32 = 0x0100;

/// Describes how a tracee terminated.
///
/// This is similar to `std::process::ExitStatus`, but is easier to match
/// against and provides `raise_or_exit` to propagate the status of the traced
/// program as our own.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ExitStatus {
    /// Program exited with an exit code.
    Exited(i32),
    /// Program killed by signal, with or without a coredump.
    Signaled(Signal, bool),
}

impl ExitStatus {
    /// A successful exit status.
    pub const SUCCESS: Self = ExitStatus::Exited(0);

    /// Compact encoding used by trace reports: the exit code itself, or
    /// `0x0100 | signum` when a signal killed the process.
    pub fn encoded(&self) -> i32 {
        match self {
            ExitStatus::Exited(code) => *code,
            ExitStatus::Signaled(sig, _) => SIGNALED_BIT | *sig as i32,
        }
    }

    /// If the process was terminated by a signal, returns that signal.
    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(_) => None,
            ExitStatus::Signaled(sig, _) => Some(*sig as i32 & 0x7f),
        }
    }

    /// Was termination successful? Signal termination is not considered a
    /// success, and success is defined as a zero exit status.
    pub fn success(&self) -> bool {
        self == &ExitStatus::SUCCESS
    }

    /// Returns the exit code of the process, if any. If the process was
    /// terminated by a signal, this will return `None`.
    pub fn code(&self) -> Option<i32> {
        if let ExitStatus::Exited(code) = *self {
            Some(code)
        } else {
            None
        }
    }

    /// Propagate the exit status such that the current process exits in the same
    /// way that the child process exited.
    pub fn raise_or_exit(self) -> ! {
        match self {
            ExitStatus::Signaled(signal, core_dump) => {
                if core_dump {
                    // Prevent the current process from producing a core dump as
                    // well when the signal is propagated.
                    let limit = libc::rlimit {
                        rlim_cur: 0,
                        rlim_max: 0,
                    };
                    unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };
                }

                // Raise the same signal, which may or may not be fatal.
                let _ = unsafe { signal::signal(signal, SigHandler::SigDfl) };
                let _ = signal::raise(signal);

                let mut mask = SigSet::empty();
                mask.add(signal);
                let _ = signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None);

                // In case the signal is not fatal.
                std::process::exit(signal as i32 + 128);
            }
            ExitStatus::Exited(code) => std::process::exit(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding() {
        assert_eq!(ExitStatus::Exited(3).encoded(), 3);
        assert_eq!(
            ExitStatus::Signaled(Signal::SIGSEGV, false).encoded(),
            0x0100 | 11
        );
        assert_eq!(ExitStatus::Signaled(Signal::SIGKILL, false).signal(), Some(9));
        assert!(ExitStatus::SUCCESS.success());
        assert!(!ExitStatus::Exited(1).success());
    }
}
