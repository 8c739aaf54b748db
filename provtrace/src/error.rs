/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use safeptrace::Pid;
use thiserror::Error;

pub use provtrace_syscalls::Errno;

/// A provtrace error. Faults of individual tracees are recorded as records
/// instead; an `Error` means the run as a whole could not be supervised.
#[derive(Error, Debug)]
pub enum Error {
    /// A low-level errno.
    #[error(transparent)]
    Errno(#[from] Errno),

    /// A ptrace operation failed outside of any particular tracee's handling.
    #[error(transparent)]
    Trace(#[from] safeptrace::Error),

    /// The root process could not be started.
    #[error(transparent)]
    Spawn(#[from] anyhow::Error),

    /// Supervision of the root process failed. Every remaining tracee was
    /// killed and the records up to this point are partial.
    #[error("lost control of root process {pid}: {source}")]
    RootLost {
        /// Pid of the root process.
        pid: Pid,
        /// What went wrong.
        source: safeptrace::Error,
    },

    /// The trace was aborted and the process tree was detached, so there is
    /// no exit status to report.
    #[error("tracing aborted; process tree of {pid} was detached")]
    Detached {
        /// Pid of the root process.
        pid: Pid,
    },

    /// The timeout expired and the process tree was killed.
    #[error("timed out after {timeout:?}; process tree of {pid} was killed")]
    TimedOut {
        /// Pid of the root process.
        pid: Pid,
        /// The configured timeout.
        timeout: std::time::Duration,
    },

    /// The event sink failed to accept a record. Every record after the
    /// failing one was dropped.
    #[error("event sink failed: {source}; {dropped} later records were dropped")]
    Sink {
        /// What the sink reported.
        #[source]
        source: std::io::Error,
        /// Number of records not handed to the sink after the failure.
        dropped: u64,
    },

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Self::Errno(Errno::new(err as i32))
    }
}
