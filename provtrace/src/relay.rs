/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The signal relay: classifies every wait result into exactly one kind of
//! [`Stop`] and decides how the tracee continues afterwards.
//!
//! Under `PTRACE_SEIZE` a syscall-stop is reported the same way at entry and
//! exit, so which one it is comes from the phase the tracee was in. Signals
//! that are not ours are always re-injected unchanged.

use safeptrace::ChildOp;
use safeptrace::Event;
use safeptrace::ExitStatus;
use safeptrace::Pid;
use safeptrace::Signal;
use safeptrace::Wait;

/// Where a tracee is in its lifecycle, as far as classification cares.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Registered, first stop not seen yet.
    Attaching,
    /// Running in user space.
    Running,
    /// Between a syscall's entry and exit stops.
    InSyscall,
    /// Exit stop seen.
    Exited,
}

/// A classified wait result.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stop {
    /// First stop of a pid nobody has announced yet. It is held until its
    /// creator's fork event (or death) resolves who it belongs to.
    Early,
    /// First stop of an announced child.
    Initial,
    /// Syscall entry.
    SyscallEntry,
    /// Syscall exit.
    SyscallExit,
    /// Group-stop caused by a stopping signal. The tracee stays stopped until
    /// `SIGCONT`.
    GroupStop(Signal),
    /// A `PTRACE_INTERRUPT` stop, or another event stop that carries no
    /// signal.
    Interrupt,
    /// A signal is about to be delivered to the tracee.
    Signal(Signal),
    /// Successful exec. `former` is the pid the exec'ing task had before.
    Exec {
        /// Pre-exec pid of the task.
        former: Pid,
    },
    /// The tracee created a child.
    NewChild {
        /// How.
        op: ChildOp,
        /// The child's pid.
        child: Pid,
    },
    /// The tracee is about to exit and is still inspectable.
    ExitPending,
    /// A vfork child released its parent.
    VforkDone,
    /// A seccomp stop.
    Seccomp,
    /// The tracee is gone.
    Death(ExitStatus),
}

/// How a stopped tracee continues.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Resume {
    /// Run to the next syscall boundary, delivering the signal if any.
    Syscall(Option<Signal>),
    /// Stay in group-stop, but report `SIGCONT` and other events.
    Listen,
    /// Stay stopped; someone else will resume it later.
    Hold,
}

impl Stop {
    /// How to continue after this stop. `None` if there is nothing left to
    /// continue.
    pub fn resume(&self) -> Option<Resume> {
        Some(match self {
            Self::Early => Resume::Hold,
            Self::GroupStop(_) => Resume::Listen,
            Self::Signal(sig) => Resume::Syscall(Some(*sig)),
            Self::Death(_) => return None,
            _ => Resume::Syscall(None),
        })
    }
}

fn is_stopping_signal(sig: Signal) -> bool {
    matches!(
        sig,
        Signal::SIGSTOP | Signal::SIGTSTP | Signal::SIGTTIN | Signal::SIGTTOU
    )
}

/// Classifies a wait result. `phase` is `None` for a pid that is not in the
/// process table. `is_group_stop` is only consulted for `PTRACE_EVENT_STOP`
/// stops with a stopping signal, and should ask the kernel
/// (`PTRACE_GETSIGINFO` fails with `EINVAL` for group-stops).
pub fn classify<F>(phase: Option<Phase>, wait: &Wait, is_group_stop: F) -> Stop
where
    F: FnOnce() -> bool,
{
    let event = match wait {
        Wait::Exited(_, status) => return Stop::Death(*status),
        Wait::Stopped(_, event) => event,
    };

    let phase = match phase {
        None => return Stop::Early,
        Some(phase) => phase,
    };

    match event {
        Event::Stop(_) if phase == Phase::Attaching => Stop::Initial,
        Event::Stop(sig) if is_stopping_signal(*sig) && is_group_stop() => Stop::GroupStop(*sig),
        Event::Stop(_) => Stop::Interrupt,
        Event::Syscall if phase == Phase::InSyscall => Stop::SyscallExit,
        Event::Syscall => Stop::SyscallEntry,
        Event::Signal(sig) => Stop::Signal(*sig),
        Event::Exec(former) => Stop::Exec { former: *former },
        Event::NewChild(op, child) => Stop::NewChild {
            op: *op,
            child: *child,
        },
        Event::Exit => Stop::ExitPending,
        Event::VforkDone => Stop::VforkDone,
        Event::Seccomp => Stop::Seccomp,
    }
}
