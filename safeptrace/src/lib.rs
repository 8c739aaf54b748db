/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg(all(target_os = "linux", target_arch = "x86_64"))]

//! A safe, synchronous ptrace API. This API forces correct usage of ptrace in
//! that it is not possible to call ptrace on a process not in a stopped state.
//!
//! Every call must be made from the thread that seized the tracee. The
//! supervisor in `provtrace` is single threaded for exactly this reason.

mod exit_status;
mod memory;
mod regs;
mod waitid;

use core::mem::MaybeUninit;
use std::fmt;

use nix::sys::ptrace;
// Re-exports so that nothing else needs to depend on `nix` for these.
pub use nix::sys::ptrace::Options;
pub use nix::sys::signal::Signal;
use nix::sys::wait::WaitPidFlag;
use nix::sys::wait::WaitStatus;
pub use nix::unistd::Pid;
pub use syscalls::Errno;
use syscalls::Sysno;
use thiserror::Error;

pub use crate::exit_status::ExitStatus;
pub use crate::exit_status::SIGNALED_BIT;
pub use crate::regs::Regs;
use crate::waitid::IdType;
use crate::waitid::waitid;

/// An error that occurred during tracing.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    /// A low-level errno.
    #[error(transparent)]
    Errno(#[from] Errno),

    /// The tracee died unexpectedly. This should be handled gracefully by
    /// waiting for its death notification.
    #[error("tracee {0} is a zombie")]
    Died(Zombie),
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Self::Errno(Errno::new(err as i32))
    }
}

/// Indicates how a child was created (i.e., via `fork`, `vfork`, or `clone`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChildOp {
    /// Stop before return from `fork(2)` or `clone(2)` with the exit signal set
    /// to `SIGCHLD`.
    Fork,

    /// Stop before return from `vfork(2)` or `clone(2)` with the `CLONE_VFORK`
    /// flag.
    Vfork,

    /// Stop before return from any other `clone(2)`, including new threads.
    Clone,
}

/// A stop event. Documentation is from `ptrace(2)`.
#[derive(Debug, Eq, PartialEq)]
pub enum Event {
    /// Stop event after a new child has been created (i.e., via `fork`, `vfork`,
    /// or `clone`). The child is auto-attached and will report its own first
    /// stop separately, possibly before this one.
    NewChild(ChildOp, Pid),

    /// Stop before return from `execve(2)`. `PTRACE_GETEVENTMSG` returns the
    /// former thread ID, which differs from the stopped pid when a non-leader
    /// thread called `execve`.
    Exec(Pid),

    /// Stop before return from `vfork(2)` once the child unblocked the parent
    /// by exiting or execing.
    VforkDone,

    /// Stop before exit (including death from `exit_group(2)`), signal death,
    /// or exit caused by `execve(2)` in a multithreaded process. The tracee is
    /// still alive and its `/proc` entry is still readable.
    Exit,

    /// Stop triggered by a `seccomp(2)` rule. Never requested by this crate's
    /// users, but reported faithfully if it happens.
    Seccomp,

    /// Stop induced by `PTRACE_INTERRUPT`, a group-stop, or the initial stop
    /// of an auto-attached child of a seized tracee.
    Stop(Signal),

    /// The tracee was stopped at a syscall entry or exit.
    Syscall,

    /// The tracee was stopped by delivery of a signal.
    Signal(Signal),
}

impl Event {
    /// Converts a raw ptrace event and gets any associated data.
    fn from_ptrace_event(task: &Stopped, sig: Signal, event: i32) -> Result<Self, Error> {
        // The tracee is guaranteed to be in a ptrace-stop here.
        let child = || -> Result<Pid, Error> { Ok(Pid::from_raw(task.getevent()? as i32)) };
        match event {
            libc::PTRACE_EVENT_FORK => Ok(Self::NewChild(ChildOp::Fork, child()?)),
            libc::PTRACE_EVENT_VFORK => Ok(Self::NewChild(ChildOp::Vfork, child()?)),
            libc::PTRACE_EVENT_CLONE => Ok(Self::NewChild(ChildOp::Clone, child()?)),
            libc::PTRACE_EVENT_EXEC => Ok(Self::Exec(child()?)),
            libc::PTRACE_EVENT_VFORK_DONE => Ok(Self::VforkDone),
            libc::PTRACE_EVENT_EXIT => Ok(Self::Exit),
            libc::PTRACE_EVENT_SECCOMP => Ok(Self::Seccomp),
            libc::PTRACE_EVENT_STOP => Ok(Self::Stop(sig)),
            _ => Err(Error::Errno(Errno::EINVAL)),
        }
    }
}

/// The result of a wait. A process in this state is guaranteed to not be in
/// a running state.
///
/// Both `Clone` and `Copy` are intentionally not implemented. This is to enforce
/// type safety.
#[derive(Debug, Eq, PartialEq)]
pub enum Wait {
    /// The process is in a stopped state and thus only operations that can be
    /// done during a stopped state are allowed (i.e., ptrace operations).
    Stopped(Stopped, Event),

    /// The process has exited with an exit status.
    Exited(Pid, ExitStatus),
}

impl Wait {
    /// Returns the PID for this state.
    pub fn pid(&self) -> Pid {
        match self {
            Self::Stopped(Stopped(pid), _) => *pid,
            Self::Exited(pid, _) => *pid,
        }
    }
}

impl TryFrom<WaitStatus> for Wait {
    type Error = Error;

    /// Converts a `WaitStatus` to this type.
    ///
    /// Preconditions:
    /// The process must not be in a `StillAlive` or `Continued` state.
    fn try_from(wait_status: WaitStatus) -> Result<Self, Error> {
        Ok(match wait_status {
            WaitStatus::Exited(pid, code) => Self::Exited(pid, ExitStatus::Exited(code)),
            WaitStatus::Signaled(pid, sig, coredump) => {
                Self::Exited(pid, ExitStatus::Signaled(sig, coredump))
            }
            WaitStatus::Stopped(pid, sig) => Self::Stopped(Stopped(pid), Event::Signal(sig)),
            WaitStatus::PtraceEvent(pid, sig, event) => {
                let task = Stopped(pid);
                let event = Event::from_ptrace_event(&task, sig, event)?;
                Self::Stopped(task, event)
            }
            WaitStatus::PtraceSyscall(pid) => Self::Stopped(Stopped(pid), Event::Syscall),
            WaitStatus::Continued(_) | WaitStatus::StillAlive => {
                return Err(Error::Errno(Errno::EINVAL));
            }
        })
    }
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Stopped(stopped, event) => {
                write!(f, "pid {} stopped ({:?})", stopped.pid(), event)
            }
            Self::Exited(pid, exit_status) => write!(f, "pid {} exited ({:?})", pid, exit_status),
        }
    }
}

/// Helper function for waiting on one or more processes. Returns `None` if
/// `WaitPidFlag::WNOHANG` was specified and nothing changed state.
fn wait(id: IdType, flags: WaitPidFlag) -> Result<Option<WaitStatus>, Errno> {
    loop {
        match waitid(id, flags) {
            Ok(WaitStatus::StillAlive) => return Ok(None),
            Ok(status) => return Ok(Some(status)),
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Waits on `id`, mapping ECHILD ("nothing left to wait for") to `Ok(None)`.
/// This makes it easy to write a loop that ends when the tree is gone.
///
/// Unlike [`wait`], a signal caught by the calling thread is not retried: it
/// ends the wait with `EINTR`.
fn wait_any(id: IdType) -> Result<Option<Wait>, Error> {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WSTOPPED | WaitPidFlag::__WALL;

    match waitid(id, flags) {
        Ok(WaitStatus::StillAlive) => Err(Error::Errno(Errno::EAGAIN)),
        Ok(status) => Wait::try_from(status).map(Some),
        Err(Errno::ECHILD) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Waits for any child (process or thread) to change state, blocking until
/// the next event. Returns `Ok(None)` once there are no children left, and
/// `EINTR` when a signal handler ran on this thread in the meantime.
pub fn wait_all() -> Result<Option<Wait>, Error> {
    wait_any(IdType::All)
}

/// Waits for any child in a process group to change state, blocking until the
/// next event. Interrupted like [`wait_all`].
pub fn wait_group(pgid: Pid) -> Result<Option<Wait>, Error> {
    wait_any(IdType::Pgid(pgid))
}

/// A process that is in a stopped state and allows ptrace operations to be
/// performed.
#[derive(Debug, Hash, Eq, PartialEq)]
pub struct Stopped(Pid);

impl Stopped {
    /// Helper for converting from the Errno type.
    ///
    /// According to ptrace(2), any ptrace operation may return ESRCH for one
    /// of three reasons:
    ///  1. The process was observed to be in a stopped state and died
    ///     unexpectedly.
    ///  2. The process is not currently being traced by the caller.
    ///  3. The process is not in a stopped state.
    ///
    /// Reasons (2) and (3) are programmer errors that this API is designed to
    /// prevent, so ESRCH means the tracee has died while stopped. See "Death
    /// under ptrace" in `man 2 ptrace`.
    fn map_err(&self, err: Errno) -> Error {
        if err == Errno::ESRCH {
            Error::Died(Zombie::new(self.0))
        } else {
            Error::Errno(err)
        }
    }

    // Helper for converting from the nix::Error type.
    fn map_nix_err(&self, err: nix::Error) -> Error {
        self.map_err(Errno::new(err as i32))
    }

    /// Creates a new stopped state. This is useful when we know the process is
    /// in a stopped state already.
    ///
    /// Using this method is unsound because there is no check to verify that the
    /// pid really is in a stopped state. It is better to arrive at a stopped
    /// state via [`Running::wait`] or [`wait_all`].
    pub fn new_unchecked(pid: Pid) -> Self {
        Stopped(pid)
    }

    /// Returns the process ID of the tracee.
    pub fn pid(&self) -> Pid {
        self.0
    }

    /// Gets the general purpose registers with `PTRACE_GETREGSET`. Unlike
    /// `PTRACE_GETREGS` this reports the real register set size, which we
    /// check against the expected layout.
    pub fn getregs(&self) -> Result<Regs, Error> {
        let mut regs = MaybeUninit::<Regs>::uninit();

        let mut iov = libc::iovec {
            iov_base: regs.as_mut_ptr() as *mut libc::c_void,
            iov_len: core::mem::size_of::<Regs>(),
        };

        unsafe {
            syscalls::syscall!(
                Sysno::ptrace,
                libc::PTRACE_GETREGSET,
                self.0.as_raw(),
                libc::NT_PRSTATUS,
                &mut iov as *mut _
            )
        }
        .map_err(|err| self.map_err(err))?;

        if iov.iov_len != core::mem::size_of::<Regs>() {
            return Err(Error::Errno(Errno::EIO));
        }

        Ok(unsafe { regs.assume_init() })
    }

    /// Resumes the process and transitions it back to a running state.
    pub fn resume<T: Into<Option<Signal>>>(self, sig: T) -> Result<Running, Error> {
        ptrace::cont(self.0, sig).map_err(|err| self.map_nix_err(err))?;
        Ok(Running::new(self.0))
    }

    /// Like `resume`, but arranges for the tracee to be stopped at the next
    /// entry to or exit from a system call.
    pub fn syscall<T: Into<Option<Signal>>>(self, sig: T) -> Result<Running, Error> {
        ptrace::syscall(self.0, sig).map_err(|err| self.map_nix_err(err))?;
        Ok(Running::new(self.0))
    }

    /// Lets a tracee in group-stop wait for `SIGCONT` without running. Only
    /// valid for seized tracees that reported `Event::Stop` for a group-stop.
    pub fn listen(self) -> Result<Running, Error> {
        // nix doesn't provide `ptrace::listen`.
        Errno::result(unsafe {
            libc::ptrace(
                libc::PTRACE_LISTEN,
                self.0.as_raw(),
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        })
        .map_err(|err| self.map_err(err))?;
        Ok(Running::new(self.0))
    }

    /// Gets info about the signal that caused the process to be stopped.
    pub fn getsiginfo(&self) -> Result<libc::siginfo_t, Error> {
        ptrace::getsiginfo(self.0).map_err(|err| self.map_nix_err(err))
    }

    /// Retrieve a message about the ptrace event that just happened.
    ///
    /// It shouldn't be necessary to call this in most cases because `Event`
    /// provides the necessary context for certain ptrace events.
    pub fn getevent(&self) -> Result<i64, Error> {
        ptrace::getevent(self.0)
            .map(|msg| msg as i64)
            .map_err(|err| self.map_nix_err(err))
    }

    /// Detaches from and then resumes the stopped tracee.
    pub fn detach<T: Into<Option<Signal>>>(self, sig: T) -> Result<Running, Error> {
        ptrace::detach(self.0, sig).map_err(|err| self.map_nix_err(err))?;
        Ok(Running::new(self.0))
    }
}

/// A running child.
#[derive(Debug, Hash, Eq, PartialEq)]
pub struct Running(Pid);

impl Running {
    /// Creates a new running process. This is generally the entry point for a
    /// new process as soon as it is created.
    pub fn new(pid: Pid) -> Self {
        Running(pid)
    }

    /// Starts tracing `pid` without stopping it. Upon clone, fork, or vfork,
    /// the new child's first stop is an `Event::Stop` instead of
    /// `Event::Signal(Signal::SIGSTOP)`, and group-stops are reported as
    /// `Event::Stop` as well.
    pub fn seize(pid: Pid, options: Options) -> Result<Self, Errno> {
        ptrace::seize(pid, options).map_err(|err| Errno::new(err as i32))?;
        Ok(Running(pid))
    }

    /// Interrupts the running process, even if it is in the middle of a syscall.
    /// The next time the process is waited on, it reports `Event::Stop`.
    ///
    /// # Limitations
    ///
    /// This only works for processes being traced via `Running::seize`.
    pub fn interrupt(&self) -> Result<(), Errno> {
        // nix doesn't provide `ptrace::interrupt` yet, so we need to roll our
        // own.
        Errno::result(unsafe {
            libc::ptrace(
                libc::PTRACE_INTERRUPT,
                self.0.as_raw(),
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        })
        .map(drop)
    }

    /// Returns the pid of the running process.
    pub fn pid(&self) -> Pid {
        self.0
    }

    /// Blocks until a state change occurs. This may transition the process to
    /// either a stopped state or exited state, but never a running state.
    pub fn wait(self) -> Result<Wait, Error> {
        match wait(
            IdType::Pid(self.0),
            WaitPidFlag::WEXITED | WaitPidFlag::WSTOPPED | WaitPidFlag::__WALL,
        )? {
            Some(status) => Wait::try_from(status),
            // Not possible without WNOHANG.
            None => Err(Error::Errno(Errno::ECHILD)),
        }
    }

    /// Like `wait`, but resumes past every stop until `pred` accepts one.
    /// Signals are delivered unchanged while skipping.
    pub fn wait_until<F>(mut self, mut pred: F) -> Result<Wait, Error>
    where
        F: FnMut(&Event) -> bool,
    {
        loop {
            match self.wait()? {
                Wait::Stopped(stopped, event) => {
                    if pred(&event) {
                        break Ok(Wait::Stopped(stopped, event));
                    } else if let Event::Signal(sig) = event {
                        self = stopped.resume(Some(sig))?;
                    } else {
                        self = stopped.resume(None)?;
                    }
                }
                exited => break Ok(exited),
            }
        }
    }
}

/// A process that is no longer running, but hasn't yet fully exited. The only
/// thing a zombie can do is exit.
#[derive(Debug, Hash, Eq, PartialEq)]
pub struct Zombie(Running);

impl Zombie {
    /// Creates a new instance.
    fn new(pid: Pid) -> Self {
        Zombie(Running(pid))
    }

    /// Returns the PID of the zombie.
    pub fn pid(&self) -> Pid {
        self.0.pid()
    }
}

impl fmt::Display for Zombie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pid())
    }
}

/// These tests are meant to test this API but also to show how ptrace works.
#[cfg(test)]
mod test {
    use nix::sys::signal;
    use nix::unistd::ForkResult;
    use nix::unistd::fork;

    use super::*;

    // Traces a closure in a forked process. The forked process starts in a
    // stopped state so that ptrace options may be set.
    fn trace<F>(f: F, options: Options) -> Result<(Pid, Stopped), Error>
    where
        F: FnOnce() -> i32,
    {
        match unsafe { fork() }? {
            ForkResult::Parent { child, .. } => {
                let running = Running::seize(child, options)?;

                // Keep consuming events until we reach a SIGSTOP or group stop.
                let stopped = match running.wait_until(|event| {
                    matches!(event, Event::Signal(Signal::SIGSTOP) | Event::Stop(_))
                })? {
                    Wait::Stopped(stopped, _) => stopped,
                    task => panic!("Got unexpected exit: {:?}", task),
                };

                Ok((stopped.pid(), stopped))
            }
            ForkResult::Child => {
                // Create a new process group so we can wait on this process and
                // every child more efficiently.
                let _ = unsafe { libc::setpgid(0, 0) };

                // Suppress core dumps for testing purposes.
                let limit = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                let _ = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };

                // PTRACE_SEIZE is inherently racy, so we stop the child
                // process here.
                signal::raise(Signal::SIGSTOP).unwrap();

                let exit_code = f();

                // Note: We can't use the normal exit function here because we
                // don't want to call atexit handlers since `execve` was never
                // called.
                unsafe { ::libc::_exit(exit_code) };
            }
        }
    }

    #[test]
    fn basic() -> Result<(), Box<dyn std::error::Error + 'static>> {
        let (pid, tracee) = trace(|| 42, Options::empty())?;
        assert_eq!(
            tracee.resume(None)?.wait()?,
            Wait::Exited(pid, ExitStatus::Exited(42))
        );

        Ok(())
    }

    #[test]
    fn stop_on_exit() -> Result<(), Box<dyn std::error::Error + 'static>> {
        let (pid, tracee) = trace(|| 42, Options::PTRACE_O_TRACEEXIT)?;

        let (stopped, event) = match tracee.resume(None)?.wait()? {
            Wait::Stopped(stopped, event) => (stopped, event),
            exited => panic!("unexpected {}", exited),
        };
        assert_eq!(event, Event::Exit);
        assert_eq!(stopped.getevent()?, 42 << 8);

        assert_eq!(
            stopped.resume(None)?.wait()?,
            Wait::Exited(pid, ExitStatus::Exited(42))
        );

        Ok(())
    }

    #[test]
    fn syscall_stops_come_in_pairs() -> Result<(), Box<dyn std::error::Error + 'static>> {
        let (_pid, tracee) = trace(
            || {
                unsafe { libc::getppid() };
                0
            },
            Options::PTRACE_O_TRACESYSGOOD,
        )?;

        let mut running = tracee.syscall(None)?;
        let mut getppid = Vec::new();
        let status = loop {
            match running.wait()? {
                Wait::Stopped(stopped, Event::Syscall) => {
                    let regs = stopped.getregs()?;
                    if regs.orig_rax == libc::SYS_getppid as u64 {
                        getppid.push(regs.rax as i64);
                    }
                    running = stopped.syscall(None)?;
                }
                Wait::Stopped(stopped, _) => running = stopped.syscall(None)?,
                Wait::Exited(_, status) => break status,
            }
        };

        assert_eq!(status, ExitStatus::Exited(0));
        // rax is -ENOSYS at entry and the parent pid at exit.
        assert_eq!(getppid.len(), 2);
        assert_eq!(getppid[0], -(libc::ENOSYS as i64));
        assert_eq!(getppid[1], nix::unistd::getpid().as_raw() as i64);

        Ok(())
    }

    #[test]
    fn fork_event_reports_child() -> Result<(), Box<dyn std::error::Error + 'static>> {
        let (pid, tracee) = trace(
            || match unsafe { fork() } {
                Ok(ForkResult::Child) => unsafe { libc::_exit(7) },
                Ok(ForkResult::Parent { child }) => {
                    let mut status = 0;
                    unsafe { libc::waitpid(child.as_raw(), &mut status, 0) };
                    libc::WEXITSTATUS(status)
                }
                Err(_) => 1,
            },
            Options::PTRACE_O_TRACEFORK | Options::PTRACE_O_EXITKILL,
        )?;

        tracee.resume(None)?;

        let mut child = None;
        let mut exited = Vec::new();
        while let Some(wait) = wait_group(pid)? {
            match wait {
                Wait::Stopped(stopped, Event::NewChild(op, new)) => {
                    assert_eq!(op, ChildOp::Fork);
                    child = Some(new);
                    stopped.resume(None)?;
                }
                Wait::Stopped(stopped, Event::Signal(sig)) => {
                    stopped.resume(Some(sig))?;
                }
                Wait::Stopped(stopped, _) => {
                    stopped.resume(None)?;
                }
                Wait::Exited(pid, status) => exited.push((pid, status)),
            }
        }

        let child = child.expect("no fork event");
        assert_eq!(
            exited,
            vec![(child, ExitStatus::Exited(7)), (pid, ExitStatus::Exited(7))]
        );

        Ok(())
    }

    #[test]
    fn group_stop_is_reported_as_stop() -> Result<(), Box<dyn std::error::Error + 'static>> {
        let (pid, tracee) = trace(
            || {
                signal::raise(Signal::SIGTSTP).unwrap();
                5
            },
            Options::empty(),
        )?;

        let (stopped, event) = match tracee.resume(None)?.wait()? {
            Wait::Stopped(stopped, event) => (stopped, event),
            exited => panic!("unexpected {}", exited),
        };
        assert_eq!(event, Event::Signal(Signal::SIGTSTP));

        // Delivering SIGTSTP puts the tracee into group-stop.
        let (stopped, event) = match stopped.resume(Some(Signal::SIGTSTP))?.wait()? {
            Wait::Stopped(stopped, event) => (stopped, event),
            exited => panic!("unexpected {}", exited),
        };
        assert!(matches!(event, Event::Stop(_)));

        assert_eq!(
            stopped.resume(None)?.wait()?,
            Wait::Exited(pid, ExitStatus::Exited(5))
        );

        Ok(())
    }

    /// Tests that trying to trace from another thread does not work.
    #[test]
    fn trace_from_another_thread() -> Result<(), Box<dyn std::error::Error + 'static>> {
        let (pid, tracee) = trace(|| 42, Options::empty())?;

        assert_eq!(
            std::thread::spawn(move || tracee.resume(None))
                .join()
                .unwrap(),
            // The process didn't actually die, this is just how ESRCH is
            // interpreted.
            Err(Error::Died(Zombie::new(pid)))
        );

        assert_eq!(
            Stopped(pid).resume(None)?.wait()?,
            Wait::Exited(pid, ExitStatus::Exited(42))
        );

        Ok(())
    }

    #[test]
    fn trace_killed_by_signal() -> Result<(), Box<dyn std::error::Error + 'static>> {
        let (pid, tracee) = trace(
            || {
                signal::raise(Signal::SIGTERM).unwrap();
                unreachable!()
            },
            Options::PTRACE_O_EXITKILL,
        )?;

        let (stopped, event) = match tracee.resume(None)?.wait()? {
            Wait::Stopped(stopped, event) => (stopped, event),
            exited => panic!("unexpected {}", exited),
        };
        assert_eq!(event, Event::Signal(Signal::SIGTERM));

        assert_eq!(
            stopped.resume(Some(Signal::SIGTERM))?.wait()?,
            Wait::Exited(pid, ExitStatus::Signaled(Signal::SIGTERM, false))
        );

        Ok(())
    }
}
