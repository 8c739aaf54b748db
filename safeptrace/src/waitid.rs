/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! `waitid` based on the `SYS_waitid` syscall. Flags *must* be explicitly
//! provided: a combination of `WEXITED`, `WSTOPPED`, `WNOHANG`, `WNOWAIT` and
//! `__WALL`. `__WALL` is required to see clone children (threads) of a
//! tracee. See `waitid(2)` for more details.

use std::mem::MaybeUninit;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitPidFlag;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use super::Errno;

/// Which children to wait for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdType {
    /// One specific child.
    Pid(Pid),
    /// Any child in the given process group.
    Pgid(Pid),
    /// Any child.
    All,
}

#[inline]
fn si_status_signal(info: &libc::siginfo_t) -> Signal {
    let status = unsafe { info.si_status() };
    // The status can sometimes be 0 when using PTRACE_SEIZE, so we report a
    // bogus SIGSTOP instead.
    Signal::try_from(status & 0xff).unwrap_or(Signal::SIGSTOP)
}

#[inline]
fn si_status_event(info: &libc::siginfo_t) -> i32 {
    (unsafe { info.si_status() }) >> 8
}

/// Returns the raw siginfo from a waitid call.
fn waitid_si(id: IdType, flags: WaitPidFlag) -> Result<libc::siginfo_t, Errno> {
    let mut siginfo = MaybeUninit::<libc::siginfo_t>::zeroed();

    let (id_type, id) = match id {
        IdType::Pid(pid) => (libc::P_PID, pid.as_raw()),
        IdType::Pgid(pgid) => (libc::P_PGID, pgid.as_raw()),
        IdType::All => (libc::P_ALL, 0),
    };

    Errno::result(unsafe {
        libc::waitid(id_type, id as libc::id_t, siginfo.as_mut_ptr(), flags.bits())
    })?;

    Ok(unsafe { siginfo.assume_init() })
}

fn siginfo_to_waitstatus(si: libc::siginfo_t) -> Result<WaitStatus, Errno> {
    let pid = Pid::from_raw(unsafe { si.si_pid() });
    Ok(match si.si_code {
        libc::CLD_EXITED => WaitStatus::Exited(pid, unsafe { si.si_status() }),
        libc::CLD_KILLED => WaitStatus::Signaled(pid, si_status_signal(&si), false),
        libc::CLD_DUMPED => WaitStatus::Signaled(pid, si_status_signal(&si), true),
        libc::CLD_STOPPED => WaitStatus::Stopped(pid, si_status_signal(&si)),
        libc::CLD_TRAPPED if unsafe { si.si_status() } == 0x80 | Signal::SIGTRAP as i32 => {
            WaitStatus::PtraceSyscall(pid)
        }
        libc::CLD_TRAPPED => {
            let trap_sig = si_status_signal(&si);
            match si_status_event(&si) {
                0 => WaitStatus::Stopped(pid, trap_sig),
                event => WaitStatus::PtraceEvent(pid, trap_sig, event),
            }
        }
        libc::CLD_CONTINUED => WaitStatus::Continued(pid),
        _ => return Err(Errno::EINVAL),
    })
}

/// waitid as to SYS_waitid.
///
/// Returns `WaitStatus::StillAlive` when `WNOHANG` was given and nothing
/// changed state.
pub fn waitid(id: IdType, flags: WaitPidFlag) -> Result<WaitStatus, Errno> {
    let siginfo = waitid_si(id, flags)?;

    if unsafe { siginfo.si_pid() } == 0 {
        Ok(WaitStatus::StillAlive)
    } else {
        siginfo_to_waitstatus(siginfo)
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::Signal;
    use nix::unistd;
    use nix::unistd::ForkResult;

    use super::*;

    #[test]
    fn waitid_exited() {
        match unsafe { unistd::fork() }.unwrap() {
            ForkResult::Parent { child, .. } => {
                assert_eq!(
                    waitid(IdType::Pid(child), WaitPidFlag::WEXITED),
                    Ok(WaitStatus::Exited(child, 3))
                );
            }
            ForkResult::Child => {
                std::thread::sleep(std::time::Duration::from_millis(50));
                unsafe { libc::syscall(libc::SYS_exit_group, 3) };
            }
        }
    }

    #[test]
    fn waitid_killed_by_signal() {
        match unsafe { unistd::fork() }.unwrap() {
            ForkResult::Parent { child, .. } => {
                assert!(nix::sys::signal::kill(child, Signal::SIGINT).is_ok());
                assert_eq!(
                    waitid(IdType::Pid(child), WaitPidFlag::WEXITED),
                    Ok(WaitStatus::Signaled(child, Signal::SIGINT, false))
                );
            }
            ForkResult::Child => loop {
                std::thread::sleep(std::time::Duration::from_millis(1000));
            },
        }
    }

    #[test]
    fn waitid_nohang_then_echild() {
        match unsafe { unistd::fork() }.unwrap() {
            ForkResult::Parent { child, .. } => {
                let flags = WaitPidFlag::WEXITED | WaitPidFlag::__WALL;
                assert_eq!(
                    waitid(IdType::Pid(child), flags | WaitPidFlag::WNOHANG),
                    Ok(WaitStatus::StillAlive)
                );
                assert_eq!(
                    waitid(IdType::Pid(child), flags),
                    Ok(WaitStatus::Exited(child, 0))
                );
                assert_eq!(waitid(IdType::Pid(child), flags), Err(Errno::ECHILD));
            }
            ForkResult::Child => {
                std::thread::sleep(std::time::Duration::from_millis(200));
                unsafe { libc::syscall(libc::SYS_exit_group, 0) };
            }
        }
    }
}
