/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Best-effort queries of `/proc/{pid}`. These are only used to fill in what
//! the trace itself cannot tell, so every failure is reported as `None` or an
//! `io::Error` and never aborts tracing.

use std::fs;
use std::io;
use std::path::PathBuf;

use safeptrace::Pid;

/// The parts of `/proc/{pid}/status` we care about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Status {
    /// Thread group (process) id.
    pub tgid: Pid,
    /// Parent process id.
    pub ppid: Pid,
}

impl Status {
    /// Reads `/proc/{pid}/status`.
    pub fn read(pid: Pid) -> io::Result<Self> {
        Self::parse(&fs::read_to_string(format!("/proc/{}/status", pid))?)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed status"))
    }

    fn parse(status: &str) -> Option<Self> {
        let field = |name: &str| -> Option<Pid> {
            status.lines().find_map(|line| {
                let value = line.strip_prefix(name)?.strip_prefix(':')?;
                value.trim().parse().ok().map(Pid::from_raw)
            })
        };
        Some(Self {
            tgid: field("Tgid")?,
            ppid: field("PPid")?,
        })
    }

    /// The task that created `pid`: its thread group leader when `pid` is a
    /// thread, otherwise its parent.
    pub fn creator(&self, pid: Pid) -> Pid {
        if self.tgid != pid {
            self.tgid
        } else {
            self.ppid
        }
    }
}

fn clock_ticks() -> u64 {
    match unsafe { libc::sysconf(libc::_SC_CLK_TCK) } {
        ticks if ticks > 0 => ticks as u64,
        _ => 100,
    }
}

/// User plus system time of `pid` in milliseconds, from `/proc/{pid}/stat`.
pub fn cpu_time_ms(pid: Pid) -> Option<u64> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_cpu_ticks(&stat).map(|ticks| ticks * 1000 / clock_ticks())
}

fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    // The command name may contain spaces and parentheses; everything after
    // the last ')' is space separated, starting with field 3 (state).
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace().skip(11);
    let utime: u64 = fields.next()?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

/// Working directory of `pid`.
pub fn cwd(pid: Pid) -> Option<PathBuf> {
    fs::read_link(format!("/proc/{}/cwd", pid)).ok()
}

/// Path that descriptor `fd` of `pid` currently refers to. Sockets, pipes and
/// deleted files have no usable path.
pub fn fd_path(pid: Pid, fd: i32) -> Option<PathBuf> {
    let path = fs::read_link(format!("/proc/{}/fd/{}", pid, fd)).ok()?;
    path.is_absolute().then_some(path)
}

/// The executable of `pid`.
pub fn exe(pid: Pid) -> Option<PathBuf> {
    fs::read_link(format!("/proc/{}/exe", pid)).ok()
}

/// The arguments of `pid`.
pub fn cmdline(pid: Pid) -> Option<Vec<String>> {
    let raw = fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    Some(
        raw.split(|&b| b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect(),
    )
}
