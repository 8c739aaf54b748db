/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! What syscalls mean for the record stream and the process table.
//!
//! Everything that lives in tracee memory (paths, argv, socket addresses) is
//! read at the entry stop, while the arguments are still there, and resolved
//! against the working directory and descriptors as they were at that moment.
//! Nothing is recorded until the exit stop says the call succeeded.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use provtrace_syscalls::Abi;
use provtrace_syscalls::ArgType;
use provtrace_syscalls::DecodeError;
use provtrace_syscalls::DirFd;
use provtrace_syscalls::Errno;
use provtrace_syscalls::Family;
use provtrace_syscalls::MemoryAccess;
use provtrace_syscalls::PointerWidth;
use provtrace_syscalls::RawSyscall;
use provtrace_syscalls::Syscall;
use provtrace_syscalls::SyscallKind;
use provtrace_syscalls::protocol_name;
use provtrace_syscalls::read_sockaddr;
use provtrace_syscalls::syscall_name;
use provtrace_syscalls::unpack_socketcall;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::config::Config;
use crate::path;
use crate::path::Base;
use crate::path::Resolved;
use crate::proc;
use crate::record::AccessMode;
use crate::record::ProcessId;
use crate::record::RecordKind;
use crate::table::FdTarget;
use crate::table::Tracee;

/// Most entries of an argv or envp array we read.
const MAX_ARGS: usize = 1 << 17;

/// What the entry stop of a syscall captured for its exit stop.
#[derive(Debug)]
pub struct Pending {
    syscall: Syscall,
    /// Resolved path arguments, by argument index.
    paths: Vec<(usize, Result<Resolved, Errno>)>,
    argv: Option<Result<Vec<String>, Errno>>,
    envp: Option<Result<Vec<String>, Errno>>,
    /// `clone(2)` flags for the task creating calls, `open_how.flags` for
    /// `openat2`.
    flags: Option<u64>,
    /// Peer address of `connect`.
    peer: Option<Result<(Family, String), Errno>>,
}

impl Pending {
    /// The decoded syscall.
    pub fn syscall(&self) -> &Syscall {
        &self.syscall
    }

    /// The `clone(2)` flags of a task creating syscall.
    pub fn clone_flags(&self) -> Option<u64> {
        if self.syscall.kind.is_clone() {
            self.flags
        } else {
            None
        }
    }

    fn path(&self, index: usize) -> Option<&Result<Resolved, Errno>> {
        self.paths
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, resolved)| resolved)
    }
}

/// Outcome of a syscall-entry stop.
#[derive(Debug)]
pub enum Entry {
    /// A syscall without effects we track.
    Ignored,
    /// The exit stop has work to do.
    Pending(Box<Pending>),
    /// The syscall could not be decoded.
    Unknown(RecordKind),
}

fn unknown_access(id: ProcessId, syscall: &Syscall, reason: String) -> RecordKind {
    RecordKind::UnknownAccess {
        id,
        abi: syscall.abi,
        nr: syscall.nr,
        name: Some(syscall.name.to_owned()),
        reason,
    }
}

fn read_path<M: MemoryAccess>(
    memory: &M,
    syscall: &Syscall,
    index: usize,
) -> Result<Vec<u8>, Errno> {
    let addr = syscall.pointer(index).ok_or(Errno::EFAULT)?;
    Ok(memory
        .read_cstring_with_limit(addr, libc::PATH_MAX as usize)?
        .into_bytes())
}

fn read_strings<M: MemoryAccess>(
    memory: &M,
    syscall: &Syscall,
    index: usize,
) -> Result<Vec<String>, Errno> {
    match syscall.pointer(index) {
        // Linux accepts a NULL argv or envp as an empty one.
        None => Ok(Vec::new()),
        Some(addr) => Ok(memory
            .read_cstring_array(addr, syscall.abi.pointer_width(), MAX_ARGS)?
            .into_iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect()),
    }
}

/// Reads argv, and envp when it is recorded, of an exec call whose argv is
/// argument `index`.
fn exec_args<M: MemoryAccess>(
    memory: &M,
    syscall: &Syscall,
    index: usize,
    config: &Config,
) -> (
    Option<Result<Vec<String>, Errno>>,
    Option<Result<Vec<String>, Errno>>,
) {
    (
        Some(read_strings(memory, syscall, index)),
        config
            .record_environment
            .then(|| read_strings(memory, syscall, index + 1)),
    )
}

/// True for the stat family called with `AT_EMPTY_PATH` and an empty path,
/// which is how `fstat` is implemented these days. It inspects a descriptor
/// that is already open and names no path.
fn looks_at_descriptor<M: MemoryAccess>(memory: &M, syscall: &Syscall) -> bool {
    let (index, flags) = match syscall.kind {
        SyscallKind::StatAt | SyscallKind::FaccessAt2 => (1, syscall.int(3)),
        SyscallKind::Statx => (1, syscall.int(2)),
        _ => return false,
    };
    has_flag(flags.unwrap_or(0) as u64, libc::AT_EMPTY_PATH)
        && read_path(memory, syscall, index).is_ok_and(|path| path.is_empty())
}

/// Resolves `raw` the way the kernel would for `tracee` and `dirfd`.
fn resolve_at(tracee: &Tracee, dirfd: DirFd, raw: &Path) -> Resolved {
    match dirfd {
        DirFd::Cwd => path::resolve(Base::Cwd(&tracee.cwd.borrow()), raw),
        DirFd::Fd(fd) => {
            let fds = tracee.fds.borrow();
            match fds.path(fd) {
                Some(dir) => path::resolve(Base::Tracked(dir), raw),
                None if raw.is_absolute() => path::resolve(Base::Cwd(Path::new("/")), raw),
                None => {
                    let guess = proc::fd_path(tracee.pid, fd);
                    warn!(
                        "[{}] resolve_at: descriptor {} of unknown origin, guessing {:?}",
                        tracee.pid, fd, guess
                    );
                    path::resolve(Base::Untracked { fd, guess }, raw)
                }
            }
        }
    }
}

/// Handles a syscall-entry stop. Reads and resolves whatever the exit stop
/// will need.
pub fn syscall_entry<M: MemoryAccess>(
    memory: &M,
    tracee: &Tracee,
    raw: &RawSyscall,
    config: &Config,
) -> Entry {
    let syscall = match Syscall::decode(raw) {
        Ok(syscall) => syscall,
        // Known to the kernel, just not interesting.
        Err(DecodeError::Unknown { abi, nr }) if syscall_name(abi, nr).is_some() => {
            return Entry::Ignored;
        }
        Err(err) => {
            warn!("[{}] syscall_entry: {}", tracee.pid, err);
            return Entry::Unknown(RecordKind::UnknownAccess {
                id: tracee.id,
                abi: err.abi(),
                nr: err.nr(),
                name: err.name().map(str::to_owned),
                reason: err.to_string(),
            });
        }
    };

    let syscall = if syscall.kind == SyscallKind::Socketcall {
        match unpack_socketcall(&syscall, memory) {
            Ok(Some(unpacked)) => unpacked,
            Ok(None) => return Entry::Ignored,
            Err(errno) => {
                warn!("[{}] syscall_entry: bad socketcall: {}", tracee.pid, errno);
                return Entry::Unknown(unknown_access(
                    tracee.id,
                    &syscall,
                    format!("unreadable socketcall arguments: {}", errno),
                ));
            }
        }
    } else {
        syscall
    };

    trace!("[{}] syscall_entry: {}", tracee.pid, syscall.display(memory));

    if looks_at_descriptor(memory, &syscall) {
        return Entry::Ignored;
    }

    let signature = syscall.kind.signature();
    let paths = signature
        .iter()
        .enumerate()
        .filter(|(_, ty)| **ty == ArgType::Path)
        .map(|(index, _)| {
            // A path is relative to the directory descriptor right before it,
            // if there is one.
            let dirfd = index
                .checked_sub(1)
                .and_then(|prev| syscall.dirfd(prev))
                .unwrap_or(DirFd::Cwd);
            let resolved = read_path(memory, &syscall, index)
                .map(|bytes| resolve_at(tracee, dirfd, path::from_bytes(&bytes)));
            (index, resolved)
        })
        .collect();

    let (argv, envp) = match syscall.kind {
        SyscallKind::Execve => exec_args(memory, &syscall, 1, config),
        SyscallKind::ExecveAt => exec_args(memory, &syscall, 2, config),
        _ => (None, None),
    };

    let read_u64 = |index: usize| {
        syscall
            .pointer(index)
            .and_then(|addr| memory.read_word(addr, PointerWidth::W64).ok())
    };
    let flags = match syscall.kind {
        SyscallKind::Clone => syscall.int(0).map(|flags| flags as u64),
        SyscallKind::Clone3 => read_u64(0),
        SyscallKind::OpenAt2 => read_u64(2),
        SyscallKind::Fork => Some(libc::SIGCHLD as u64),
        SyscallKind::Vfork => Some((libc::CLONE_VM | libc::CLONE_VFORK | libc::SIGCHLD) as u64),
        _ => None,
    };

    let peer = (syscall.kind == SyscallKind::Connect).then(|| {
        let addr = syscall.pointer(1).ok_or(Errno::EFAULT)?;
        let len = syscall.int(2).unwrap_or(0).max(0) as usize;
        read_sockaddr(memory, addr, len)
    });

    Entry::Pending(Box::new(Pending {
        syscall,
        paths,
        argv,
        envp,
        flags,
        peer,
    }))
}

fn has_flag(flags: u64, flag: libc::c_int) -> bool {
    flags & flag as u64 != 0
}

fn host_is_dir(path: &Path, follow: bool) -> bool {
    let metadata = if follow {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    };
    metadata.is_ok_and(|m| m.is_dir())
}

fn open_mode(flags: u64) -> AccessMode {
    if has_flag(flags, libc::O_PATH) {
        return AccessMode::STAT;
    }
    let mut mode = match flags as libc::c_int & libc::O_ACCMODE {
        libc::O_WRONLY => AccessMode::WRITE,
        libc::O_RDWR => AccessMode::READ | AccessMode::WRITE,
        _ => AccessMode::READ,
    };
    if has_flag(flags, libc::O_TRUNC) || has_flag(flags, libc::O_CREAT) {
        mode |= AccessMode::WRITE;
    }
    mode
}

/// Collects the records of one exit stop.
struct Records<'a> {
    tracee: &'a Tracee,
    config: &'a Config,
    records: Vec<RecordKind>,
}

impl<'a> Records<'a> {
    fn new(tracee: &'a Tracee, config: &'a Config) -> Self {
        Self {
            tracee,
            config,
            records: Vec::new(),
        }
    }

    /// A resolved path argument. An unreadable one on a call that succeeded is
    /// recorded as an unknown access.
    fn path<'p>(&mut self, pending: &'p Pending, index: usize) -> Option<&'p Resolved> {
        match pending.path(index)? {
            Ok(resolved) => Some(resolved),
            Err(errno) => {
                warn!(
                    "[{}] {}: unreadable path argument {}: {}",
                    self.tracee.pid, pending.syscall.name, index, errno
                );
                self.records.push(unknown_access(
                    self.tracee.id,
                    &pending.syscall,
                    format!("unreadable path argument {}: {}", index, errno),
                ));
                None
            }
        }
    }

    fn file(&mut self, resolved: &Resolved, mode: AccessMode, is_directory: bool) {
        if path::is_excluded(&resolved.path, &self.config.excluded_prefixes) {
            trace!(
                "[{}] not recording excluded {}",
                self.tracee.pid,
                resolved.path.display()
            );
            return;
        }
        self.records.push(RecordKind::FileAccessed {
            id: self.tracee.id,
            path: resolved.path.clone(),
            mode,
            is_directory,
            origin_unknown: resolved.origin_unknown,
        });
    }

    /// Records path argument `index` with `mode`. `is_dir` decides whether it
    /// is a directory, given the path.
    fn access<F>(&mut self, pending: &Pending, index: usize, mode: AccessMode, is_dir: F)
    where
        F: FnOnce(&Path) -> bool,
    {
        if let Some(resolved) = self.path(pending, index) {
            let directory = is_dir(&resolved.path);
            self.file(resolved, mode, directory);
        }
    }

    fn connection(&mut self, inbound: bool, fd: i32, peer: Option<(Family, String)>) {
        let socket = match self.tracee.fds.borrow().get(fd).map(|e| e.target.clone()) {
            Some(FdTarget::Socket { family, socktype }) => Some((family, socktype)),
            _ => None,
        };
        let (family, address) = match (peer, socket) {
            (Some((family, address)), _) => (family, address),
            (None, Some((family, _))) => (family, String::new()),
            (None, None) => (Family::Other(0), String::new()),
        };
        let protocol = match socket {
            Some((_, socktype)) => protocol_name(family, socktype),
            None => "unknown".to_owned(),
        };
        warn!(
            "[{}] {} network dependency: {} {} {}",
            self.tracee.pid,
            if inbound { "incoming" } else { "outgoing" },
            family,
            protocol,
            address
        );
        self.records.push(RecordKind::Connection {
            id: self.tracee.id,
            inbound,
            family,
            protocol,
            address,
        });
    }
}

/// Handles the exit stop of a syscall whose entry produced `pending`. `rax`
/// is the raw return register.
pub fn syscall_exit<M: MemoryAccess>(
    memory: &M,
    tracee: &Tracee,
    pending: Pending,
    rax: u64,
    config: &Config,
) -> Vec<RecordKind> {
    use SyscallKind::*;

    let kind = pending.syscall.kind;

    // The registers at a sigreturn exit are the restored frame, not a return
    // value. Exec was already accounted for by its event.
    if kind.is_sigreturn() || kind.is_exec() {
        return Vec::new();
    }

    let syscall = pending.syscall.clone().with_return(rax);
    trace!("[{}] syscall_exit: {}", tracee.pid, syscall.display(memory));

    let ret = match syscall.result() {
        Some(Ok(ret)) => ret,
        Some(Err(errno)) => {
            let mut out = Records::new(tracee, config);
            match (kind, errno) {
                // The descriptor is gone even if close reports an error.
                (Close, errno) if errno != Errno::EBADF => {
                    tracee.fds.borrow_mut().remove(syscall.int(0).unwrap_or(-1) as i32);
                }
                // A non-blocking connect that is under way.
                (Connect, Errno::EINPROGRESS) => {
                    let peer = pending.peer.and_then(Result::ok);
                    out.connection(false, syscall.int(0).unwrap_or(-1) as i32, peer);
                }
                _ => {}
            }
            return out.records;
        }
        None => return Vec::new(),
    };

    let mut out = Records::new(tracee, config);
    let int = |index: usize| syscall.int(index).unwrap_or(0);
    let fd = |index: usize| syscall.int(index).unwrap_or(-1) as i32;

    match kind {
        Open | OpenAt | OpenAt2 | Creat => {
            let (index, flags) = match kind {
                Open => (0, int(1) as u64),
                OpenAt => (1, int(2) as u64),
                OpenAt2 => (1, pending.flags.unwrap_or(0)),
                _ => (
                    0,
                    (libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC) as u64,
                ),
            };
            if let Some(resolved) = out.path(&pending, index) {
                let directory =
                    has_flag(flags, libc::O_DIRECTORY) || host_is_dir(&resolved.path, true);
                out.file(resolved, open_mode(flags), directory);
                tracee.fds.borrow_mut().insert(
                    ret as i32,
                    FdTarget::Path {
                        path: resolved.path.clone(),
                        directory,
                    },
                    has_flag(flags, libc::O_CLOEXEC),
                );
            }
        }
        Mkdir => out.access(&pending, 0, AccessMode::WRITE, |_| true),
        MkdirAt => out.access(&pending, 1, AccessMode::WRITE, |_| true),
        Symlink => out.access(&pending, 1, AccessMode::WRITE | AccessMode::LINK, |_| false),
        SymlinkAt => out.access(&pending, 2, AccessMode::WRITE | AccessMode::LINK, |_| false),
        Link | LinkAt => {
            let (old, new) = if kind == Link { (0, 1) } else { (1, 3) };
            out.access(&pending, old, AccessMode::STAT, |p| host_is_dir(p, false));
            out.access(&pending, new, AccessMode::WRITE, |p| host_is_dir(p, false));
        }
        Rename | RenameAt | RenameAt2 => {
            let (old, new) = if kind == Rename { (0, 1) } else { (1, 3) };
            let directory = pending
                .path(new)
                .and_then(|r| r.as_ref().ok())
                .is_some_and(|r| host_is_dir(&r.path, false));
            out.access(&pending, old, AccessMode::WRITE, |_| directory);
            out.access(&pending, new, AccessMode::WRITE, |_| directory);
        }
        Truncate => out.access(&pending, 0, AccessMode::WRITE, |_| false),
        Unlink => out.access(&pending, 0, AccessMode::WRITE, |_| false),
        UnlinkAt => {
            let directory = has_flag(int(2) as u64, libc::AT_REMOVEDIR);
            out.access(&pending, 1, AccessMode::WRITE, |_| directory);
        }
        Rmdir => out.access(&pending, 0, AccessMode::WRITE, |_| true),
        Stat | Lstat | StatAt | Statx | Access | FaccessAt | FaccessAt2 => {
            let (index, flags) = match kind {
                Stat | Access => (0, 0),
                Lstat => (0, libc::AT_SYMLINK_NOFOLLOW as u64),
                StatAt | FaccessAt2 => (1, int(3) as u64),
                Statx => (1, int(2) as u64),
                _ => (1, 0),
            };
            let follow = !has_flag(flags, libc::AT_SYMLINK_NOFOLLOW);
            out.access(&pending, index, AccessMode::STAT, |p| host_is_dir(p, follow));
        }
        Readlink => out.access(&pending, 0, AccessMode::STAT | AccessMode::LINK, |_| false),
        ReadlinkAt => out.access(&pending, 1, AccessMode::STAT | AccessMode::LINK, |_| false),
        Chdir => {
            if let Some(resolved) = out.path(&pending, 0) {
                *tracee.cwd.borrow_mut() = resolved.path.clone();
                out.file(resolved, AccessMode::WORKING_DIR, true);
            }
        }
        Fchdir => {
            let fd = fd(0);
            let tracked = tracee.fds.borrow().path(fd).map(Path::to_path_buf);
            let resolved = match tracked {
                Some(path) => Some(Resolved {
                    path,
                    origin_unknown: false,
                }),
                None => proc::cwd(tracee.pid).map(|path| Resolved {
                    path,
                    origin_unknown: true,
                }),
            };
            match resolved {
                Some(resolved) => {
                    *tracee.cwd.borrow_mut() = resolved.path.clone();
                    out.file(&resolved, AccessMode::WORKING_DIR, true);
                }
                None => {
                    warn!("[{}] fchdir: cannot tell where {} points", tracee.pid, fd);
                    out.records.push(unknown_access(
                        tracee.id,
                        &syscall,
                        format!("working directory of descriptor {} is unknown", fd),
                    ));
                }
            }
        }
        Close => {
            tracee.fds.borrow_mut().remove(fd(0));
        }
        Dup => tracee.fds.borrow_mut().dup(fd(0), ret as i32, false),
        Dup2 => {
            if fd(0) != fd(1) {
                tracee.fds.borrow_mut().dup(fd(0), fd(1), false);
            }
        }
        Dup3 => tracee
            .fds
            .borrow_mut()
            .dup(fd(0), fd(1), has_flag(int(2) as u64, libc::O_CLOEXEC)),
        Fcntl => match int(1) as libc::c_int {
            libc::F_DUPFD => tracee.fds.borrow_mut().dup(fd(0), ret as i32, false),
            libc::F_DUPFD_CLOEXEC => tracee.fds.borrow_mut().dup(fd(0), ret as i32, true),
            libc::F_SETFD => tracee
                .fds
                .borrow_mut()
                .set_cloexec(fd(0), int(2) as libc::c_int & libc::FD_CLOEXEC != 0),
            _ => {}
        },
        Socket => {
            let socktype = int(1) as libc::c_int;
            tracee.fds.borrow_mut().insert(
                ret as i32,
                FdTarget::Socket {
                    family: Family::from_raw(int(0) as u16),
                    socktype: socktype & 0xf,
                },
                socktype & libc::SOCK_CLOEXEC != 0,
            );
        }
        Connect => {
            let peer = pending.peer.and_then(Result::ok);
            out.connection(false, fd(0), peer);
        }
        Accept | Accept4 => {
            let peer = match (syscall.pointer(1), syscall.pointer(2)) {
                (Some(addr), Some(len)) => memory
                    .read_word(len, PointerWidth::W32)
                    .and_then(|len| read_sockaddr(memory, addr, len as usize))
                    .ok(),
                _ => None,
            };
            out.connection(true, fd(0), peer);

            let listening = tracee.fds.borrow().get(fd(0)).map(|e| e.target.clone());
            if let Some(target) = listening {
                let cloexec = kind == Accept4 && has_flag(int(3) as u64, libc::SOCK_CLOEXEC);
                tracee.fds.borrow_mut().insert(ret as i32, target, cloexec);
            }
        }
        // Task creation is handled by the fork events, exit by the exit stop
        // and death. The multiplexer was unpacked at entry.
        Clone | Clone3 | Fork | Vfork | Exit | ExitGroup | Socketcall => {}
        RtSigreturn | Sigreturn | Execve | ExecveAt => {}
    }

    out.records
}

/// Accounts for a successful exec of `tracee` into an image using `abi`.
/// `pending` is what the entry stop of the exec call captured, if it was seen.
pub fn exec(
    tracee: &mut Tracee,
    pending: Option<Box<Pending>>,
    abi: Abi,
    config: &Config,
) -> Vec<RecordKind> {
    let exec_seq = tracee.exec_count;
    tracee.exec_count += 1;
    tracee.abi = abi;

    // The kernel gives the new image a private copy of the descriptor table.
    let fds = tracee.fds.borrow().after_exec();
    tracee.fds = Rc::new(RefCell::new(fds));

    let pid = tracee.pid;
    let (binary, argv, envp) = match pending.map(|p| *p).filter(|p| p.syscall.kind.is_exec()) {
        Some(pending) => {
            let index = if pending.syscall.kind == SyscallKind::ExecveAt {
                1
            } else {
                0
            };
            let binary = match pending.path(index) {
                Some(Ok(resolved)) => resolved.clone(),
                _ => Resolved {
                    path: proc::exe(pid).unwrap_or_default(),
                    origin_unknown: true,
                },
            };
            let argv = match pending.argv {
                Some(Ok(argv)) => argv,
                _ => proc::cmdline(pid).unwrap_or_default(),
            };
            (binary, argv, pending.envp.and_then(Result::ok))
        }
        None => {
            warn!("[{}] exec: entry stop was not seen, asking /proc", pid);
            (
                Resolved {
                    path: proc::exe(pid).unwrap_or_default(),
                    origin_unknown: true,
                },
                proc::cmdline(pid).unwrap_or_default(),
                None,
            )
        }
    };

    info!(
        "[{}] exec #{} of process {}: {} {:?}",
        pid,
        exec_seq,
        tracee.id,
        binary.path.display(),
        argv
    );

    let mut out = Records::new(tracee, config);
    out.file(&binary, AccessMode::READ, false);
    out.records.push(RecordKind::Executed {
        id: tracee.id,
        binary: binary.path,
        argv,
        envp: if config.record_environment { envp } else { None },
        cwd: tracee.cwd(),
        exec_seq,
    });
    out.records
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::path::PathBuf;

    use provtrace_syscalls::LocalMemory;

    use super::*;
    use crate::table::Creation;
    use crate::table::FdTable;
    use crate::table::TraceeState;

    fn tracee(cwd: &str) -> Tracee {
        let pid = nix::unistd::getpid();
        Tracee {
            pid,
            tgid: pid,
            id: ProcessId(1),
            parent: None,
            creation: Creation::Root,
            state: TraceeState::Running,
            abi: Abi::X86_64,
            cwd: Rc::new(RefCell::new(PathBuf::from(cwd))),
            fds: Rc::new(RefCell::new(FdTable::default())),
            exec_count: 0,
            cpu_time_ms: None,
        }
    }

    fn ptr<T>(p: *const T) -> u64 {
        p as usize as u64
    }

    /// Runs a syscall through its entry and exit stops.
    fn run(
        tracee: &Tracee,
        config: &Config,
        nr: u64,
        args: [u64; 6],
        ret: i64,
    ) -> Vec<RecordKind> {
        let memory = LocalMemory::new();
        let raw = RawSyscall::new(Abi::X86_64, nr, args);
        match syscall_entry(&memory, tracee, &raw, config) {
            Entry::Pending(pending) => syscall_exit(&memory, tracee, *pending, ret as u64, config),
            Entry::Unknown(record) => vec![record],
            Entry::Ignored => Vec::new(),
        }
    }

    fn file(path: &str, mode: AccessMode, is_directory: bool) -> RecordKind {
        RecordKind::FileAccessed {
            id: ProcessId(1),
            path: PathBuf::from(path),
            mode,
            is_directory,
            origin_unknown: false,
        }
    }

    const AT_FDCWD: u64 = libc::AT_FDCWD as i64 as u64;

    #[test]
    fn mkdir_then_create() {
        let config = Config::default();
        let t = tracee("/nonexistent-root");
        let dir = CString::new("/nonexistent-root/x").unwrap();
        let file_name = CString::new("x/f").unwrap();

        let records = run(&t, &config, 83, [ptr(dir.as_ptr()), 0o755, 0, 0, 0, 0], 0);
        assert_eq!(records, vec![file("/nonexistent-root/x", AccessMode::WRITE, true)]);

        let flags = (libc::O_CREAT | libc::O_WRONLY) as u64;
        let records = run(
            &t,
            &config,
            257,
            [AT_FDCWD, ptr(file_name.as_ptr()), flags, 0o644, 0, 0],
            3,
        );
        assert_eq!(records, vec![file("/nonexistent-root/x/f", AccessMode::WRITE, false)]);
        assert_eq!(
            t.fds.borrow().path(3),
            Some(Path::new("/nonexistent-root/x/f"))
        );
    }

    #[test]
    fn create_for_reading_is_a_write() {
        let config = Config::default();
        let t = tracee("/nonexistent-root");
        let name = CString::new("new").unwrap();
        let flags = (libc::O_CREAT | libc::O_RDONLY) as u64;

        let records = run(
            &t,
            &config,
            257,
            [AT_FDCWD, ptr(name.as_ptr()), flags, 0o644, 0, 0],
            4,
        );
        assert_eq!(
            records,
            vec![file(
                "/nonexistent-root/new",
                AccessMode::READ | AccessMode::WRITE,
                false
            )]
        );
    }

    #[test]
    fn relative_to_directory_descriptor() {
        let config = Config::default();
        let t = tracee("/a/b");
        let dir = CString::new("/x/y").unwrap();
        let rel = CString::new("c/d").unwrap();
        let dir_flags = (libc::O_RDONLY | libc::O_DIRECTORY) as u64;

        let records = run(&t, &config, 257, [AT_FDCWD, ptr(dir.as_ptr()), dir_flags, 0, 0, 0], 5);
        assert_eq!(records, vec![file("/x/y", AccessMode::READ, true)]);

        let records = run(&t, &config, 257, [5, ptr(rel.as_ptr()), 0, 0, 0, 0], 6);
        assert_eq!(records, vec![file("/x/y/c/d", AccessMode::READ, false)]);

        let records = run(&t, &config, 257, [AT_FDCWD, ptr(rel.as_ptr()), 0, 0, 0, 0], 7);
        assert_eq!(records, vec![file("/a/b/c/d", AccessMode::READ, false)]);
    }

    #[test]
    fn unknown_descriptor_is_flagged() {
        let config = Config::default();
        let t = tracee("/a");
        let rel = CString::new("c").unwrap();
        // Not open in this process, so not even /proc knows it.
        let records = run(&t, &config, 257, [9999, ptr(rel.as_ptr()), 0, 0, 0, 0], 3);
        assert_eq!(
            records,
            vec![RecordKind::FileAccessed {
                id: ProcessId(1),
                path: PathBuf::from("/.provtrace-unknown-fd/9999/c"),
                mode: AccessMode::READ,
                is_directory: false,
                origin_unknown: true,
            }]
        );
    }

    #[test]
    fn failed_calls_record_nothing() {
        let config = Config::default();
        let t = tracee("/a");
        let name = CString::new("missing").unwrap();
        let records = run(&t, &config, 2, [ptr(name.as_ptr()), 0, 0, 0, 0, 0], -2);
        assert!(records.is_empty());
        assert!(t.fds.borrow().is_empty());
    }

    #[test]
    fn excluded_paths_still_update_descriptors() {
        let config = Config::default();
        let t = tracee("/a");
        let name = CString::new("/proc/self/maps").unwrap();
        let records = run(&t, &config, 2, [ptr(name.as_ptr()), 0, 0, 0, 0, 0], 4);
        assert!(records.is_empty());
        assert_eq!(t.fds.borrow().path(4), Some(Path::new("/proc/self/maps")));
    }

    #[test]
    fn chdir_moves_cwd() {
        let config = Config::default();
        let t = tracee("/a");
        let name = CString::new("../b").unwrap();
        let records = run(&t, &config, 80, [ptr(name.as_ptr()), 0, 0, 0, 0, 0], 0);
        assert_eq!(records, vec![file("/b", AccessMode::WORKING_DIR, true)]);
        assert_eq!(t.cwd(), PathBuf::from("/b"));
    }

    #[test]
    fn descriptor_bookkeeping() {
        let config = Config::default();
        let t = tracee("/");
        let name = CString::new("/etc").unwrap();
        let flags = (libc::O_RDONLY | libc::O_CLOEXEC) as u64;
        run(&t, &config, 2, [ptr(name.as_ptr()), flags, 0, 0, 0, 0], 3);
        assert!(t.fds.borrow().get(3).unwrap().cloexec);

        // dup2(3, 10), fcntl(3, F_DUPFD, 20) = 20, close(3)
        run(&t, &config, 33, [3, 10, 0, 0, 0, 0], 10);
        run(&t, &config, 72, [3, libc::F_DUPFD as u64, 20, 0, 0, 0], 20);
        run(&t, &config, 3, [3, 0, 0, 0, 0, 0], 0);

        let fds = t.fds.borrow();
        assert_eq!(fds.path(3), None);
        assert_eq!(fds.path(10), Some(Path::new("/etc")));
        assert!(!fds.get(10).unwrap().cloexec);
        assert_eq!(fds.path(20), Some(Path::new("/etc")));
    }

    #[test]
    fn fstat_is_not_a_path_access() {
        let config = Config::default();
        let t = tracee("/");
        let empty = CString::new("").unwrap();
        let records = run(
            &t,
            &config,
            262,
            [1, ptr(empty.as_ptr()), 0, libc::AT_EMPTY_PATH as u64, 0, 0],
            0,
        );
        assert!(records.is_empty());
    }

    #[test]
    fn uninteresting_and_undecodable_calls() {
        let config = Config::default();
        let t = tracee("/");
        // read(0, buf, 1)
        assert!(run(&t, &config, 0, [0; 6], 1).is_empty());

        let memory = LocalMemory::new();
        let raw = RawSyscall::new(Abi::X32, 59, [0; 6]);
        match syscall_entry(&memory, &t, &raw, &config) {
            Entry::Unknown(RecordKind::UnknownAccess { nr, abi, .. }) => {
                assert_eq!(nr, 59);
                assert_eq!(abi, Abi::X32);
            }
            other => panic!("unexpected {:?}", other),
        }

        let raw = RawSyscall::new(Abi::X86_64, 100_000, [0; 6]);
        assert!(matches!(
            syscall_entry(&memory, &t, &raw, &config),
            Entry::Unknown(RecordKind::UnknownAccess { name: None, .. })
        ));
    }

    #[test]
    fn connect_is_a_network_dependency() {
        let config = Config::default();
        let t = tracee("/");
        // socket(AF_INET, SOCK_STREAM | SOCK_CLOEXEC, 0) = 3
        run(
            &t,
            &config,
            41,
            [
                libc::AF_INET as u64,
                (libc::SOCK_STREAM | libc::SOCK_CLOEXEC) as u64,
                0,
                0,
                0,
                0,
            ],
            3,
        );

        let mut addr = (libc::AF_INET as u16).to_ne_bytes().to_vec();
        addr.extend_from_slice(&80u16.to_be_bytes());
        addr.extend_from_slice(&[93, 184, 216, 34]);
        addr.extend_from_slice(&[0; 8]);

        let einprogress = -(libc::EINPROGRESS as i64);
        let records = run(
            &t,
            &config,
            42,
            [3, ptr(addr.as_ptr()), addr.len() as u64, 0, 0, 0],
            einprogress,
        );
        assert_eq!(
            records,
            vec![RecordKind::Connection {
                id: ProcessId(1),
                inbound: false,
                family: Family::Ipv4,
                protocol: "TCP".to_owned(),
                address: "93.184.216.34:80".to_owned(),
            }]
        );
    }

    #[test]
    fn exec_records_image_and_drops_cloexec() {
        let mut config = Config::default();
        config.record_environment = true;
        let mut t = tracee("/work");
        t.fds.borrow_mut().insert(
            3,
            FdTarget::Path {
                path: PathBuf::from("/keep"),
                directory: false,
            },
            false,
        );
        t.fds.borrow_mut().insert(
            4,
            FdTarget::Path {
                path: PathBuf::from("/drop"),
                directory: false,
            },
            true,
        );

        let binary = CString::new("/bin/true").unwrap();
        let arg0 = CString::new("true").unwrap();
        let argv = [ptr(arg0.as_ptr()), 0];
        let env = CString::new("A=1").unwrap();
        let envp = [ptr(env.as_ptr()), 0];

        let memory = LocalMemory::new();
        let raw = RawSyscall::new(
            Abi::X86_64,
            59,
            [ptr(binary.as_ptr()), ptr(argv.as_ptr()), ptr(envp.as_ptr()), 0, 0, 0],
        );
        let pending = match syscall_entry(&memory, &t, &raw, &config) {
            Entry::Pending(pending) => pending,
            other => panic!("unexpected {:?}", other),
        };

        let records = exec(&mut t, Some(pending), Abi::I386, &config);
        assert_eq!(
            records,
            vec![
                file("/bin/true", AccessMode::READ, false),
                RecordKind::Executed {
                    id: ProcessId(1),
                    binary: PathBuf::from("/bin/true"),
                    argv: vec!["true".to_owned()],
                    envp: Some(vec!["A=1".to_owned()]),
                    cwd: PathBuf::from("/work"),
                    exec_seq: 0,
                }
            ]
        );
        assert_eq!(t.exec_count, 1);
        assert_eq!(t.abi, Abi::I386);
        assert_eq!(t.fds.borrow().path(3), Some(Path::new("/keep")));
        assert_eq!(t.fds.borrow().path(4), None);
    }
}
