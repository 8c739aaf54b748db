/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use provtrace_memory::RemoteAddr;
use thiserror::Error;

use crate::Abi;
use crate::ArgType;
use crate::Effect;
use crate::Errno;
use crate::RawSyscall;
use crate::SyscallKind;
use crate::X32_REJECTED;
use crate::errno_from_ret;
use crate::lookup;
use crate::syscall_name;

/// A directory descriptor argument of an `*at()` call.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DirFd {
    /// `AT_FDCWD`: relative to the working directory.
    Cwd,
    /// Relative to the directory open as this descriptor.
    Fd(i32),
}

impl DirFd {
    fn from_raw(fd: i32) -> Self {
        if fd == libc::AT_FDCWD {
            DirFd::Cwd
        } else {
            DirFd::Fd(fd)
        }
    }
}

/// A typed syscall argument.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum Arg {
    Path(Option<RemoteAddr>),
    Fd(i32),
    DirFd(DirFd),
    Flags(u64),
    Mode(u32),
    Int(i64),
    Ptr(Option<RemoteAddr>),
    StrArray(Option<RemoteAddr>),
}

/// A syscall that could not be decoded.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    /// No handler exists for this number under this convention.
    #[error("unhandled {abi} syscall {nr}")]
    Unknown {
        /// Calling convention.
        abi: Abi,
        /// Syscall number.
        nr: u64,
    },

    /// The register snapshot cannot be a valid call under this convention.
    #[error("malformed {abi} syscall {nr}: {reason}")]
    Malformed {
        /// Calling convention.
        abi: Abi,
        /// Syscall number.
        nr: u64,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl DecodeError {
    /// The number that failed to decode.
    pub fn nr(&self) -> u64 {
        match self {
            Self::Unknown { nr, .. } | Self::Malformed { nr, .. } => *nr,
        }
    }

    /// The convention of the stop that failed to decode.
    pub fn abi(&self) -> Abi {
        match self {
            Self::Unknown { abi, .. } | Self::Malformed { abi, .. } => *abi,
        }
    }

    /// Best-effort name of the syscall.
    pub fn name(&self) -> Option<&'static str> {
        syscall_name(self.abi(), self.nr())
    }
}

/// A decoded syscall: its name, its typed arguments and, once the exit stop
/// has been seen, its return value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Syscall {
    /// Convention it was made through.
    pub abi: Abi,
    /// Number under that convention.
    pub nr: u64,
    /// Name under that convention.
    pub name: &'static str,
    /// Semantic handler.
    pub kind: SyscallKind,
    /// Arguments, typed by the handler's signature.
    pub args: Vec<Arg>,
    /// Sign-extended return value; `None` until the syscall returned.
    pub ret: Option<i64>,
}

impl Syscall {
    /// Decodes a raw syscall. Unknown numbers and snapshots that cannot be
    /// valid for the convention are reported as errors so they can be
    /// recorded instead of dropped.
    pub fn decode(raw: &RawSyscall) -> Result<Self, DecodeError> {
        if raw.abi == Abi::X32 && X32_REJECTED.contains(&raw.nr) {
            return Err(DecodeError::Malformed {
                abi: raw.abi,
                nr: raw.nr,
                reason: "64-bit only entry point used through x32",
            });
        }

        let entry = lookup(raw.abi, raw.nr).ok_or(DecodeError::Unknown {
            abi: raw.abi,
            nr: raw.nr,
        })?;

        Ok(Self::with_kind(raw, entry.name, entry.kind))
    }

    /// Types the arguments of `raw` according to `kind`. Used for calls whose
    /// real identity is only known after looking at memory, like the
    /// multiplexed `socketcall`.
    pub fn with_kind(raw: &RawSyscall, name: &'static str, kind: SyscallKind) -> Self {
        let args = kind
            .signature()
            .iter()
            .enumerate()
            .map(|(index, ty)| match ty {
                ArgType::Path => Arg::Path(raw.arg_ptr(index)),
                ArgType::Fd => Arg::Fd(raw.arg_int(index)),
                ArgType::DirFd => Arg::DirFd(DirFd::from_raw(raw.arg_int(index))),
                ArgType::Flags => Arg::Flags(raw.arg_ulong(index)),
                ArgType::Mode => Arg::Mode(raw.arg(index) as u32),
                ArgType::Int => Arg::Int(raw.arg_long(index)),
                ArgType::Ptr => Arg::Ptr(raw.arg_ptr(index)),
                ArgType::StrArray => Arg::StrArray(raw.arg_ptr(index)),
            })
            .collect();

        Self {
            abi: raw.abi,
            nr: raw.nr,
            name,
            kind,
            args,
            ret: None,
        }
    }

    /// Attaches the return register of the exit stop.
    pub fn with_return(mut self, rax: u64) -> Self {
        self.ret = Some(self.abi.return_value(rax));
        self
    }

    /// The result of the call, if it returned.
    pub fn result(&self) -> Option<Result<u64, Errno>> {
        self.ret.map(errno_from_ret)
    }

    /// True if the call returned successfully.
    pub fn succeeded(&self) -> bool {
        matches!(self.result(), Some(Ok(_)))
    }

    /// The filesystem effect of the call.
    pub fn effect(&self) -> Effect {
        self.kind.effect()
    }

    /// Returns argument `index`.
    pub fn arg(&self, index: usize) -> Option<Arg> {
        self.args.get(index).copied()
    }

    /// Returns argument `index` if it is an integer of any kind.
    pub fn int(&self, index: usize) -> Option<i64> {
        match self.arg(index)? {
            Arg::Fd(fd) => Some(fd as i64),
            Arg::DirFd(DirFd::Fd(fd)) => Some(fd as i64),
            Arg::DirFd(DirFd::Cwd) => Some(libc::AT_FDCWD as i64),
            Arg::Flags(flags) => Some(flags as i64),
            Arg::Mode(mode) => Some(mode as i64),
            Arg::Int(value) => Some(value),
            Arg::Path(_) | Arg::Ptr(_) | Arg::StrArray(_) => None,
        }
    }

    /// Returns argument `index` if it is a pointer of any kind.
    pub fn pointer(&self, index: usize) -> Option<RemoteAddr> {
        match self.arg(index)? {
            Arg::Path(ptr) | Arg::Ptr(ptr) | Arg::StrArray(ptr) => ptr,
            _ => None,
        }
    }

    /// Returns argument `index` if it is a directory descriptor.
    pub fn dirfd(&self, index: usize) -> Option<DirFd> {
        match self.arg(index)? {
            Arg::DirFd(dirfd) => Some(dirfd),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_openat() {
        let raw = RawSyscall::new(
            Abi::X86_64,
            257,
            [
                libc::AT_FDCWD as i64 as u64,
                0x1000,
                (libc::O_CREAT | libc::O_WRONLY) as u64,
                0o644,
                0,
                0,
            ],
        );
        let syscall = Syscall::decode(&raw).unwrap();
        assert_eq!(syscall.name, "openat");
        assert_eq!(syscall.kind, SyscallKind::OpenAt);
        assert_eq!(syscall.dirfd(0), Some(DirFd::Cwd));
        assert_eq!(syscall.pointer(1).map(|p| p.as_raw()), Some(0x1000));
        assert_eq!(syscall.int(2), Some((libc::O_CREAT | libc::O_WRONLY) as i64));
        assert_eq!(syscall.arg(3), Some(Arg::Mode(0o644)));
        assert_eq!(syscall.result(), None);

        let syscall = syscall.with_return(-2i64 as u64);
        assert_eq!(syscall.result(), Some(Err(Errno::ENOENT)));
        assert!(!syscall.succeeded());
    }

    #[test]
    fn same_number_different_abi() {
        // 11 is execve on i386 but munmap on x86_64.
        let raw = RawSyscall::new(Abi::I386, 11, [0x1000, 0x2000, 0x3000, 0, 0, 0]);
        assert_eq!(Syscall::decode(&raw).unwrap().kind, SyscallKind::Execve);

        let raw = RawSyscall::new(Abi::X86_64, 11, [0x1000, 0x2000, 0, 0, 0, 0]);
        assert_eq!(
            Syscall::decode(&raw),
            Err(DecodeError::Unknown {
                abi: Abi::X86_64,
                nr: 11
            })
        );
        assert_eq!(
            Syscall::decode(&raw).unwrap_err().name(),
            Some("munmap")
        );
    }

    #[test]
    fn x32_rejects_64_bit_execve() {
        let raw = RawSyscall::new(Abi::X32, 59, [0; 6]);
        assert!(matches!(
            Syscall::decode(&raw),
            Err(DecodeError::Malformed { nr: 59, .. })
        ));
    }

    #[test]
    fn i386_dirfd_is_sign_extended() {
        let raw = RawSyscall::new(Abi::I386, 296, [0xffff_ff9c, 0x1000, 0o755, 0, 0, 0]);
        let syscall = Syscall::decode(&raw).unwrap();
        assert_eq!(syscall.kind, SyscallKind::MkdirAt);
        assert_eq!(syscall.dirfd(0), Some(DirFd::Cwd));

        let syscall = syscall.with_return(0xffff_ffef);
        assert_eq!(syscall.result(), Some(Err(Errno::EEXIST)));
    }
}
