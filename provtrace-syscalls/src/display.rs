/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use core::fmt;

use provtrace_memory::MemoryAccess;

use crate::Arg;
use crate::DirFd;
use crate::Syscall;
use crate::SyscallKind;

/// Strings longer than this are elided when displayed.
const MAX_DISPLAY_STRING: usize = 256;

/// Arrays longer than this are elided when displayed.
const MAX_DISPLAY_ARRAY: usize = 32;

/// A wrapper that combines an address space and a syscall. This is useful for
/// displaying the contents of syscall pointer inputs.
pub struct Display<'a, M> {
    /// How we access memory.
    memory: &'a M,

    /// The syscall we need to display.
    syscall: &'a Syscall,
}

impl Syscall {
    /// Returns an object that implements `std::fmt::Display`, showing path and
    /// string array arguments read from `memory`, and the return value when
    /// there is one.
    pub fn display<'a, M: MemoryAccess>(&'a self, memory: &'a M) -> Display<'a, M> {
        Display {
            memory,
            syscall: self,
        }
    }
}

// Open flags worth naming, besides the access mode.
const OPEN_FLAGS: &[(i32, &str)] = &[
    (libc::O_CREAT, "O_CREAT"),
    (libc::O_EXCL, "O_EXCL"),
    (libc::O_NOCTTY, "O_NOCTTY"),
    (libc::O_TRUNC, "O_TRUNC"),
    (libc::O_APPEND, "O_APPEND"),
    (libc::O_NONBLOCK, "O_NONBLOCK"),
    (libc::O_DIRECTORY, "O_DIRECTORY"),
    (libc::O_NOFOLLOW, "O_NOFOLLOW"),
    (libc::O_CLOEXEC, "O_CLOEXEC"),
    (libc::O_PATH, "O_PATH"),
    (libc::O_TMPFILE & !libc::O_DIRECTORY, "O_TMPFILE"),
];

fn fmt_open_flags(flags: u64, f: &mut fmt::Formatter) -> fmt::Result {
    let flags = flags as i32;
    f.write_str(match flags & libc::O_ACCMODE {
        libc::O_WRONLY => "O_WRONLY",
        libc::O_RDWR => "O_RDWR",
        _ => "O_RDONLY",
    })?;
    let mut rest = flags & !libc::O_ACCMODE;
    for (bit, name) in OPEN_FLAGS {
        if rest & bit == *bit && *bit != 0 {
            write!(f, "|{}", name)?;
            rest &= !bit;
        }
    }
    if rest != 0 {
        write!(f, "|{:#x}", rest)?;
    }
    Ok(())
}

fn fmt_string<M: MemoryAccess>(
    memory: &M,
    addr: provtrace_memory::RemoteAddr,
    f: &mut fmt::Formatter,
) -> fmt::Result {
    match memory.read_cstring(addr) {
        Ok(s) => {
            let bytes = s.as_bytes();
            if bytes.len() > MAX_DISPLAY_STRING {
                write!(
                    f,
                    "{:?}...",
                    String::from_utf8_lossy(&bytes[..MAX_DISPLAY_STRING])
                )
            } else {
                write!(f, "{:?}", String::from_utf8_lossy(bytes))
            }
        }
        Err(_) => write!(f, "{:?}", addr),
    }
}

impl<'a, M: MemoryAccess> Display<'a, M> {
    fn fmt_arg(&self, index: usize, arg: Arg, f: &mut fmt::Formatter) -> fmt::Result {
        match arg {
            Arg::Path(None) | Arg::Ptr(None) | Arg::StrArray(None) => f.write_str("NULL"),
            Arg::Path(Some(addr)) => fmt_string(self.memory, addr, f),
            Arg::Ptr(Some(addr)) => write!(f, "{:?}", addr),
            Arg::StrArray(Some(addr)) => {
                let width = self.syscall.abi.pointer_width();
                match self
                    .memory
                    .read_pointer_array(addr, width, MAX_DISPLAY_ARRAY)
                {
                    Ok(pointers) => {
                        f.write_str("[")?;
                        for (i, ptr) in pointers.into_iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            fmt_string(self.memory, ptr, f)?;
                        }
                        f.write_str("]")
                    }
                    Err(_) => write!(f, "{:?}", addr),
                }
            }
            Arg::Fd(fd) => write!(f, "{}", fd),
            Arg::DirFd(DirFd::Cwd) => f.write_str("AT_FDCWD"),
            Arg::DirFd(DirFd::Fd(fd)) => write!(f, "{}", fd),
            Arg::Flags(flags) => match (self.syscall.kind, index) {
                (SyscallKind::Open, 1) | (SyscallKind::OpenAt, 2) => fmt_open_flags(flags, f),
                _ => write!(f, "{:#x}", flags),
            },
            Arg::Mode(mode) => write!(f, "{:#o}", mode),
            Arg::Int(value) => write!(f, "{}", value),
        }
    }
}

impl<'a, M: MemoryAccess> fmt::Display for Display<'a, M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.syscall.name)?;
        for (index, arg) in self.syscall.args.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            self.fmt_arg(index, *arg, f)?;
        }
        f.write_str(")")?;

        match self.syscall.result() {
            None => Ok(()),
            Some(Ok(value)) => write!(f, " = {}", value),
            Some(Err(errno)) => write!(f, " = -1 {}", errno),
        }
    }
}
