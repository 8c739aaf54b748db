/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use provtrace_memory::PointerWidth;
use provtrace_memory::RemoteAddr;

use crate::Abi;
use crate::Errno;
use crate::X32_SYSCALL_BIT;

/// Largest errno the kernel encodes in a syscall return value.
const MAX_ERRNO: i64 = 4095;

/// The number and six argument registers of one syscall, as the calling
/// convention laid them out. For 32-bit conventions every argument is already
/// truncated to 32 bits.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RawSyscall {
    /// The calling convention the syscall was made through.
    pub abi: Abi,
    /// Syscall number with the x32 marker bit removed.
    pub nr: u64,
    /// Argument registers in order.
    pub args: [u64; 6],
}

impl RawSyscall {
    /// Creates a raw syscall from its parts.
    pub fn new(abi: Abi, nr: u64, args: [u64; 6]) -> Self {
        Self { abi, nr, args }
    }

    /// Extracts the syscall from the registers of a syscall-entry stop.
    pub fn from_regs(regs: &libc::user_regs_struct) -> Self {
        let abi = Abi::detect(regs);
        match abi {
            Abi::X86_64 => Self::new(
                abi,
                regs.orig_rax,
                [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9],
            ),
            Abi::X32 => Self::new(
                abi,
                regs.orig_rax & !X32_SYSCALL_BIT,
                [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9],
            ),
            Abi::I386 => Self::new(
                abi,
                regs.orig_rax & 0xffff_ffff,
                [regs.rbx, regs.rcx, regs.rdx, regs.rsi, regs.rdi, regs.rbp]
                    .map(|reg| reg & 0xffff_ffff),
            ),
        }
    }

    /// Returns argument `index` unchanged.
    pub fn arg(&self, index: usize) -> u64 {
        self.args[index]
    }

    /// Returns argument `index` as a C `int`.
    pub fn arg_int(&self, index: usize) -> i32 {
        self.args[index] as u32 as i32
    }

    /// Returns argument `index` as a C `long`, which is 32 bits wide under
    /// both 32-bit conventions.
    pub fn arg_long(&self, index: usize) -> i64 {
        match self.abi.pointer_width() {
            PointerWidth::W32 => self.arg_int(index) as i64,
            PointerWidth::W64 => self.args[index] as i64,
        }
    }

    /// Returns argument `index` as a C `unsigned long`.
    pub fn arg_ulong(&self, index: usize) -> u64 {
        match self.abi.pointer_width() {
            PointerWidth::W32 => self.args[index] & 0xffff_ffff,
            PointerWidth::W64 => self.args[index],
        }
    }

    /// Returns argument `index` as a pointer, or `None` for NULL.
    pub fn arg_ptr(&self, index: usize) -> Option<RemoteAddr> {
        RemoteAddr::from_raw(self.arg_ulong(index) as usize)
    }
}

/// Splits a sign-extended syscall return value into a result or an errno.
pub fn errno_from_ret(ret: i64) -> Result<u64, Errno> {
    if (-MAX_ERRNO..0).contains(&ret) {
        Err(Errno::new(-ret as i32))
    } else {
        Ok(ret as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs() -> libc::user_regs_struct {
        let mut regs: libc::user_regs_struct = unsafe { core::mem::zeroed() };
        regs.rdi = 1;
        regs.rsi = 2;
        regs.rdx = 3;
        regs.r10 = 4;
        regs.r8 = 5;
        regs.r9 = 6;
        regs.rbx = 0xdead_0000_0000_0011;
        regs.rcx = 12;
        regs.rbp = 16;
        regs
    }

    #[test]
    fn x86_64_registers() {
        let mut regs = regs();
        regs.cs = 0x33;
        regs.orig_rax = 257;
        let raw = RawSyscall::from_regs(&regs);
        assert_eq!(raw.abi, Abi::X86_64);
        assert_eq!(raw.nr, 257);
        assert_eq!(raw.args, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn i386_registers() {
        let mut regs = regs();
        regs.cs = 0x23;
        regs.orig_rax = 5;
        let raw = RawSyscall::from_regs(&regs);
        assert_eq!(raw.abi, Abi::I386);
        assert_eq!(raw.nr, 5);
        // ebx, ecx, edx, esi, edi, ebp
        assert_eq!(raw.args, [0x11, 12, 3, 2, 1, 16]);
    }

    #[test]
    fn x32_registers() {
        let mut regs = regs();
        regs.cs = 0x33;
        regs.orig_rax = X32_SYSCALL_BIT | 2;
        let raw = RawSyscall::from_regs(&regs);
        assert_eq!(raw.abi, Abi::X32);
        assert_eq!(raw.nr, 2);
    }

    #[test]
    fn typed_arguments() {
        let raw = RawSyscall::new(Abi::I386, 5, [0xffff_ff9c, 0, 0, 0, 0, 0]);
        assert_eq!(raw.arg_int(0), -100);
        assert_eq!(raw.arg_long(0), -100);
        assert_eq!(raw.arg_ptr(1), None);

        let raw = RawSyscall::new(Abi::X32, 2, [0x1_0000_1000, 0, 0, 0, 0, 0]);
        assert_eq!(raw.arg_ptr(0).map(|p| p.as_raw()), Some(0x1000));

        let raw = RawSyscall::new(Abi::X86_64, 2, [0x1_0000_1000, 0, 0, 0, 0, 0]);
        assert_eq!(raw.arg_ptr(0).map(|p| p.as_raw()), Some(0x1_0000_1000));
    }

    #[test]
    fn results() {
        assert_eq!(errno_from_ret(-2), Err(Errno::ENOENT));
        assert_eq!(errno_from_ret(42), Ok(42));
        assert_eq!(errno_from_ret(0), Ok(0));
    }
}
