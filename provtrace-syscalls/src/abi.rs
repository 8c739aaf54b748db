/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use core::fmt;

use provtrace_memory::PointerWidth;
use serde::Deserialize;
use serde::Serialize;

/// Bit set in `orig_rax` by syscalls made through the x32 entry point.
pub const X32_SYSCALL_BIT: u64 = 0x4000_0000;

/// Code segment selector of a task running 32-bit compatibility code.
const I386_CS: u64 = 0x23;

/// A calling convention that syscalls can arrive through on an x86_64 kernel.
///
/// A single tracee can change conventions by exec'ing a binary built for
/// another one, so the convention is detected again at every syscall stop.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Abi {
    /// Native 64-bit.
    X86_64,
    /// 32-bit compatibility mode (`int 0x80`).
    I386,
    /// 32-bit pointers on the 64-bit entry point.
    X32,
}

impl Abi {
    /// Detects the calling convention from the registers of a syscall stop.
    pub fn detect(regs: &libc::user_regs_struct) -> Self {
        if regs.cs == I386_CS {
            Abi::I386
        } else if (regs.orig_rax as i64) >= 0 && regs.orig_rax & X32_SYSCALL_BIT != 0 {
            Abi::X32
        } else {
            Abi::X86_64
        }
    }

    /// Width of a pointer under this convention.
    pub fn pointer_width(self) -> PointerWidth {
        match self {
            Abi::X86_64 => PointerWidth::W64,
            Abi::I386 | Abi::X32 => PointerWidth::W32,
        }
    }

    /// Sign-extends the raw return register into a syscall return value.
    pub fn return_value(self, rax: u64) -> i64 {
        match self {
            Abi::X86_64 => rax as i64,
            Abi::I386 | Abi::X32 => rax as u32 as i32 as i64,
        }
    }

    /// Short name, as used in logs and records.
    pub fn name(self) -> &'static str {
        match self {
            Abi::X86_64 => "x86_64",
            Abi::I386 => "i386",
            Abi::X32 => "x32",
        }
    }
}

impl fmt::Display for Abi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
