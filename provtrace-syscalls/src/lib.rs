/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! This crate turns the raw registers of a syscall stop into a semantic
//! [`Syscall`] descriptor. Decoding is a pure function of the calling
//! convention ([`Abi`]) and the register snapshot:
//! 1. [`Abi::detect`] picks the calling convention for this particular stop.
//! 2. [`RawSyscall::from_regs`] pulls the number and arguments out of the
//!    registers that convention uses.
//! 3. [`Syscall::decode`] looks the number up in the immutable table of that
//!    convention and types the arguments.
//!
//! Pointer arguments are not dereferenced here. Use [`MemoryAccess`] on the
//! stopped tracee to read them.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg(target_os = "linux")]

#[macro_use]
mod macros;

mod abi;
mod display;
mod raw;
mod socket;
mod syscall;
mod tables;

// Re-export the only things that might be needed from the memory crate.
pub use ::provtrace_memory::LocalMemory;
pub use ::provtrace_memory::MemoryAccess;
pub use ::provtrace_memory::PointerWidth;
pub use ::provtrace_memory::RemoteAddr;
pub use ::syscalls::Errno;

pub use crate::abi::*;
pub use crate::display::*;
pub use crate::raw::*;
pub use crate::socket::*;
pub use crate::syscall::*;
pub use crate::tables::*;
