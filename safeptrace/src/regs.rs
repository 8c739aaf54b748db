/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// General purpose registers as reported by `PTRACE_GETREGSET` with
/// `NT_PRSTATUS`. For 32-bit compat tracees the kernel widens the i386
/// register file into this layout.
pub use libc::user_regs_struct as Regs;
