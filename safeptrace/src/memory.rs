/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use core::mem;
use std::io;

use nix::sys::ptrace;
use provtrace_memory::MemoryAccess;
use provtrace_memory::RemoteAddr;
use provtrace_memory::RemoteSlice;
use syscalls::Errno;

use super::Stopped;

impl Stopped {
    /// Reads a single u64 with `PTRACE_PEEKDATA`.
    fn peek_u64(&self, addr: RemoteAddr) -> Result<u64, Errno> {
        ptrace::read(self.0, addr.as_raw() as *mut libc::c_void)
            .map_err(|err| Errno::new(err as i32))
            .map(|x| x as u64)
    }
}

impl MemoryAccess for Stopped {
    /// Does a vectored read from the tracee's address space with
    /// `process_vm_readv`. A page fault is reported as a short read.
    fn read_vectored(
        &self,
        remote: &[RemoteSlice],
        local: &mut [io::IoSliceMut],
    ) -> Result<usize, Errno> {
        let remote = remote
            .iter()
            .map(|slice| libc::iovec {
                iov_base: slice.addr.as_raw() as *mut libc::c_void,
                iov_len: slice.len,
            })
            .collect::<Vec<_>>();

        Errno::result(unsafe {
            libc::process_vm_readv(
                self.0.as_raw(),
                local.as_ptr() as *const libc::iovec,
                local.len() as libc::c_ulong,
                remote.as_ptr(),
                remote.len() as libc::c_ulong,
                0,
            )
        })
        .map(|x| x as usize)
        .or_else(|err| {
            if err == Errno::EFAULT {
                // Treat page faults as an EOF.
                Ok(0)
            } else {
                Err(err)
            }
        })
    }

    fn read(&self, addr: RemoteAddr, buf: &mut [u8]) -> Result<usize, Errno> {
        let size = buf.len();
        if size == 0 {
            return Ok(0);
        } else if size <= mem::size_of::<u64>() && addr.bytes_to_page_end() >= 8 {
            // PTRACE_PEEKDATA is cheaper than `process_vm_readv` for a word,
            // but must not touch the next page.
            let bytes = self.peek_u64(addr)?.to_ne_bytes();
            buf.copy_from_slice(&bytes[..size]);
            return Ok(size);
        }

        let slice = RemoteSlice::new(addr, size);
        let mut local = [io::IoSliceMut::new(buf)];
        match slice.split_at_page_boundary() {
            Some((first, second)) => self.read_vectored(&[first, second], &mut local),
            None => self.read_vectored(&[slice], &mut local),
        }
    }
}
