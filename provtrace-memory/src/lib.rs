/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Read-only access to a tracee's memory. Syscall arguments that are pointers
//! (paths, argv arrays, socket addresses) are resolved through
//! [`MemoryAccess`], which is implemented for a ptrace-stopped tracee and for
//! the local address space.

#![deny(missing_docs)]

mod addr;
mod local;

use std::ffi::CString;
use std::io;

pub use addr::PAGE_SIZE;
pub use addr::RemoteAddr;
pub use addr::RemoteSlice;
pub use local::LocalMemory;
pub use syscalls::Errno;

/// Longest C string we are willing to pull out of a tracee.
pub const MAX_CSTRING: usize = 1 << 20;

/// Width of a pointer in the tracee's calling convention.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PointerWidth {
    /// 32-bit pointers (i386 compat and x32).
    W32,
    /// 64-bit pointers.
    W64,
}

impl PointerWidth {
    /// Size of one pointer in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }
}

/// Trait for reading potentially remote memory.
pub trait MemoryAccess {
    /// Reads bytes from the address space. Returns the number of bytes read.
    ///
    /// Note that there is no guarantee that all of the requested buffers will
    /// be filled. A fault part way through is reported as a short read.
    fn read_vectored(
        &self,
        read_from: &[RemoteSlice],
        write_to: &mut [io::IoSliceMut],
    ) -> Result<usize, Errno>;

    /// Performs a read starting at the given address. The number of bytes read
    /// is returned. The buffer is not guaranteed to be completely filled.
    fn read(&self, addr: RemoteAddr, buf: &mut [u8]) -> Result<usize, Errno> {
        if buf.is_empty() {
            return Ok(0);
        }

        let slice = RemoteSlice::new(addr, buf.len());
        let mut local = [io::IoSliceMut::new(buf)];
        match slice.split_at_page_boundary() {
            Some((first, second)) => self.read_vectored(&[first, second], &mut local),
            None => self.read_vectored(&[slice], &mut local),
        }
    }

    /// Reads exactly the number of bytes wanted by `buf`.
    fn read_exact(&self, addr: RemoteAddr, mut buf: &mut [u8]) -> Result<(), Errno> {
        let mut addr = addr;

        while !buf.is_empty() {
            match self.read(addr, buf)? {
                0 => break,
                n => {
                    buf = &mut buf[n..];
                    if buf.is_empty() {
                        break;
                    }
                    addr = addr.offset(n).ok_or(Errno::EFAULT)?;
                }
            }
        }

        if buf.is_empty() {
            Ok(())
        } else {
            Err(Errno::EFAULT)
        }
    }

    /// Reads a NUL terminated string of at most `limit` bytes. Reads never
    /// cross a page boundary so that a string ending right before an unmapped
    /// page is still read completely.
    fn read_cstring_with_limit(&self, addr: RemoteAddr, limit: usize) -> Result<CString, Errno> {
        let mut accumulator = Vec::new();
        let mut buf = [0u8; 512];
        let mut addr = addr;

        loop {
            let want = buf.len().min(addr.bytes_to_page_end());
            let read = self.read(addr, &mut buf[..want])?;
            if read == 0 {
                return Err(Errno::EFAULT);
            }

            if let Some(nul) = buf[..read].iter().position(|&b| b == 0) {
                accumulator.extend_from_slice(&buf[..nul]);
                break;
            }

            accumulator.extend_from_slice(&buf[..read]);
            if accumulator.len() > limit {
                return Err(Errno::ENAMETOOLONG);
            }
            addr = addr.offset(read).ok_or(Errno::EFAULT)?;
        }

        // The accumulator stops right before the first NUL byte.
        CString::new(accumulator).map_err(|_| Errno::EINVAL)
    }

    /// Reads a NUL terminated string starting at the given address.
    fn read_cstring(&self, addr: RemoteAddr) -> Result<CString, Errno> {
        self.read_cstring_with_limit(addr, MAX_CSTRING)
    }

    /// Reads one pointer-sized word in the tracee's native byte order.
    fn read_word(&self, addr: RemoteAddr, width: PointerWidth) -> Result<u64, Errno> {
        match width {
            PointerWidth::W32 => {
                let mut buf = [0u8; 4];
                self.read_exact(addr, &mut buf)?;
                Ok(u32::from_ne_bytes(buf) as u64)
            }
            PointerWidth::W64 => {
                let mut buf = [0u8; 8];
                self.read_exact(addr, &mut buf)?;
                Ok(u64::from_ne_bytes(buf))
            }
        }
    }

    /// Reads a NULL terminated array of pointers, such as `argv`. At most
    /// `limit` entries are read.
    fn read_pointer_array(
        &self,
        addr: RemoteAddr,
        width: PointerWidth,
        limit: usize,
    ) -> Result<Vec<RemoteAddr>, Errno> {
        let mut pointers = Vec::new();
        let mut cursor = addr;

        while pointers.len() < limit {
            match RemoteAddr::from_raw(self.read_word(cursor, width)? as usize) {
                Some(ptr) => pointers.push(ptr),
                None => return Ok(pointers),
            }
            cursor = cursor.offset(width.bytes()).ok_or(Errno::EFAULT)?;
        }

        Err(Errno::E2BIG)
    }

    /// Reads a NULL terminated array of C strings, such as `argv` or `envp`.
    fn read_cstring_array(
        &self,
        addr: RemoteAddr,
        width: PointerWidth,
        limit: usize,
    ) -> Result<Vec<CString>, Errno> {
        self.read_pointer_array(addr, width, limit)?
            .into_iter()
            .map(|ptr| self.read_cstring(ptr))
            .collect()
    }
}
