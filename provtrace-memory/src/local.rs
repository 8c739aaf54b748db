/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;

use super::Errno;
use super::MemoryAccess;
use super::RemoteSlice;

/// The local address space. Reading through this is only sound for addresses
/// that point at live, initialized memory of the current process; it exists so
/// that syscall decoding can be exercised without a tracee.
#[derive(Default, Debug)]
pub struct LocalMemory {}

impl LocalMemory {
    /// Creates a new representation of memory in the current address space.
    ///
    /// # Example
    /// ```
    /// # use provtrace_memory::LocalMemory;
    /// let memory = LocalMemory::new();
    /// ```
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryAccess for LocalMemory {
    fn read_vectored(
        &self,
        read_from: &[RemoteSlice],
        write_to: &mut [io::IoSliceMut],
    ) -> Result<usize, Errno> {
        let mut total = 0;
        let mut locals = write_to.iter_mut().filter(|slice| !slice.is_empty());
        let Some(mut local) = locals.next() else {
            return Ok(0);
        };
        let mut local_off = 0;

        for remote in read_from {
            let mut remote_off = 0;
            while remote_off < remote.len {
                if local_off == local.len() {
                    match locals.next() {
                        Some(next) => {
                            local = next;
                            local_off = 0;
                        }
                        None => return Ok(total),
                    }
                }
                let count = (remote.len - remote_off).min(local.len() - local_off);
                let src = (remote.addr.as_raw() + remote_off) as *const u8;
                // SAFETY: the caller vouches that `remote` names local memory.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        src,
                        local[local_off..].as_mut_ptr(),
                        count,
                    );
                }
                remote_off += count;
                local_off += count;
                total += count;
            }
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use super::*;
    use crate::PointerWidth;
    use crate::RemoteAddr;

    #[test]
    fn read() {
        let m = LocalMemory::new();
        let x = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let addr = RemoteAddr::from_ptr(x.as_ptr()).unwrap();
        let mut buf = [0u8; 8];
        m.read_exact(addr, &mut buf).unwrap();
        assert_eq!(buf, x);
    }

    #[test]
    fn read_cstring() {
        let m = LocalMemory::new();
        let x = "hello world\0";
        let addr = RemoteAddr::from_ptr(x.as_ptr()).unwrap();
        assert_eq!(
            m.read_cstring(addr).unwrap(),
            CString::new("hello world").unwrap()
        );
    }

    #[test]
    fn cstring_limit() {
        let m = LocalMemory::new();
        let long = vec![b'a'; 2048].into_iter().chain([0]).collect::<Vec<u8>>();
        let addr = RemoteAddr::from_ptr(long.as_ptr()).unwrap();
        assert_eq!(
            m.read_cstring_with_limit(addr, 100),
            Err(Errno::ENAMETOOLONG)
        );
        assert_eq!(m.read_cstring(addr).unwrap().as_bytes().len(), 2048);
    }

    #[test]
    fn read_argv_32_and_64() {
        let m = LocalMemory::new();
        let a = CString::new("ls").unwrap();
        let b = CString::new("-l").unwrap();

        let argv64 = [a.as_ptr() as u64, b.as_ptr() as u64, 0];
        let addr = RemoteAddr::from_ptr(argv64.as_ptr()).unwrap();
        assert_eq!(
            m.read_cstring_array(addr, PointerWidth::W64, 16).unwrap(),
            vec![a.clone(), b.clone()]
        );

        // The table entries are never dereferenced by this call.
        let argv32 = [7u32, 9, 0];
        let addr = RemoteAddr::from_ptr(argv32.as_ptr()).unwrap();
        let pointers = m.read_pointer_array(addr, PointerWidth::W32, 16).unwrap();
        assert_eq!(
            pointers.iter().map(|p| p.as_raw()).collect::<Vec<_>>(),
            vec![7, 9]
        );
    }

    #[test]
    fn pointer_array_limit() {
        let m = LocalMemory::new();
        let table = [1u64, 2, 3, 0];
        let addr = RemoteAddr::from_ptr(table.as_ptr()).unwrap();
        assert_eq!(
            m.read_pointer_array(addr, PointerWidth::W64, 2),
            Err(Errno::E2BIG)
        );
    }
}
