/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use core::fmt;
use core::num::NonZeroUsize;

/// Size of a page on every architecture we trace.
pub const PAGE_SIZE: usize = 0x1000;

/// A non-null address in another process's address space. It is never
/// dereferenced locally; it is only handed to the kernel.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RemoteAddr(NonZeroUsize);

impl RemoteAddr {
    /// Wraps a raw address. Returns `None` for NULL.
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    /// Takes the address of a local pointer. Mostly useful for tests that read
    /// their own memory through [`crate::LocalMemory`].
    pub fn from_ptr<T>(ptr: *const T) -> Option<Self> {
        Self::from_raw(ptr as usize)
    }

    /// Returns the raw address.
    pub fn as_raw(self) -> usize {
        self.0.get()
    }

    /// Returns the address `count` bytes further along, or `None` if that
    /// wraps around the address space.
    pub fn offset(self, count: usize) -> Option<Self> {
        self.0.get().checked_add(count).and_then(Self::from_raw)
    }

    /// Number of bytes between this address and the start of the next page.
    pub fn bytes_to_page_end(self) -> usize {
        PAGE_SIZE - (self.as_raw() & (PAGE_SIZE - 1))
    }
}

impl fmt::Debug for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.as_raw())
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A range of remote memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RemoteSlice {
    /// Start of the range.
    pub addr: RemoteAddr,
    /// Length of the range in bytes.
    pub len: usize,
}

impl RemoteSlice {
    /// Creates a new remote range.
    pub fn new(addr: RemoteAddr, len: usize) -> Self {
        Self { addr, len }
    }

    /// Splits the range at the next page boundary if it spans two pages.
    /// `process_vm_readv` reports partial transfers per iovec, so a read that
    /// stops at an unmapped page still returns the bytes before it.
    pub fn split_at_page_boundary(self) -> Option<(Self, Self)> {
        let head = self.addr.bytes_to_page_end();
        if head >= self.len {
            return None;
        }
        let second = self.addr.offset(head)?;
        Some((Self::new(self.addr, head), Self::new(second, self.len - head)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_none() {
        assert_eq!(RemoteAddr::from_raw(0), None);
        assert_eq!(RemoteAddr::from_raw(0x1000).map(RemoteAddr::as_raw), Some(0x1000));
    }

    #[test]
    fn page_split() {
        let addr = RemoteAddr::from_raw(0x1ff0).unwrap();
        let (a, b) = RemoteSlice::new(addr, 0x20).split_at_page_boundary().unwrap();
        assert_eq!(a.len, 0x10);
        assert_eq!(b.addr.as_raw(), 0x2000);
        assert_eq!(b.len, 0x10);

        assert_eq!(RemoteSlice::new(addr, 0x10).split_at_page_boundary(), None);
    }
}
