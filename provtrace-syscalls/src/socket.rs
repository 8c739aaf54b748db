/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Socket related decoding: the i386 `socketcall` multiplexer and socket
//! addresses.

use core::fmt;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;

use provtrace_memory::MemoryAccess;
use provtrace_memory::PointerWidth;
use provtrace_memory::RemoteAddr;
use serde::Deserialize;
use serde::Serialize;

use crate::Errno;
use crate::RawSyscall;
use crate::Syscall;
use crate::SyscallKind;

/// Largest socket address we read out of a tracee.
const MAX_SOCKADDR: usize = 128;

// Call numbers of `socketcall(2)`.
const SYS_SOCKET: i64 = 1;
const SYS_CONNECT: i64 = 3;
const SYS_ACCEPT: i64 = 5;
const SYS_ACCEPT4: i64 = 18;

/// Resolves an i386 `socketcall` into the socket call it multiplexes, reading
/// the packed argument array from the tracee. Returns `Ok(None)` for the calls
/// nobody handles.
pub fn unpack_socketcall<M: MemoryAccess>(
    syscall: &Syscall,
    memory: &M,
) -> Result<Option<Syscall>, Errno> {
    let call = syscall.int(0).ok_or(Errno::EINVAL)?;
    let (name, kind, count) = match call {
        SYS_SOCKET => ("socket", SyscallKind::Socket, 3),
        SYS_CONNECT => ("connect", SyscallKind::Connect, 3),
        SYS_ACCEPT => ("accept", SyscallKind::Accept, 3),
        SYS_ACCEPT4 => ("accept4", SyscallKind::Accept4, 4),
        _ => return Ok(None),
    };

    let base = syscall.pointer(1).ok_or(Errno::EFAULT)?;
    let mut args = [0u64; 6];
    for (index, arg) in args.iter_mut().take(count).enumerate() {
        let addr = base.offset(index * 4).ok_or(Errno::EFAULT)?;
        *arg = memory.read_word(addr, PointerWidth::W32)?;
    }

    let raw = RawSyscall::new(syscall.abi, syscall.nr, args);
    let mut unpacked = Syscall::with_kind(&raw, name, kind);
    unpacked.ret = syscall.ret;
    Ok(Some(unpacked))
}

/// Address family of a socket, as shown in reports.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Family {
    /// `AF_UNIX`
    Unix,
    /// `AF_INET`
    #[serde(rename = "IPv4")]
    Ipv4,
    /// `AF_INET6`
    #[serde(rename = "IPv6")]
    Ipv6,
    /// Anything else, by number.
    Other(u16),
}

impl Family {
    /// Converts an `AF_*` constant.
    pub fn from_raw(family: u16) -> Self {
        match family as i32 {
            libc::AF_UNIX => Family::Unix,
            libc::AF_INET => Family::Ipv4,
            libc::AF_INET6 => Family::Ipv6,
            _ => Family::Other(family),
        }
    }

    fn is_inet(self) -> bool {
        matches!(self, Family::Ipv4 | Family::Ipv6)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Family::Unix => f.write_str("unix"),
            Family::Ipv4 => f.write_str("IPv4"),
            Family::Ipv6 => f.write_str("IPv6"),
            Family::Other(n) => write!(f, "family {}", n),
        }
    }
}

/// Names the protocol of a socket from its family and `socket(2)` type.
pub fn protocol_name(family: Family, socktype: i32) -> String {
    match (socktype & 0xf, family.is_inet()) {
        (libc::SOCK_STREAM, true) => "TCP".to_owned(),
        (libc::SOCK_DGRAM, true) => "UDP".to_owned(),
        (libc::SOCK_STREAM, false) => "stream".to_owned(),
        (libc::SOCK_DGRAM, false) => "dgram".to_owned(),
        (libc::SOCK_SEQPACKET, _) => "seqpacket".to_owned(),
        (libc::SOCK_RAW, _) => "raw".to_owned(),
        (other, _) => format!("type {}", other),
    }
}

/// Parses the bytes of a `struct sockaddr`. Returns the family and a printable
/// address, or `None` when the buffer is too short for its family.
pub fn parse_sockaddr(bytes: &[u8]) -> Option<(Family, String)> {
    let family = Family::from_raw(u16::from_ne_bytes(bytes.get(0..2)?.try_into().ok()?));
    let address = match family {
        Family::Ipv4 => {
            let port = u16::from_be_bytes(bytes.get(2..4)?.try_into().ok()?);
            let octets: [u8; 4] = bytes.get(4..8)?.try_into().ok()?;
            format!("{}:{}", Ipv4Addr::from(octets), port)
        }
        Family::Ipv6 => {
            let port = u16::from_be_bytes(bytes.get(2..4)?.try_into().ok()?);
            let octets: [u8; 16] = bytes.get(8..24)?.try_into().ok()?;
            format!("[{}]:{}", Ipv6Addr::from(octets), port)
        }
        Family::Unix => {
            let path = bytes.get(2..).unwrap_or_default();
            match path.first() {
                None => "(unnamed)".to_owned(),
                // Abstract namespace; the name is not NUL terminated.
                Some(0) => format!("@{}", String::from_utf8_lossy(&path[1..])),
                Some(_) => {
                    let end = path.iter().position(|&b| b == 0).unwrap_or(path.len());
                    String::from_utf8_lossy(&path[..end]).into_owned()
                }
            }
        }
        Family::Other(_) => String::new(),
    };
    Some((family, address))
}

/// Reads and parses a socket address of `len` bytes from the tracee.
pub fn read_sockaddr<M: MemoryAccess>(
    memory: &M,
    addr: RemoteAddr,
    len: usize,
) -> Result<(Family, String), Errno> {
    let mut buf = vec![0u8; len.min(MAX_SOCKADDR)];
    memory.read_exact(addr, &mut buf)?;
    parse_sockaddr(&buf).ok_or(Errno::EINVAL)
}
