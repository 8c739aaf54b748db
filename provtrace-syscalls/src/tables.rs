/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! One immutable syscall table per calling convention. The numbers differ
//! between conventions, so the table is always selected by the [`Abi`] of the
//! stop being decoded.

use crate::Abi;

/// Semantic type of a syscall argument.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ArgType {
    /// Pointer to a NUL terminated path.
    Path,
    /// A file descriptor.
    Fd,
    /// A directory descriptor for the `*at()` family; `AT_FDCWD` means the
    /// working directory.
    DirFd,
    /// A flags bitmask.
    Flags,
    /// Permission bits.
    Mode,
    /// Any other integer.
    Int,
    /// Pointer to a struct or buffer.
    Ptr,
    /// Pointer to a NULL terminated array of strings (`argv`, `envp`).
    StrArray,
}

/// How a syscall affects the filesystem.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Effect {
    /// Reads file contents. Open calls start here and are refined by their
    /// flags.
    Read,
    /// Can create entries or write contents.
    Create,
    /// Deletes entries.
    Delete,
    /// Looks up metadata only.
    Stat,
    /// No filesystem effect.
    None,
}

syscall_kinds! {
    /// `open(path, flags, mode)`
    Open(Path, Flags, Mode) => Read,
    /// `openat(dirfd, path, flags, mode)`
    OpenAt(DirFd, Path, Flags, Mode) => Read,
    /// `openat2(dirfd, path, how, size)`; the flags are the first field of
    /// `how`.
    OpenAt2(DirFd, Path, Ptr, Int) => Read,
    /// `creat(path, mode)`
    Creat(Path, Mode) => Create,
    /// `mkdir(path, mode)`
    Mkdir(Path, Mode) => Create,
    /// `mkdirat(dirfd, path, mode)`
    MkdirAt(DirFd, Path, Mode) => Create,
    /// `symlink(target, linkpath)`
    Symlink(Path, Path) => Create,
    /// `symlinkat(target, newdirfd, linkpath)`
    SymlinkAt(Path, DirFd, Path) => Create,
    /// `link(oldpath, newpath)`
    Link(Path, Path) => Create,
    /// `linkat(olddirfd, oldpath, newdirfd, newpath, flags)`
    LinkAt(DirFd, Path, DirFd, Path, Flags) => Create,
    /// `rename(oldpath, newpath)`
    Rename(Path, Path) => Create,
    /// `renameat(olddirfd, oldpath, newdirfd, newpath)`
    RenameAt(DirFd, Path, DirFd, Path) => Create,
    /// `renameat2(olddirfd, oldpath, newdirfd, newpath, flags)`
    RenameAt2(DirFd, Path, DirFd, Path, Flags) => Create,
    /// `truncate(path, length)` and `truncate64`
    Truncate(Path, Int) => Create,
    /// `unlink(path)`
    Unlink(Path) => Delete,
    /// `unlinkat(dirfd, path, flags)`
    UnlinkAt(DirFd, Path, Flags) => Delete,
    /// `rmdir(path)`
    Rmdir(Path) => Delete,
    /// `stat(path, buf)` and `stat64`
    Stat(Path, Ptr) => Stat,
    /// `lstat(path, buf)` and `lstat64`
    Lstat(Path, Ptr) => Stat,
    /// `newfstatat(dirfd, path, buf, flags)` and `fstatat64`
    StatAt(DirFd, Path, Ptr, Flags) => Stat,
    /// `statx(dirfd, path, flags, mask, buf)`
    Statx(DirFd, Path, Flags, Int, Ptr) => Stat,
    /// `access(path, mode)`
    Access(Path, Mode) => Stat,
    /// `faccessat(dirfd, path, mode)`
    FaccessAt(DirFd, Path, Mode) => Stat,
    /// `faccessat2(dirfd, path, mode, flags)`
    FaccessAt2(DirFd, Path, Mode, Flags) => Stat,
    /// `readlink(path, buf, size)`
    Readlink(Path, Ptr, Int) => Stat,
    /// `readlinkat(dirfd, path, buf, size)`
    ReadlinkAt(DirFd, Path, Ptr, Int) => Stat,
    /// `execve(path, argv, envp)`
    Execve(Path, StrArray, StrArray) => Read,
    /// `execveat(dirfd, path, argv, envp, flags)`
    ExecveAt(DirFd, Path, StrArray, StrArray, Flags) => Read,
    /// `chdir(path)`
    Chdir(Path) => Stat,
    /// `fchdir(fd)`
    Fchdir(Fd) => Stat,
    /// `close(fd)`
    Close(Fd) => None,
    /// `dup(fd)`
    Dup(Fd) => None,
    /// `dup2(oldfd, newfd)`
    Dup2(Fd, Fd) => None,
    /// `dup3(oldfd, newfd, flags)`
    Dup3(Fd, Fd, Flags) => None,
    /// `fcntl(fd, cmd, arg)` and `fcntl64`
    Fcntl(Fd, Int, Int) => None,
    /// `socket(domain, type, protocol)`
    Socket(Int, Int, Int) => None,
    /// `connect(fd, addr, addrlen)`
    Connect(Fd, Ptr, Int) => None,
    /// `accept(fd, addr, addrlen)`
    Accept(Fd, Ptr, Ptr) => None,
    /// `accept4(fd, addr, addrlen, flags)`
    Accept4(Fd, Ptr, Ptr, Flags) => None,
    /// `socketcall(call, args)`, the multiplexed socket entry point of i386.
    Socketcall(Int, Ptr) => None,
    /// `clone(flags, ...)`; the flags come first on every convention.
    Clone(Flags, Ptr, Ptr, Ptr, Int) => None,
    /// `clone3(args, size)`
    Clone3(Ptr, Int) => None,
    /// `fork()`
    Fork() => None,
    /// `vfork()`
    Vfork() => None,
    /// `exit(status)`
    Exit(Int) => None,
    /// `exit_group(status)`
    ExitGroup(Int) => None,
    /// `rt_sigreturn()`. Restores a signal frame; never a new syscall entry
    /// from the program's point of view.
    RtSigreturn() => None,
    /// `sigreturn()`, the i386 non-realtime variant of `rt_sigreturn`.
    Sigreturn() => None,
}

impl SyscallKind {
    /// True for the calls that restore a signal frame instead of returning.
    pub fn is_sigreturn(self) -> bool {
        matches!(self, Self::RtSigreturn | Self::Sigreturn)
    }

    /// True for the calls that replace the process image.
    pub fn is_exec(self) -> bool {
        matches!(self, Self::Execve | Self::ExecveAt)
    }

    /// True for the calls that create a new task.
    pub fn is_clone(self) -> bool {
        matches!(self, Self::Clone | Self::Clone3 | Self::Fork | Self::Vfork)
    }
}

/// An entry of a syscall table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Entry {
    /// Syscall number under the table's convention.
    pub nr: u64,
    /// Name under the table's convention.
    pub name: &'static str,
    /// Semantic handler.
    pub kind: SyscallKind,
}

syscall_table! {
    /// Native 64-bit syscalls.
    pub static X86_64_TABLE = {
        2 => open: Open,
        3 => close: Close,
        4 => stat: Stat,
        6 => lstat: Lstat,
        15 => rt_sigreturn: RtSigreturn,
        21 => access: Access,
        32 => dup: Dup,
        33 => dup2: Dup2,
        41 => socket: Socket,
        42 => connect: Connect,
        43 => accept: Accept,
        56 => clone: Clone,
        57 => fork: Fork,
        58 => vfork: Vfork,
        59 => execve: Execve,
        60 => exit: Exit,
        72 => fcntl: Fcntl,
        76 => truncate: Truncate,
        80 => chdir: Chdir,
        81 => fchdir: Fchdir,
        82 => rename: Rename,
        83 => mkdir: Mkdir,
        84 => rmdir: Rmdir,
        85 => creat: Creat,
        86 => link: Link,
        87 => unlink: Unlink,
        88 => symlink: Symlink,
        89 => readlink: Readlink,
        231 => exit_group: ExitGroup,
        257 => openat: OpenAt,
        258 => mkdirat: MkdirAt,
        262 => newfstatat: StatAt,
        263 => unlinkat: UnlinkAt,
        264 => renameat: RenameAt,
        265 => linkat: LinkAt,
        266 => symlinkat: SymlinkAt,
        267 => readlinkat: ReadlinkAt,
        269 => faccessat: FaccessAt,
        288 => accept4: Accept4,
        292 => dup3: Dup3,
        316 => renameat2: RenameAt2,
        322 => execveat: ExecveAt,
        332 => statx: Statx,
        435 => clone3: Clone3,
        437 => openat2: OpenAt2,
        439 => faccessat2: FaccessAt2,
    }
}

syscall_table! {
    /// Syscalls made through the x32 entry point, with the marker bit removed.
    /// The calls whose arguments hold pointers to pointers have their own
    /// numbers from 512 up; the 64-bit numbers are rejected by the kernel.
    pub static X32_TABLE = {
        2 => open: Open,
        3 => close: Close,
        4 => stat: Stat,
        6 => lstat: Lstat,
        21 => access: Access,
        32 => dup: Dup,
        33 => dup2: Dup2,
        41 => socket: Socket,
        42 => connect: Connect,
        43 => accept: Accept,
        56 => clone: Clone,
        57 => fork: Fork,
        58 => vfork: Vfork,
        60 => exit: Exit,
        72 => fcntl: Fcntl,
        76 => truncate: Truncate,
        80 => chdir: Chdir,
        81 => fchdir: Fchdir,
        82 => rename: Rename,
        83 => mkdir: Mkdir,
        84 => rmdir: Rmdir,
        85 => creat: Creat,
        86 => link: Link,
        87 => unlink: Unlink,
        88 => symlink: Symlink,
        89 => readlink: Readlink,
        231 => exit_group: ExitGroup,
        257 => openat: OpenAt,
        258 => mkdirat: MkdirAt,
        262 => newfstatat: StatAt,
        263 => unlinkat: UnlinkAt,
        264 => renameat: RenameAt,
        265 => linkat: LinkAt,
        266 => symlinkat: SymlinkAt,
        267 => readlinkat: ReadlinkAt,
        269 => faccessat: FaccessAt,
        288 => accept4: Accept4,
        292 => dup3: Dup3,
        316 => renameat2: RenameAt2,
        332 => statx: Statx,
        435 => clone3: Clone3,
        437 => openat2: OpenAt2,
        439 => faccessat2: FaccessAt2,
        513 => rt_sigreturn: RtSigreturn,
        520 => execve: Execve,
        545 => execveat: ExecveAt,
    }
}

syscall_table! {
    /// 32-bit compatibility syscalls.
    pub static I386_TABLE = {
        1 => exit: Exit,
        2 => fork: Fork,
        5 => open: Open,
        6 => close: Close,
        8 => creat: Creat,
        9 => link: Link,
        10 => unlink: Unlink,
        11 => execve: Execve,
        12 => chdir: Chdir,
        33 => access: Access,
        38 => rename: Rename,
        39 => mkdir: Mkdir,
        40 => rmdir: Rmdir,
        41 => dup: Dup,
        55 => fcntl: Fcntl,
        63 => dup2: Dup2,
        83 => symlink: Symlink,
        85 => readlink: Readlink,
        92 => truncate: Truncate,
        102 => socketcall: Socketcall,
        106 => stat: Stat,
        107 => lstat: Lstat,
        119 => sigreturn: Sigreturn,
        120 => clone: Clone,
        133 => fchdir: Fchdir,
        173 => rt_sigreturn: RtSigreturn,
        190 => vfork: Vfork,
        193 => truncate64: Truncate,
        195 => stat64: Stat,
        196 => lstat64: Lstat,
        221 => fcntl64: Fcntl,
        252 => exit_group: ExitGroup,
        295 => openat: OpenAt,
        296 => mkdirat: MkdirAt,
        300 => fstatat64: StatAt,
        301 => unlinkat: UnlinkAt,
        302 => renameat: RenameAt,
        303 => linkat: LinkAt,
        304 => symlinkat: SymlinkAt,
        305 => readlinkat: ReadlinkAt,
        307 => faccessat: FaccessAt,
        330 => dup3: Dup3,
        353 => renameat2: RenameAt2,
        358 => execveat: ExecveAt,
        359 => socket: Socket,
        362 => connect: Connect,
        364 => accept4: Accept4,
        383 => statx: Statx,
        435 => clone3: Clone3,
        437 => openat2: OpenAt2,
        439 => faccessat2: FaccessAt2,
    }
}

/// 64-bit numbers that the x32 entry point rejects because x32 has its own
/// number for the call.
pub const X32_REJECTED: &[u64] = &[15, 59, 322];

/// Returns the table of a calling convention.
pub fn table(abi: Abi) -> &'static [Entry] {
    match abi {
        Abi::X86_64 => X86_64_TABLE,
        Abi::I386 => I386_TABLE,
        Abi::X32 => X32_TABLE,
    }
}

/// Looks up a syscall number under a calling convention.
pub fn lookup(abi: Abi, nr: u64) -> Option<&'static Entry> {
    let table = table(abi);
    table
        .binary_search_by_key(&nr, |entry| entry.nr)
        .ok()
        .map(|index| &table[index])
}

/// Best-effort name of any syscall number, including the ones no table
/// handles.
pub fn syscall_name(abi: Abi, nr: u64) -> Option<&'static str> {
    if let Some(entry) = lookup(abi, nr) {
        return Some(entry.name);
    }
    match abi {
        Abi::X86_64 | Abi::X32 => syscalls::x86_64::Sysno::new(nr as usize).map(|s| s.name()),
        Abi::I386 => syscalls::x86::Sysno::new(nr as usize).map(|s| s.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_sorted() {
        for abi in [Abi::X86_64, Abi::I386, Abi::X32] {
            let table = table(abi);
            assert!(
                table.windows(2).all(|pair| pair[0].nr < pair[1].nr),
                "{} table is not strictly ascending",
                abi
            );
        }
    }

    #[test]
    fn numbers_differ_per_abi() {
        assert_eq!(lookup(Abi::X86_64, 59).map(|e| e.kind), Some(SyscallKind::Execve));
        assert_eq!(lookup(Abi::I386, 11).map(|e| e.kind), Some(SyscallKind::Execve));
        assert_eq!(lookup(Abi::X32, 520).map(|e| e.kind), Some(SyscallKind::Execve));
        assert_eq!(lookup(Abi::X32, 59), None);

        // 5 is fstat on x86_64, which no handler cares about.
        assert_eq!(lookup(Abi::X86_64, 5), None);
        assert_eq!(lookup(Abi::I386, 5).map(|e| e.kind), Some(SyscallKind::Open));
    }

    #[test]
    fn x32_rejected_numbers_are_not_in_the_table() {
        for nr in X32_REJECTED {
            assert!(lookup(Abi::X32, *nr).is_none());
            assert!(lookup(Abi::X86_64, *nr).is_some());
        }
    }

    #[test]
    fn names() {
        assert_eq!(syscall_name(Abi::X86_64, 262), Some("newfstatat"));
        assert_eq!(syscall_name(Abi::I386, 300), Some("fstatat64"));
        // Not handled, but still named.
        assert_eq!(syscall_name(Abi::X86_64, 0), Some("read"));
        assert_eq!(syscall_name(Abi::I386, 4), Some("write"));
        assert_eq!(syscall_name(Abi::X86_64, 100_000), None);
    }

    #[test]
    fn signatures() {
        assert_eq!(
            SyscallKind::OpenAt.signature(),
            &[ArgType::DirFd, ArgType::Path, ArgType::Flags, ArgType::Mode]
        );
        assert!(SyscallKind::Fork.signature().is_empty());
        assert_eq!(SyscallKind::Unlink.effect(), Effect::Delete);
        assert_eq!(SyscallKind::Readlink.effect(), Effect::Stat);
        assert!(SyscallKind::Sigreturn.is_sigreturn());
    }
}
