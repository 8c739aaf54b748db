/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// Declares the immutable syscall table of one calling convention. Entries
/// must be listed in ascending number order, which the tests check, so that
/// lookups can use a binary search.
///
/// ```ignore
/// syscall_table! {
///     /// Doc comment.
///     pub static MY_TABLE = {
///         2 => open: Open,
///         257 => openat: OpenAt,
///     }
/// }
/// ```
macro_rules! syscall_table {
    (
        $(#[$attrs:meta])*
        $vis:vis static $Name:ident = {
            $($nr:literal => $name:ident : $kind:ident,)*
        }
    ) => {
        $(#[$attrs])*
        $vis static $Name: &[$crate::Entry] = &[
            $(
                $crate::Entry {
                    nr: $nr,
                    name: stringify!($name),
                    kind: $crate::SyscallKind::$kind,
                },
            )*
        ];
    };
}

/// Declares [`SyscallKind`](crate::SyscallKind) together with the signature
/// and effect of each kind.
macro_rules! syscall_kinds {
    (
        $(
            $(#[$attrs:meta])*
            $Kind:ident ($($arg:ident),*) => $effect:ident,
        )*
    ) => {
        /// The semantic handler a syscall number maps to. Several numbers may
        /// share a kind (for example `stat` and `stat64`).
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum SyscallKind {
            $(
                $(#[$attrs])*
                $Kind,
            )*
        }

        impl SyscallKind {
            /// The semantic types of the arguments, in order.
            pub fn signature(self) -> &'static [$crate::ArgType] {
                match self {
                    $(Self::$Kind => &[$($crate::ArgType::$arg),*],)*
                }
            }

            /// Whether the call reads, creates, deletes or merely looks up
            /// filesystem entries.
            pub fn effect(self) -> $crate::Effect {
                match self {
                    $(Self::$Kind => $crate::Effect::$effect,)*
                }
            }
        }
    };
}
