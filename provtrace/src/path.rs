/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Turns raw path arguments into absolute, lexically normalized paths.
//!
//! Nothing here touches the filesystem: `..` is folded lexically, exactly as
//! the path was written by the tracee. Symlinks are recorded as the tracee
//! named them.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

/// Directory under which descriptors of unknown origin are placed when not
/// even `/proc` can tell where they point.
const UNKNOWN_FD_ROOT: &str = "/.provtrace-unknown-fd";

/// What a relative path is relative to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Base<'a> {
    /// The working directory (`AT_FDCWD`, or a call without a dirfd).
    Cwd(&'a Path),
    /// A directory descriptor whose path we recorded when it was opened.
    Tracked(&'a Path),
    /// A descriptor we never saw being opened. `guess` is what the kernel
    /// currently reports for it, if anything.
    Untracked {
        /// The descriptor.
        fd: i32,
        /// Best-effort path of the descriptor.
        guess: Option<PathBuf>,
    },
}

/// A resolved path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolved {
    /// Absolute, normalized path.
    pub path: PathBuf,
    /// The path was resolved against a descriptor of unknown origin.
    pub origin_unknown: bool,
}

/// Lexically normalizes an absolute path: removes `.` and empty components and
/// folds `..` into its parent. `..` never climbs above `/`. A relative input
/// is treated as relative to `/`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(name) => normalized.push(name),
        }
    }
    normalized
}

/// Placeholder path for descriptor `fd` of unknown origin.
pub fn unknown_fd_path(fd: i32) -> PathBuf {
    Path::new(UNKNOWN_FD_ROOT).join(fd.to_string())
}

/// Resolves `raw` against `base`. Absolute paths ignore the base. An empty
/// path (`AT_EMPTY_PATH`) names the base itself.
pub fn resolve(base: Base, raw: &Path) -> Resolved {
    if raw.is_absolute() {
        return Resolved {
            path: normalize(raw),
            origin_unknown: false,
        };
    }

    let (dir, origin_unknown) = match base {
        Base::Cwd(dir) | Base::Tracked(dir) => (dir.to_path_buf(), false),
        Base::Untracked { fd, guess } => (guess.unwrap_or_else(|| unknown_fd_path(fd)), true),
    };

    let path = if raw.as_os_str().is_empty() {
        normalize(&dir)
    } else {
        normalize(&dir.join(raw))
    };

    Resolved {
        path,
        origin_unknown,
    }
}

/// Converts raw bytes read from a tracee into a path.
pub fn from_bytes(bytes: &[u8]) -> &Path {
    Path::new(OsStr::from_bytes(bytes))
}

/// Returns true if `path` is one of `prefixes` or lies below one of them.
/// Matching is per component, so `/devices` is not under `/dev`.
pub fn is_excluded<P: AsRef<Path>>(path: &Path, prefixes: &[P]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("/a/b/../c", "/a/c")]
    #[test_case("/a/./b//c/", "/a/b/c")]
    #[test_case("/../../etc", "/etc")]
    #[test_case("/", "/")]
    #[test_case("x/y", "/x/y")]
    fn normalization(input: &str, expected: &str) {
        assert_eq!(normalize(Path::new(input)), PathBuf::from(expected));
    }

    #[test_case(Base::Cwd(Path::new("/a/b")), "c/d", "/a/b/c/d"; "against cwd")]
    #[test_case(Base::Tracked(Path::new("/x/y")), "c/d", "/x/y/c/d"; "against dirfd")]
    #[test_case(Base::Tracked(Path::new("/x/y")), "/etc/hosts", "/etc/hosts"; "absolute ignores dirfd")]
    #[test_case(Base::Cwd(Path::new("/a/b")), "../c", "/a/c"; "parent")]
    #[test_case(Base::Tracked(Path::new("/x/y")), "", "/x/y"; "empty path names dirfd")]
    fn resolution(base: Base, raw: &str, expected: &str) {
        assert_eq!(
            resolve(base, Path::new(raw)),
            Resolved {
                path: PathBuf::from(expected),
                origin_unknown: false,
            }
        );
    }

    #[test]
    fn untracked_descriptor() {
        let guessed = resolve(
            Base::Untracked {
                fd: 7,
                guess: Some(PathBuf::from("/srv")),
            },
            Path::new("data"),
        );
        assert_eq!(guessed.path, PathBuf::from("/srv/data"));
        assert!(guessed.origin_unknown);

        let placeholder = resolve(Base::Untracked { fd: 7, guess: None }, Path::new("data"));
        assert_eq!(
            placeholder.path,
            PathBuf::from("/.provtrace-unknown-fd/7/data")
        );
        assert!(placeholder.origin_unknown);

        // The descriptor does not matter for absolute paths.
        assert!(
            !resolve(Base::Untracked { fd: 7, guess: None }, Path::new("/etc")).origin_unknown
        );
    }

    #[test]
    fn exclusion() {
        let prefixes = ["/proc", "/dev", "/sys"];
        assert!(is_excluded(Path::new("/proc/self/maps"), &prefixes));
        assert!(is_excluded(Path::new("/dev"), &prefixes));
        assert!(!is_excluded(Path::new("/devices/x"), &prefixes));
        assert!(!is_excluded(Path::new("/tmp/proc"), &prefixes));
    }
}
