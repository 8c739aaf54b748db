/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

#![cfg(not(sanitized))]

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::path::PathBuf;

use provtrace::AccessMode;
use provtrace::ExitStatus;
use provtrace::Recorder;
use provtrace::RecordKind;
use provtrace::testing::print_records;
use provtrace::testing::trace_fn;

fn cstr(path: &Path) -> CString {
    CString::new(path.as_os_str().as_bytes()).unwrap()
}

/// `(path, mode)` of every file access, in order.
fn accesses(records: &Recorder) -> Vec<(PathBuf, AccessMode)> {
    records
        .kinds()
        .filter_map(|kind| match kind {
            RecordKind::FileAccessed { path, mode, .. } => Some((path.clone(), *mode)),
            _ => None,
        })
        .collect()
}

#[test]
fn mkdir_then_write_then_read() -> Result<(), Box<dyn std::error::Error + 'static>> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().to_owned();
    let c_dir = cstr(&dir);

    let (status, records) = trace_fn(move || unsafe {
        if libc::chdir(c_dir.as_ptr()) != 0 || libc::mkdir(c"sub".as_ptr(), 0o755) != 0 {
            return 1;
        }
        let fd = libc::open(
            c"sub/f".as_ptr(),
            libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC,
            0o644,
        );
        if fd < 0 {
            return 2;
        }
        libc::close(fd);
        let fd = libc::open(c"sub/f".as_ptr(), libc::O_RDONLY);
        if fd < 0 {
            return 3;
        }
        libc::close(fd);
        0
    })?;
    print_records(&records);

    assert_eq!(status, ExitStatus::SUCCESS);
    let file = dir.join("sub/f");
    assert_eq!(
        accesses(&records),
        vec![
            (dir.clone(), AccessMode::WORKING_DIR),
            (dir.join("sub"), AccessMode::WRITE),
            (file.clone(), AccessMode::WRITE),
            (file, AccessMode::READ),
        ]
    );
    Ok(())
}

#[test]
fn relative_to_directory_descriptor() -> Result<(), Box<dyn std::error::Error + 'static>> {
    let tmp = tempfile::tempdir()?;
    std::fs::write(tmp.path().join("data"), b"x")?;
    let c_dir = cstr(tmp.path());

    let (status, records) = trace_fn(move || unsafe {
        let dirfd = libc::open(c_dir.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY);
        if dirfd < 0 {
            return 1;
        }
        let fd = libc::openat(dirfd, c"data".as_ptr(), libc::O_RDONLY);
        if fd < 0 {
            return 2;
        }
        0
    })?;

    assert_eq!(status, ExitStatus::SUCCESS);
    let found = records.kinds().any(|kind| {
        matches!(kind, RecordKind::FileAccessed { path, mode, is_directory: false, origin_unknown: false, .. }
            if *path == tmp.path().join("data") && *mode == AccessMode::READ)
    });
    assert!(found);
    Ok(())
}

#[test]
fn failed_calls_are_not_recorded() -> Result<(), Box<dyn std::error::Error + 'static>> {
    let (status, records) = trace_fn(|| unsafe {
        let fd = libc::open(c"/nonexistent/provtrace/file".as_ptr(), libc::O_RDONLY);
        if fd >= 0 { 1 } else { 0 }
    })?;

    assert_eq!(status, ExitStatus::SUCCESS);
    assert!(
        accesses(&records)
            .iter()
            .all(|(path, _)| !path.starts_with("/nonexistent"))
    );
    Ok(())
}

#[test]
fn excluded_prefixes() -> Result<(), Box<dyn std::error::Error + 'static>> {
    let (status, records) = trace_fn(|| unsafe {
        let fd = libc::open(c"/proc/self/status".as_ptr(), libc::O_RDONLY);
        if fd < 0 { 1 } else { 0 }
    })?;

    assert_eq!(status, ExitStatus::SUCCESS);
    assert!(
        accesses(&records)
            .iter()
            .all(|(path, _)| !path.starts_with("/proc"))
    );
    Ok(())
}

#[test]
fn stat_is_not_a_read() -> Result<(), Box<dyn std::error::Error + 'static>> {
    let tmp = tempfile::tempdir()?;
    let file = tmp.path().join("f");
    std::fs::write(&file, b"")?;
    let c_file = cstr(&file);

    let (status, records) = trace_fn(move || unsafe {
        let mut buf: libc::stat = std::mem::zeroed();
        if libc::stat(c_file.as_ptr(), &mut buf) != 0 {
            return 1;
        }
        0
    })?;

    assert_eq!(status, ExitStatus::SUCCESS);
    assert!(accesses(&records).contains(&(file, AccessMode::STAT)));
    Ok(())
}
