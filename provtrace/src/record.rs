/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The records handed to an [`EventSink`](crate::EventSink), in the order the
//! side effects happened.

use core::fmt;
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use bitflags::bitflags;
use chrono::DateTime;
use chrono::Utc;
use provtrace_syscalls::Abi;
use provtrace_syscalls::Family;
use safeptrace::ExitStatus;
use safeptrace::SIGNALED_BIT;
use serde::Deserialize;
use serde::Serialize;
use serde::Serializer;

/// Logical identifier of a traced process or thread. Unlike a pid it is never
/// reused within a run, and it survives `execve`.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize
)]
#[serde(transparent)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// How a file was accessed.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct AccessMode: u32 {
        /// Contents were read.
        const READ = 0x01;
        /// Contents were written, or the entry was created or removed.
        const WRITE = 0x02;
        /// The path became a working directory.
        const WORKING_DIR = 0x04;
        /// Only metadata was looked at.
        const STAT = 0x08;
        /// A symbolic link was created or read.
        const LINK = 0x10;
    }
}

/// How a process ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum ExitCause {
    /// Exited normally with this code.
    Code {
        /// Exit code.
        code: i32,
    },
    /// Killed by this signal.
    Signal {
        /// Signal number.
        signal: i32,
        /// Whether a core dump was produced.
        core_dumped: bool,
    },
    /// Still running, but no longer traced.
    Detached,
    /// Disappeared without a death notification.
    Lost,
}

impl ExitCause {
    /// Encodes the cause like the traditional report: the exit code, or
    /// `0x0100 | signum` for signal deaths. Detached and lost processes have
    /// no code.
    pub fn encoded(&self) -> Option<i32> {
        match self {
            Self::Code { code } => Some(*code),
            Self::Signal { signal, .. } => Some(SIGNALED_BIT | signal),
            Self::Detached | Self::Lost => None,
        }
    }
}

impl From<ExitStatus> for ExitCause {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Exited(code) => Self::Code { code },
            ExitStatus::Signaled(sig, core_dumped) => Self::Signal {
                signal: sig as i32,
                core_dumped,
            },
        }
    }
}

impl fmt::Display for ExitCause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Code { code } => write!(f, "{}", code),
            Self::Signal { signal, .. } => write!(f, "sig{}", signal),
            Self::Detached => f.write_str("detached"),
            Self::Lost => f.write_str("lost"),
        }
    }
}

fn lossy_path<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}

/// What happened.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    /// A process or thread came under supervision.
    ProcessStarted {
        /// Logical identifier.
        id: ProcessId,
        /// Logical identifier of the creator; `None` for the root.
        parent: Option<ProcessId>,
        /// Kernel pid (or tid) at creation.
        pid: i32,
        /// Whether this is a thread of its creator's process.
        is_thread: bool,
        /// Working directory at creation.
        #[serde(serialize_with = "lossy_path")]
        cwd: PathBuf,
    },

    /// A process or thread terminated or left supervision.
    ProcessEnded {
        /// Logical identifier.
        id: ProcessId,
        /// How it ended.
        #[serde(flatten)]
        cause: ExitCause,
        /// User plus system CPU time, when it could be sampled at exit.
        cpu_time_ms: Option<u64>,
    },

    /// A file or directory was accessed.
    FileAccessed {
        /// Logical identifier of the accessing process.
        id: ProcessId,
        /// Absolute, lexically normalized path.
        #[serde(serialize_with = "lossy_path")]
        path: PathBuf,
        /// How it was accessed.
        mode: AccessMode,
        /// Whether the path is a directory.
        is_directory: bool,
        /// The path was resolved against a descriptor that was opened before
        /// tracing began or otherwise never seen, so it is a best guess.
        origin_unknown: bool,
    },

    /// A process successfully replaced its image.
    Executed {
        /// Logical identifier; unchanged by the exec.
        id: ProcessId,
        /// Absolute path of the executed binary.
        #[serde(serialize_with = "lossy_path")]
        binary: PathBuf,
        /// Arguments, including `argv[0]`.
        argv: Vec<String>,
        /// Environment, when configured to record it.
        envp: Option<Vec<String>>,
        /// Working directory at the time of the exec.
        #[serde(serialize_with = "lossy_path")]
        cwd: PathBuf,
        /// Position of this exec among the execs of this process, from 0.
        exec_seq: u32,
    },

    /// A network dependency: an outbound connection or an accepted one.
    Connection {
        /// Logical identifier.
        id: ProcessId,
        /// True for `accept`, false for `connect`.
        inbound: bool,
        /// Address family.
        family: Family,
        /// Protocol, derived from the socket type.
        protocol: String,
        /// Printable peer address.
        address: String,
    },

    /// A syscall that could not be decoded. Kept so that the report stays
    /// auditable.
    UnknownAccess {
        /// Logical identifier.
        id: ProcessId,
        /// Calling convention of the syscall.
        abi: Abi,
        /// Raw syscall number.
        nr: u64,
        /// Name, if the number is known at all.
        name: Option<String>,
        /// Why it could not be decoded.
        reason: String,
    },
}

impl RecordKind {
    /// The process the record belongs to.
    pub fn process(&self) -> ProcessId {
        match self {
            Self::ProcessStarted { id, .. }
            | Self::ProcessEnded { id, .. }
            | Self::FileAccessed { id, .. }
            | Self::Executed { id, .. }
            | Self::Connection { id, .. }
            | Self::UnknownAccess { id, .. } => *id,
        }
    }
}

/// One entry of the record stream.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Position in the stream, starting at 0 and strictly increasing.
    pub seq: u64,
    /// When the supervisor observed the event.
    pub time: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub kind: RecordKind,
}

/// A process with everything the stream says about it, assembled after the
/// fact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    /// Logical identifier.
    pub id: ProcessId,
    /// Creator.
    pub parent: Option<ProcessId>,
    /// Pid at creation.
    pub pid: i32,
    /// Whether it is a thread.
    pub is_thread: bool,
    /// Working directory at creation.
    pub cwd: PathBuf,
    /// When it started.
    pub started: DateTime<Utc>,
    /// When it ended, and how.
    pub ended: Option<(DateTime<Utc>, ExitCause)>,
    /// CPU time, if sampled.
    pub cpu_time_ms: Option<u64>,
    /// Binaries executed, in order.
    pub executed: Vec<PathBuf>,
}

/// Groups a record stream by process, in order of creation.
pub fn process_records(records: &[Record]) -> Vec<ProcessRecord> {
    let mut processes: BTreeMap<ProcessId, ProcessRecord> = BTreeMap::new();
    for record in records {
        match &record.kind {
            RecordKind::ProcessStarted {
                id,
                parent,
                pid,
                is_thread,
                cwd,
            } => {
                processes.insert(
                    *id,
                    ProcessRecord {
                        id: *id,
                        parent: *parent,
                        pid: *pid,
                        is_thread: *is_thread,
                        cwd: cwd.clone(),
                        started: record.time,
                        ended: None,
                        cpu_time_ms: None,
                        executed: Vec::new(),
                    },
                );
            }
            RecordKind::ProcessEnded {
                id,
                cause,
                cpu_time_ms,
            } => {
                if let Some(process) = processes.get_mut(id) {
                    process.ended = Some((record.time, *cause));
                    process.cpu_time_ms = *cpu_time_ms;
                }
            }
            RecordKind::Executed { id, binary, .. } => {
                if let Some(process) = processes.get_mut(id) {
                    process.executed.push(binary.clone());
                }
            }
            _ => {}
        }
    }
    processes.into_values().collect()
}
