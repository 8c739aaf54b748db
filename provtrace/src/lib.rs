/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Records what a program and all of its descendants do to the filesystem.
//!
//! The root program is started under ptrace and every process and thread it
//! creates is followed. Each tracee stops at every syscall boundary:
//!
//! - Syscall entry: arguments are decoded for the tracee's ABI (x86_64, i386
//!   or x32) and any paths are resolved against the tracee's working
//!   directory or descriptor table.
//! - Syscall exit: successful calls become records, such as a file being
//!   opened for reading or a directory becoming the working directory.
//! - `PTRACE_EVENT_FORK`/`VFORK`/`CLONE`: a new tracee is registered with
//!   the working directory and descriptor table it shares or copies.
//! - `PTRACE_EVENT_EXEC`: an `Executed` record with the arguments read at the
//!   entry of the exec call.
//! - `PTRACE_EVENT_EXIT`: CPU time is sampled before the tracee goes away.
//!
//! Records are handed to an [`EventSink`] in the order they happen.
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod command;
mod config;
mod effects;
mod error;
pub mod path;
mod proc;
mod record;
mod relay;
mod sink;
mod table;
pub mod testing;
mod tracer;
mod wakeup;

pub use safeptrace::ExitStatus;
pub use safeptrace::Pid;

pub use crate::command::Command;
pub use crate::command::Env;
pub use crate::config::AbortPolicy;
pub use crate::config::Config;
pub use crate::config::WaitScope;
pub use crate::error::Errno;
pub use crate::error::Error;
pub use crate::record::AccessMode;
pub use crate::record::ExitCause;
pub use crate::record::ProcessId;
pub use crate::record::ProcessRecord;
pub use crate::record::Record;
pub use crate::record::RecordKind;
pub use crate::record::process_records;
pub use crate::sink::EventSink;
pub use crate::sink::JsonLines;
pub use crate::sink::Recorder;
pub use crate::tracer::AbortHandle;
pub use crate::tracer::TraceResult;
pub use crate::tracer::Tracer;
pub use crate::tracer::TracerBuilder;
