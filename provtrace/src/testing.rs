/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Utilities for tests that trace small programs.

use safeptrace::ExitStatus;

use crate::Command;
use crate::Config;
use crate::Error;
use crate::Recorder;
use crate::TraceResult;
use crate::TracerBuilder;
use crate::WaitScope;
use crate::record::RecordKind;

/// Sets up tracing the way we like for tests. Safe to call more than once.
pub fn init_test_logging() {
    let collector = tracing_subscriber::fmt()
        .with_env_filter("provtrace=debug")
        .with_test_writer()
        .finish();

    // Tests run in parallel; whoever gets here first wins.
    tracing::subscriber::set_global_default(collector).unwrap_or(());
}

/// A config for tests. Only the tracee's process group is waited for, so
/// tests running in parallel do not reap each other's children.
pub fn test_config() -> Config {
    Config {
        wait_scope: WaitScope::ProcessGroup,
        ..Config::default()
    }
}

/// Traces a forked function with `config`.
pub fn trace_fn_with_config<F>(f: F, config: Config) -> TraceResult<Recorder>
where
    F: FnOnce() -> i32 + 'static,
{
    init_test_logging();
    match TracerBuilder::from_fn(f).config(config).spawn() {
        Ok(tracer) => tracer.wait(),
        Err(err) => TraceResult {
            status: Err(err),
            sink: Recorder::new(),
        },
    }
}

/// Traces a forked function, returning its exit status and the records.
pub fn trace_fn<F>(f: F) -> Result<(ExitStatus, Recorder), Error>
where
    F: FnOnce() -> i32 + 'static,
{
    let result = trace_fn_with_config(f, test_config());
    Ok((result.status?, result.sink))
}

/// Traces `program` with `args`, returning its exit status and the records.
pub fn trace_cmd(program: &str, args: &[&str]) -> Result<(ExitStatus, Recorder), Error> {
    init_test_logging();
    let mut command = Command::new(program);
    command.args(args);
    let result = TracerBuilder::new(command).config(test_config()).spawn()?.wait();
    Ok((result.status?, result.sink))
}

/// Prints every record, for tests that want to show what was seen.
pub fn print_records(recorder: &Recorder) {
    for record in recorder.records() {
        println!(" >>> {:?}", record);
    }
}

/// Number of `ProcessStarted` and `ProcessEnded` records.
pub fn lifecycle_counts(recorder: &Recorder) -> (usize, usize) {
    recorder.kinds().fold((0, 0), |(started, ended), kind| match kind {
        RecordKind::ProcessStarted { .. } => (started + 1, ended),
        RecordKind::ProcessEnded { .. } => (started, ended + 1),
        _ => (started, ended),
    })
}
