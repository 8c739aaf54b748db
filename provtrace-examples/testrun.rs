/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Traces a program and prints what it did: processes, executed files, file
//! accesses and network connections.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io;
use std::io::BufWriter;
use std::io::Write;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use clap::Parser;
use clap::ValueEnum;
use provtrace::AccessMode;
use provtrace::Command;
use provtrace::EventSink;
use provtrace::ExitStatus;
use provtrace::JsonLines;
use provtrace::Record;
use provtrace::RecordKind;
use provtrace::Recorder;
use provtrace::TraceResult;
use provtrace::TracerBuilder;
use provtrace::process_records;
use provtrace_util::CommonToolArguments;
use provtrace_util::abort_on_signals;
use tracing::info;

/// Exit code when tracing itself failed.
const INTERNAL_ERROR: i32 = 125;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Human readable tables once the program is done.
    #[default]
    Table,
    /// One JSON record per line, as they happen.
    Jsonl,
}

/// Runs a program under provtrace and reports its side effects.
#[derive(Debug, Parser)]
struct Opts {
    #[clap(flatten)]
    common: CommonToolArguments,

    /// Output format.
    #[clap(long, value_enum, default_value_t = Format::Table)]
    format: Format,
}

fn main() {
    let args = Opts::parse();
    let log_guard = args.common.init_tracing();

    let result = run(args);
    drop(log_guard); // Flush logs before exiting.

    match result {
        Ok(status) => status.raise_or_exit(),
        Err(err) => {
            eprintln!("testrun: {:#}", err);
            std::process::exit(INTERNAL_ERROR)
        }
    }
}

fn run(args: Opts) -> anyhow::Result<ExitStatus> {
    let abort = abort_on_signals()?;
    let config = args.common.config();
    let command = Command::from(args.common);
    let builder = TracerBuilder::new(command)
        .config(config)
        .abort_handle(abort);

    let status = match args.format {
        Format::Jsonl => {
            let sink = JsonLines::new(BufWriter::new(io::stdout()));
            let TraceResult { status, mut sink } = builder.sink(sink).spawn()?.wait();
            sink.flush()?;
            status?
        }
        Format::Table => {
            let TraceResult { status, sink } = builder.spawn()?.wait();
            // Partial records are still worth showing.
            print_report(&mut io::stdout().lock(), &sink)?;
            status?
        }
    };

    info!("testrun: root exited with {:?}", status);
    warn_status(status);
    Ok(status)
}

fn warn_status(status: ExitStatus) {
    if let Some(sig) = status.signal() {
        eprintln!("Warning: program was killed by signal {}", sig);
    } else if !status.success() {
        eprintln!(
            "Warning: program exited with non-zero code {}",
            status.code().unwrap_or_default()
        );
    }
}

fn timestamp(time: &DateTime<Utc>) -> String {
    time.format("%H:%M:%S%.3f").to_string()
}

fn print_report<W: Write>(out: &mut W, recorder: &Recorder) -> io::Result<()> {
    let records = recorder.records();
    print_processes(out, records)?;
    print_executed(out, records)?;
    print_files(out, records)?;
    print_connections(out, records)
}

fn print_processes<W: Write>(out: &mut W, records: &[Record]) -> io::Result<()> {
    writeln!(out, "\n----- PROCESSES -----")?;
    writeln!(
        out,
        "{:>5} {:>6} {:>7} {:>6} {:>12} {:>12} {:>9}",
        "id", "parent", "pid", "thread", "started", "ended", "exit"
    )?;
    for process in process_records(records) {
        let (ended, exit) = match &process.ended {
            Some((time, cause)) => (timestamp(time), cause.to_string()),
            None => ("-".to_owned(), "-".to_owned()),
        };
        writeln!(
            out,
            "{:>5} {:>6} {:>7} {:>6} {:>12} {:>12} {:>9}",
            process.id,
            process.parent.map_or("-".to_owned(), |p| p.to_string()),
            process.pid,
            if process.is_thread { "yes" } else { "no" },
            timestamp(&process.started),
            ended,
            exit,
        )?;
        if let Some(cpu) = process.cpu_time_ms {
            writeln!(out, "{:>5} cpu {} ms", "", cpu)?;
        }
    }
    Ok(())
}

fn print_executed<W: Write>(out: &mut W, records: &[Record]) -> io::Result<()> {
    writeln!(out, "\n----- EXECUTED FILES -----")?;
    for record in records {
        if let RecordKind::Executed {
            id,
            binary,
            argv,
            cwd,
            ..
        } = &record.kind
        {
            let binary = binary.to_string_lossy();
            let mut line = binary.to_string();
            if let Some(arg0) = argv.first().filter(|arg0| **arg0 != binary) {
                line.push_str(&format!(" ({})", arg0));
            }
            for arg in argv.iter().skip(1) {
                line.push(' ');
                line.push_str(arg);
            }
            writeln!(out, "{:>5} {}", id, line)?;
            writeln!(out, "{:>5}   wd: {}", "", cwd.display())?;
        }
    }
    Ok(())
}

fn print_files<W: Write>(out: &mut W, records: &[Record]) -> io::Result<()> {
    let mut files: BTreeMap<PathBuf, (AccessMode, bool)> = BTreeMap::new();
    for record in records {
        if let RecordKind::FileAccessed {
            path,
            mode,
            origin_unknown,
            ..
        } = &record.kind
        {
            let entry = files
                .entry(path.clone())
                .or_insert((AccessMode::empty(), false));
            entry.0 |= *mode;
            entry.1 |= *origin_unknown;
        }
    }

    writeln!(out, "\n----- FILES -----")?;
    for (path, (mode, origin_unknown)) in files {
        writeln!(
            out,
            "{:#04x} {}{}",
            mode.bits(),
            path.display(),
            if origin_unknown { " (?)" } else { "" }
        )?;
    }
    Ok(())
}

fn print_connections<W: Write>(out: &mut W, records: &[Record]) -> io::Result<()> {
    // (inbound, family, protocol) -> addresses
    let mut connections: BTreeMap<(bool, String, String), BTreeSet<String>> = BTreeMap::new();
    for record in records {
        if let RecordKind::Connection {
            inbound,
            family,
            protocol,
            address,
            ..
        } = &record.kind
        {
            connections
                .entry((*inbound, family.to_string(), protocol.clone()))
                .or_default()
                .insert(address.clone());
        }
    }

    for (title, inbound) in [("REMOTE CONNECTIONS", false), ("INCOMING CONNECTIONS", true)] {
        writeln!(out, "\n----- {} -----", title)?;
        for ((_, family, protocol), addresses) in connections.iter().filter(|(k, _)| k.0 == inbound)
        {
            writeln!(out, "{} {}", family, protocol)?;
            for address in addresses {
                writeln!(out, "    {}", address)?;
            }
        }
    }
    Ok(())
}
