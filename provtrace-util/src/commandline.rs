/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Common support for building the CLI of a provtrace front end.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::Local;
use clap::Parser;
use nix::sys::signal;
use nix::sys::signal::SaFlags;
use nix::sys::signal::SigAction;
use nix::sys::signal::SigHandler;
use nix::sys::signal::SigSet;
use nix::sys::signal::Signal;
use provtrace::AbortHandle;
use provtrace::AbortPolicy;
use provtrace::Command;
use provtrace::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Parses an environment variable command-line argument. A bare `KEY` takes
/// its value from our own environment.
pub fn parse_env(s: &str) -> anyhow::Result<(String, String)> {
    let mut iter = s.splitn(2, '=');

    let key = iter
        .next()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| anyhow::Error::msg("Invalid KEY=VALUE: string is empty"))?
        .to_owned();

    let value = match iter.next() {
        Some(value) => value.to_owned(),
        None => std::env::var(&key).map_err(anyhow::Error::msg)?,
    };

    Ok((key, value))
}

/// Parses a timeout given in (possibly fractional) seconds.
pub fn parse_timeout(s: &str) -> anyhow::Result<Duration> {
    let secs: f64 = s.parse()?;
    Duration::try_from_secs_f64(secs).map_err(anyhow::Error::msg)
}

// Arguments that are shared by provtrace front ends, including which program
// to run and how to run it. Meant to be flattened into a tool's own CLI.
//
// NOTE: Do not change this to a doc comment, clap would use it as the about
// text of every tool that flattens it.
#[allow(missing_docs)]
#[derive(Debug, Clone, Parser)]
pub struct CommonToolArguments {
    /// Direct logging to a file. This can also be set with the RUST_LOG_FILE
    /// environment variable, but the CLI flag takes precedence.
    #[clap(long = "log-file", value_name = "PATH", env = "RUST_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// More logging. Can be given up to three times. RUST_LOG overrides it.
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Do not pass-through host's environment variables, instead providing a
    /// minimal PATH only (/bin:/usr/bin). The default is to pass through the
    /// host environment.
    #[clap(long = "no-host-envs")]
    pub no_host_envs: bool,

    /// Sets an environment variable. Can be used multiple times.
    #[clap(
        long = "env",
        short = 'e',
        value_name = "ENV[=VALUE]",
        value_parser = parse_env,
        num_args = 1
    )]
    pub envs: Vec<(String, String)>,

    /// Runs the program with this argv[0].
    #[clap(short = 'a', long = "arg0", value_name = "ARG0")]
    pub arg0: Option<String>,

    /// Kills the whole process tree after this many seconds.
    #[clap(long = "timeout", value_name = "SECONDS", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// What to do with the process tree on SIGINT or SIGTERM: kill or detach.
    #[clap(long = "on-abort", value_name = "POLICY", default_value_t = AbortPolicy::Kill)]
    pub on_abort: AbortPolicy,

    /// Records the environment of every executed program.
    #[clap(long = "record-env")]
    pub record_environment: bool,

    /// Path of the program to trace.
    #[clap(value_name = "PROGRAM")]
    pub program: String,

    /// Arguments to the program to trace.
    #[clap(value_name = "ARGS")]
    pub program_args: Vec<String>,
}

impl CommonToolArguments {
    /// Create a new configuration to run the given program.
    pub fn new<S: AsRef<OsStr>>(prog: S) -> CommonToolArguments {
        CommonToolArguments {
            log_file: None,
            verbose: 0,
            no_host_envs: false,
            envs: Vec::new(),
            arg0: None,
            timeout: None,
            on_abort: AbortPolicy::default(),
            record_environment: false,
            program: prog.as_ref().to_string_lossy().into_owned(),
            program_args: Vec::new(),
        }
    }

    /// Add an argument, similar to `Command::arg`.
    pub fn arg<S: AsRef<OsStr>>(&mut self, s: S) -> &mut CommonToolArguments {
        self.program_args
            .push(s.as_ref().to_string_lossy().into_owned());
        self
    }

    /// The tracer configuration these arguments ask for.
    pub fn config(&self) -> Config {
        Config {
            on_abort: self.on_abort,
            timeout: self.timeout,
            record_environment: self.record_environment,
            ..Config::default()
        }
    }

    fn default_directive(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    /// Installs the global subscriber. Keep the returned guard alive until
    /// exit, or buffered file logs are lost.
    pub fn init_tracing(&self) -> Option<WorkerGuard> {
        fn set_subscriber_with_writer<T>(writer: T, directive: &str)
        where
            T: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
        {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(directive));
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .finish();
            if tracing::subscriber::set_global_default(subscriber).is_err() {
                eprintln!(" [provtrace] WARNING: a global subscriber was already set");
            }
        }

        let directive = self.default_directive();

        self.log_file
            .as_ref()
            .and_then(|lf| {
                let parent = lf.parent()?;
                let orig_filename = lf.file_name()?.to_os_string();
                let mut filename = orig_filename.clone();

                for _ in 0..100 {
                    if Path::new(parent).join(&filename).exists() {
                        filename = orig_filename.clone();
                        filename.push(format!("{}", Local::now().format(".%Y%m%d.%H%M%S.%f")));
                    } else {
                        break;
                    }
                }

                if Path::new(parent).join(&filename).exists() {
                    eprintln!(
                        " [provtrace] WARNING: could not open log file, falling back to stderr"
                    );
                    None
                } else {
                    let file_writer = tracing_appender::rolling::never(parent, &filename);
                    let (file_writer, guard) = tracing_appender::non_blocking(file_writer);

                    eprintln!(" [provtrace] Logging to file at {:?}", parent.join(&filename));
                    set_subscriber_with_writer(file_writer, directive);
                    Some(guard)
                }
            })
            .or_else(|| {
                set_subscriber_with_writer(io::stderr, directive);
                None
            })
    }
}

impl From<CommonToolArguments> for Command {
    fn from(args: CommonToolArguments) -> Self {
        let mut cmd = Command::new(args.program);
        cmd.args(args.program_args);

        if let Some(arg0) = args.arg0 {
            cmd.arg0(arg0);
        }

        if args.no_host_envs {
            cmd.env_clear();
            cmd.env("PATH", "/bin/:/usr/bin");
        }

        for (key, value) in args.envs {
            cmd.env(key, value);
        }
        cmd
    }
}

static ABORT: OnceLock<AbortHandle> = OnceLock::new();

extern "C" fn request_abort(_: libc::c_int) {
    if let Some(handle) = ABORT.get() {
        handle.abort();
    }
}

/// Returns a handle that SIGINT and SIGTERM trigger from now on. Further
/// calls return the same handle.
///
/// The handler does not restart interrupted calls, so a supervisor blocked in
/// `waitid` on this thread sees the abort right away.
pub fn abort_on_signals() -> nix::Result<AbortHandle> {
    let handle = ABORT.get_or_init(AbortHandle::new).clone();

    let action = SigAction::new(
        SigHandler::Handler(request_abort),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { signal::sigaction(sig, &action) }?;
    }

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsing() {
        assert_eq!(
            parse_env("A=b=c").unwrap(),
            ("A".to_owned(), "b=c".to_owned())
        );
        assert!(parse_env("").is_err());
        assert!(parse_env("PROVTRACE_SURELY_UNSET_VARIABLE").is_err());
    }

    #[test]
    fn timeouts() {
        assert_eq!(parse_timeout("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn parse_and_convert() {
        let args = CommonToolArguments::try_parse_from([
            "provtrace",
            "-v",
            "-v",
            "-e",
            "FOO=bar",
            "--timeout",
            "2",
            "--on-abort",
            "detach",
            "-a",
            "renamed",
            "/bin/ls",
            "-l",
        ])
        .unwrap();

        assert_eq!(args.verbose, 2);
        assert_eq!(args.default_directive(), "debug");

        let config = args.config();
        assert_eq!(config.on_abort, AbortPolicy::Detach);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));

        let command = Command::from(args);
        assert_eq!(command.get_program(), "/bin/ls");
        assert_eq!(command.get_args().collect::<Vec<_>>(), vec!["-l"]);
    }

    #[test]
    fn builder() {
        let mut args = CommonToolArguments::new("/bin/true");
        args.arg("x");
        assert_eq!(args.program_args, vec!["x"]);
        assert_eq!(args.config(), Config::default());
    }
}
