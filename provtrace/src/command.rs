/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The program to trace. Everything `execve` needs is converted to C strings
//! before forking, so that the child only makes async-signal-safe calls.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::ffi::OsStr;
use std::ffi::OsString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;

/// Changes to the environment of the traced program.
#[derive(Default, Clone, Debug)]
pub struct Env {
    clear: bool,
    vars: BTreeMap<OsString, Option<OsString>>,
}

impl Env {
    /// Drops everything inherited from the current process.
    pub fn clear(&mut self) {
        self.clear = true;
        self.vars.clear();
    }

    /// Sets a variable.
    pub fn set(&mut self, key: &OsStr, value: &OsStr) {
        self.vars.insert(key.to_owned(), Some(value.to_owned()));
    }

    /// Removes a variable.
    pub fn remove(&mut self, key: &OsStr) {
        if self.clear {
            self.vars.remove(key);
        } else {
            self.vars.insert(key.to_owned(), None);
        }
    }

    /// Looks a variable up in the environment the program will see.
    pub fn get_captured<K: AsRef<OsStr>>(&self, key: K) -> Option<OsString> {
        let key = key.as_ref();
        match self.vars.get(key) {
            Some(value) => value.clone(),
            None if self.clear => None,
            None => std::env::var_os(key),
        }
    }

    /// The environment the program will see.
    pub fn capture(&self) -> BTreeMap<OsString, OsString> {
        let mut env: BTreeMap<OsString, OsString> = if self.clear {
            BTreeMap::new()
        } else {
            std::env::vars_os().collect()
        };

        for (k, v) in &self.vars {
            match v {
                Some(v) => {
                    env.insert(k.clone(), v.clone());
                }
                None => {
                    env.remove(k);
                }
            }
        }

        env
    }
}

/// A program and how to run it.
#[derive(Clone, Debug)]
pub struct Command {
    program: OsString,
    arg0: Option<OsString>,
    args: Vec<OsString>,
    env: Env,
    current_dir: Option<PathBuf>,
}

impl Command {
    /// Runs `program`, looked up in `$PATH` if it is a bare name.
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            arg0: None,
            args: Vec::new(),
            env: Env::default(),
            current_dir: None,
        }
    }

    /// Overrides `argv[0]`, which defaults to the program as given.
    pub fn arg0<S: AsRef<OsStr>>(&mut self, arg0: S) -> &mut Self {
        self.arg0 = Some(arg0.as_ref().to_owned());
        self
    }

    /// Appends an argument.
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Appends arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Sets an environment variable.
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env.set(key.as_ref(), val.as_ref());
        self
    }

    /// Removes an environment variable.
    pub fn env_remove<K: AsRef<OsStr>>(&mut self, key: K) -> &mut Self {
        self.env.remove(key.as_ref());
        self
    }

    /// Starts from an empty environment.
    pub fn env_clear(&mut self) -> &mut Self {
        self.env.clear();
        self
    }

    /// Working directory of the program. Defaults to ours.
    pub fn current_dir<P: AsRef<Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// The program as given.
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// The arguments, without `argv[0]`.
    pub fn get_args(&self) -> impl Iterator<Item = &OsStr> {
        self.args.iter().map(|a| a.as_os_str())
    }

    /// The working directory, if set.
    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Finds the executable the way a shell would: absolute paths are taken as
    /// is, bare names are looked up in `$PATH`, anything else is relative to
    /// the working directory.
    pub fn find_program(&self) -> io::Result<PathBuf> {
        let program = Path::new(&self.program);

        if program.is_absolute() {
            // Don't canonicalize: the program should be recorded under the
            // name it was run as.
            if is_executable(program) {
                Ok(program.to_path_buf())
            } else {
                Err(io::Error::from_raw_os_error(libc::EACCES))
            }
        } else if program.components().count() == 1 {
            let path = self.env.get_captured("PATH").unwrap_or_default();
            path.as_bytes()
                .split(|c| *c == b':')
                .map(|dir| Path::new(OsStr::from_bytes(dir)).join(program))
                .find(|candidate| is_executable(candidate))
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("Could not find {:?} in $PATH", program),
                    )
                })
        } else {
            let mut path = match self.get_current_dir() {
                Some(path) => path.to_owned(),
                None => std::env::current_dir()?,
            };
            path.push(program);
            Ok(path)
        }
    }

    /// Working directory the root process will start in.
    pub(crate) fn start_dir(&self) -> io::Result<PathBuf> {
        match &self.current_dir {
            Some(dir) if dir.is_absolute() => Ok(dir.clone()),
            Some(dir) => Ok(std::env::current_dir()?.join(dir)),
            None => std::env::current_dir(),
        }
    }

    /// Converts everything to C strings ahead of the fork.
    pub(crate) fn prepare(&self) -> anyhow::Result<Prepared> {
        let program = self
            .find_program()
            .with_context(|| format!("cannot run {:?}", self.program))?;

        let cstring = |s: &OsStr| {
            CString::new(s.as_bytes()).with_context(|| format!("{:?} contains a NUL byte", s))
        };

        let mut argv = vec![cstring(self.arg0.as_deref().unwrap_or(&self.program))?];
        for arg in &self.args {
            argv.push(cstring(arg.as_os_str())?);
        }

        let mut envp = Vec::new();
        for (mut key, value) in self.env.capture() {
            key.push("=");
            key.push(&value);
            envp.push(
                CString::new(key.into_vec()).context("environment contains a NUL byte")?,
            );
        }

        let current_dir = match &self.current_dir {
            Some(dir) => Some(cstring(dir.as_os_str())?),
            None => None,
        };

        Ok(Prepared {
            program: cstring(program.as_os_str())?,
            argv,
            envp,
            current_dir,
        })
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// A command ready for `execve`.
pub(crate) struct Prepared {
    pub program: CString,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
    pub current_dir: Option<CString>,
}

impl Prepared {
    /// NULL terminated pointer arrays for argv and envp. They borrow from
    /// `self`.
    pub fn pointers(&self) -> (Vec<*const libc::c_char>, Vec<*const libc::c_char>) {
        let table = |items: &[CString]| {
            items
                .iter()
                .map(|s| s.as_ptr())
                .chain(std::iter::once(core::ptr::null()))
                .collect()
        };
        (table(&self.argv), table(&self.envp))
    }
}
