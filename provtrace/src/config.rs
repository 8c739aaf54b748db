/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use core::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// What happens to the traced tree when tracing is aborted or times out.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbortPolicy {
    /// Kill every tracee with `SIGKILL`.
    #[default]
    Kill,
    /// Stop tracing and let every tracee run on its own.
    Detach,
}

impl FromStr for AbortPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kill" => Ok(Self::Kill),
            "detach" => Ok(Self::Detach),
            other => Err(format!(
                "invalid abort policy {:?}, expected \"kill\" or \"detach\"",
                other
            )),
        }
    }
}

impl fmt::Display for AbortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Kill => f.write_str("kill"),
            Self::Detach => f.write_str("detach"),
        }
    }
}

/// Which children the supervisor waits on.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitScope {
    /// Any child of the supervising thread. The traced tree must be the only
    /// children it has.
    #[default]
    All,
    /// Only the process group of the root, which is put into a group of its
    /// own. Lets several traces run in one process, but loses tracees that
    /// move to another group.
    ProcessGroup,
}

/// Tracer configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// What to do with the tree when tracing stops early.
    pub on_abort: AbortPolicy,
    /// Wall-clock budget for the whole run.
    pub timeout: Option<Duration>,
    /// Paths below these prefixes are not recorded.
    pub excluded_prefixes: Vec<PathBuf>,
    /// Record the environment of every executed program.
    pub record_environment: bool,
    /// Which children to wait on.
    pub wait_scope: WaitScope,
    /// While a timeout or an abort handle is armed, how often a timer
    /// interrupts the blocked supervisor to look at both again.
    pub wake_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            on_abort: AbortPolicy::default(),
            timeout: None,
            excluded_prefixes: ["/proc", "/dev", "/sys"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            record_environment: false,
            wait_scope: WaitScope::default(),
            wake_interval: Duration::from_millis(250),
        }
    }
}
