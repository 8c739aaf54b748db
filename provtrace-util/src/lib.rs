/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Pieces shared by provtrace front ends: common command line arguments,
//! logging setup and abort-on-signal handling.

#![deny(missing_docs)]

pub mod commandline;

pub use commandline::CommonToolArguments;
pub use commandline::abort_on_signals;
pub use commandline::parse_env;
