/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Interrupting the supervisor while it blocks in `waitid`.
//!
//! The supervisor only ever sleeps in `waitid`. Aborts and the deadline reach
//! it as [`WAKE_SIGNAL`], directed at the supervising thread and caught by a
//! handler installed without `SA_RESTART`, so that the wait fails with `EINTR`
//! and the loop gets to look at the abort flag and the clock.

use std::sync::Once;
use std::time::Duration;

use nix::sys::signal;
use nix::sys::signal::SaFlags;
use nix::sys::signal::SigAction;
use nix::sys::signal::SigEvent;
use nix::sys::signal::SigHandler;
use nix::sys::signal::SigSet;
use nix::sys::signal::SigevNotify;
use nix::sys::time::TimeSpec;
use nix::sys::timer::Expiration;
use nix::sys::timer::Timer;
use nix::sys::timer::TimerSetTimeFlags;
use nix::time::ClockId;
use safeptrace::Pid;
use safeptrace::Signal;

/// Signal used to interrupt the supervisor.
pub const WAKE_SIGNAL: Signal = Signal::SIGALRM;

/// The shortest expiry a timer can be armed with; zero disarms it.
const MIN_EXPIRY: Duration = Duration::from_micros(1);

extern "C" fn on_wake(_: libc::c_int) {}

/// Installs the handler for [`WAKE_SIGNAL`] once per process.
pub fn install_handler() -> nix::Result<()> {
    static INSTALL: Once = Once::new();
    let mut result = Ok(());
    INSTALL.call_once(|| {
        let action = SigAction::new(
            SigHandler::Handler(on_wake),
            SaFlags::empty(),
            SigSet::empty(),
        );
        result = unsafe { signal::sigaction(WAKE_SIGNAL, &action) }.map(drop);
    });
    result
}

/// Sends [`WAKE_SIGNAL`] to thread `tid` of this process. Async-signal-safe.
pub fn wake(tid: Pid) {
    unsafe {
        libc::syscall(
            libc::SYS_tgkill,
            libc::getpid(),
            tid.as_raw(),
            WAKE_SIGNAL as libc::c_int,
        );
    }
}

/// A timer delivering [`WAKE_SIGNAL`] to the thread that created it, first
/// after a given delay and then periodically. The periodic ticks recover a
/// wake-up that landed just before the thread entered `waitid`.
pub struct WakeTimer {
    timer: Timer,
    every: Duration,
}

impl WakeTimer {
    /// Creates a timer aimed at the calling thread and arms it.
    pub fn new(first: Duration, every: Duration) -> nix::Result<Self> {
        let event = SigEvent::new(SigevNotify::SigevThreadId {
            signal: WAKE_SIGNAL,
            thread_id: nix::unistd::gettid().as_raw(),
            si_value: 0,
        });
        let timer = Timer::new(ClockId::CLOCK_MONOTONIC, event)?;
        let mut timer = Self {
            timer,
            every: every.max(MIN_EXPIRY),
        };
        timer.rearm(first)?;
        Ok(timer)
    }

    /// Fires next after `first`, then every period.
    pub fn rearm(&mut self, first: Duration) -> nix::Result<()> {
        self.timer.set(
            Expiration::IntervalDelayed(
                TimeSpec::from(first.max(MIN_EXPIRY)),
                TimeSpec::from(self.every),
            ),
            TimerSetTimeFlags::empty(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn timer_interrupts_a_blocking_call() {
        install_handler().unwrap();
        let _timer = WakeTimer::new(Duration::from_millis(20), Duration::from_secs(5)).unwrap();

        let start = Instant::now();
        let slept = unsafe { libc::usleep(2_000_000) };
        assert_eq!(slept, -1);
        assert_eq!(nix::errno::Errno::last(), nix::errno::Errno::EINTR);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
