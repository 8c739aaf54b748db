/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The supervisor: spawns the root process under ptrace and drives every
//! tracee's stops until the whole tree is gone.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use anyhow::Context;
use anyhow::anyhow;
use nix::sys::signal;
use nix::unistd;
use nix::unistd::ForkResult;
use provtrace_syscalls::Abi;
use provtrace_syscalls::RawSyscall;
use safeptrace::ChildOp;
use safeptrace::Event;
use safeptrace::ExitStatus;
use safeptrace::Options;
use safeptrace::Pid;
use safeptrace::Running;
use safeptrace::Signal;
use safeptrace::Stopped;
use safeptrace::Wait;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::command::Command;
use crate::config::AbortPolicy;
use crate::config::Config;
use crate::config::WaitScope;
use crate::effects;
use crate::effects::Entry;
use crate::error::Errno;
use crate::error::Error;
use crate::proc;
use crate::record::ExitCause;
use crate::record::ProcessId;
use crate::record::RecordKind;
use crate::relay;
use crate::relay::Resume;
use crate::relay::Stop;
use crate::sink::Emitter;
use crate::sink::EventSink;
use crate::sink::Recorder;
use crate::table::Creation;
use crate::table::Lineage;
use crate::table::ProcessTable;
use crate::table::ROOT_ID;
use crate::table::TraceeState;
use crate::wakeup;
use crate::wakeup::WakeTimer;

/// Exit code of the root child when its program could not be executed.
const EXEC_FAILED: i32 = 127;

/// Exit code of a traced function that panicked.
const FN_PANICKED: i32 = 101;

fn trace_options() -> Options {
    Options::PTRACE_O_TRACESYSGOOD
        | Options::PTRACE_O_TRACEFORK
        | Options::PTRACE_O_TRACEVFORK
        | Options::PTRACE_O_TRACECLONE
        | Options::PTRACE_O_TRACEEXEC
        | Options::PTRACE_O_TRACEEXIT
        | Options::PTRACE_O_EXITKILL
}

#[derive(Debug, Default)]
struct AbortState {
    aborted: AtomicBool,
    /// Thread id of the supervisor blocked on this handle, 0 if none.
    waiter: AtomicI32,
}

/// Requests an early end of a trace from another thread, or from a signal
/// handler. What happens to the tracees is decided by
/// [`Config::on_abort`].
#[derive(Clone, Debug, Default)]
pub struct AbortHandle(Arc<AbortState>);

impl AbortHandle {
    /// A handle that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the tracer to stop and interrupts its wait. Async-signal-safe.
    pub fn abort(&self) {
        self.0.aborted.store(true, Ordering::SeqCst);
        let waiter = self.0.waiter.load(Ordering::SeqCst);
        if waiter != 0 {
            wakeup::wake(Pid::from_raw(waiter));
        }
    }

    /// Whether [`AbortHandle::abort`] was called.
    pub fn is_aborted(&self) -> bool {
        self.0.aborted.load(Ordering::SeqCst)
    }

    fn watch(&self, tid: Pid) {
        self.0.waiter.store(tid.as_raw(), Ordering::SeqCst);
    }

    fn unwatch(&self) {
        self.0.waiter.store(0, Ordering::SeqCst);
    }
}

enum Target {
    Command(Command),
    Function(Box<dyn FnOnce() -> i32>),
}

/// Configures and starts a trace.
pub struct TracerBuilder<S> {
    target: Target,
    config: Config,
    sink: S,
    abort: Option<AbortHandle>,
}

impl TracerBuilder<Recorder> {
    /// Traces `command`, keeping the records in memory until another sink is
    /// chosen.
    pub fn new(command: Command) -> Self {
        Self {
            target: Target::Command(command),
            config: Config::default(),
            sink: Recorder::new(),
            abort: None,
        }
    }

    /// Traces a fork of the current process that runs `f` and exits with its
    /// return value. Mostly useful for tests.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> i32 + 'static,
    {
        Self {
            target: Target::Function(Box::new(f)),
            config: Config::default(),
            sink: Recorder::new(),
            abort: None,
        }
    }
}

impl<S: EventSink> TracerBuilder<S> {
    /// Sets the configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sends records to `sink` instead.
    pub fn sink<T: EventSink>(self, sink: T) -> TracerBuilder<T> {
        TracerBuilder {
            target: self.target,
            config: self.config,
            sink,
            abort: self.abort,
        }
    }

    /// Lets `handle` abort the trace.
    pub fn abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = Some(handle);
        self
    }

    /// Starts the root process. It is stopped until [`Tracer::wait`] runs
    /// the trace.
    pub fn spawn(self) -> Result<Tracer<S>, Error> {
        let TracerBuilder {
            target,
            config,
            sink,
            abort,
        } = self;

        let (root, cwd) = spawn_root(target, config.wait_scope)?;

        let mut table = ProcessTable::new();
        let id = table.insert_root(root.pid(), cwd.clone());
        let mut emitter = Emitter::new(sink);
        emitter.emit(RecordKind::ProcessStarted {
            id,
            parent: None,
            pid: root.pid().as_raw(),
            is_thread: false,
            cwd,
        });
        info!("[{}] spawn: root process {} started", root.pid(), id);

        let pid = root.pid();
        root.syscall(None)?;

        Ok(Tracer {
            root: pid,
            deadline: config.timeout.map(|timeout| Instant::now() + timeout),
            config,
            table,
            emitter,
            abort,
            stopping: None,
            timed_out: false,
            root_status: None,
            fault: None,
        })
    }
}

/// Forks the root child and seizes it at the stop it raises before exec.
fn spawn_root(target: Target, scope: WaitScope) -> Result<(Stopped, PathBuf), Error> {
    let (prepared, cwd) = match &target {
        Target::Command(command) => {
            let prepared = command.prepare()?;
            let cwd = command
                .start_dir()
                .context("Could not determine the starting directory")?;
            (Some(prepared), cwd)
        }
        Target::Function(_) => (
            None,
            std::env::current_dir().context("Could not determine the current directory")?,
        ),
    };
    let pointers = prepared.as_ref().map(|prepared| prepared.pointers());

    // Warning: nothing between fork and exec may allocate.
    match unsafe { unistd::fork() }? {
        ForkResult::Child => {
            unsafe {
                if scope == WaitScope::ProcessGroup {
                    libc::setpgid(0, 0);
                }
                if let Some(dir) = prepared.as_ref().and_then(|p| p.current_dir.as_ref()) {
                    if libc::chdir(dir.as_ptr()) != 0 {
                        libc::_exit(EXEC_FAILED);
                    }
                }
                libc::raise(libc::SIGSTOP);
            }
            match (target, prepared, pointers) {
                (Target::Command(_), Some(prepared), Some((argv, envp))) => unsafe {
                    libc::execve(prepared.program.as_ptr(), argv.as_ptr(), envp.as_ptr());
                    libc::_exit(EXEC_FAILED)
                },
                (Target::Function(f), _, _) => {
                    let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
                        .unwrap_or(FN_PANICKED);
                    unsafe { libc::_exit(code) }
                }
                _ => unsafe { libc::_exit(EXEC_FAILED) },
            }
        }
        ForkResult::Parent { child } => {
            let running = Running::seize(child, trace_options())?;
            // Spurious signals may arrive before our own SIGSTOP.
            let wait = running.wait_until(|event| {
                matches!(event, Event::Signal(Signal::SIGSTOP) | Event::Stop(_))
            })?;
            match wait {
                Wait::Stopped(stopped, _) => Ok((stopped, cwd)),
                Wait::Exited(pid, status) => Err(Error::Spawn(anyhow!(
                    "root process {} exited before tracing started: {:?}",
                    pid,
                    status
                ))),
            }
        }
    }
}

/// The outcome of a trace.
#[derive(Debug)]
pub struct TraceResult<S> {
    /// The exit status of the root process, or why there is none.
    pub status: Result<ExitStatus, Error>,
    /// The sink, holding or having written every record.
    pub sink: S,
}

enum Next {
    Wait(Wait),
    /// A signal interrupted the wait.
    Tick,
    /// No children left.
    Done,
}

/// A running trace. Single threaded: [`Tracer::wait`] blocks the calling
/// thread until the process tree is gone.
pub struct Tracer<S> {
    root: Pid,
    config: Config,
    table: ProcessTable,
    emitter: Emitter<S>,
    abort: Option<AbortHandle>,
    deadline: Option<Instant>,
    /// Set once the trace is being torn down.
    stopping: Option<AbortPolicy>,
    timed_out: bool,
    root_status: Option<ExitStatus>,
    /// The first fault that cost us the root process.
    fault: Option<Error>,
}

impl<S: EventSink> Tracer<S> {
    /// Pid of the root process.
    pub fn pid(&self) -> Pid {
        self.root
    }

    /// Runs the trace to completion.
    pub fn wait(mut self) -> TraceResult<S> {
        self.run();
        self.flush_leftovers();

        let Tracer {
            root,
            config,
            emitter,
            stopping,
            timed_out,
            root_status,
            fault,
            ..
        } = self;

        let (sink, sink_error) = emitter.finish();

        let status = if let Some(fault) = fault {
            Err(fault)
        } else if let Some((source, dropped)) = sink_error {
            Err(Error::Sink { source, dropped })
        } else if stopping == Some(AbortPolicy::Detach) {
            Err(Error::Detached { pid: root })
        } else if timed_out {
            Err(Error::TimedOut {
                pid: root,
                timeout: config.timeout.unwrap_or_default(),
            })
        } else {
            root_status.ok_or(Error::RootLost {
                pid: root,
                source: safeptrace::Error::Errno(Errno::ECHILD),
            })
        };

        TraceResult { status, sink }
    }

    fn run(&mut self) {
        let mut timer = self.arm_wakeups();

        loop {
            self.check_abort();

            // Held tracees wait for a creator; with nobody left to create
            // them they belong to whoever /proc names.
            if self.table.is_empty() && !self.table.held().is_empty() {
                self.adopt_held(true);
            }

            if self.stopping == Some(AbortPolicy::Detach)
                && self.table.is_empty()
                && self.table.held().is_empty()
            {
                break;
            }

            match self.next_wait() {
                Ok(Next::Wait(wait)) => self.dispatch(wait),
                Ok(Next::Tick) => {
                    if let Some(timer) = timer.as_mut() {
                        if let Err(err) = timer.rearm(self.next_wake()) {
                            warn!(
                                "[{}] run: rearming the wake timer failed: {}",
                                self.root, err
                            );
                        }
                    }
                }
                Ok(Next::Done) => break,
                Err(safeptrace::Error::Died(zombie)) => {
                    debug!("[{}] run: died at an event stop", zombie.pid());
                }
                Err(err) => {
                    error!("[{}] run: waiting for tracees failed: {}", self.root, err);
                    self.fault.get_or_insert(Error::RootLost {
                        pid: self.root,
                        source: err,
                    });
                    self.kill_all();
                    break;
                }
            }
        }

        if let Some(abort) = &self.abort {
            abort.unwatch();
        }
    }

    /// Lets aborts and the deadline interrupt the wait of this thread. The
    /// timer is only needed when either is armed.
    fn arm_wakeups(&mut self) -> Option<WakeTimer> {
        if self.abort.is_none() && self.deadline.is_none() {
            return None;
        }
        if let Err(err) = wakeup::install_handler() {
            warn!("[{}] arm_wakeups: no wake-up handler: {}", self.root, err);
            return None;
        }
        if let Some(abort) = &self.abort {
            abort.watch(unistd::gettid());
        }
        match WakeTimer::new(self.next_wake(), self.config.wake_interval) {
            Ok(timer) => Some(timer),
            Err(err) => {
                warn!("[{}] arm_wakeups: no wake timer: {}", self.root, err);
                None
            }
        }
    }

    /// Time until the wait should be interrupted next.
    fn next_wake(&self) -> Duration {
        let recheck = self.config.wake_interval;
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(recheck),
            None => recheck,
        }
    }

    fn abort_requested(&self) -> bool {
        self.abort.as_ref().is_some_and(|abort| abort.is_aborted())
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn check_abort(&mut self) {
        if self.stopping.is_some() {
            return;
        }
        if self.abort_requested() {
            info!(
                "[{}] check_abort: aborted, policy {}",
                self.root, self.config.on_abort
            );
            self.stop(self.config.on_abort);
        } else if self.deadline_passed() {
            warn!(
                "[{}] check_abort: timed out after {:?}",
                self.root, self.config.timeout
            );
            self.timed_out = true;
            self.stop(AbortPolicy::Kill);
        }
    }

    fn stop(&mut self, policy: AbortPolicy) {
        self.stopping = Some(policy);
        match policy {
            AbortPolicy::Kill => self.kill_all(),
            AbortPolicy::Detach => {
                for pid in self.table.held() {
                    if let Some((stopped, event)) = self.table.take_held(pid) {
                        self.adopt(stopped, event);
                    }
                }
                for pid in self.table.pids() {
                    if let Err(err) = Running::new(pid).interrupt() {
                        debug!("[{}] stop: interrupt failed: {}", pid, err);
                    }
                }
            }
        }
    }

    /// Blocks until the next event. This is the only place the supervisor
    /// sleeps.
    fn next_wait(&mut self) -> Result<Next, safeptrace::Error> {
        let wait = match self.config.wait_scope {
            WaitScope::All => safeptrace::wait_all(),
            WaitScope::ProcessGroup => safeptrace::wait_group(self.root),
        };
        match wait {
            Ok(wait) => Ok(wait.map_or(Next::Done, Next::Wait)),
            Err(safeptrace::Error::Errno(Errno::EINTR)) => Ok(Next::Tick),
            Err(err) => Err(err),
        }
    }

    fn dispatch(&mut self, wait: Wait) {
        let pid = wait.pid();
        let phase = self.table.phase(pid);
        let stop = relay::classify(phase, &wait, || match &wait {
            Wait::Stopped(stopped, _) => matches!(
                stopped.getsiginfo(),
                Err(safeptrace::Error::Errno(Errno::EINVAL))
            ),
            Wait::Exited(..) => false,
        });
        trace!("[{}] dispatch: {:?} in {:?}", pid, stop, phase);

        let result = match wait {
            Wait::Exited(pid, status) => {
                self.death(pid, status);
                Ok(())
            }
            Wait::Stopped(stopped, event) => match stop {
                Stop::Early => {
                    self.early(stopped, event);
                    Ok(())
                }
                stop => self.handle_stop(stopped, stop),
            },
        };

        if let Err(err) = result {
            self.supervision_fault(pid, err);
        }
    }

    fn handle_stop(&mut self, stopped: Stopped, stop: Stop) -> Result<(), safeptrace::Error> {
        let pid = stopped.pid();

        match stop {
            Stop::Initial => {
                if let Some(tracee) = self.table.get_mut(pid) {
                    tracee.state = TraceeState::Running;
                }
            }
            Stop::SyscallEntry => self.syscall_entry(&stopped)?,
            Stop::SyscallExit => self.syscall_exit(&stopped)?,
            Stop::GroupStop(sig) => {
                debug!("[{}] handle_stop: group-stop by {}", pid, sig);
            }
            Stop::Signal(sig) => {
                debug!("[{}] handle_stop: delivering {}", pid, sig);
            }
            Stop::Exec { former } => self.exec(&stopped, former)?,
            Stop::NewChild { op, child } => self.new_child(pid, op, child),
            Stop::ExitPending => {
                if let Some(tracee) = self.table.get_mut(pid) {
                    tracee.cpu_time_ms = proc::cpu_time_ms(pid);
                    tracee.state = TraceeState::Exited;
                }
            }
            Stop::Interrupt | Stop::VforkDone | Stop::Seccomp => {}
            Stop::Early | Stop::Death(_) => {}
        }

        match stop.resume() {
            Some(how) => self.resume(stopped, how),
            None => Ok(()),
        }
    }

    fn resume(&mut self, stopped: Stopped, how: Resume) -> Result<(), safeptrace::Error> {
        let pid = stopped.pid();

        match self.stopping {
            Some(AbortPolicy::Detach) => {
                let sig = match how {
                    Resume::Syscall(sig) => sig,
                    Resume::Listen | Resume::Hold => None,
                };
                stopped.detach(sig)?;
                if let Some(tracee) = self.table.remove(pid) {
                    info!("[{}] resume: detached process {}", pid, tracee.id);
                    self.emitter.emit(RecordKind::ProcessEnded {
                        id: tracee.id,
                        cause: ExitCause::Detached,
                        cpu_time_ms: proc::cpu_time_ms(pid),
                    });
                }
                return Ok(());
            }
            Some(AbortPolicy::Kill) => {
                // A tracee that escaped the first round of kills.
                let _ = signal::kill(pid, Signal::SIGKILL);
            }
            None => {}
        }

        match how {
            Resume::Syscall(sig) => stopped.syscall(sig).map(drop),
            Resume::Listen => stopped.listen().map(drop),
            Resume::Hold => Ok(()),
        }
    }

    fn syscall_entry(&mut self, stopped: &Stopped) -> Result<(), safeptrace::Error> {
        let regs = stopped.getregs()?;
        let raw = RawSyscall::from_regs(&regs);

        let Some(tracee) = self.table.get_mut(stopped.pid()) else {
            return Ok(());
        };
        tracee.abi = raw.abi;

        let pending = match effects::syscall_entry(stopped, tracee, &raw, &self.config) {
            Entry::Ignored => None,
            Entry::Pending(pending) => Some(pending),
            Entry::Unknown(record) => {
                self.emitter.emit(record);
                None
            }
        };
        tracee.state = TraceeState::InSyscall(pending);
        Ok(())
    }

    fn syscall_exit(&mut self, stopped: &Stopped) -> Result<(), safeptrace::Error> {
        let Some(tracee) = self.table.get_mut(stopped.pid()) else {
            return Ok(());
        };
        let state = std::mem::replace(&mut tracee.state, TraceeState::Running);
        let TraceeState::InSyscall(Some(pending)) = state else {
            return Ok(());
        };
        if pending.syscall().kind.is_sigreturn() {
            return Ok(());
        }

        let creating = pending.clone_flags().is_some();
        let rax = stopped.getregs()?.rax;
        for record in effects::syscall_exit(stopped, tracee, *pending, rax, &self.config) {
            self.emitter.emit(record);
        }
        if creating {
            self.creation_done(stopped.pid());
        }
        Ok(())
    }

    fn exec(&mut self, stopped: &Stopped, former: Pid) -> Result<(), safeptrace::Error> {
        let pid = stopped.pid();

        if let Some(thread) = self.table.exec_rekey(pid, former) {
            info!(
                "[{}] exec: thread {} ({}) exec'd on behalf of its process",
                pid, former, thread.id
            );
            self.emitter.emit(RecordKind::ProcessEnded {
                id: thread.id,
                cause: ExitCause::Code { code: 0 },
                cpu_time_ms: thread.cpu_time_ms,
            });
        }

        let abi = Abi::detect(&stopped.getregs()?);

        let Some(tracee) = self.table.get_mut(pid) else {
            warn!("[{}] exec: not a known tracee", pid);
            return Ok(());
        };

        // The exit stop of the exec call still follows.
        let pending = match std::mem::replace(&mut tracee.state, TraceeState::InSyscall(None)) {
            TraceeState::InSyscall(pending) => pending,
            _ => None,
        };

        for record in effects::exec(tracee, pending, abi, &self.config) {
            self.emitter.emit(record);
        }
        Ok(())
    }

    fn new_child(&mut self, parent: Pid, op: ChildOp, child: Pid) {
        let flags = self
            .table
            .get(parent)
            .and_then(|tracee| match &tracee.state {
                TraceeState::InSyscall(Some(pending)) => pending.clone_flags(),
                _ => None,
            })
            .unwrap_or_else(|| default_clone_flags(op, child));

        let creation = match op {
            ChildOp::Fork => Creation::Fork,
            ChildOp::Vfork => Creation::Vfork,
            ChildOp::Clone if flags & libc::CLONE_THREAD as u64 != 0 => Creation::Thread,
            ChildOp::Clone if flags & libc::CLONE_VFORK as u64 != 0 => Creation::Vfork,
            ChildOp::Clone => Creation::Fork,
        };

        let Some(lineage) = self.table.lineage(parent, child, creation, flags) else {
            warn!("[{}] new_child: creator of {} is not known", parent, child);
            return;
        };
        debug!(
            "[{}] new_child: {} by {:?}, flags {:#x}",
            parent, child, op, flags
        );

        if let Some(tracee) = self.table.get_mut(child) {
            if tracee.creation == Creation::Adopted {
                debug!(
                    "[{}] new_child: {} was adopted as process {}",
                    parent, child, tracee.id
                );
                tracee.parent = lineage.parent;
                return;
            }
        }

        if let Some(status) = self.table.claim_unknown_death(child, parent) {
            self.register(child, lineage, TraceeState::Running);
            self.death(child, status);
            return;
        }
        if let Some(status) = self.table.take_unknown_death(child) {
            // Died before an earlier task with the same pid was announced.
            self.settle_unknown_death(child, status);
        }

        if let Some((stopped, event)) = self.table.take_held(child) {
            self.register(child, lineage, TraceeState::Attaching);
            self.dispatch(Wait::Stopped(stopped, event));
        } else {
            self.register(child, lineage, TraceeState::Attaching);
        }
    }

    fn register(&mut self, pid: Pid, lineage: Lineage, state: TraceeState) -> ProcessId {
        let parent = lineage.parent;
        let is_thread = lineage.creation == Creation::Thread || lineage.tgid != pid;
        let cwd = lineage.cwd.borrow().clone();

        let (id, stale) = self.table.register(pid, lineage, state);
        if let Some(stale) = stale {
            warn!(
                "[{}] register: replacing stale entry of process {}",
                pid, stale.id
            );
            self.emitter.emit(RecordKind::ProcessEnded {
                id: stale.id,
                cause: ExitCause::Lost,
                cpu_time_ms: None,
            });
        }

        info!(
            "[{}] register: process {} started by {:?}, thread: {}",
            pid, id, parent, is_thread
        );
        self.emitter.emit(RecordKind::ProcessStarted {
            id,
            parent,
            pid: pid.as_raw(),
            is_thread,
            cwd,
        });
        id
    }

    /// First stop of a pid whose creation event has not been seen yet.
    fn early(&mut self, stopped: Stopped, event: Event) {
        let pid = stopped.pid();

        if self.stopping.is_none() {
            let creator = proc::Status::read(pid).ok().map(|s| s.creator(pid));
            if let Some(creator) = creator {
                if self.table.contains(creator) || self.table.is_held(creator) {
                    debug!("[{}] early: holding until {} reports", pid, creator);
                    self.table.hold(stopped, event);
                    return;
                }
            }
        }

        self.adopt(stopped, event);
    }

    /// Registers a tracee without a creation event and handles its stop.
    fn adopt(&mut self, stopped: Stopped, event: Event) {
        let pid = stopped.pid();
        let status = proc::Status::read(pid).ok();
        let (tgid, creator) = match &status {
            Some(status) => (status.tgid, Some(status.creator(pid))),
            None => (pid, None),
        };

        let lineage = self
            .table
            .orphan_lineage(pid, tgid, creator, proc::cwd(pid));
        info!("[{}] adopt: creator {:?} never reported it", pid, creator);
        self.register(pid, lineage, TraceeState::Attaching);
        self.dispatch(Wait::Stopped(stopped, event));
    }

    /// Adopts held tracees whose creator is gone, in pid order. With `all`,
    /// adopts every held tracee.
    fn adopt_held(&mut self, all: bool) {
        for pid in self.table.held() {
            let creator = proc::Status::read(pid).ok().map(|s| s.creator(pid));
            let waiting = creator
                .is_some_and(|creator| self.table.contains(creator) || self.table.is_held(creator));
            if all || !waiting {
                if let Some((stopped, event)) = self.table.take_held(pid) {
                    self.adopt(stopped, event);
                }
            }
        }
    }

    fn death(&mut self, pid: Pid, status: ExitStatus) {
        if pid == self.root {
            self.root_status = Some(status);
        }

        match self.table.remove(pid) {
            Some(tracee) => {
                let cause = ExitCause::from(status);
                info!("[{}] death: process {} ended: {}", pid, tracee.id, cause);
                self.emitter.emit(RecordKind::ProcessEnded {
                    id: tracee.id,
                    cause,
                    cpu_time_ms: tracee.cpu_time_ms,
                });
                self.creation_done(pid);
                if !self.table.held().is_empty() {
                    self.adopt_held(false);
                }
            }
            None => {
                if self.table.note_unknown_death(pid, status) {
                    debug!("[{}] death: not announced yet", pid);
                } else {
                    self.settle_unknown_death(pid, status);
                }
            }
        }
    }

    /// Ends the unclaimed deaths that `creator` could still have announced.
    fn creation_done(&mut self, creator: Pid) {
        for pid in self.table.creation_done(creator) {
            if let Some(status) = self.table.take_unknown_death(pid) {
                self.settle_unknown_death(pid, status);
            }
        }
    }

    /// Reports a pid that died before any creator announced it, and that no
    /// creator can announce any more.
    fn settle_unknown_death(&mut self, pid: Pid, status: ExitStatus) {
        info!("[{}] settle_unknown_death: nobody announced it", pid);
        let lineage = self.table.orphan_lineage(pid, pid, None, None);
        self.register(pid, lineage, TraceeState::Running);
        self.death(pid, status);
    }

    fn supervision_fault(&mut self, pid: Pid, err: safeptrace::Error) {
        if let safeptrace::Error::Died(_) = err {
            debug!("[{}] supervision_fault: tracee died while stopped", pid);
            return;
        }

        let id = self.table.get(pid).map(|tracee| tracee.id);
        if pid == self.root || id == Some(ROOT_ID) {
            error!(
                "[{}] supervision_fault: lost control of the root process: {}",
                pid, err
            );
            self.fault.get_or_insert(Error::RootLost { pid, source: err });
            self.stopping = Some(AbortPolicy::Kill);
            self.kill_all();
        } else if let Some(id) = id {
            error!(
                "[{}] supervision_fault: lost control of process {}: {}; killing its subtree",
                pid, id, err
            );
            for pid in self.table.subtree(id) {
                let _ = signal::kill(pid, Signal::SIGKILL);
            }
        } else {
            error!("[{}] supervision_fault: {}", pid, err);
        }
    }

    fn kill_all(&mut self) {
        for pid in self.table.pids().into_iter().chain(self.table.held()) {
            if let Err(err) = signal::kill(pid, Signal::SIGKILL) {
                debug!("[{}] kill_all: {}", pid, err);
            }
        }
    }

    /// Ends everything the loop could not account for once no children are
    /// left.
    fn flush_leftovers(&mut self) {
        for pid in self.table.unknown_deaths() {
            if let Some(status) = self.table.take_unknown_death(pid) {
                self.settle_unknown_death(pid, status);
            }
        }

        for pid in self.table.pids() {
            if let Some(tracee) = self.table.remove(pid) {
                if self.stopping == Some(AbortPolicy::Detach) {
                    continue;
                }
                warn!("[{}] flush_leftovers: process {} was lost", pid, tracee.id);
                self.emitter.emit(RecordKind::ProcessEnded {
                    id: tracee.id,
                    cause: ExitCause::Lost,
                    cpu_time_ms: tracee.cpu_time_ms,
                });
            }
        }
    }
}

/// `clone(2)` flags implied by `op` when the entry stop was not seen.
fn default_clone_flags(op: ChildOp, child: Pid) -> u64 {
    match op {
        ChildOp::Fork => libc::SIGCHLD as u64,
        ChildOp::Vfork => (libc::CLONE_VM | libc::CLONE_VFORK | libc::SIGCHLD) as u64,
        ChildOp::Clone => match proc::Status::read(child) {
            Ok(status) if status.tgid != child => (libc::CLONE_VM
                | libc::CLONE_FS
                | libc::CLONE_FILES
                | libc::CLONE_SIGHAND
                | libc::CLONE_THREAD) as u64,
            _ => libc::SIGCHLD as u64,
        },
    }
}

#[cfg(test)]
mod tests {
    use provtrace_syscalls::LocalMemory;

    use super::*;

    /// Pids past the largest `pid_max`, unknown to both `/proc` and ptrace,
    /// so that the tracer can be fed events in an exact order.
    fn pid(n: i32) -> Pid {
        Pid::from_raw((1 << 23) + n)
    }

    fn tracer() -> Tracer<Recorder> {
        let mut table = ProcessTable::new();
        table.insert_root(pid(0), PathBuf::from("/"));
        Tracer {
            root: pid(0),
            config: Config::default(),
            table,
            emitter: Emitter::new(Recorder::new()),
            abort: None,
            deadline: None,
            stopping: None,
            timed_out: false,
            root_status: None,
            fault: None,
        }
    }

    /// Puts a tracee at the entry of `fork`.
    fn forking(tracer: &mut Tracer<Recorder>, pid: Pid) {
        let raw = RawSyscall::new(Abi::X86_64, libc::SYS_fork as u64, [0; 6]);
        let tracee = tracer.table.get_mut(pid).unwrap();
        let Entry::Pending(pending) =
            effects::syscall_entry(&LocalMemory::new(), tracee, &raw, &Config::default())
        else {
            panic!("fork is not pending");
        };
        tracee.state = TraceeState::InSyscall(Some(pending));
    }

    fn first_stop(pid: Pid) -> (Stopped, Event) {
        (Stopped::new_unchecked(pid), Event::Stop(Signal::SIGSTOP))
    }

    #[derive(Debug, PartialEq)]
    enum Life {
        Started { id: u64, parent: Option<u64>, pid: Pid },
        Ended { id: u64, code: Option<i32> },
    }

    fn lives(tracer: Tracer<Recorder>) -> Vec<Life> {
        let (recorder, _) = tracer.emitter.finish();
        recorder
            .kinds()
            .filter_map(|kind| match kind {
                RecordKind::ProcessStarted {
                    id, parent, pid, ..
                } => Some(Life::Started {
                    id: id.0,
                    parent: parent.map(|p| p.0),
                    pid: Pid::from_raw(*pid),
                }),
                RecordKind::ProcessEnded { id, cause, .. } => Some(Life::Ended {
                    id: id.0,
                    code: cause.encoded(),
                }),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn death_before_announcement_is_replayed() {
        let mut t = tracer();
        forking(&mut t, pid(0));

        t.death(pid(1), ExitStatus::Exited(3));
        t.new_child(pid(0), ChildOp::Fork, pid(1));

        assert_eq!(
            lives(t),
            vec![
                Life::Started {
                    id: 2,
                    parent: Some(1),
                    pid: pid(1)
                },
                Life::Ended {
                    id: 2,
                    code: Some(3)
                },
            ]
        );
    }

    #[test]
    fn death_nobody_can_announce_is_settled() {
        let mut t = tracer();

        t.death(pid(1), ExitStatus::Exited(0));
        assert!(t.table.unknown_deaths().is_empty());

        assert_eq!(
            lives(t),
            vec![
                Life::Started {
                    id: 2,
                    parent: Some(1),
                    pid: pid(1)
                },
                Life::Ended {
                    id: 2,
                    code: Some(0)
                },
            ]
        );
    }

    #[test]
    fn unclaimed_death_is_not_applied_to_a_reused_pid() {
        let mut t = tracer();
        t.new_child(pid(0), ChildOp::Fork, pid(1));
        forking(&mut t, pid(1));

        // Only pid(1) could announce pid(5); the root does instead.
        t.death(pid(5), ExitStatus::Exited(9));
        t.new_child(pid(0), ChildOp::Fork, pid(5));

        assert!(t.table.contains(pid(5)));
        assert_eq!(
            lives(t),
            vec![
                Life::Started {
                    id: 2,
                    parent: Some(1),
                    pid: pid(1)
                },
                Life::Started {
                    id: 3,
                    parent: Some(1),
                    pid: pid(5)
                },
                Life::Ended {
                    id: 3,
                    code: Some(9)
                },
                Life::Started {
                    id: 4,
                    parent: Some(1),
                    pid: pid(5)
                },
            ]
        );
    }

    #[test]
    fn creator_leaving_fork_settles_its_unclaimed_deaths() {
        let mut t = tracer();
        forking(&mut t, pid(0));
        t.death(pid(1), ExitStatus::Exited(2));
        assert_eq!(t.table.unknown_deaths(), vec![pid(1)]);

        t.creation_done(pid(0));
        assert!(t.table.unknown_deaths().is_empty());
        assert_eq!(lives(t).len(), 2);
    }

    #[test]
    fn held_first_stop_is_registered_once() {
        let mut t = tracer();
        let (stopped, event) = first_stop(pid(1));
        t.table.hold(stopped, event);

        t.new_child(pid(0), ChildOp::Fork, pid(1));
        assert!(!t.table.is_held(pid(1)));
        assert!(t.table.contains(pid(1)));

        assert_eq!(
            lives(t),
            vec![Life::Started {
                id: 2,
                parent: Some(1),
                pid: pid(1)
            }]
        );
    }

    #[test]
    fn adopted_child_is_not_registered_again() {
        let mut t = tracer();
        t.new_child(pid(0), ChildOp::Fork, pid(1));

        // Nothing names a creator, so the first stop is adopted by the root.
        let (stopped, event) = first_stop(pid(2));
        t.early(stopped, event);
        assert_eq!(t.table.get(pid(2)).unwrap().parent, Some(ROOT_ID));

        t.new_child(pid(1), ChildOp::Fork, pid(2));
        assert_eq!(t.table.get(pid(2)).unwrap().parent, Some(ProcessId(2)));

        let started: Vec<_> = lives(t)
            .into_iter()
            .filter(|life| matches!(life, Life::Started { pid: p, .. } if *p == pid(2)))
            .collect();
        assert_eq!(started.len(), 1);
    }

    #[test]
    fn held_tracees_are_adopted_in_pid_order() {
        let mut t = tracer();
        t.new_child(pid(0), ChildOp::Fork, pid(1));
        for n in [7, 6] {
            let (stopped, event) = first_stop(pid(n));
            t.table.hold(stopped, event);
        }

        t.death(pid(1), ExitStatus::Exited(0));
        assert!(t.table.held().is_empty());

        assert_eq!(
            lives(t),
            vec![
                Life::Started {
                    id: 2,
                    parent: Some(1),
                    pid: pid(1)
                },
                Life::Ended {
                    id: 2,
                    code: Some(0)
                },
                Life::Started {
                    id: 3,
                    parent: Some(1),
                    pid: pid(6)
                },
                Life::Started {
                    id: 4,
                    parent: Some(1),
                    pid: pid(7)
                },
            ]
        );
    }
}
