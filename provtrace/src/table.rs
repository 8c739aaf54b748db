/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The process state table: one [`Tracee`] per live pid, owned and mutated
//! only by the supervisor loop.
//!
//! Pids are reused by the kernel, so a tracee is identified in records by its
//! [`ProcessId`], which is assigned once at attach time and never reused. An
//! entry is only removed after its death has been fully processed, and a live
//! entry is never overwritten: finding one for a new pid means we missed a
//! death, and the stale entry is handed back to be ended as lost.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use provtrace_syscalls::Abi;
use provtrace_syscalls::Family;
use safeptrace::Event;
use safeptrace::ExitStatus;
use safeptrace::Pid;
use safeptrace::Stopped;

use crate::effects::Pending;
use crate::record::ProcessId;
use crate::relay::Phase;

/// Logical id of the root process.
pub const ROOT_ID: ProcessId = ProcessId(1);

/// How a tracee came to be.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Creation {
    /// The program we were asked to run.
    Root,
    /// `fork` or a process-creating `clone`.
    Fork,
    /// `vfork` or `clone(CLONE_VFORK)`.
    Vfork,
    /// `clone(CLONE_THREAD)`.
    Thread,
    /// Its creation event was never seen.
    Adopted,
}

/// Lifecycle of a tracee.
#[derive(Debug)]
pub enum TraceeState {
    /// Registered by its creator's fork event; its own first stop has not
    /// been seen yet.
    Attaching,
    /// Running in user space.
    Running,
    /// Between syscall entry and exit. Holds whatever the entry stop decoded
    /// that the exit stop needs, if anything.
    InSyscall(Option<Box<Pending>>),
    /// Reported its exit stop; only its death notification can follow.
    Exited,
}

impl TraceeState {
    /// The phase the signal relay classifies against.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Attaching => Phase::Attaching,
            Self::Running => Phase::Running,
            Self::InSyscall(_) => Phase::InSyscall,
            Self::Exited => Phase::Exited,
        }
    }
}

/// What an open descriptor refers to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FdTarget {
    /// A path, as resolved when it was opened.
    Path {
        /// Absolute path.
        path: PathBuf,
        /// Whether it is a directory.
        directory: bool,
    },
    /// A socket.
    Socket {
        /// Address family.
        family: Family,
        /// `socket(2)` type, without `SOCK_CLOEXEC` and `SOCK_NONBLOCK`.
        socktype: i32,
    },
}

/// An open descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FdEntry {
    /// What it refers to.
    pub target: FdTarget,
    /// Whether it is closed by `execve`.
    pub cloexec: bool,
}

/// The descriptors of a process that we saw being opened.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FdTable {
    fds: BTreeMap<i32, FdEntry>,
}

impl FdTable {
    /// Records a newly opened descriptor, replacing whatever it was before.
    pub fn insert(&mut self, fd: i32, target: FdTarget, cloexec: bool) {
        self.fds.insert(fd, FdEntry { target, cloexec });
    }

    /// Forgets a closed descriptor.
    pub fn remove(&mut self, fd: i32) -> Option<FdEntry> {
        self.fds.remove(&fd)
    }

    /// Looks a descriptor up.
    pub fn get(&self, fd: i32) -> Option<&FdEntry> {
        self.fds.get(&fd)
    }

    /// Path of a descriptor, if it refers to one.
    pub fn path(&self, fd: i32) -> Option<&Path> {
        match &self.fds.get(&fd)?.target {
            FdTarget::Path { path, .. } => Some(path),
            FdTarget::Socket { .. } => None,
        }
    }

    /// Makes `new` a duplicate of `old`. If `old` is unknown, so is `new`.
    pub fn dup(&mut self, old: i32, new: i32, cloexec: bool) {
        match self.fds.get(&old).map(|entry| entry.target.clone()) {
            Some(target) => self.insert(new, target, cloexec),
            None => {
                self.fds.remove(&new);
            }
        }
    }

    /// Sets or clears the close-on-exec mark.
    pub fn set_cloexec(&mut self, fd: i32, cloexec: bool) {
        if let Some(entry) = self.fds.get_mut(&fd) {
            entry.cloexec = cloexec;
        }
    }

    /// The table as it is after a successful `execve`.
    pub fn after_exec(&self) -> Self {
        Self {
            fds: self
                .fds
                .iter()
                .filter(|(_, entry)| !entry.cloexec)
                .map(|(fd, entry)| (*fd, entry.clone()))
                .collect(),
        }
    }

    /// Number of known descriptors.
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    /// True if no descriptor is known.
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
}

/// A working directory, shared by every task created with `CLONE_FS`.
pub type SharedCwd = Rc<RefCell<PathBuf>>;

/// A descriptor table, shared by every task created with `CLONE_FILES`.
pub type SharedFds = Rc<RefCell<FdTable>>;

/// One traced process or thread.
#[derive(Debug)]
pub struct Tracee {
    /// Kernel id of this task.
    pub pid: Pid,
    /// Thread group it belongs to.
    pub tgid: Pid,
    /// Logical identifier used in records.
    pub id: ProcessId,
    /// Logical identifier of the creator.
    pub parent: Option<ProcessId>,
    /// How it was created.
    pub creation: Creation,
    /// Lifecycle state.
    pub state: TraceeState,
    /// Calling convention of the current image.
    pub abi: Abi,
    /// Working directory.
    pub cwd: SharedCwd,
    /// Descriptor table.
    pub fds: SharedFds,
    /// Successful execs so far.
    pub exec_count: u32,
    /// CPU time sampled at the exit stop.
    pub cpu_time_ms: Option<u64>,
}

impl Tracee {
    /// Whether it is a thread of another tracee's process.
    pub fn is_thread(&self) -> bool {
        self.creation == Creation::Thread || self.tgid != self.pid
    }

    /// A snapshot of the working directory.
    pub fn cwd(&self) -> PathBuf {
        self.cwd.borrow().clone()
    }
}

/// What we remember about a dead tracee, for children whose creation event
/// was never seen.
#[derive(Clone, Debug)]
struct Departed {
    id: ProcessId,
    cwd: PathBuf,
}

/// The death of a pid that was never registered.
#[derive(Clone, Debug)]
struct UnclaimedDeath {
    status: ExitStatus,
    /// Tracees that were inside a task creating syscall when the death was
    /// seen. Only their creation events can still announce the pid.
    creators: Vec<Pid>,
}

/// How a new tracee relates to its creator.
#[derive(Clone, Debug)]
pub struct Lineage {
    /// Creator's logical id.
    pub parent: Option<ProcessId>,
    /// How it was created.
    pub creation: Creation,
    /// Thread group it belongs to.
    pub tgid: Pid,
    /// Working directory.
    pub cwd: SharedCwd,
    /// Descriptor table.
    pub fds: SharedFds,
    /// Calling convention.
    pub abi: Abi,
}

/// The process state table.
#[derive(Debug)]
pub struct ProcessTable {
    tracees: HashMap<Pid, Tracee>,
    next_id: u64,
    /// First stops of pids whose creation event has not arrived yet. They are
    /// held stopped until then.
    early: BTreeMap<Pid, (Stopped, Event)>,
    /// Deaths of pids we never registered.
    dead_unknown: BTreeMap<Pid, UnclaimedDeath>,
    departed: HashMap<Pid, Departed>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Creates an empty table. The first tracee gets id 1.
    pub fn new() -> Self {
        Self {
            tracees: HashMap::new(),
            next_id: 1,
            early: BTreeMap::new(),
            dead_unknown: BTreeMap::new(),
            departed: HashMap::new(),
        }
    }

    fn allocate_id(&mut self) -> ProcessId {
        let id = ProcessId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Inserts a new tracee. If a live entry already exists for its pid, the
    /// stale entry is returned and must be ended by the caller.
    fn insert(
        &mut self,
        pid: Pid,
        lineage: Lineage,
        state: TraceeState,
    ) -> (ProcessId, Option<Tracee>) {
        let id = self.allocate_id();
        self.departed.remove(&pid);
        let stale = self.tracees.insert(
            pid,
            Tracee {
                pid,
                tgid: lineage.tgid,
                id,
                parent: lineage.parent,
                creation: lineage.creation,
                state,
                abi: lineage.abi,
                cwd: lineage.cwd,
                fds: lineage.fds,
                exec_count: 0,
                cpu_time_ms: None,
            },
        );
        (id, stale)
    }

    /// Registers the root process, already running.
    pub fn insert_root(&mut self, pid: Pid, cwd: PathBuf) -> ProcessId {
        let lineage = Lineage {
            parent: None,
            creation: Creation::Root,
            tgid: pid,
            cwd: Rc::new(RefCell::new(cwd)),
            fds: Rc::new(RefCell::new(FdTable::default())),
            abi: Abi::X86_64,
        };
        self.insert(pid, lineage, TraceeState::Running).0
    }

    /// Works out how `child`, created by `parent` with the given `clone(2)`
    /// flags, relates to it. Returns `None` if `parent` is not live.
    pub fn lineage(
        &self,
        parent: Pid,
        child: Pid,
        creation: Creation,
        clone_flags: u64,
    ) -> Option<Lineage> {
        let creator = self.tracees.get(&parent)?;
        let flags = clone_flags as libc::c_int;
        let share = |flag: libc::c_int| flags & flag != 0;
        Some(Lineage {
            parent: Some(creator.id),
            creation,
            tgid: if creation == Creation::Thread {
                creator.tgid
            } else {
                child
            },
            cwd: if share(libc::CLONE_FS) {
                creator.cwd.clone()
            } else {
                Rc::new(RefCell::new(creator.cwd()))
            },
            fds: if share(libc::CLONE_FILES) {
                creator.fds.clone()
            } else {
                Rc::new(RefCell::new(creator.fds.borrow().clone()))
            },
            abi: creator.abi,
        })
    }

    /// Registers a child whose creation event was just seen. Its first stop
    /// may or may not have been seen already; `state` says which.
    pub fn register(
        &mut self,
        pid: Pid,
        lineage: Lineage,
        state: TraceeState,
    ) -> (ProcessId, Option<Tracee>) {
        self.insert(pid, lineage, state)
    }

    /// Lineage of a tracee whose creation was never seen. `creator` is the
    /// task `/proc` names as its creator, if known.
    pub fn orphan_lineage(
        &self,
        pid: Pid,
        tgid: Pid,
        creator: Option<Pid>,
        cwd: Option<PathBuf>,
    ) -> Lineage {
        let is_thread = tgid != pid;
        let live = creator.and_then(|creator| self.tracees.get(&creator));
        let departed = creator.and_then(|creator| self.departed.get(&creator));

        let parent = live
            .map(|t| t.id)
            .or(departed.map(|d| d.id))
            .or(Some(ROOT_ID));

        // Threads share with a surviving member of their group.
        let sibling = if is_thread {
            self.tracees.values().find(|t| t.tgid == tgid)
        } else {
            None
        };

        let fallback_cwd = || {
            live.map(|t| t.cwd())
                .or(departed.map(|d| d.cwd.clone()))
                .unwrap_or_else(|| PathBuf::from("/"))
        };

        Lineage {
            parent,
            creation: Creation::Adopted,
            tgid,
            cwd: match sibling {
                Some(sibling) => sibling.cwd.clone(),
                None => Rc::new(RefCell::new(cwd.unwrap_or_else(fallback_cwd))),
            },
            fds: match sibling {
                Some(sibling) => sibling.fds.clone(),
                None => Rc::new(RefCell::new(FdTable::default())),
            },
            abi: live.or(sibling).map_or(Abi::X86_64, |t| t.abi),
        }
    }

    /// Looks a tracee up.
    pub fn get(&self, pid: Pid) -> Option<&Tracee> {
        self.tracees.get(&pid)
    }

    /// Looks a tracee up for mutation.
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Tracee> {
        self.tracees.get_mut(&pid)
    }

    /// True if `pid` is a live tracee.
    pub fn contains(&self, pid: Pid) -> bool {
        self.tracees.contains_key(&pid)
    }

    /// The phase of a live tracee, `None` if the pid is unknown.
    pub fn phase(&self, pid: Pid) -> Option<Phase> {
        self.tracees.get(&pid).map(|t| t.state.phase())
    }

    /// Removes a tracee whose death has been processed.
    pub fn remove(&mut self, pid: Pid) -> Option<Tracee> {
        let tracee = self.tracees.remove(&pid)?;
        self.departed.insert(
            pid,
            Departed {
                id: tracee.id,
                cwd: tracee.cwd(),
            },
        );
        Some(tracee)
    }

    /// Number of live tracees.
    pub fn len(&self) -> usize {
        self.tracees.len()
    }

    /// True if no tracee is live.
    pub fn is_empty(&self) -> bool {
        self.tracees.is_empty()
    }

    /// Live pids, in ascending order.
    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.tracees.keys().copied().collect();
        pids.sort();
        pids
    }

    /// Accounts for a successful exec reported at `pid` by the task that was
    /// `former`. When a non-leader thread execs, the kernel gives it the
    /// leader's pid and the exec'ing thread's own pid vanishes without a death
    /// notification. The process keeps its logical id, lineage and exec
    /// history; only the pending exec and calling convention move over from
    /// the thread. The thread's entry is returned so that it can be ended.
    ///
    /// If the leader is already gone, the thread takes its pid instead.
    pub fn exec_rekey(&mut self, pid: Pid, former: Pid) -> Option<Tracee> {
        if former == pid {
            return None;
        }
        let mut execer = self.tracees.remove(&former)?;
        match self.tracees.get_mut(&pid) {
            Some(leader) => {
                leader.state = std::mem::replace(&mut execer.state, TraceeState::Exited);
                leader.abi = execer.abi;
                // Sampled at the leader's exit stop, which exec overrides.
                leader.cpu_time_ms = None;
                Some(execer)
            }
            None => {
                execer.pid = pid;
                execer.tgid = pid;
                self.tracees.insert(pid, execer);
                None
            }
        }
    }

    /// Holds the first stop of a pid we do not know yet.
    pub fn hold(&mut self, stopped: Stopped, event: Event) {
        // A live pid is not the dead task remembered under the same number.
        self.departed.remove(&stopped.pid());
        self.early.insert(stopped.pid(), (stopped, event));
    }

    /// Takes a held stop back.
    pub fn take_held(&mut self, pid: Pid) -> Option<(Stopped, Event)> {
        self.early.remove(&pid)
    }

    /// Pids with a held stop, ascending.
    pub fn held(&self) -> Vec<Pid> {
        self.early.keys().copied().collect()
    }

    /// True if `pid` has a held stop.
    pub fn is_held(&self, pid: Pid) -> bool {
        self.early.contains_key(&pid)
    }

    /// Live tracees inside `fork`, `vfork` or `clone`, ascending. Only these
    /// can have creation events still to come.
    pub fn creating(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self
            .tracees
            .values()
            .filter(|t| match &t.state {
                TraceeState::InSyscall(Some(pending)) => pending.clone_flags().is_some(),
                _ => false,
            })
            .map(|t| t.pid)
            .collect();
        pids.sort();
        pids
    }

    /// Remembers the death of a pid that was never registered, until one of
    /// the tracees now creating tasks announces it. Returns false, remembering
    /// nothing, if no tracee is creating one: nobody can announce it then.
    pub fn note_unknown_death(&mut self, pid: Pid, status: ExitStatus) -> bool {
        self.early.remove(&pid);
        let creators = self.creating();
        if creators.is_empty() {
            return false;
        }
        self.dead_unknown
            .insert(pid, UnclaimedDeath { status, creators });
        true
    }

    /// Takes back the death noted for `pid` if `parent` was one of the tracees
    /// that could announce it.
    pub fn claim_unknown_death(&mut self, pid: Pid, parent: Pid) -> Option<ExitStatus> {
        if self
            .dead_unknown
            .get(&pid)
            .is_some_and(|death| death.creators.contains(&parent))
        {
            self.take_unknown_death(pid)
        } else {
            None
        }
    }

    /// Takes back a death noted by [`Self::note_unknown_death`], whoever
    /// could have announced it.
    pub fn take_unknown_death(&mut self, pid: Pid) -> Option<ExitStatus> {
        self.dead_unknown.remove(&pid).map(|death| death.status)
    }

    /// Pids that died unregistered, ascending.
    pub fn unknown_deaths(&self) -> Vec<Pid> {
        self.dead_unknown.keys().copied().collect()
    }

    /// Forgets `creator` as a possible announcer, now that it has left its
    /// creating syscall or died. Returns the deaths nobody can announce
    /// any more, ascending.
    pub fn creation_done(&mut self, creator: Pid) -> Vec<Pid> {
        let mut orphaned = Vec::new();
        for (pid, death) in self.dead_unknown.iter_mut() {
            death.creators.retain(|c| *c != creator);
            if death.creators.is_empty() {
                orphaned.push(*pid);
            }
        }
        orphaned
    }

    /// Live pids of every tracee descending from `id`, including `id` itself.
    pub fn subtree(&self, id: ProcessId) -> Vec<Pid> {
        let mut ids = HashSet::from([id]);
        loop {
            let before = ids.len();
            for tracee in self.tracees.values() {
                if tracee.parent.is_some_and(|parent| ids.contains(&parent)) {
                    ids.insert(tracee.id);
                }
            }
            if ids.len() == before {
                break;
            }
        }
        let mut pids: Vec<Pid> = self
            .tracees
            .values()
            .filter(|t| ids.contains(&t.id))
            .map(|t| t.pid)
            .collect();
        pids.sort();
        pids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    fn table_with_root() -> ProcessTable {
        let mut table = ProcessTable::new();
        assert_eq!(table.insert_root(pid(100), PathBuf::from("/a")), ROOT_ID);
        table
    }

    fn spawn(
        table: &mut ProcessTable,
        parent: i32,
        child: i32,
        creation: Creation,
        flags: i32,
    ) -> ProcessId {
        let lineage = table
            .lineage(pid(parent), pid(child), creation, flags as u64)
            .unwrap();
        let (id, stale) = table.register(pid(child), lineage, TraceeState::Attaching);
        assert!(stale.is_none());
        id
    }

    #[test]
    fn fork_copies_cwd_and_fds() {
        let mut table = table_with_root();
        table.get(pid(100)).unwrap().fds.borrow_mut().insert(
            3,
            FdTarget::Path {
                path: PathBuf::from("/etc"),
                directory: true,
            },
            false,
        );
        let id = spawn(&mut table, 100, 101, Creation::Fork, libc::SIGCHLD);
        assert_eq!(id, ProcessId(2));

        let child = table.get(pid(101)).unwrap();
        assert_eq!(child.parent, Some(ProcessId(1)));
        assert_eq!(child.tgid, pid(101));
        assert!(!child.is_thread());
        assert_eq!(child.fds.borrow().path(3), Some(Path::new("/etc")));

        *child.cwd.borrow_mut() = PathBuf::from("/elsewhere");
        assert_eq!(table.get(pid(100)).unwrap().cwd(), PathBuf::from("/a"));
    }

    #[test]
    fn threads_share_cwd_and_fds() {
        let mut table = table_with_root();
        let flags = libc::CLONE_VM
            | libc::CLONE_FS
            | libc::CLONE_FILES
            | libc::CLONE_SIGHAND
            | libc::CLONE_THREAD;
        spawn(&mut table, 100, 101, Creation::Thread, flags);
        spawn(&mut table, 100, 102, Creation::Thread, flags);

        let t1 = table.get(pid(101)).unwrap();
        assert!(t1.is_thread());
        assert_eq!(t1.tgid, pid(100));
        *t1.cwd.borrow_mut() = PathBuf::from("/b");
        t1.fds.borrow_mut().insert(
            4,
            FdTarget::Path {
                path: PathBuf::from("/b/f"),
                directory: false,
            },
            false,
        );

        let t2 = table.get(pid(102)).unwrap();
        assert_eq!(t2.cwd(), PathBuf::from("/b"));
        assert_eq!(t2.fds.borrow().path(4), Some(Path::new("/b/f")));

        // The group outlives its leader.
        table.remove(pid(100));
        assert_eq!(table.get(pid(102)).unwrap().cwd(), PathBuf::from("/b"));
    }

    #[test]
    fn live_entries_are_never_overwritten() {
        let mut table = table_with_root();
        spawn(&mut table, 100, 101, Creation::Fork, 0);
        let lineage = table
            .lineage(pid(100), pid(101), Creation::Fork, 0)
            .unwrap();
        let (id, stale) = table.register(pid(101), lineage, TraceeState::Attaching);
        assert_eq!(id, ProcessId(3));
        assert_eq!(stale.map(|t| t.id), Some(ProcessId(2)));
    }

    #[test]
    fn exec_from_thread_keeps_the_process() {
        let mut table = table_with_root();
        let flags = libc::CLONE_FS | libc::CLONE_FILES | libc::CLONE_THREAD;
        let thread = spawn(&mut table, 100, 105, Creation::Thread, flags);
        table.get_mut(pid(100)).unwrap().exec_count = 2;
        table.get_mut(pid(105)).unwrap().state = TraceeState::InSyscall(None);

        let ended = table.exec_rekey(pid(100), pid(105)).unwrap();
        assert_eq!(ended.id, thread);

        let process = table.get(pid(100)).unwrap();
        assert_eq!(process.id, ROOT_ID);
        assert_eq!(process.parent, None);
        assert_eq!(process.exec_count, 2);
        assert!(matches!(process.state, TraceeState::InSyscall(None)));
        assert!(!table.contains(pid(105)));
        assert_eq!(table.len(), 1);

        assert!(table.exec_rekey(pid(100), pid(100)).is_none());
    }

    #[test]
    fn exec_from_thread_after_leader_is_gone() {
        let mut table = table_with_root();
        let flags = libc::CLONE_FS | libc::CLONE_FILES | libc::CLONE_THREAD;
        let thread = spawn(&mut table, 100, 105, Creation::Thread, flags);
        table.remove(pid(100));

        assert!(table.exec_rekey(pid(100), pid(105)).is_none());
        let process = table.get(pid(100)).unwrap();
        assert_eq!(process.id, thread);
        assert_eq!(process.tgid, pid(100));
    }

    #[test]
    fn cloexec_descriptors_are_dropped_by_exec() {
        let mut fds = FdTable::default();
        let path = |p: &str| FdTarget::Path {
            path: PathBuf::from(p),
            directory: false,
        };
        fds.insert(3, path("/keep"), false);
        fds.insert(4, path("/drop"), true);
        fds.dup(4, 5, false);
        fds.dup(9, 3, false);

        let after = fds.after_exec();
        assert_eq!(after.path(3), None);
        assert_eq!(after.path(4), None);
        assert_eq!(after.path(5), Some(Path::new("/drop")));
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn subtree() {
        let mut table = table_with_root();
        let a = spawn(&mut table, 100, 101, Creation::Fork, 0);
        spawn(&mut table, 101, 102, Creation::Fork, 0);
        spawn(&mut table, 100, 103, Creation::Fork, 0);
        assert_eq!(table.subtree(a), vec![pid(101), pid(102)]);
        assert_eq!(table.subtree(ProcessId(1)).len(), 4);
    }

    #[test]
    fn orphans_attach_to_departed_creator() {
        let mut table = table_with_root();
        let a = spawn(&mut table, 100, 101, Creation::Fork, 0);
        table.remove(pid(101));

        let lineage = table.orphan_lineage(pid(200), pid(200), Some(pid(101)), None);
        assert_eq!(lineage.parent, Some(a));
        assert_eq!(*lineage.cwd.borrow(), PathBuf::from("/a"));

        let lineage = table.orphan_lineage(pid(201), pid(201), Some(pid(1)), None);
        assert_eq!(lineage.parent, Some(ProcessId(1)));
        assert_eq!(*lineage.cwd.borrow(), PathBuf::from("/"));
    }
}
