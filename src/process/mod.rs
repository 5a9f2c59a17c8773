//! Process and thread model: load a relocatable binary, spawn it as a
//! task with its own heap, track parent/child links, wait/reap.
//!
//! Grounded in `include/badgevms/process.h`. Threads and processes share
//! one pid space — real entry points load from an ELF-like relocatable
//! image; on this host-buildable crate `spawn` runs a Rust closure
//! standing in for the loaded image's entry point, keeping the
//! symbol-resolution, heap-isolation and wait/reap semantics identical.

mod symtab;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        mpsc, Arc, Condvar, Mutex,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use thiserror::Error;

pub use symtab::SymbolTable;

use crate::{
    error::ErrorKind,
    registry::{RegistryError, Spawner},
};

/// A process or thread id. Threads and processes are drawn from the same
/// id space.
pub type Pid = u32;

/// The implicit pid owning every top-level process spawned without an
/// explicit parent (launched directly by the shell, not by another
/// process). Never assigned to a real task, so it never collides with
/// [`ProcessManager::alloc_pid`], which starts at 1.
pub const ROOT_PID: Pid = 0;

/// Failure modes for the process manager.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The binary image could not be found or opened.
    #[error("image not found: {0}")]
    ImageNotFound(String),
    /// An external symbol the image references has no resolution.
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),
    /// The process-local heap could not satisfy an allocation.
    #[error("out of memory: requested {0} bytes")]
    OutOfMemory(usize),
    /// `pid` does not name a live process or thread owned by the caller.
    #[error("no such process or thread: {0}")]
    NotFound(Pid),
    /// A bounded wait expired.
    #[error("wait timed out")]
    Timeout,
}

impl ProcessError {
    /// Classifies this error into the crate-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::ImageNotFound(_) => ErrorKind::NotFound,
            ProcessError::UnresolvedSymbol(_) => ErrorKind::NotFound,
            ProcessError::OutOfMemory(_) => ErrorKind::Resource,
            ProcessError::NotFound(_) => ErrorKind::NotFound,
            ProcessError::Timeout => ErrorKind::Timeout,
        }
    }
}

impl From<ProcessError> for RegistryError {
    fn from(e: ProcessError) -> Self {
        RegistryError::Invalid(e.to_string())
    }
}

/// A private heap carved out of a dedicated PSRAM-backed region, so an
/// out-of-memory condition in one process never affects another.
#[derive(Debug)]
pub struct ProcessHeap {
    capacity: usize,
    used: Mutex<usize>,
}

impl ProcessHeap {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Mutex::new(0),
        }
    }

    /// Reserves `size` bytes from this process's private region.
    pub fn allocate(&self, size: usize) -> Result<(), ProcessError> {
        let mut used = self.used.lock().expect("heap mutex poisoned");
        if *used + size > self.capacity {
            return Err(ProcessError::OutOfMemory(size));
        }
        *used += size;
        Ok(())
    }

    /// Releases `size` bytes back to this process's private region.
    pub fn free(&self, size: usize) {
        let mut used = self.used.lock().expect("heap mutex poisoned");
        *used = used.saturating_sub(size);
    }
}

/// A saved priority level, pushed by `priority_lower` and popped by
/// `priority_restore`. Nested calls within one task restore to the
/// outermost saved value, per the reentrancy guarantee in `spec.md` §9.
#[derive(Debug, Default)]
struct PriorityStack(Mutex<Vec<i32>>);

impl PriorityStack {
    fn push(&self, current: i32) {
        self.0.lock().expect("priority stack poisoned").push(current);
    }

    fn pop(&self) -> Option<i32> {
        self.0.lock().expect("priority stack poisoned").pop()
    }
}

#[derive(Debug)]
enum TaskKind {
    Process { heap: Arc<ProcessHeap> },
    Thread { owner: Pid },
}

struct Task {
    #[allow(dead_code)]
    kind: TaskKind,
    /// The pid [`ProcessManager::wait`] must be called from (directly, or
    /// as one of its threads) to reap this task. `None` only ever appears
    /// transiently; every task is created with a parent ([`ROOT_PID`] for
    /// top-level processes).
    parent: Option<Pid>,
    priority: PriorityStack,
    handle: Option<JoinHandle<()>>,
}

/// Live and reapable-but-not-yet-reaped task bookkeeping, plus the
/// condvar children signal on exit so `wait(blocking=true, …)` can sleep.
#[derive(Default)]
struct Reaper {
    exited: Mutex<Vec<Pid>>,
    cond: Condvar,
}

impl Reaper {
    fn mark_exited(&self, pid: Pid) {
        self.exited.lock().expect("reaper mutex poisoned").push(pid);
        self.cond.notify_all();
    }

    /// Takes the first exited pid satisfying `matches`, optionally blocking
    /// until one arrives (or `timeout` elapses). The caller supplies
    /// `matches` so ownership (which exited pids belong to which waiter)
    /// stays in [`ProcessManager`], which owns the task table `matches`
    /// consults.
    fn take_matching(
        &self,
        mut matches: impl FnMut(Pid) -> bool,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Option<Pid> {
        let mut exited = self.exited.lock().expect("reaper mutex poisoned");
        let deadline = if blocking { timeout.map(|t| Instant::now() + t) } else { None };
        loop {
            if let Some(idx) = exited.iter().position(|&pid| matches(pid)) {
                return Some(exited.remove(idx));
            }
            if !blocking {
                return None;
            }
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    let (guard, _timeout_result) = self
                        .cond
                        .wait_timeout(exited, remaining)
                        .expect("reaper mutex poisoned");
                    exited = guard;
                }
                None => {
                    exited = self.cond.wait(exited).expect("reaper mutex poisoned");
                }
            }
        }
    }
}

/// The process and thread manager: spawns tasks, tracks parent/child
/// links, and reaps exited ones on request.
pub struct ProcessManager {
    symbols: SymbolTable,
    next_pid: AtomicU32,
    tasks: Mutex<HashMap<Pid, Task>>,
    reaper: Arc<Reaper>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager").finish_non_exhaustive()
    }
}

impl ProcessManager {
    /// Creates a process manager resolving external symbols against
    /// `symbols`.
    pub fn new(symbols: SymbolTable) -> Self {
        Self {
            symbols,
            next_pid: AtomicU32::new(1),
            tasks: Mutex::new(HashMap::new()),
            reaper: Arc::default(),
        }
    }

    fn alloc_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::SeqCst)
    }

    /// Loads the relocatable image at `entry`, resolving `required_symbols`
    /// against the host symbol table, and spawns it as a new process with
    /// its own `heap_size`-byte heap, reapable only by `parent` (or one of
    /// `parent`'s own threads). `entry` itself stands in for the image's
    /// resolved entry point, since this crate is host-buildable rather than
    /// a real ELF loader.
    pub fn spawn(
        &self,
        parent: Pid,
        required_symbols: &[&str],
        heap_size: usize,
        argv: Vec<String>,
        entry: impl FnOnce(&[String], &ProcessHeap) + Send + 'static,
    ) -> Result<Pid, ProcessError> {
        for name in required_symbols {
            self.symbols
                .resolve(name)
                .ok_or_else(|| ProcessError::UnresolvedSymbol((*name).to_string()))?;
        }

        let pid = self.alloc_pid();
        let heap = Arc::new(ProcessHeap::new(heap_size));
        let reaper = self.reaper.clone();
        let heap_for_thread = heap.clone();

        log::info!("spawning process {pid} (parent={parent} heap={heap_size} argv={argv:?})");
        let handle = std::thread::spawn(move || {
            entry(&argv, &heap_for_thread);
            reaper.mark_exited(pid);
        });

        self.tasks.lock().expect("task table poisoned").insert(
            pid,
            Task {
                kind: TaskKind::Process { heap },
                parent: Some(parent),
                priority: PriorityStack::default(),
                handle: Some(handle),
            },
        );
        Ok(pid)
    }

    /// Resolves `pid` to the pid [`wait`](Self::wait) must be called from to
    /// reap it: itself for a process, or its owning process for a thread.
    /// Unknown pids resolve to themselves, so a stale caller simply never
    /// matches any task's `parent`.
    fn effective_owner(&self, pid: Pid) -> Pid {
        match self.tasks.lock().expect("task table poisoned").get(&pid) {
            Some(Task { kind: TaskKind::Thread { owner }, .. }) => *owner,
            _ => pid,
        }
    }

    /// Spawns `entry` as a new task sharing `owner`'s address space and
    /// heap. The returned id is drawn from the same id space as process
    /// pids and is valid for [`ProcessManager::wait`].
    pub fn thread_create(
        &self,
        owner: Pid,
        stack_size: usize,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<Pid, ProcessError> {
        let _ = stack_size; // host threads manage their own stacks
        {
            let tasks = self.tasks.lock().expect("task table poisoned");
            if !tasks.contains_key(&owner) {
                return Err(ProcessError::NotFound(owner));
            }
        }

        let pid = self.alloc_pid();
        let reaper = self.reaper.clone();
        log::debug!("spawning thread {pid} of process {owner}");
        let handle = std::thread::spawn(move || {
            entry();
            reaper.mark_exited(pid);
        });

        self.tasks.lock().expect("task table poisoned").insert(
            pid,
            Task {
                kind: TaskKind::Thread { owner },
                parent: Some(owner),
                priority: PriorityStack::default(),
                handle: Some(handle),
            },
        );
        Ok(pid)
    }

    /// Waits for any reapable child of `caller` (or, if `caller` is a
    /// thread, of its owning process), returning its pid. Non-blocking
    /// calls that find nothing reapable return `Err(ProcessError::Timeout)`
    /// immediately rather than `NotFound`, matching the original's "-1 on
    /// no reapable child" contract for both the non-blocking and the
    /// timed-out-blocking case.
    pub fn wait(
        &self,
        caller: Pid,
        blocking: bool,
        timeout_ms: Option<u64>,
    ) -> Result<Pid, ProcessError> {
        let owner = self.effective_owner(caller);
        let timeout = timeout_ms.map(Duration::from_millis);
        let tasks = &self.tasks;
        let matches = |pid: Pid| {
            tasks
                .lock()
                .expect("task table poisoned")
                .get(&pid)
                .is_some_and(|task| task.parent == Some(owner))
        };
        match self.reaper.take_matching(matches, blocking, timeout) {
            Some(pid) => {
                if let Some(task) = self.tasks.lock().expect("task table poisoned").remove(&pid) {
                    if let Some(handle) = task.handle {
                        let _ = handle.join();
                    }
                }
                Ok(pid)
            }
            None => Err(ProcessError::Timeout),
        }
    }

    /// Pushes the current priority and lowers it; `priority_restore` undoes
    /// exactly one `priority_lower` call in LIFO order.
    pub fn priority_lower(&self, pid: Pid, new_priority: i32) -> Result<(), ProcessError> {
        let tasks = self.tasks.lock().expect("task table poisoned");
        let task = tasks.get(&pid).ok_or(ProcessError::NotFound(pid))?;
        task.priority.push(new_priority);
        Ok(())
    }

    /// Pops and restores the most recently pushed priority level.
    pub fn priority_restore(&self, pid: Pid) -> Result<Option<i32>, ProcessError> {
        let tasks = self.tasks.lock().expect("task table poisoned");
        let task = tasks.get(&pid).ok_or(ProcessError::NotFound(pid))?;
        Ok(task.priority.pop())
    }

    /// The number of live tasks (processes and threads combined).
    pub fn get_num_tasks(&self) -> usize {
        self.tasks.lock().expect("task table poisoned").len()
    }
}

impl Spawner for ProcessManager {
    fn spawn(&self, path: &std::path::Path, argv: &[String]) -> Result<Pid, RegistryError> {
        let path = path.to_path_buf();
        let argv = argv.to_vec();
        self.spawn(ROOT_PID, &[], 64 * 1024, argv, move |argv, _heap| {
            log::info!("running {} with argv {argv:?}", path.display());
        })
        .map_err(Into::into)
    }
}

/// A bounded mpsc-backed completion signal, the same pattern used by
/// `WifiCtl`'s command queue: a caller sends a request and blocks on the
/// paired receiver for the reply.
pub type CompletionChannel<T> = (mpsc::Sender<T>, mpsc::Receiver<T>);

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    fn manager() -> ProcessManager {
        ProcessManager::new(SymbolTable::new(vec![("puts", 0x1000)]))
    }

    #[test_log::test]
    fn spawn_then_wait_returns_pid_exactly_once() {
        let mgr = manager();
        let pid = mgr.spawn(ROOT_PID, &["puts"], 4096, vec![], |_argv, _heap| {}).unwrap();

        let reaped = mgr.wait(ROOT_PID, true, Some(5_000)).unwrap();
        assert_eq!(reaped, pid);

        assert_eq!(mgr.wait(ROOT_PID, false, None).unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[test_log::test]
    fn wait_nonblocking_with_no_children_times_out() {
        let mgr = manager();
        assert!(mgr.wait(ROOT_PID, false, None).is_err());
    }

    #[test_log::test]
    fn unresolved_symbol_fails_spawn() {
        let mgr = manager();
        let err = mgr
            .spawn(ROOT_PID, &["not_a_real_symbol"], 4096, vec![], |_argv, _heap| {})
            .unwrap_err();
        assert!(matches!(err, ProcessError::UnresolvedSymbol(_)));
    }

    #[test_log::test]
    fn threads_share_process_heap() {
        let mgr = manager();
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = flag.clone();

        let pid = mgr
            .spawn(ROOT_PID, &[], 4096, vec![], move |_argv, heap| {
                heap.allocate(1024).unwrap();
                flag_clone.store(true, Ordering::SeqCst);
            })
            .unwrap();
        mgr.wait(ROOT_PID, true, Some(5_000)).unwrap();
        assert!(flag.load(Ordering::SeqCst));
        let _ = pid;
    }

    #[test_log::test]
    fn priority_restore_pops_in_lifo_order() {
        let mgr = manager();
        let pid = mgr.spawn(ROOT_PID, &[], 4096, vec![], |_, _| {
            std::thread::sleep(Duration::from_millis(20));
        }).unwrap();
        mgr.priority_lower(pid, 5).unwrap();
        mgr.priority_lower(pid, 1).unwrap();
        assert_eq!(mgr.priority_restore(pid).unwrap(), Some(1));
        assert_eq!(mgr.priority_restore(pid).unwrap(), Some(5));
        mgr.wait(ROOT_PID, true, Some(5_000)).unwrap();
    }

    #[test_log::test]
    fn unrelated_caller_cannot_reap_someone_elses_child() {
        let mgr = manager();
        // Both processes are spawned (and thus owned) by ROOT_PID; neither
        // is the other's parent.
        let bystander = mgr
            .spawn(ROOT_PID, &[], 4096, vec![], |_, _| {
                std::thread::sleep(Duration::from_millis(200));
            })
            .unwrap();
        let exiting = mgr.spawn(ROOT_PID, &[], 4096, vec![], |_, _| {}).unwrap();

        // Give `exiting` a moment to actually exit before `bystander` asks.
        std::thread::sleep(Duration::from_millis(20));

        // `bystander` has no children of its own, so it must not see
        // `exiting`'s exit even though one is sitting in the reaper.
        assert_eq!(mgr.wait(bystander, false, None).unwrap_err().kind(), ErrorKind::Timeout);

        let reaped = mgr.wait(ROOT_PID, true, Some(5_000)).unwrap();
        assert_eq!(reaped, exiting);

        mgr.wait(ROOT_PID, true, Some(5_000)).unwrap();
    }

    #[test_log::test]
    fn thread_is_reaped_by_its_owning_process() {
        let mgr = manager();
        let owner = mgr
            .spawn(ROOT_PID, &[], 4096, vec![], |_, _| {
                std::thread::sleep(Duration::from_millis(50));
            })
            .unwrap();
        let thread = mgr
            .thread_create(owner, 4096, || {
                std::thread::sleep(Duration::from_millis(10));
            })
            .unwrap();

        let reaped = mgr.wait(thread, true, Some(5_000)).unwrap();
        assert_eq!(reaped, thread);

        mgr.wait(ROOT_PID, true, Some(5_000)).unwrap();
    }
}
