//! Peak resident memory of a process tree.
//!
//! Memory is sampled by polling, so very short spikes may be missed. The
//! sampled value is the sum of the resident set sizes of the root process and
//! every live descendant.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};
use tokio::sync::Notify;

pub(crate) const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) fn is_supported() -> bool {
    sysinfo::IS_SUPPORTED_SYSTEM
}

/// Whether `pid` has terminated, reaped or not.
pub(crate) fn has_exited(pid: u32) -> bool {
    if !is_supported() {
        return false;
    }
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process_specifics(pid, ProcessRefreshKind::new()) {
        return true;
    }
    system
        .process(pid)
        .map_or(true, |p| p.status() == ProcessStatus::Zombie)
}

/// Polls the memory usage of a process tree on a dedicated thread.
pub(crate) struct MemoryTracker {
    stop: Arc<AtomicBool>,
    peak_kb: Arc<AtomicU64>,
    breached: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MemoryTracker {
    /// Starts tracking `root_pid` and its descendants.
    ///
    /// When the sum exceeds `limit_kb`, `on_breach` is notified once and the
    /// tracker keeps sampling until stopped.
    pub fn start(root_pid: u32, limit_kb: Option<u64>, on_breach: Arc<Notify>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let peak_kb = Arc::new(AtomicU64::new(0));
        let breached = Arc::new(AtomicBool::new(false));

        let handle = {
            let stop = Arc::clone(&stop);
            let peak_kb = Arc::clone(&peak_kb);
            let breached = Arc::clone(&breached);
            thread::spawn(move || {
                let root = Pid::from_u32(root_pid);
                let mut system = System::new();
                let refresh = ProcessRefreshKind::new().with_memory();

                while !stop.load(Ordering::Relaxed) {
                    system.refresh_processes_specifics(refresh);
                    let Some(kb) = tree_rss_kb(&system, root) else {
                        break; // root is gone
                    };
                    peak_kb.fetch_max(kb, Ordering::Relaxed);

                    if let Some(limit) = limit_kb {
                        if kb > limit && !breached.swap(true, Ordering::Relaxed) {
                            on_breach.notify_one();
                        }
                    }
                    thread::sleep(SAMPLE_INTERVAL);
                }
            })
        };

        Self {
            stop,
            peak_kb,
            breached,
            handle: Some(handle),
        }
    }

    pub fn breached(&self) -> bool {
        self.breached.load(Ordering::Relaxed)
    }

    /// Stops sampling and returns the peak in KB, or `None` if no sample was taken.
    pub fn stop_and_take(mut self) -> Option<u64> {
        self.halt();
        match self.peak_kb.load(Ordering::Relaxed) {
            0 => None,
            kb => Some(kb),
        }
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Memory sampling thread panicked");
            }
        }
    }
}

impl Drop for MemoryTracker {
    fn drop(&mut self) {
        self.halt();
    }
}

fn tree_rss_kb(system: &System, root: Pid) -> Option<u64> {
    let processes = system.processes();
    let root_proc = processes.get(&root)?;

    // Threads are listed as processes too, parented to their own process and
    // reporting its whole RSS.
    let threads: HashSet<Pid> = processes
        .iter()
        .filter_map(|(pid, p)| Some(p.tasks()?.iter().filter(move |t| *t != pid)))
        .flatten()
        .copied()
        .collect();

    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, p) in processes {
        if threads.contains(pid) {
            continue;
        }
        if let Some(parent) = p.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    // sysinfo reports bytes
    let mut total = root_proc.memory();
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        for child in children.get(&pid).into_iter().flatten() {
            if *child == pid {
                continue;
            }
            if let Some(p) = processes.get(child) {
                total += p.memory();
                stack.push(*child);
            }
        }
    }
    Some(total / 1024)
}
