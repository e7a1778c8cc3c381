//! The contract every stressor shares with the harness.
//!
//! A stressor is handed a [`StressArgs`] and returns an [`ExitStatus`]. Liveness
//! and throughput go through [`RunState`], which lives in a shared anonymous
//! mapping so a forked worker and its supervisor see the same stop flag and
//! the same bogo-op counter.

use anyhow::{Result, bail};
use serde::Serialize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    NotImplemented,
    NoResource,
    Failure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::NoResource => 3,
            ExitStatus::NotImplemented => 4,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ExitStatus::Success,
            3 => ExitStatus::NoResource,
            4 => ExitStatus::NotImplemented,
            _ => ExitStatus::Failure,
        }
    }
}

#[repr(C)]
struct SharedCounters {
    stop: AtomicBool,
    bogo_ops: AtomicU64,
    heartbeat: AtomicU64,
}

/// Run-wide liveness and throughput state, shared across `fork`.
pub struct RunState {
    counters: NonNull<SharedCounters>,
    deadline: Option<Instant>,
    max_ops: Option<u64>,
}

// SAFETY: the mapping only holds atomics and stays valid until drop.
unsafe impl Send for RunState {}
unsafe impl Sync for RunState {}

impl RunState {
    pub fn new(timeout: Option<Duration>, max_ops: Option<u64>) -> Result<Self> {
        let len = std::mem::size_of::<SharedCounters>();
        // SAFETY: anonymous shared mapping, no fd involved.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            bail!(
                "Failed to map shared run state: {}",
                std::io::Error::last_os_error()
            );
        }
        let Some(counters) = NonNull::new(ptr.cast::<SharedCounters>()) else {
            bail!("Shared run state mapped at null");
        };
        // SAFETY: fresh, page-aligned and large enough for SharedCounters.
        unsafe {
            counters.as_ptr().write(SharedCounters {
                stop: AtomicBool::new(false),
                bogo_ops: AtomicU64::new(0),
                heartbeat: AtomicU64::new(0),
            });
        }

        Ok(Self {
            counters,
            deadline: timeout.map(|t| Instant::now() + t),
            max_ops: max_ops.filter(|n| *n > 0),
        })
    }

    fn counters(&self) -> &SharedCounters {
        // SAFETY: initialised in `new`, unmapped only in `drop`.
        unsafe { self.counters.as_ref() }
    }

    /// Process-wide liveness: not stopped, before the deadline, under the op cap.
    pub fn continue_running(&self) -> bool {
        let counters = self.counters();
        if counters.stop.load(Ordering::Relaxed) {
            return false;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }
        match self.max_ops {
            Some(max) => counters.bogo_ops.load(Ordering::Relaxed) < max,
            None => true,
        }
    }

    pub fn stop(&self) {
        self.counters().stop.store(true, Ordering::Relaxed);
    }

    pub fn bump(&self) {
        self.counters().bogo_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bogo_ops(&self) -> u64 {
        self.counters().bogo_ops.load(Ordering::Relaxed)
    }

    /// Liveness signal from a worker, independent of whether it found
    /// anything worth a bogo-op.
    pub fn beat(&self) {
        self.counters().heartbeat.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat(&self) -> u64 {
        self.counters().heartbeat.load(Ordering::Relaxed)
    }
}

impl Drop for RunState {
    fn drop(&mut self) {
        // SAFETY: same pointer and length as mapped in `new`.
        unsafe {
            libc::munmap(
                self.counters.as_ptr().cast(),
                std::mem::size_of::<SharedCounters>(),
            );
        }
    }
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("stopped", &self.counters().stop.load(Ordering::Relaxed))
            .field("bogo_ops", &self.bogo_ops())
            .field("deadline", &self.deadline)
            .field("max_ops", &self.max_ops)
            .finish()
    }
}

pub struct StressArgs<'a> {
    pub name: &'static str,
    pub instance: u32,
    pub page_size: usize,
    pub run: &'a RunState,
}

pub trait Stressor: Sync {
    fn name(&self) -> &'static str;

    fn run(&self, args: &StressArgs<'_>) -> ExitStatus;
}

pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}
