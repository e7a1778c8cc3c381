//! Crash containment.
//!
//! Each instance runs its walk inside a forked worker process. The parent
//! only waits, classifies how the worker ended and decides whether to fork
//! another one.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dispatch::DispatchTable;
use crate::namespace::SysNamespace;
use crate::probe::DeviceProber;
use crate::stressor::{ExitStatus, RunState, StressArgs, Stressor};
use crate::subclass::{SubClassifier, SysfsScsiDevices};
use crate::worker::{WorkerConfig, prepare_worker_process, run_worker};

pub const DEFAULT_MAX_RESTARTS: u32 = 64;
const KILL_GRACE: Duration = Duration::from_millis(100);
const WAIT_POLL: Duration = Duration::from_millis(10);
const STOP_GRACE: Duration = Duration::from_secs(5);
/// A live run whose worker has not beaten for this long is treated as hung.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    /// The child could not be reaped at all.
    Lost,
    /// Killed by the supervisor after its heartbeat stopped moving.
    Stalled,
}

impl Termination {
    pub fn from_wait_status(status: libc::c_int) -> Self {
        if libc::WIFEXITED(status) {
            Termination::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            Termination::Signaled(libc::WTERMSIG(status))
        } else {
            Termination::Lost
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Supervisor {
    max_restarts: u32,
    stall_timeout: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESTARTS)
    }
}

impl Supervisor {
    pub fn new(max_restarts: u32) -> Self {
        Self {
            max_restarts,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Forks `worker` until the run ends. The closure only ever executes in
    /// the child, whose exit code is the returned status.
    pub fn run<F>(&self, name: &str, run: &RunState, worker: F) -> ExitStatus
    where
        F: Fn() -> ExitStatus,
    {
        let mut launches = 0u32;

        while run.continue_running() {
            // Every launch after the first is a restart.
            if launches > self.max_restarts {
                warn!(stressor = name, launches, "worker restart budget exhausted");
                return ExitStatus::NoResource;
            }

            let pid = match fork_child(&worker) {
                Ok(pid) => pid,
                Err(err) if retryable_fork_error(&err) => {
                    debug!(stressor = name, error = %err, "fork failed, retrying");
                    std::thread::yield_now();
                    continue;
                }
                Err(err) => {
                    warn!(stressor = name, error = %err, "cannot fork worker");
                    return ExitStatus::NoResource;
                }
            };
            launches += 1;

            match reap(pid, run, self.stall_timeout) {
                Termination::Exited(0) => {
                    debug!(stressor = name, pid, "worker finished");
                }
                Termination::Exited(code) if code == ExitStatus::NoResource.code() => {
                    warn!(stressor = name, pid, "worker ran out of resources");
                    return ExitStatus::NoResource;
                }
                Termination::Exited(code) => {
                    warn!(stressor = name, pid, code, "worker failed");
                    return ExitStatus::Failure;
                }
                Termination::Signaled(libc::SIGKILL) => {
                    info!(
                        stressor = name,
                        pid, "worker killed by SIGKILL, probably the OOM killer, restarting"
                    );
                }
                Termination::Signaled(signal) => {
                    warn!(stressor = name, pid, signal, "worker crashed, restarting");
                }
                Termination::Lost => {
                    warn!(stressor = name, pid, "worker could not be reaped, restarting");
                }
                Termination::Stalled => {
                    warn!(stressor = name, pid, "worker stopped making progress, restarting");
                }
            }
        }
        ExitStatus::Success
    }
}

fn retryable_fork_error(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EAGAIN) | Some(libc::ENOMEM))
}

fn fork_child<F: Fn() -> ExitStatus>(worker: &F) -> io::Result<libc::pid_t> {
    // SAFETY: the child runs `worker` and leaves through `_exit` without
    // returning into the caller's stack.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(io::Error::last_os_error());
    }
    if pid == 0 {
        let status = catch_unwind(AssertUnwindSafe(worker)).unwrap_or(ExitStatus::Failure);
        // SAFETY: terminates the child immediately.
        unsafe { libc::_exit(status.code()) };
    }
    Ok(pid)
}

/// Waits for `pid`. An interrupted wait is retried while the run is live;
/// any other failure escalates from SIGTERM to SIGKILL before a last wait.
/// A worker whose heartbeat stands still for `stall_timeout` during the run,
/// or that is still alive `STOP_GRACE` after the run ended, is killed.
fn reap(pid: libc::pid_t, run: &RunState, stall_timeout: Duration) -> Termination {
    let mut stopped_at: Option<Instant> = None;
    let mut last_beat = run.heartbeat();
    let mut last_progress = Instant::now();
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: plain wait on our own child.
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if ret == pid {
            return Termination::from_wait_status(status);
        }
        if ret == 0 {
            if run.continue_running() {
                let beat = run.heartbeat();
                if beat != last_beat {
                    last_beat = beat;
                    last_progress = Instant::now();
                } else if last_progress.elapsed() > stall_timeout {
                    warn!(pid, "worker heartbeat stalled, killing it");
                    kill_and_reap(pid);
                    return Termination::Stalled;
                }
            } else {
                let since = *stopped_at.get_or_insert_with(Instant::now);
                if since.elapsed() > STOP_GRACE {
                    warn!(pid, "worker ignored the stop request, killing it");
                    return kill_and_reap(pid);
                }
            }
            std::thread::sleep(WAIT_POLL);
            continue;
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted && run.continue_running() {
            continue;
        }
        debug!(pid, error = %err, "waitpid failed, killing worker");
        return kill_and_reap(pid);
    }
}

fn kill_and_reap(pid: libc::pid_t) -> Termination {
    // SAFETY: signals to our own child.
    unsafe { libc::kill(pid, libc::SIGTERM) };
    std::thread::sleep(KILL_GRACE);
    unsafe { libc::kill(pid, libc::SIGKILL) };

    let mut status: libc::c_int = 0;
    // SAFETY: plain wait on our own child.
    let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
    if ret == pid {
        Termination::from_wait_status(status)
    } else {
        Termination::Lost
    }
}

/// The device stressor: a supervised worker walking `root`.
#[derive(Debug, Clone)]
pub struct DevStressor {
    pub root: String,
    pub scsi_root: PathBuf,
    pub max_restarts: u32,
}

impl DevStressor {
    pub const NAME: &'static str = "dev";
}

impl Stressor for DevStressor {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, args: &StressArgs<'_>) -> ExitStatus {
        let supervisor = Supervisor::new(self.max_restarts);
        supervisor.run(args.name, args.run, || {
            prepare_worker_process();
            let prober = DeviceProber::new(
                DispatchTable::detect(),
                SubClassifier::new(SysfsScsiDevices::new(&self.scsi_root)),
                self.root.clone(),
                args.page_size,
            );
            let config = WorkerConfig::new(self.root.clone(), args.instance);
            run_worker(&SysNamespace, &prober, args.run, &config)
        })
    }
}
