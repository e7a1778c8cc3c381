//! The isolated worker: one walker on the calling thread plus a small pool
//! of exerciser threads that keep re-probing whatever path the walker last
//! published.

use std::collections::TryReserveError;
use std::io::Write;

use tracing::{debug, warn};

use crate::cache::{ClassCache, SharedState};
use crate::namespace::DeviceNamespace;
use crate::probe::{Loops, Probe, ProbeOutcome};
use crate::registry::PathRegistry;
use crate::scan::{WalkOptions, Walker};
use crate::stressor::{ExitStatus, RunState};

pub const EXERCISER_THREADS: usize = 4;
pub const REGISTRY_CAPACITY: usize = 251;

/// Everything one worker lifetime owns. Dropped when the worker exits, so
/// every restart begins with empty tables and a fresh ordering seed.
#[derive(Debug)]
pub struct WorkerContext {
    pub registry: PathRegistry,
    pub shared: SharedState,
    pub seed: u32,
}

impl WorkerContext {
    pub fn new(initial_path: &str, capacity: usize) -> Result<Self, TryReserveError> {
        Ok(Self {
            registry: PathRegistry::with_capacity(capacity)?,
            shared: SharedState::new(initial_path, ClassCache::with_capacity(capacity)?),
            seed: rand::random(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub root: String,
    pub threads: usize,
    pub registry_capacity: usize,
    pub privileged: bool,
    pub walk: WalkOptions,
}

impl WorkerConfig {
    pub fn new(root: impl Into<String>, instance: u32) -> Self {
        Self {
            root: root.into(),
            threads: EXERCISER_THREADS,
            registry_capacity: REGISTRY_CAPACITY,
            // SAFETY: geteuid cannot fail.
            privileged: unsafe { libc::geteuid() } == 0,
            walk: WalkOptions {
                loops: Loops::for_instance(instance),
                ..WalkOptions::default()
            },
        }
    }

    /// The path published before the walker has found anything.
    pub fn initial_path(&self) -> String {
        format!("{}/null", self.root.trim_end_matches('/'))
    }
}

/// Blocks every signal on the calling thread; the walker thread handles them.
pub fn block_all_signals() {
    // SAFETY: sigset_t is plain data initialised by sigfillset.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut set);
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
    }
}

/// Process setup for a freshly forked worker: die with the supervisor, be
/// the first thing the OOM killer picks, and never stop on terminal I/O.
pub fn prepare_worker_process() {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: prctl with integer arguments only.
        unsafe {
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong);
        }
        let adjusted = std::fs::OpenOptions::new()
            .write(true)
            .open("/proc/self/oom_score_adj")
            .and_then(|mut f| f.write_all(b"1000"));
        if let Err(err) = adjusted {
            debug!(error = %err, "could not raise OOM score");
        }
    }
    // SAFETY: installing SIG_IGN has no preconditions.
    unsafe {
        libc::signal(libc::SIGTTOU, libc::SIG_IGN);
        libc::signal(libc::SIGTTIN, libc::SIG_IGN);
    }
}

fn exercise_published<P: Probe>(probe: &P, shared: &SharedState, run: &RunState) {
    while run.continue_running() {
        if probe.exercise(shared, run, Loops::Unbounded) == ProbeOutcome::Stopped {
            std::thread::yield_now();
        }
    }
}

/// Runs one worker lifetime in the calling process.
pub fn run_worker<N: DeviceNamespace, P: Probe>(
    namespace: &N,
    probe: &P,
    run: &RunState,
    config: &WorkerConfig,
) -> ExitStatus {
    let context = match WorkerContext::new(&config.initial_path(), config.registry_capacity) {
        Ok(context) => context,
        Err(err) => {
            warn!(error = %err, "cannot allocate worker tables");
            return ExitStatus::NoResource;
        }
    };
    let WorkerContext {
        mut registry,
        shared,
        seed,
    } = context;

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.max(1))
        .thread_name(|i| format!("dev-exerciser-{i}"))
        .start_handler(|_| block_all_signals())
        .build()
    {
        Ok(pool) => pool,
        Err(err) => {
            warn!(error = %err, "cannot start exerciser threads");
            return ExitStatus::NoResource;
        }
    };

    pool.in_place_scope(|scope| {
        for _ in 0..config.threads.max(1) {
            scope.spawn(|_| exercise_published(probe, &shared, run));
        }

        let mut walker = Walker::new(
            namespace,
            probe,
            &shared,
            &mut registry,
            run,
            seed,
            config.walk,
        );
        while run.continue_running() {
            run.beat();
            let before = run.bogo_ops();
            walker.walk(&config.root, true, 0, config.privileged);
            if run.bogo_ops() == before {
                std::thread::yield_now();
            }
        }
        shared.publish("");
    });

    debug!(
        memoized = registry.len(),
        members = shared.cached_members(),
        "worker finished"
    );
    ExitStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{NodeEntry, NodeKind};
    use anyhow::Result;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlatNamespace(Vec<NodeEntry>);

    impl DeviceNamespace for FlatNamespace {
        fn list(&self, dir: &str) -> io::Result<Vec<NodeEntry>> {
            if dir == "/stub" {
                Ok(self.0.clone())
            } else {
                Err(io::Error::from(io::ErrorKind::NotFound))
            }
        }

        fn mode(&self, _path: &str) -> io::Result<u32> {
            Ok(0o755)
        }

        fn open_should_skip(&self, _path: &str, _timeout: Duration) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct CountingProbe {
        bounded: AtomicUsize,
        unbounded: AtomicUsize,
        threads: Mutex<Vec<String>>,
    }

    impl Probe for CountingProbe {
        fn exercise(&self, shared: &SharedState, run: &RunState, loops: Loops) -> ProbeOutcome {
            match loops {
                Loops::Bounded(_) => {
                    self.bounded.fetch_add(1, Ordering::Relaxed);
                    ProbeOutcome::Exhausted
                }
                Loops::Unbounded => {
                    self.unbounded.fetch_add(1, Ordering::Relaxed);
                    let name = std::thread::current().name().unwrap_or("").to_string();
                    let mut threads = self.threads.lock().unwrap();
                    if !threads.contains(&name) {
                        threads.push(name);
                    }
                    drop(threads);
                    while !shared.current_path().is_empty() && run.continue_running() {
                        std::thread::yield_now();
                    }
                    ProbeOutcome::Stopped
                }
            }
        }
    }

    #[test]
    fn context_starts_on_the_null_device() {
        let config = WorkerConfig::new("/dev/", 0);
        assert_eq!(config.initial_path(), "/dev/null");
        assert_eq!(config.walk.loops, Loops::Bounded(1));
        assert_eq!(config.threads, EXERCISER_THREADS);

        let context = WorkerContext::new(&config.initial_path(), REGISTRY_CAPACITY).unwrap();
        assert_eq!(context.shared.current_path(), "/dev/null");
        assert!(context.registry.is_empty());
    }

    #[test]
    fn worker_walks_and_exercises_until_the_cap() -> Result<()> {
        let namespace = FlatNamespace(vec![
            NodeEntry {
                name: "null".to_string(),
                kind: NodeKind::Char,
            },
            NodeEntry {
                name: "sda".to_string(),
                kind: NodeKind::Block,
            },
        ]);
        let probe = CountingProbe::default();
        let run = RunState::new(Some(Duration::from_secs(10)), Some(50))?;
        let mut config = WorkerConfig::new("/stub", 2);
        config.privileged = false;

        let status = run_worker(&namespace, &probe, &run, &config);

        assert_eq!(status, ExitStatus::Success);
        assert!(run.bogo_ops() >= 50);
        assert!(probe.bounded.load(Ordering::Relaxed) >= 50);
        assert!(
            probe
                .threads
                .lock()
                .unwrap()
                .iter()
                .all(|name| name.starts_with("dev-exerciser-"))
        );
        Ok(())
    }

    #[test]
    fn empty_namespace_still_ends_on_deadline() -> Result<()> {
        let probe = CountingProbe::default();
        let run = RunState::new(Some(Duration::from_millis(200)), None)?;
        let config = WorkerConfig::new("/stub", 0);

        let started = std::time::Instant::now();
        let status = run_worker(&FlatNamespace(Vec::new()), &probe, &run, &config);
        assert_eq!(status, ExitStatus::Success);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(run.bogo_ops(), 0);
        assert!(run.heartbeat() > 0);
        Ok(())
    }
}
