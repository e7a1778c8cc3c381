//! The per-device probe sequence.
//!
//! One pass opens the currently published path, runs the class batteries
//! and the generic handle operations, and closes it again. Every step is
//! followed by a budget check; a pass that overruns is abandoned with the
//! handle closed.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, SeekFrom};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cache::SharedState;
use crate::dispatch::DispatchTable;
use crate::namespace::NodeKind;
use crate::probes::{Device, block, tty};
use crate::stressor::RunState;
use crate::subclass::{MembershipSource, SubClassifier, SysfsScsiDevices};

pub const DEFAULT_PROBE_BUDGET: Duration = Duration::from_millis(250);

/// Character devices that are never treated as terminals.
const NON_TERMINAL_PREFIXES: &[&str] = &["vsock", "dri"];

/// `asm-generic/fcntl.h`; not exported by `libc`.
#[cfg(target_os = "linux")]
const F_GETSIG: libc::c_int = 11;

#[cfg(target_os = "linux")]
const FCNTL_QUERIES: &[libc::c_int] = &[libc::F_GETFD, libc::F_GETFL, F_GETSIG];
#[cfg(not(target_os = "linux"))]
const FCNTL_QUERIES: &[libc::c_int] = &[libc::F_GETFD, libc::F_GETFL];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loops {
    Bounded(u32),
    Unbounded,
}

impl Loops {
    /// Repetitions the walker asks for on behalf of `instance`.
    pub fn for_instance(instance: u32) -> Self {
        Loops::Bounded(instance.saturating_add(1).min(8))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Every requested repetition ran.
    Exhausted,
    /// A repetition overran the budget.
    TimedOut,
    /// The published path was empty or the run is over.
    Stopped,
}

pub trait Probe: Sync {
    fn exercise(&self, shared: &SharedState, run: &RunState, loops: Loops) -> ProbeOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Done,
    /// The read-only open failed; only the control-only open was tried.
    ControlOnly,
    Interrupted,
    TimedOut,
    /// Not a device node once opened.
    Abandoned,
}

pub struct DeviceProber<S = SysfsScsiDevices> {
    dispatch: DispatchTable,
    classifier: SubClassifier<S>,
    root: String,
    page_size: usize,
    budget: Duration,
}

impl<S: MembershipSource> DeviceProber<S> {
    pub fn new(
        dispatch: DispatchTable,
        classifier: SubClassifier<S>,
        root: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            dispatch,
            classifier,
            root: root.into(),
            page_size,
            budget: DEFAULT_PROBE_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// `path` relative to the namespace root, without a leading slash.
    fn relative<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = path.strip_prefix(self.root.trim_end_matches('/'))?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest.trim_start_matches('/'))
        } else {
            None
        }
    }

    fn pass(&self, shared: &SharedState, path: &str) -> Pass {
        let started = Instant::now();
        let overran = || started.elapsed() > self.budget;

        let file = match open_nonblocking(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Pass::Interrupted,
            Err(_) => {
                control_only_open(path);
                return Pass::ControlOnly;
            }
        };
        if overran() {
            return Pass::TimedOut;
        }

        let kind = match file.metadata() {
            Ok(meta) => NodeKind::from_file_type(meta.file_type()),
            Err(err) => {
                debug!(path, error = %err, "fstat failed");
                return Pass::Abandoned;
            }
        };
        if !kind.is_device() {
            return Pass::Abandoned;
        }

        let rel = self.relative(path);
        let dev = Device {
            file: &file,
            path,
            page_size: self.page_size,
        };

        self.node_sets(shared, &dev, kind, rel);

        dev.seek(SeekFrom::Start(0));
        dev.seek(SeekFrom::Current(0));
        dev.seek(SeekFrom::End(0));
        if overran() {
            return Pass::TimedOut;
        }

        poll_once(dev.fd());
        if overran() {
            return Pass::TimedOut;
        }

        select_once(dev.fd());
        if overran() {
            return Pass::TimedOut;
        }

        for cmd in FCNTL_QUERIES {
            // SAFETY: query commands take no argument.
            std::hint::black_box(unsafe { libc::fcntl(dev.fd(), *cmd) });
            if overran() {
                return Pass::TimedOut;
            }
        }

        dev.map_private_read();
        dev.map_shared_read();
        drop(file);
        if overran() {
            return Pass::TimedOut;
        }

        let file = match open_nonblocking(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Pass::Interrupted,
            Err(_) => {
                control_only_open(path);
                return Pass::ControlOnly;
            }
        };
        let dev = Device {
            file: &file,
            path,
            page_size: self.page_size,
        };
        dev.map_private_write();
        dev.map_shared_write();
        let _ = file.sync_all();
        if let Some(rel) = rel {
            if let Some(class) = self.dispatch.dispatch(rel, &dev) {
                debug!(path, class, "class battery done");
            }
        }
        drop(file);
        if overran() {
            return Pass::TimedOut;
        }

        control_only_open(path);
        Pass::Done
    }

    /// Sets chosen by node type: block (plus SCSI for sub-family members)
    /// or terminal.
    fn node_sets(&self, shared: &SharedState, dev: &Device<'_>, kind: NodeKind, rel: Option<&str>) {
        match kind {
            NodeKind::Block => {
                block::probe_block(dev);
                if self.classifier.is_in_subfamily(shared, dev.path) {
                    block::probe_scsi(dev);
                }
                block::probe_geometry(dev);
            }
            NodeKind::Char => {
                let excluded = rel.is_some_and(|rel| {
                    NON_TERMINAL_PREFIXES
                        .iter()
                        .any(|prefix| rel.starts_with(prefix))
                });
                if !excluded && tty::answers_termios(dev.fd()) {
                    tty::probe_tty(dev);
                }
            }
            _ => {}
        }
    }
}

impl<S: MembershipSource> Probe for DeviceProber<S> {
    fn exercise(&self, shared: &SharedState, run: &RunState, loops: Loops) -> ProbeOutcome {
        let mut remaining = match loops {
            Loops::Bounded(n) => Some(n),
            Loops::Unbounded => None,
        };
        loop {
            if remaining == Some(0) {
                return ProbeOutcome::Exhausted;
            }
            let path = shared.current_path();
            if path.is_empty() || !run.continue_running() {
                return ProbeOutcome::Stopped;
            }

            let pass = self.pass(shared, &path);
            if pass == Pass::TimedOut {
                debug!(path = %path, "probe budget exceeded");
            }
            if let Some(n) = remaining.as_mut() {
                if pass == Pass::TimedOut {
                    return ProbeOutcome::TimedOut;
                }
                *n -= 1;
            }
        }
    }
}

fn open_nonblocking(path: &str) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Opens with both write-only and read-write bits set, which Linux treats
/// as "no data access, ioctl only", and closes straight away.
fn control_only_open(path: &str) {
    let Ok(cpath) = CString::new(path) else {
        return;
    };
    // SAFETY: NUL-terminated path, flags only.
    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_WRONLY | libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC,
        )
    };
    if fd >= 0 {
        // SAFETY: freshly opened and owned by nobody else.
        drop(unsafe { OwnedFd::from_raw_fd(fd) });
    }
}

fn poll_once(fd: RawFd) {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd, zero timeout.
    std::hint::black_box(unsafe { libc::poll(&mut pfd, 1, 0) });
}

fn select_once(fd: RawFd) {
    if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
        return;
    }
    // SAFETY: fd is below FD_SETSIZE; the sets are plain bitmaps.
    unsafe {
        let mut rfds: libc::fd_set = std::mem::zeroed();
        let mut wfds: libc::fd_set = std::mem::zeroed();
        libc::FD_ZERO(&mut rfds);
        libc::FD_ZERO(&mut wfds);
        libc::FD_SET(fd, &mut rfds);
        libc::FD_SET(fd, &mut wfds);
        let mut tv = libc::timeval {
            tv_sec: 0,
            tv_usec: 10_000,
        };
        std::hint::black_box(libc::select(
            fd + 1,
            &mut rfds,
            &mut wfds,
            std::ptr::null_mut(),
            &mut tv,
        ));
    }
}
