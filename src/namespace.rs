//! Access to the device namespace the walker traverses.
//!
//! [`DeviceNamespace`] is the seam between the walker and the filesystem;
//! [`SysNamespace`] is the real thing.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    Block,
    Char,
    Other,
}

impl NodeKind {
    pub fn from_file_type(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            NodeKind::Directory
        } else if ft.is_block_device() {
            NodeKind::Block
        } else if ft.is_char_device() {
            NodeKind::Char
        } else {
            NodeKind::Other
        }
    }

    pub fn is_device(self) -> bool {
        matches!(self, NodeKind::Block | NodeKind::Char)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub name: String,
    pub kind: NodeKind,
}

pub trait DeviceNamespace: Sync {
    /// Entries of `dir` in whatever order the namespace yields them. Names
    /// that are not valid UTF-8 are left out.
    fn list(&self, dir: &str) -> io::Result<Vec<NodeEntry>>;

    /// Permission bits of `path`, following symlinks.
    fn mode(&self, path: &str) -> io::Result<u32>;

    /// True when a non-blocking read-only open fails or outlives `timeout`.
    fn open_should_skip(&self, path: &str, timeout: Duration) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SysNamespace;

impl DeviceNamespace for SysNamespace {
    fn list(&self, dir: &str) -> io::Result<Vec<NodeEntry>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let Ok(entry) = entry else { continue };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            // Device paths are carried as UTF-8; a lossy name would point elsewhere.
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(dir, "skipping entry with a non UTF-8 name");
                continue;
            };
            entries.push(NodeEntry {
                name,
                kind: NodeKind::from_file_type(file_type),
            });
        }
        Ok(entries)
    }

    fn mode(&self, path: &str) -> io::Result<u32> {
        Ok(std::fs::metadata(path)?.permissions().mode())
    }

    fn open_should_skip(&self, path: &str, timeout: Duration) -> bool {
        bounded_open_should_skip(Path::new(path), libc::O_NONBLOCK, timeout)
    }
}

/// Opens `path` read-only on a helper thread and waits at most `timeout`.
///
/// A device that blocks in `open` leaves the helper thread parked in the
/// kernel; the caller moves on either way.
pub fn bounded_open_should_skip(path: &Path, flags: i32, timeout: Duration) -> bool {
    let (tx, rx) = mpsc::channel();
    let owned = path.to_path_buf();
    let spawned = std::thread::Builder::new()
        .name("dev-open".to_string())
        .spawn(move || {
            let opened = OpenOptions::new()
                .read(true)
                .custom_flags(flags)
                .open(&owned)
                .is_ok();
            let _ = tx.send(opened);
        });
    if spawned.is_err() {
        return true;
    }

    match rx.recv_timeout(timeout) {
        Ok(opened) => !opened,
        Err(_) => {
            tracing::debug!(path = %path.display(), "open did not finish in time");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!(
            "{prefix}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        p
    }

    #[test]
    fn bounded_open_reports_missing_and_present_paths() {
        let base = temp_dir("dev-stress-open");
        fs::create_dir_all(&base).unwrap();
        let file = base.join("present");
        fs::write(&file, b"x").unwrap();

        let timeout = Duration::from_millis(1500);
        assert!(!bounded_open_should_skip(&file, libc::O_NONBLOCK, timeout));
        assert!(bounded_open_should_skip(
            &base.join("missing"),
            libc::O_NONBLOCK,
            timeout
        ));

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn bounded_open_times_out_on_blocking_fifo() {
        let base = temp_dir("dev-stress-fifo");
        fs::create_dir_all(&base).unwrap();
        let fifo = base.join("fifo");
        let c_path = std::ffi::CString::new(fifo.to_string_lossy().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

        // Without O_NONBLOCK a reader blocks until a writer shows up.
        let start = std::time::Instant::now();
        assert!(bounded_open_should_skip(&fifo, 0, Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_secs(1));

        // Release the parked helper so the thread can finish.
        let _ = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&fifo);
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn sys_namespace_classifies_entries() {
        let base = temp_dir("dev-stress-ns");
        fs::create_dir_all(base.join("sub")).unwrap();
        fs::write(base.join("file"), b"").unwrap();

        let ns = SysNamespace;
        let mut entries = ns.list(base.to_str().unwrap()).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                NodeEntry {
                    name: "file".to_string(),
                    kind: NodeKind::Other
                },
                NodeEntry {
                    name: "sub".to_string(),
                    kind: NodeKind::Directory
                },
            ]
        );
        assert!(ns.mode(base.join("sub").to_str().unwrap()).is_ok());

        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn non_utf8_names_are_left_out() {
        use std::os::unix::ffi::OsStrExt;

        let base = temp_dir("dev-stress-ns-bytes");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("null"), b"").unwrap();
        let odd = base.join(std::ffi::OsStr::from_bytes(b"nul\xff"));
        if fs::write(&odd, b"").is_err() {
            // Filesystems that insist on UTF-8 cannot hold such a name.
            let _ = fs::remove_dir_all(&base);
            return;
        }

        let names: Vec<String> = SysNamespace
            .list(base.to_str().unwrap())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["null".to_string()]);

        let _ = fs::remove_dir_all(&base);
    }
}
