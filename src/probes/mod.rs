//! Class-specific probe sets.
//!
//! Every handler takes an already opened [`Device`] and tolerates every
//! failure. Request numbers follow the asm-generic ioctl layout (x86, arm,
//! riscv); on other layouts the kernel answers `ENOTTY`, which is ignored
//! like any other error.

pub mod block;
pub mod cdrom;
pub mod console;
pub mod memory;
pub mod misc;
pub mod tty;

use memmap2::MmapOptions;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::os::fd::{AsRawFd, RawFd};

pub struct Device<'a> {
    pub file: &'a File,
    pub path: &'a str,
    pub page_size: usize,
}

impl Device<'_> {
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Seeks and feeds the resulting offset to a sink so it is not optimised out.
    pub fn seek(&self, pos: SeekFrom) -> Option<u64> {
        let mut file = self.file;
        let offset = file.seek(pos).ok();
        std::hint::black_box(offset)
    }

    /// Maps one page read-only and private, then drops the mapping.
    pub fn map_private_read(&self) -> bool {
        // SAFETY: the mapping is dropped without being read.
        unsafe { MmapOptions::new().len(self.page_size).map_copy_read_only(self.file) }.is_ok()
    }

    /// Maps one page read-only and shared, then drops the mapping.
    pub fn map_shared_read(&self) -> bool {
        // SAFETY: the mapping is dropped without being read.
        unsafe { MmapOptions::new().len(self.page_size).map(self.file) }.is_ok()
    }

    /// Maps one page copy-on-write, then drops the mapping.
    pub fn map_private_write(&self) -> bool {
        // SAFETY: the mapping is dropped without being touched.
        unsafe { MmapOptions::new().len(self.page_size).map_copy(self.file) }.is_ok()
    }

    /// Maps one page shared and writable, then drops the mapping.
    pub fn map_shared_write(&self) -> bool {
        // SAFETY: the mapping is dropped without being touched.
        unsafe { MmapOptions::new().len(self.page_size).map_mut(self.file) }.is_ok()
    }
}

/// Fetches an `int` with `get` and, on success, writes the same value back with `set`.
pub(crate) fn get_then_set(fd: RawFd, get: u64, set: u64) {
    let mut value: libc::c_int = 0;
    if crate::ioctl::ioctl_ref(fd, get, &mut value).is_ok() {
        let _ = crate::ioctl::ioctl_ref(fd, set, &mut value);
    }
}

/// Handler for classes that only need the generic sequence.
pub fn nop(_dev: &Device<'_>) {}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs::File;
    use std::path::PathBuf;

    pub fn scratch_file(tag: &str) -> (PathBuf, File) {
        let path = std::env::temp_dir().join(format!(
            "dev-stress-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, vec![0u8; 8192]).unwrap();
        let file = File::open(&path).unwrap();
        (path, file)
    }
}
