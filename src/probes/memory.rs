//! Physical and kernel memory style devices. Only the first page is touched
//! and the buffers are never inspected.

use std::io::{Read, SeekFrom};

use super::Device;

fn map_and_peek(dev: &Device<'_>, read_page: bool) {
    dev.map_private_read();
    // Reading physical memory pages only makes sense where page 0 is
    // guaranteed to be present.
    if read_page && cfg!(any(target_arch = "x86", target_arch = "x86_64")) {
        read_first_page(dev);
    }
    dev.map_private_write();
}

fn read_first_page(dev: &Device<'_>) -> Option<usize> {
    dev.seek(SeekFrom::Start(0))?;
    let mut page = vec![0u8; dev.page_size];
    let mut file = dev.file;
    let read = file.read(&mut page).ok();
    std::hint::black_box(read)
}

pub fn probe_mem(dev: &Device<'_>) {
    map_and_peek(dev, true);
}

pub fn probe_kmem(dev: &Device<'_>) {
    map_and_peek(dev, false);
}

pub fn probe_kmsg(dev: &Device<'_>) {
    map_and_peek(dev, true);
}

pub fn probe_nvram(dev: &Device<'_>) {
    map_and_peek(dev, true);
}

/// Legacy I/O port access. Offset 0x80 is the POST diagnostic port, which
/// is safe to read.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn probe_port(dev: &Device<'_>) {
    if dev.seek(SeekFrom::Start(0x80)).is_some() {
        let mut byte = [0u8; 1];
        let mut file = dev.file;
        let _ = std::hint::black_box(file.read(&mut byte));
    }
    dev.map_private_read();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::test_support::scratch_file;

    #[test]
    fn page_read_stays_within_first_page() {
        let (path, file) = scratch_file("mem");
        let dev = Device {
            file: &file,
            path: path.to_str().unwrap(),
            page_size: 4096,
        };
        assert_eq!(read_first_page(&dev), Some(4096));
        assert_eq!(dev.seek(SeekFrom::Current(0)), Some(4096));

        probe_mem(&dev);
        probe_kmem(&dev);
        probe_kmsg(&dev);
        probe_nvram(&dev);
        let _ = std::fs::remove_file(&path);
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn port_probe_reads_a_single_byte_at_the_post_port() {
        let (path, file) = scratch_file("port");
        let dev = Device {
            file: &file,
            path: path.to_str().unwrap(),
            page_size: crate::stressor::page_size(),
        };
        probe_port(&dev);
        assert_eq!(dev.seek(SeekFrom::Current(0)), Some(0x81));
        let _ = std::fs::remove_file(&path);
    }
}
