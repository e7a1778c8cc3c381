//! Virtual console screen state and console keyboard, LED and display mode.

use std::mem::size_of;
use std::os::fd::RawFd;

use super::Device;
use super::tty::{KDGETLED, KDGETMODE, KDGKBTYPE};
use crate::ioctl::{IoctlProbe, ioctl_ref, ioctl_value, run_set};

const KDSETLED: u64 = 0x4b32;
const KDSETMODE: u64 = 0x4b3a;
const KDGKBLED: u64 = 0x4b64;
const KDSKBLED: u64 = 0x4b65;

pub const VCS_SET: &[IoctlProbe] = &[
    // struct vt_mode { char mode, waitv; short relsig, acqsig, frsig; }
    IoctlProbe::buffer("VT_GETMODE", 0x5601, 8),
    // struct vt_stat { ushort v_active, v_signal, v_state; }
    IoctlProbe::buffer("VT_GETSTATE", 0x5603, 6),
];

pub fn probe_vcs(dev: &Device<'_>) {
    run_set(dev.fd(), VCS_SET);
}

/// Console LEDs, keyboard LED flags and display mode. Each setter is tried
/// once with the current value and once with an invalid one; an invalid
/// value that is unexpectedly accepted is rolled back.
pub fn probe_console(dev: &Device<'_>) {
    let fd = dev.fd();

    let mut led: libc::c_char = 0;
    if ioctl_ref(fd, KDGETLED, &mut led).is_ok() {
        let current = led as libc::c_ulong;
        set_then_reject(fd, KDSETLED, current, libc::c_ulong::from(u8::MAX));
    }

    let mut kbled: libc::c_char = 0;
    if ioctl_ref(fd, KDGKBLED, &mut kbled).is_ok() {
        set_then_reject(fd, KDSKBLED, kbled as libc::c_ulong, libc::c_ulong::MAX);
    }

    let mut mode: libc::c_ulong = 0;
    if ioctl_ref(fd, KDGETMODE, &mut mode).is_ok() {
        set_then_reject(fd, KDSETMODE, mode, libc::c_ulong::MAX);
    }

    run_set(
        fd,
        &[IoctlProbe::buffer("KDGKBTYPE", KDGKBTYPE, size_of::<libc::c_int>())],
    );
}

fn set_then_reject(fd: RawFd, set: u64, current: libc::c_ulong, invalid: libc::c_ulong) {
    let _ = ioctl_value(fd, set, current);
    if ioctl_value(fd, set, invalid).is_ok() {
        let _ = ioctl_value(fd, set, current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::test_support::scratch_file;

    #[test]
    fn console_and_vcs_tolerate_plain_files() {
        let (path, file) = scratch_file("console");
        let dev = Device {
            file: &file,
            path: path.to_str().unwrap(),
            page_size: crate::stressor::page_size(),
        };
        probe_console(&dev);
        probe_vcs(&dev);
        let _ = std::fs::remove_file(&path);
    }
}
