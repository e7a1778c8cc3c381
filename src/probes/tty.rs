//! Terminal probes.
//!
//! Setters are only ever issued with the value the matching getter just
//! returned, so a successful probe leaves the line as it found it.

use std::mem::size_of;
use std::os::fd::RawFd;

use super::{Device, get_then_set};
use crate::ioctl::{IoctlProbe, ior, iow, ioctl_ref, ioctl_value, run_set};

const TIOCGPTLCK: u64 = ior(b'T', 0x39, size_of::<libc::c_int>());
const TIOCSPTLCK: u64 = iow(b'T', 0x31, size_of::<libc::c_int>());
const TIOCGPKT: u64 = ior(b'T', 0x38, size_of::<libc::c_int>());
const TIOCPKT: u64 = 0x5420;
const TIOCGPTN: u64 = ior(b'T', 0x30, size_of::<libc::c_uint>());
const TIOCSIG: u64 = iow(b'T', 0x36, size_of::<libc::c_int>());
const TIOCGWINSZ: u64 = 0x5413;
const TIOCSWINSZ: u64 = 0x5414;
const TIOCGPGRP: u64 = 0x540f;
const TIOCSPGRP: u64 = 0x5410;
const TIOCGEXCL: u64 = ior(b'T', 0x40, size_of::<libc::c_int>());
const TIOCEXCL: u64 = 0x540c;
const TIOCNXCL: u64 = 0x540d;
const TIOCGSOFTCAR: u64 = 0x5419;
const TIOCSSOFTCAR: u64 = 0x541a;
const TIOCMGET: u64 = 0x5415;
const TIOCMBIS: u64 = 0x5416;
const TIOCMBIC: u64 = 0x5417;
const TIOCMSET: u64 = 0x5418;

pub const KDGETLED: u64 = 0x4b31;
pub const KDGKBTYPE: u64 = 0x4b33;
pub const KDGETMODE: u64 = 0x4b3b;
const KDGKBMODE: u64 = 0x4b44;
const KDGKBMETA: u64 = 0x4b62;

pub const QUERY_SET: &[IoctlProbe] = &[
    IoctlProbe::buffer("TIOCGPTN", TIOCGPTN, size_of::<libc::c_uint>()),
    IoctlProbe::buffer("FIONREAD", 0x541b, size_of::<libc::c_int>()),
    IoctlProbe::buffer("TIOCOUTQ", 0x5411, size_of::<libc::c_int>()),
    IoctlProbe::buffer("TIOCGSID", 0x5429, size_of::<libc::pid_t>()),
    IoctlProbe::buffer("KDGETLED", KDGETLED, 1),
    IoctlProbe::buffer("KDGKBTYPE", KDGKBTYPE, 1),
    IoctlProbe::buffer("KDGETMODE", KDGETMODE, size_of::<libc::c_int>()),
    IoctlProbe::buffer("KDGKBMODE", KDGKBMODE, size_of::<libc::c_long>()),
    IoctlProbe::buffer("KDGKBMETA", KDGKBMETA, size_of::<libc::c_long>()),
    // struct serial_icounter_struct
    IoctlProbe::buffer("TIOCGICOUNT", 0x545d, 80),
    // struct serial_struct
    IoctlProbe::buffer("TIOCGSERIAL", 0x541e, 72),
];

/// True when the handle answers a terminal-attributes query.
pub fn answers_termios(fd: RawFd) -> bool {
    // SAFETY: termios is plain old data; tcgetattr fills it in.
    let mut tios: libc::termios = unsafe { std::mem::zeroed() };
    unsafe { libc::tcgetattr(fd, &mut tios) == 0 }
}

pub fn probe_tty(dev: &Device<'_>) {
    let fd = dev.fd();
    // SAFETY: isatty only inspects the descriptor.
    if unsafe { libc::isatty(fd) } == 0 {
        return;
    }

    // SAFETY: termios is plain old data.
    let mut tios: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut tios) } == 0 {
        unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tios) };
    }

    get_then_set(fd, TIOCGPTLCK, TIOCSPTLCK);
    get_then_set(fd, TIOCGPKT, TIOCPKT);

    // Usually EINVAL: only pty masters accept it.
    let _ = ioctl_value(fd, TIOCSIG, libc::SIGCONT as libc::c_ulong);

    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    if ioctl_ref(fd, TIOCGWINSZ, &mut ws).is_ok() {
        let _ = ioctl_ref(fd, TIOCSWINSZ, &mut ws);
    }

    let mut pgrp: libc::pid_t = 0;
    if ioctl_ref(fd, TIOCGPGRP, &mut pgrp).is_ok() {
        let _ = ioctl_ref(fd, TIOCSPGRP, &mut pgrp);
    }

    toggle_exclusive(fd);

    // SAFETY: tcflow only takes integer arguments.
    unsafe {
        if libc::tcflow(fd, libc::TCOOFF) == 0 {
            libc::tcflow(fd, libc::TCOON);
        }
        if libc::tcflow(fd, libc::TCIOFF) == 0 {
            libc::tcflow(fd, libc::TCION);
        }
    }

    get_then_set(fd, TIOCGSOFTCAR, TIOCSSOFTCAR);

    let mut status: libc::c_int = 0;
    if ioctl_ref(fd, TIOCMGET, &mut status).is_ok() {
        let _ = ioctl_ref(fd, TIOCMBIC, &mut status);
        let _ = ioctl_ref(fd, TIOCMBIS, &mut status);
        let _ = ioctl_ref(fd, TIOCMSET, &mut status);
    }

    run_set(fd, QUERY_SET);
}

/// Flips exclusive mode and flips it back.
fn toggle_exclusive(fd: RawFd) {
    let mut excl: libc::c_int = 0;
    if ioctl_ref(fd, TIOCGEXCL, &mut excl).is_err() {
        return;
    }
    let (first, second) = if excl != 0 {
        (TIOCNXCL, TIOCEXCL)
    } else {
        (TIOCEXCL, TIOCNXCL)
    };
    let _ = ioctl_value(fd, first, 0);
    let _ = ioctl_value(fd, second, 0);
}
