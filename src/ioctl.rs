//! Control-code plumbing shared by every probe set.
//!
//! A probe set is a static slice of [`IoctlProbe`] descriptors. Each entry
//! names a request and the shape of its argument; [`run_set`] issues them in
//! order and discards the results.

use std::io;
use std::os::fd::RawFd;

const IOC_NRBITS: u64 = 8;
const IOC_TYPEBITS: u64 = 8;
const IOC_SIZEBITS: u64 = 14;
const IOC_NRSHIFT: u64 = 0;
const IOC_TYPESHIFT: u64 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u64 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u64 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_NONE: u64 = 0;
const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;

const fn ioc(dir: u64, type_: u8, nr: u8, size: usize) -> u64 {
    (dir << IOC_DIRSHIFT)
        | ((type_ as u64) << IOC_TYPESHIFT)
        | ((nr as u64) << IOC_NRSHIFT)
        | ((size as u64) << IOC_SIZESHIFT)
}

pub const fn io(type_: u8, nr: u8) -> u64 {
    ioc(IOC_NONE, type_, nr, 0)
}

pub const fn ior(type_: u8, nr: u8, size: usize) -> u64 {
    ioc(IOC_READ, type_, nr, size)
}

pub const fn iow(type_: u8, nr: u8, size: usize) -> u64 {
    ioc(IOC_WRITE, type_, nr, size)
}

pub const fn iowr(type_: u8, nr: u8, size: usize) -> u64 {
    ioc(IOC_READ | IOC_WRITE, type_, nr, size)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// Request takes no argument (passed as 0).
    None,
    /// Request takes an integer by value.
    Value(libc::c_ulong),
    /// Request reads or writes a zeroed buffer of this many bytes.
    Buffer(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct IoctlProbe {
    pub name: &'static str,
    pub request: u64,
    pub arg: Arg,
}

impl IoctlProbe {
    pub const fn none(name: &'static str, request: u64) -> Self {
        Self {
            name,
            request,
            arg: Arg::None,
        }
    }

    pub const fn value(name: &'static str, request: u64, value: libc::c_ulong) -> Self {
        Self {
            name,
            request,
            arg: Arg::Value(value),
        }
    }

    pub const fn buffer(name: &'static str, request: u64, len: usize) -> Self {
        Self {
            name,
            request,
            arg: Arg::Buffer(len),
        }
    }

    pub fn issue(&self, fd: RawFd) -> io::Result<libc::c_int> {
        match self.arg {
            Arg::None => ioctl_value(fd, self.request, 0),
            Arg::Value(v) => ioctl_value(fd, self.request, v),
            Arg::Buffer(len) => {
                let mut buf = AlignedBuf::zeroed(len);
                // SAFETY: the buffer is at least `len` bytes, which is what
                // the request encodes as its argument size.
                unsafe { ioctl_ptr(fd, self.request, buf.as_mut_ptr()) }
            }
        }
    }
}

/// Issues every probe in `set`, ignoring individual failures.
pub fn run_set(fd: RawFd, set: &[IoctlProbe]) -> usize {
    set.iter().filter(|probe| probe.issue(fd).is_ok()).count()
}

/// Zeroed, 8-byte aligned scratch space for an ioctl argument.
pub struct AlignedBuf {
    words: Vec<u64>,
}

impl AlignedBuf {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8).max(1)],
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        self.words.as_mut_ptr().cast()
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: u64 storage reinterpreted as bytes, same allocation.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast(), self.words.len() * 8) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.words.len() * 8;
        // SAFETY: u64 storage reinterpreted as bytes, same allocation.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast(), len) }
    }
}

pub fn ioctl_value(fd: RawFd, request: u64, value: libc::c_ulong) -> io::Result<libc::c_int> {
    // SAFETY: by-value argument, the kernel never dereferences it.
    let ret = unsafe { libc::ioctl(fd, request as libc::Ioctl, value) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// # Safety
///
/// `arg` must point to memory at least as large as the request expects.
pub unsafe fn ioctl_ptr(fd: RawFd, request: u64, arg: *mut libc::c_void) -> io::Result<libc::c_int> {
    // SAFETY: upheld by the caller.
    let ret = unsafe { libc::ioctl(fd, request as libc::Ioctl, arg) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Issues `request` with a pointer to `value`.
pub fn ioctl_ref<T: Copy>(fd: RawFd, request: u64, value: &mut T) -> io::Result<libc::c_int> {
    // SAFETY: `value` is a live, exclusively borrowed `T`.
    unsafe { ioctl_ptr(fd, request, (value as *mut T).cast()) }
}
