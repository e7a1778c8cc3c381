//! Optical drive probes: table of contents, MSF addressed reads, DVD
//! structures and authentication, and the assorted drive status queries.

use std::mem::size_of;
use std::os::fd::RawFd;

use super::Device;
use crate::ioctl::{AlignedBuf, IoctlProbe, ioctl_ptr, ioctl_ref, ioctl_value, run_set};

const CDROMPAUSE: u64 = 0x5301;
const CDROMRESUME: u64 = 0x5302;
const CDROMPLAYMSF: u64 = 0x5303;
const CDROMPLAYTRKIND: u64 = 0x5304;
const CDROMREADTOCHDR: u64 = 0x5305;
const CDROMREADTOCENTRY: u64 = 0x5306;
const CDROMVOLCTRL: u64 = 0x530a;
const CDROMREADMODE2: u64 = 0x530c;
const CDROMREADMODE1: u64 = 0x530d;
const CDROMMULTISESSION: u64 = 0x5310;
const CDROMVOLREAD: u64 = 0x5313;
const CDROMREADRAW: u64 = 0x5314;
const CDROMSEEK: u64 = 0x5316;
const CDROM_MEDIA_CHANGED: u64 = 0x5325;
const CDROM_DRIVE_STATUS: u64 = 0x5326;
const CDROMAUDIOBUFSIZ: u64 = 0x5382;
const DVD_READ_STRUCT: u64 = 0x5390;
const DVD_AUTH: u64 = 0x5392;

const CDROM_LBA: u8 = 0x01;
const CDROM_MSF: u8 = 0x02;
const CDSL_NONE: libc::c_ulong = (libc::c_int::MAX - 1) as libc::c_ulong;
const CDSL_CURRENT: libc::c_ulong = libc::c_int::MAX as libc::c_ulong;

const CD_FRAMESIZE: usize = 2048;
const CD_FRAMESIZE_RAW: usize = 2352;
const CD_FRAMESIZE_RAW0: usize = CD_FRAMESIZE_RAW - 12 - 4;

// dvd_struct is a union; the manufacturer variant is the largest.
const DVD_STRUCT_LEN: usize = 2 + 2 + 4 + 2048;
const DVD_AUTHINFO_LEN: usize = 64;

const DVD_STRUCT_TYPES: &[u8] = &[
    0x00, // physical
    0x01, // copyright
    0x02, // disckey
    0x03, // bca
    0x04, // manufact
    u8::MAX,
];

const DVD_AUTH_TYPES: &[u8] = &[
    0,  // LU_SEND_AGID
    2,  // LU_SEND_KEY1
    3,  // LU_SEND_CHALLENGE
    4,  // LU_SEND_TITLE_KEY
    5,  // LU_SEND_ASF
    6,  // HOST_SEND_CHALLENGE
    7,  // HOST_SEND_KEY2
    9,  // INVALIDATE_AGID
    10, // LU_SEND_RPC_STATE
    11, // HOST_SEND_RPC_STATE
    u8::MAX,
];

pub const STATUS_SET: &[IoctlProbe] = &[
    // struct cdrom_mcn { u8 medium_catalog_number[14]; }
    IoctlProbe::buffer("CDROM_GET_MCN", 0x5311, 14),
    IoctlProbe::buffer("CDROMREADTOCHDR", CDROMREADTOCHDR, size_of::<TocHeader>()),
    IoctlProbe::buffer("CDROMREADTOCENTRY", CDROMREADTOCENTRY, size_of::<TocEntry>()),
    // struct cdrom_subchnl
    IoctlProbe::buffer("CDROMSUBCHNL", 0x530b, 16),
    // struct cdrom_read_audio, zeroed so nframes is 0
    IoctlProbe::buffer("CDROMREADAUDIO", 0x530e, 24),
    IoctlProbe::buffer("CDROMREADCOOKED", 0x5315, CD_FRAMESIZE),
    IoctlProbe::buffer("CDROMREADALL", 0x5318, CD_FRAMESIZE),
    IoctlProbe::buffer("CDROMSEEK", CDROMSEEK, size_of::<Msf>()),
    IoctlProbe::buffer("CDROMGETSPINDOWN", 0x531d, 1),
    IoctlProbe::none("CDROM_DISC_STATUS", 0x5327),
    IoctlProbe::none("CDROM_GET_CAPABILITY", 0x5331),
    IoctlProbe::none("CDROM_CHANGER_NSLOTS", 0x5328),
    IoctlProbe::buffer("CDROM_NEXT_WRITABLE", 0x5394, size_of::<libc::c_long>()),
    IoctlProbe::buffer("CDROM_LAST_WRITTEN", 0x5395, size_of::<libc::c_long>()),
    IoctlProbe::value("CDROM_MEDIA_CHANGED", CDROM_MEDIA_CHANGED, 0),
    IoctlProbe::value("CDROM_MEDIA_CHANGED", CDROM_MEDIA_CHANGED, CDSL_NONE),
    IoctlProbe::value("CDROM_MEDIA_CHANGED", CDROM_MEDIA_CHANGED, CDSL_CURRENT),
    IoctlProbe::none("CDROMPAUSE", CDROMPAUSE),
    IoctlProbe::none("CDROMRESUME", CDROMRESUME),
    IoctlProbe::value("CDROM_DRIVE_STATUS", CDROM_DRIVE_STATUS, 0),
    IoctlProbe::value("CDROM_DRIVE_STATUS", CDROM_DRIVE_STATUS, CDSL_NONE),
    IoctlProbe::value("CDROM_DRIVE_STATUS", CDROM_DRIVE_STATUS, CDSL_CURRENT),
    // Negative buffer size, expected to be rejected.
    IoctlProbe::value(
        "CDROMAUDIOBUFSIZ",
        CDROMAUDIOBUFSIZ,
        libc::c_int::MIN as libc::c_ulong,
    ),
];

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct TocHeader {
    first_track: u8,
    last_track: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct TocEntry {
    track: u8,
    adr_ctrl: u8,
    format: u8,
    // union cdrom_addr: msf { minute, second, frame } or an int lba
    addr: u32,
    datamode: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct Msf {
    min0: u8,
    sec0: u8,
    frame0: u8,
    min1: u8,
    sec1: u8,
    frame1: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct TrackIndex {
    trk0: u8,
    ind0: u8,
    trk1: u8,
    ind1: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct VolumeControl {
    channels: [u8; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct Multisession {
    addr: u32,
    xa_flag: u8,
    addr_format: u8,
}

pub fn probe_cdrom(dev: &Device<'_>) {
    let fd = dev.fd();
    probe_msf_addressed(fd);

    let mut volume = VolumeControl::default();
    if ioctl_ref(fd, CDROMVOLREAD, &mut volume).is_ok() {
        let _ = ioctl_ref(fd, CDROMVOLCTRL, &mut volume);
    }

    run_set(fd, STATUS_SET);
    probe_dvd_structs(fd);
    probe_dvd_auth(fd);
    probe_multisession(fd);
}

/// Address of `track` in MSF form, if the drive knows it.
fn track_address(fd: RawFd, track: u8) -> Option<[u8; 3]> {
    let mut entry = TocEntry {
        track,
        format: CDROM_MSF,
        ..TocEntry::default()
    };
    ioctl_ref(fd, CDROMREADTOCENTRY, &mut entry).ok()?;
    let [minute, second, frame, _] = entry.addr.to_ne_bytes();
    Some([minute, second, frame])
}

fn probe_msf_addressed(fd: RawFd) {
    let mut header = TocHeader::default();
    let (start, end) = match ioctl_ref(fd, CDROMREADTOCHDR, &mut header) {
        Ok(_) => (header.first_track, header.last_track),
        Err(_) => (0, 0),
    };
    if end == 0 && start != 0 {
        return;
    }

    let mut ti = TrackIndex {
        trk1: end,
        ..TrackIndex::default()
    };
    if ioctl_ref(fd, CDROMPLAYTRKIND, &mut ti).is_ok() {
        let _ = ioctl_value(fd, CDROMPAUSE, 0);
    }

    let mut msf = Msf::default();
    if let Some([m, s, f]) = track_address(fd, start) {
        (msf.min0, msf.sec0, msf.frame0) = (m, s, f);
    }
    if let Some([m, s, f]) = track_address(fd, end) {
        (msf.min1, msf.sec1, msf.frame1) = (m, s, f);
    }
    if ioctl_ref(fd, CDROMPLAYMSF, &mut msf).is_ok() {
        let _ = ioctl_value(fd, CDROMPAUSE, 0);
    }

    // The read requests take the MSF as input and overwrite it with frame data.
    for (request, frame) in [
        (CDROMREADRAW, CD_FRAMESIZE_RAW),
        (CDROMREADMODE1, CD_FRAMESIZE),
        (CDROMREADMODE2, CD_FRAMESIZE_RAW0),
    ] {
        let mut buf = AlignedBuf::zeroed(frame);
        let bytes = buf.bytes_mut();
        bytes[..6].copy_from_slice(&[msf.min0, msf.sec0, msf.frame0, msf.min1, msf.sec1, msf.frame1]);
        // SAFETY: the buffer holds a whole frame.
        let _ = unsafe { ioctl_ptr(fd, request, buf.as_mut_ptr()) };
    }
}

fn probe_dvd_structs(fd: RawFd) {
    // Physical layer 255 does not exist.
    let mut buf = AlignedBuf::zeroed(DVD_STRUCT_LEN);
    buf.bytes_mut()[1] = u8::MAX;
    // SAFETY: buffer covers the whole dvd_struct union.
    let _ = unsafe { ioctl_ptr(fd, DVD_READ_STRUCT, buf.as_mut_ptr()) };

    for kind in DVD_STRUCT_TYPES {
        let mut buf = AlignedBuf::zeroed(DVD_STRUCT_LEN);
        buf.bytes_mut()[0] = *kind;
        // SAFETY: as above.
        let _ = unsafe { ioctl_ptr(fd, DVD_READ_STRUCT, buf.as_mut_ptr()) };
    }
}

fn probe_dvd_auth(fd: RawFd) {
    let mut buf = AlignedBuf::zeroed(DVD_AUTHINFO_LEN);
    // SAFETY: buffer covers the whole dvd_authinfo union.
    let _ = unsafe { ioctl_ptr(fd, DVD_AUTH, buf.as_mut_ptr()) };

    for kind in DVD_AUTH_TYPES {
        let mut buf = AlignedBuf::zeroed(DVD_AUTHINFO_LEN);
        buf.bytes_mut()[0] = *kind;
        // SAFETY: as above.
        let _ = unsafe { ioctl_ptr(fd, DVD_AUTH, buf.as_mut_ptr()) };
    }
}

fn probe_multisession(fd: RawFd) {
    for format in [u8::MAX, CDROM_MSF, CDROM_LBA] {
        let mut ms = Multisession {
            addr_format: format,
            ..Multisession::default()
        };
        let _ = ioctl_ref(fd, CDROMMULTISESSION, &mut ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::test_support::scratch_file;

    #[test]
    fn kernel_struct_layouts() {
        assert_eq!(size_of::<TocHeader>(), 2);
        assert_eq!(size_of::<TocEntry>(), 12);
        assert_eq!(size_of::<Msf>(), 6);
        assert_eq!(size_of::<TrackIndex>(), 4);
        assert_eq!(size_of::<Multisession>(), 8);
    }

    #[test]
    fn cdrom_battery_tolerates_non_optical_handles() {
        let (path, file) = scratch_file("cdrom");
        let dev = Device {
            file: &file,
            path: path.to_str().unwrap(),
            page_size: crate::stressor::page_size(),
        };
        probe_cdrom(&dev);
        let _ = std::fs::remove_file(&path);
    }
}
