//! Block device probes: generic queries, the SCSI sub-family and legacy
//! drive geometry.

use std::io::SeekFrom;
use std::mem::size_of;

use super::Device;
use crate::ioctl::{IoctlProbe, io, ior, run_set};

const BLK: u8 = 0x12;

pub const BLOCK_SET: &[IoctlProbe] = &[
    IoctlProbe::none("BLKFLSBUF", io(BLK, 97)),
    IoctlProbe::buffer("BLKRAGET", io(BLK, 99), size_of::<libc::c_ulong>()),
    IoctlProbe::buffer("BLKROGET", io(BLK, 94), size_of::<libc::c_int>()),
    IoctlProbe::buffer(
        "BLKBSZGET",
        ior(BLK, 112, size_of::<libc::size_t>()),
        size_of::<libc::c_int>(),
    ),
    IoctlProbe::buffer("BLKPBSZGET", io(BLK, 123), size_of::<libc::c_uint>()),
    IoctlProbe::buffer("BLKIOMIN", io(BLK, 120), size_of::<libc::c_uint>()),
    IoctlProbe::buffer("BLKIOOPT", io(BLK, 121), size_of::<libc::c_uint>()),
    IoctlProbe::buffer("BLKALIGNOFF", io(BLK, 122), size_of::<libc::c_uint>()),
    IoctlProbe::buffer("BLKROTATIONAL", io(BLK, 126), size_of::<libc::c_ushort>()),
    IoctlProbe::buffer("BLKSECTGET", io(BLK, 103), size_of::<libc::c_ushort>()),
    IoctlProbe::buffer("BLKGETSIZE", io(BLK, 96), size_of::<libc::c_ulong>()),
    IoctlProbe::buffer(
        "BLKGETSIZE64",
        ior(BLK, 114, size_of::<libc::size_t>()),
        size_of::<u64>(),
    ),
    IoctlProbe::buffer("BLKGETZONESZ", ior(BLK, 132, size_of::<u32>()), size_of::<u32>()),
    IoctlProbe::buffer("BLKGETNRZONES", ior(BLK, 133, size_of::<u32>()), size_of::<u32>()),
];

pub const SCSI_SET: &[IoctlProbe] = &[
    IoctlProbe::buffer("SG_GET_VERSION_NUM", 0x2282, size_of::<libc::c_int>()),
    // struct { int four_in_one; int host_unique_id; }
    IoctlProbe::buffer("SCSI_IOCTL_GET_IDLUN", 0x5382, 2 * size_of::<libc::c_int>()),
    IoctlProbe::buffer("SCSI_IOCTL_GET_BUS_NUMBER", 0x5386, size_of::<libc::c_int>()),
    IoctlProbe::none("SG_GET_TIMEOUT", 0x2202),
    IoctlProbe::buffer("SG_GET_RESERVED_SIZE", 0x2272, size_of::<libc::c_int>()),
];

const LONG: usize = size_of::<libc::c_long>();

pub const GEOMETRY_SET: &[IoctlProbe] = &[
    // struct hd_geometry { u8 heads; u8 sectors; u16 cylinders; ulong start; }
    IoctlProbe::buffer("HDIO_GETGEO", 0x0301, 4 + LONG),
    IoctlProbe::buffer("HDIO_GET_UNMASKINTR", 0x0302, LONG),
    IoctlProbe::buffer("HDIO_GET_MULTCOUNT", 0x0304, size_of::<libc::c_int>()),
    IoctlProbe::buffer("HDIO_GET_IDENTITY", 0x030d, 512),
    IoctlProbe::buffer("HDIO_GET_KEEPSETTINGS", 0x0308, LONG),
    IoctlProbe::buffer("HDIO_GET_32BIT", 0x0309, LONG),
    IoctlProbe::buffer("HDIO_GET_NOWERR", 0x030a, LONG),
    IoctlProbe::buffer("HDIO_GET_DMA", 0x030b, LONG),
    IoctlProbe::buffer("HDIO_GET_NICE", 0x030c, LONG),
    IoctlProbe::buffer("HDIO_GET_WCACHE", 0x030e, LONG),
    IoctlProbe::buffer("HDIO_GET_ACOUSTIC", 0x030f, LONG),
    IoctlProbe::buffer("HDIO_GET_ADDRESS", 0x0310, LONG),
    IoctlProbe::buffer("HDIO_GET_BUSSTATE", 0x031a, LONG),
];

pub fn probe_block(dev: &Device<'_>) {
    run_set(dev.fd(), BLOCK_SET);
    dev.seek(SeekFrom::End(0));
    dev.seek(SeekFrom::Start(0));
    dev.seek(SeekFrom::Current(0));
}

pub fn probe_scsi(dev: &Device<'_>) {
    run_set(dev.fd(), SCSI_SET);
}

pub fn probe_geometry(dev: &Device<'_>) {
    run_set(dev.fd(), GEOMETRY_SET);
}
