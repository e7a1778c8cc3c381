//! Query-only handlers for the smaller device classes: media controllers,
//! device-mapper control, video capture, entropy pools, event timers and
//! PTP clocks.

use std::mem::size_of;

use tracing::info;

use super::Device;
use crate::ioctl::{AlignedBuf, IoctlProbe, ior, iow, iowr, ioctl_ptr, ioctl_value, run_set};

const MEDIA_INFO_LEN: usize = 256;
const MEDIA_IOC_DEVICE_INFO: u64 = iowr(b'|', 0x00, MEDIA_INFO_LEN);

/// Text fields of `struct media_device_info` as (label, byte range).
const MEDIA_FIELDS: &[(&str, std::ops::Range<usize>)] = &[
    ("driver name", 0..16),
    ("model name", 16..48),
    ("bus_info field", 88..120),
];

pub fn probe_media(dev: &Device<'_>) {
    let mut info = AlignedBuf::zeroed(MEDIA_INFO_LEN);
    // SAFETY: the buffer covers struct media_device_info.
    if unsafe { ioctl_ptr(dev.fd(), MEDIA_IOC_DEVICE_INFO, info.as_mut_ptr()) }.is_err() {
        return;
    }
    for field in empty_media_fields(info.bytes()) {
        info!(device = dev.path, "MEDIA_IOC_DEVICE_INFO: null {field}");
    }
}

fn empty_media_fields(info: &[u8]) -> impl Iterator<Item = &'static str> + '_ {
    MEDIA_FIELDS
        .iter()
        .filter(|(_, range)| info[range.start] == 0)
        .map(|(label, _)| *label)
}

const DM_IOCTL_LEN: usize = 312;
const DM_VERSION: u64 = iowr(0xfd, 0, DM_IOCTL_LEN);
const DM_DEV_STATUS: u64 = iowr(0xfd, 7, DM_IOCTL_LEN);

pub fn probe_dm(dev: &Device<'_>) {
    for request in [DM_VERSION, DM_DEV_STATUS] {
        let mut dm = AlignedBuf::zeroed(DM_IOCTL_LEN);
        let bytes = dm.bytes_mut();
        // Interface version 4.0.0, and a data area that is just the header.
        bytes[0..4].copy_from_slice(&4u32.to_ne_bytes());
        bytes[12..16].copy_from_slice(&(DM_IOCTL_LEN as u32).to_ne_bytes());
        // SAFETY: the buffer covers struct dm_ioctl.
        let _ = unsafe { ioctl_ptr(dev.fd(), request, dm.as_mut_ptr()) };
    }
}

const V: u8 = b'V';
const V4L2_FRAMEBUFFER_LEN: usize = 8 + size_of::<usize>() + 48;
const V4L2_AUDIO_LEN: usize = 52;

pub const VIDEO_SET: &[IoctlProbe] = &[
    IoctlProbe::buffer("VIDIOC_QUERYCAP", ior(V, 0, 104), 104),
    IoctlProbe::buffer(
        "VIDIOC_G_FBUF",
        ior(V, 10, V4L2_FRAMEBUFFER_LEN),
        V4L2_FRAMEBUFFER_LEN,
    ),
    IoctlProbe::buffer("VIDIOC_G_STD", ior(V, 23, 8), 8),
    IoctlProbe::buffer("VIDIOC_G_AUDIO", ior(V, 33, V4L2_AUDIO_LEN), V4L2_AUDIO_LEN),
    IoctlProbe::buffer("VIDIOC_G_INPUT", ior(V, 38, 4), 4),
    IoctlProbe::buffer("VIDIOC_G_OUTPUT", ior(V, 46, 4), 4),
    IoctlProbe::buffer("VIDIOC_G_AUDOUT", ior(V, 49, V4L2_AUDIO_LEN), V4L2_AUDIO_LEN),
    IoctlProbe::buffer("VIDIOC_G_JPEGCOMP", ior(V, 61, 140), 140),
    IoctlProbe::buffer("VIDIOC_QUERYSTD", ior(V, 63, 8), 8),
    IoctlProbe::buffer("VIDIOC_G_PRIORITY", ior(V, 67, 4), 4),
    IoctlProbe::buffer("VIDIOC_G_ENC_INDEX", ior(V, 76, 2072), 2072),
    IoctlProbe::buffer("VIDIOC_QUERY_DV_TIMINGS", ior(V, 99, 132), 132),
];

pub fn probe_video(dev: &Device<'_>) {
    run_set(dev.fd(), VIDEO_SET);
}

pub fn probe_random(dev: &Device<'_>) {
    run_set(
        dev.fd(),
        &[IoctlProbe::buffer(
            "RNDGETENTCNT",
            ior(b'R', 0x00, size_of::<libc::c_int>()),
            size_of::<libc::c_long>(),
        )],
    );
}

const HPET_INFO_LEN: usize = 3 * size_of::<libc::c_ulong>();
const HPET_INFO: u64 = ior(b'h', 0x03, HPET_INFO_LEN);
const HPET_IRQFREQ: u64 = iow(b'h', 0x06, size_of::<libc::c_ulong>());

pub fn probe_hpet(dev: &Device<'_>) {
    run_set(dev.fd(), &[IoctlProbe::buffer("HPET_INFO", HPET_INFO, HPET_INFO_LEN)]);
    // Frequency 0 is always rejected, so the timer is never reprogrammed.
    let _ = ioctl_value(dev.fd(), HPET_IRQFREQ, 0);
}

const PTP_CAPS_LEN: usize = 80;
const PTP_CAPS_N_PINS: usize = 20;
const PTP_PIN_DESC_LEN: usize = 96;
const PTP_PIN_DESC_INDEX: usize = 64;
const PTP_CLOCK_GETCAPS: u64 = ior(b'=', 1, PTP_CAPS_LEN);
const PTP_PIN_GETFUNC: u64 = iowr(b'=', 6, PTP_PIN_DESC_LEN);

/// Reads the clock capabilities, then the function of every pin it reports.
pub fn probe_ptp(dev: &Device<'_>) {
    let fd = dev.fd();
    let mut caps = AlignedBuf::zeroed(PTP_CAPS_LEN);
    // SAFETY: the buffer covers struct ptp_clock_caps.
    if unsafe { ioctl_ptr(fd, PTP_CLOCK_GETCAPS, caps.as_mut_ptr()) }.is_err() {
        return;
    }
    let mut n_pins = [0u8; 4];
    n_pins.copy_from_slice(&caps.bytes()[PTP_CAPS_N_PINS..PTP_CAPS_N_PINS + 4]);
    let n_pins = i32::from_ne_bytes(n_pins).max(0) as u32;

    for index in 0..n_pins {
        let mut desc = AlignedBuf::zeroed(PTP_PIN_DESC_LEN);
        desc.bytes_mut()[PTP_PIN_DESC_INDEX..PTP_PIN_DESC_INDEX + 4]
            .copy_from_slice(&index.to_ne_bytes());
        // SAFETY: the buffer covers struct ptp_pin_desc.
        let _ = unsafe { ioctl_ptr(fd, PTP_PIN_GETFUNC, desc.as_mut_ptr()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::test_support::scratch_file;

    #[test]
    fn request_numbers() {
        assert_eq!(MEDIA_IOC_DEVICE_INFO, 0xc100_7c00);
        assert_eq!(DM_VERSION, 0xc138_fd00);
        assert_eq!(DM_DEV_STATUS, 0xc138_fd07);
        assert_eq!(PTP_CLOCK_GETCAPS, 0x8050_3d01);
        assert_eq!(VIDEO_SET[0].request, 0x8068_5600);
    }

    #[test]
    fn media_fields_report_only_empty_text() {
        let mut info = vec![0u8; MEDIA_INFO_LEN];
        assert_eq!(
            empty_media_fields(&info).collect::<Vec<_>>(),
            ["driver name", "model name", "bus_info field"]
        );

        info[..4].copy_from_slice(b"uvc\0");
        info[88..95].copy_from_slice(b"usb-1.2");
        assert_eq!(empty_media_fields(&info).collect::<Vec<_>>(), ["model name"]);
    }

    #[test]
    fn small_class_handlers_tolerate_plain_files() {
        let (path, file) = scratch_file("misc");
        let dev = Device {
            file: &file,
            path: path.to_str().unwrap(),
            page_size: crate::stressor::page_size(),
        };
        probe_media(&dev);
        probe_dm(&dev);
        probe_video(&dev);
        probe_random(&dev);
        probe_hpet(&dev);
        probe_ptp(&dev);
        let _ = std::fs::remove_file(&path);
    }
}
