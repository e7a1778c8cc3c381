//! Device class dispatch.
//!
//! An ordered list of `(prefix, handler)` entries. Prefixes are relative to
//! the namespace root, so `"sr0"` matches `<root>/sr0` and `"video"` matches
//! `<root>/video0`, `<root>/video1`, ... The first matching entry wins.

use crate::probes::{self, Device};

pub type Handler = fn(&Device<'_>);

#[derive(Clone, Copy)]
pub struct DeviceClassEntry {
    pub class: &'static str,
    pub prefix: &'static str,
    pub handler: Handler,
}

impl DeviceClassEntry {
    pub const fn new(class: &'static str, prefix: &'static str, handler: Handler) -> Self {
        Self {
            class,
            prefix,
            handler,
        }
    }

    pub fn matches(&self, rel_path: &str) -> bool {
        rel_path.starts_with(self.prefix)
    }
}

impl std::fmt::Debug for DeviceClassEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClassEntry")
            .field("class", &self.class)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[cfg(target_os = "linux")]
const LINUX_ENTRIES: &[DeviceClassEntry] = &[
    DeviceClassEntry::new("media", "media", probes::misc::probe_media),
    DeviceClassEntry::new("vcs", "vcs", probes::console::probe_vcs),
    DeviceClassEntry::new("dm", "dm", probes::misc::probe_dm),
    DeviceClassEntry::new("video", "video", probes::misc::probe_video),
    DeviceClassEntry::new("random", "random", probes::misc::probe_random),
    DeviceClassEntry::new("mem", "mem", probes::memory::probe_mem),
    DeviceClassEntry::new("kmem", "kmem", probes::memory::probe_kmem),
    DeviceClassEntry::new("kmsg", "kmsg", probes::memory::probe_kmsg),
    DeviceClassEntry::new("nvram", "nvram", probes::memory::probe_nvram),
    DeviceClassEntry::new("cdrom", "cdrom", probes::cdrom::probe_cdrom),
    DeviceClassEntry::new("sr0", "sr0", probes::cdrom::probe_cdrom),
    DeviceClassEntry::new("console", "console", probes::console::probe_console),
];

#[cfg(all(target_os = "linux", any(target_arch = "x86", target_arch = "x86_64")))]
const PORT_ENTRIES: &[DeviceClassEntry] =
    &[DeviceClassEntry::new("port", "port", probes::memory::probe_port)];

#[cfg(target_os = "linux")]
const TAIL_ENTRIES: &[DeviceClassEntry] = &[
    DeviceClassEntry::new("hpet", "hpet", probes::misc::probe_hpet),
    DeviceClassEntry::new("null", "null", probes::nop),
    DeviceClassEntry::new("ptp", "ptp", probes::misc::probe_ptp),
];

#[derive(Debug, Clone, Default)]
pub struct DispatchTable {
    entries: Vec<DeviceClassEntry>,
}

impl DispatchTable {
    /// Builds the table for the platform this binary was compiled for.
    pub fn detect() -> Self {
        let mut entries = Vec::new();
        #[cfg(target_os = "linux")]
        {
            entries.extend_from_slice(LINUX_ENTRIES);
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            entries.extend_from_slice(PORT_ENTRIES);
            entries.extend_from_slice(TAIL_ENTRIES);
        }
        #[cfg(not(target_os = "linux"))]
        entries.push(DeviceClassEntry::new("null", "null", probes::nop));
        Self { entries }
    }

    pub fn from_entries(entries: Vec<DeviceClassEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[DeviceClassEntry] {
        &self.entries
    }

    pub fn lookup(&self, rel_path: &str) -> Option<&DeviceClassEntry> {
        self.entries.iter().find(|entry| entry.matches(rel_path))
    }

    /// Runs the handler of the first entry matching `rel_path`. Returns the
    /// class that handled it.
    pub fn dispatch(&self, rel_path: &str, dev: &Device<'_>) -> Option<&'static str> {
        let entry = self.lookup(rel_path)?;
        (entry.handler)(dev);
        Some(entry.class)
    }
}
