//! Storage sub-family detection.
//!
//! A block device is SCSI-backed when its name shows up under
//! `/sys/class/scsi_device/*/device/block/`. Positive answers are cached in
//! [`SharedState`]; negative answers rescan every time.

use ignore::WalkBuilder;
use std::path::PathBuf;

use crate::cache::SharedState;

pub const DEFAULT_SCSI_ROOT: &str = "/sys/class/scsi_device";

/// An auxiliary registry that lists sub-family members by device name.
pub trait MembershipSource: Send + Sync {
    fn lists(&self, devname: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct SysfsScsiDevices {
    root: PathBuf,
}

impl SysfsScsiDevices {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SysfsScsiDevices {
    fn default() -> Self {
        Self::new(DEFAULT_SCSI_ROOT)
    }
}

impl MembershipSource for SysfsScsiDevices {
    fn lists(&self, devname: &str) -> bool {
        // <root>/<host:chan:id:lun>/device/block/<devname>
        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(true)
            .max_depth(Some(4))
            .filter_entry(|entry| match entry.depth() {
                2 => entry.file_name() == "device",
                3 => entry.file_name() == "block",
                _ => true,
            })
            .build();

        walker
            .filter_map(Result::ok)
            .any(|entry| entry.depth() == 4 && entry.file_name() == devname)
    }
}

pub struct SubClassifier<S = SysfsScsiDevices> {
    source: S,
}

impl<S: MembershipSource> SubClassifier<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_in_subfamily(&self, shared: &SharedState, devpath: &str) -> bool {
        let devname = dev_basename(devpath);
        if devname.is_empty() {
            return false;
        }
        if shared.is_cached_member(devpath) {
            return true;
        }

        let member = self.source.lists(devname);
        if member {
            shared.cache_member(devpath);
        }
        member
    }
}

/// Last non-empty path component, ignoring one trailing slash.
pub fn dev_basename(devpath: &str) -> &str {
    let bytes = devpath.as_bytes();
    let mut base = 0;
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'/' && i + 1 < bytes.len() {
            base = i + 1;
        }
    }
    &devpath[base..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClassCache;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        members: Vec<&'static str>,
        scans: AtomicUsize,
    }

    impl MembershipSource for CountingSource {
        fn lists(&self, devname: &str) -> bool {
            self.scans.fetch_add(1, Ordering::Relaxed);
            self.members.contains(&devname)
        }
    }

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
    fn basename_handles_trailing_slash_and_bare_names() {
        assert_eq!(dev_basename("/dev/sda"), "sda");
        assert_eq!(dev_basename("/dev/disk/by-id/x"), "x");
        assert_eq!(dev_basename("sdb"), "sdb");
        assert_eq!(dev_basename("/dev/"), "dev/");
        assert_eq!(dev_basename(""), "");
    }

    #[test]
    fn members_are_scanned_once_and_non_members_every_time() {
        let shared = SharedState::new("", ClassCache::default());
        let classifier = SubClassifier::new(CountingSource {
            members: vec!["sda"],
            scans: AtomicUsize::new(0),
        });

        assert!(!classifier.is_in_subfamily(&shared, "/dev/loop0"));
        assert!(!classifier.is_in_subfamily(&shared, "/dev/loop0"));
        assert_eq!(classifier.source().scans.load(Ordering::Relaxed), 2);

        assert!(classifier.is_in_subfamily(&shared, "/dev/sda"));
        assert!(classifier.is_in_subfamily(&shared, "/dev/sda"));
        assert_eq!(classifier.source().scans.load(Ordering::Relaxed), 3);
        assert_eq!(shared.cached_members(), 1);
    }

    #[test]
    fn empty_basename_is_never_a_member() {
        let shared = SharedState::new("", ClassCache::default());
        let classifier = SubClassifier::new(CountingSource {
            members: vec![""],
            scans: AtomicUsize::new(0),
        });
        assert!(!classifier.is_in_subfamily(&shared, ""));
        assert_eq!(classifier.source().scans.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sysfs_layout_is_cross_referenced() {
        let root = temp_dir("dev-stress-scsi");
        fs::create_dir_all(root.join("0:0:0:0/device/block/sda")).unwrap();
        fs::create_dir_all(root.join("1:0:0:0/device/block/sr0")).unwrap();
        fs::create_dir_all(root.join("2:0:0:0/other/block/sdz")).unwrap();
        fs::create_dir_all(root.join(".hidden/device/block/sdh")).unwrap();

        let source = SysfsScsiDevices::new(&root);
        assert!(source.lists("sda"));
        assert!(source.lists("sr0"));
        assert!(!source.lists("sdz"));
        assert!(!source.lists("sdh"));
        assert!(!source.lists("block"));
        assert!(!source.lists("nvme0n1"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_registry_means_no_members() {
        let source = SysfsScsiDevices::new(temp_dir("dev-stress-no-scsi"));
        assert!(!source.lists("sda"));
    }
}
