//! Recursive device namespace walk.
//!
//! Entries are visited in a seeded hash order so concurrent instances spread
//! over different devices. Anything that hangs, fails to open or is known to
//! be dangerous is memoized in the [`PathRegistry`] and never looked at again
//! during the same worker lifetime.

use std::cmp::Ordering;
use std::time::Duration;

use tracing::debug;

use crate::cache::SharedState;
use crate::namespace::{DeviceNamespace, NodeKind};
use crate::probe::{Loops, Probe};
use crate::registry::PathRegistry;
use crate::stressor::RunState;

pub const MAX_DEPTH: u32 = 20;
pub const PATH_MAX: usize = 4096;
pub const OPEN_TIMEOUT: Duration = Duration::from_millis(1500);

/// Group and other read/write bits; a directory with none of them is private.
const SHARED_ACCESS_BITS: u32 =
    (libc::S_IRGRP | libc::S_IWGRP | libc::S_IROTH | libc::S_IWOTH) as u32;

/// Devices of one driver past this index are left alone (`ttyS0..ttyS2`).
const MAX_DEVICE_INDEX: u64 = 2;

/// P.J. Weinberger's ELF string hash.
pub fn pjw_hash(name: &str) -> u32 {
    let mut h: u32 = 0;
    for b in name.bytes() {
        h = (h << 4).wrapping_add(u32::from(b));
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
            h ^= g;
        }
    }
    h
}

/// Orders names by their hash mixed with `seed`; equal hashes are `Equal`.
pub fn mixup_order(seed: u32, a: &str, b: &str) -> Ordering {
    (pjw_hash(a) ^ seed).cmp(&(pjw_hash(b) ^ seed))
}

/// True when the trailing number of `name` is above the per-driver limit.
///
/// The first byte never counts as part of the number, and single-byte names
/// are never throttled. A number too large to parse counts as above.
pub fn digit_suffix_exceeds(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() <= 1 {
        return false;
    }
    let digits = bytes[1..]
        .iter()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return false;
    }
    match name[name.len() - digits..].parse::<u64>() {
        Ok(index) => index > MAX_DEVICE_INDEX,
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    pub max_depth: u32,
    pub open_timeout: Duration,
    /// Repetitions handed to the probe for every device.
    pub loops: Loops,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            open_timeout: OPEN_TIMEOUT,
            loops: Loops::Bounded(1),
        }
    }
}

pub struct Walker<'a, N, P> {
    namespace: &'a N,
    probe: &'a P,
    shared: &'a SharedState,
    registry: &'a mut PathRegistry,
    run: &'a RunState,
    seed: u32,
    options: WalkOptions,
}

impl<'a, N: DeviceNamespace, P: Probe> Walker<'a, N, P> {
    pub fn new(
        namespace: &'a N,
        probe: &'a P,
        shared: &'a SharedState,
        registry: &'a mut PathRegistry,
        run: &'a RunState,
        seed: u32,
        options: WalkOptions,
    ) -> Self {
        Self {
            namespace,
            probe,
            shared,
            registry,
            run,
            seed,
            options,
        }
    }

    pub fn walk(&mut self, dir: &str, recurse: bool, depth: u32, privileged: bool) {
        if !self.run.continue_running() || depth > self.options.max_depth {
            return;
        }
        let Ok(mut entries) = self.namespace.list(dir) else {
            return;
        };
        let seed = self.seed;
        entries.sort_by(|a, b| mixup_order(seed, &a.name, &b.name));

        for entry in entries {
            if !self.run.continue_running() {
                break;
            }
            self.run.beat();
            if entry.name.starts_with('.') {
                continue;
            }
            // Opening the event timer hangs some hypervisor guests when root.
            if privileged && entry.name == "hpet" {
                continue;
            }
            if digit_suffix_exceeds(&entry.name) {
                continue;
            }

            let path = join(dir, &entry.name);
            if path.len() >= PATH_MAX {
                self.registry.insert(&path);
                continue;
            }

            match entry.kind {
                NodeKind::Directory => {
                    if !recurse || self.registry.contains(&path) {
                        continue;
                    }
                    let shared_access = self
                        .namespace
                        .mode(&path)
                        .is_ok_and(|mode| mode & SHARED_ACCESS_BITS != 0);
                    if !shared_access {
                        self.registry.insert(&path);
                        continue;
                    }
                    self.run.bump();
                    self.walk(&path, recurse, depth + 1, privileged);
                }
                NodeKind::Block | NodeKind::Char => {
                    if self.registry.contains(&path) {
                        continue;
                    }
                    if entry.name.contains("watchdog") {
                        self.registry.insert(&path);
                        continue;
                    }
                    if self
                        .namespace
                        .open_should_skip(&path, self.options.open_timeout)
                    {
                        debug!(path = %path, "skipping unopenable device");
                        self.registry.insert(&path);
                        continue;
                    }
                    self.shared.publish(&path);
                    let outcome = self
                        .probe
                        .exercise(self.shared, self.run, self.options.loops);
                    debug!(path = %path, ?outcome, "device exercised");
                    self.run.bump();
                }
                NodeKind::Other => {}
            }
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
