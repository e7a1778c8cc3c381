//! State shared between the walker and the exerciser threads.
//!
//! One mutex guards both the published device path and the cache of paths
//! confirmed to belong to a storage sub-family. Readers always see a path
//! that was written in full, never a partially copied one.

use std::collections::HashSet;
use std::collections::TryReserveError;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Positive sub-classification results. Negative results are never stored.
#[derive(Debug, Default)]
pub struct ClassCache {
    members: HashSet<String>,
}

impl ClassCache {
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut members = HashSet::new();
        members.try_reserve(capacity)?;
        Ok(Self { members })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.members.contains(path)
    }

    pub fn insert(&mut self, path: &str) {
        if !self.members.contains(path) {
            self.members.insert(path.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug)]
struct Guarded {
    current_path: String,
    class_cache: ClassCache,
}

#[derive(Debug)]
pub struct SharedState {
    guarded: Mutex<Guarded>,
}

impl SharedState {
    pub fn new(initial_path: &str, class_cache: ClassCache) -> Self {
        Self {
            guarded: Mutex::new(Guarded {
                current_path: initial_path.to_string(),
                class_cache,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Guarded> {
        // A panicking prober must not take the rest of the worker down with it.
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, path: &str) {
        let mut guarded = self.lock();
        guarded.current_path.clear();
        guarded.current_path.push_str(path);
    }

    pub fn current_path(&self) -> String {
        self.lock().current_path.clone()
    }

    pub fn is_cached_member(&self, path: &str) -> bool {
        self.lock().class_cache.contains(path)
    }

    pub fn cache_member(&self, path: &str) {
        self.lock().class_cache.insert(path);
    }

    pub fn cached_members(&self) -> usize {
        self.lock().class_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn cache_stores_members_once() {
        let shared = SharedState::new("", ClassCache::with_capacity(8).unwrap());
        assert!(!shared.is_cached_member("/dev/sda"));
        shared.cache_member("/dev/sda");
        shared.cache_member("/dev/sda");
        assert!(shared.is_cached_member("/dev/sda"));
        assert_eq!(shared.cached_members(), 1);
    }

    #[test]
    fn readers_only_observe_fully_written_paths() {
        let written = [
            "/dev/null",
            "/dev/a-fairly-long-device-name-that-takes-a-while-to-copy-0",
            "/dev/tty1",
            "",
        ];
        let shared = Arc::new(SharedState::new(written[0], ClassCache::default()));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let done = Arc::clone(&done);
                std::thread::spawn(move || {
                    let mut seen = 0u64;
                    loop {
                        let path = shared.current_path();
                        assert!(written.contains(&path.as_str()), "torn read: {path:?}");
                        seen += 1;
                        if done.load(Ordering::Relaxed) {
                            break seen;
                        }
                    }
                })
            })
            .collect();

        for i in 0..20_000 {
            shared.publish(written[i % written.len()]);
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
    }
}
