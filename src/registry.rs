use std::collections::HashSet;
use std::collections::TryReserveError;

/// Paths the walker has already settled during one scan generation.
///
/// Insert-only and owned by the walker thread, so no locking.
#[derive(Debug, Default)]
pub struct PathRegistry {
    paths: HashSet<String>,
}

impl PathRegistry {
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut paths = HashSet::new();
        paths.try_reserve(capacity)?;
        Ok(Self { paths })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn insert(&mut self, path: &str) {
        if !self.paths.contains(path) {
            self.paths.insert(path.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
