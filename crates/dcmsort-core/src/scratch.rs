use crate::error::Error;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

lazy_static::lazy_static! {
    /// Process-wide registry of scratch directories.
    pub static ref SCRATCH_DIRS: ScratchDirs = ScratchDirs::new();
}

/// Registry of temporary directories that outlive a single call and are
/// removed individually or all together at the end of a run.
#[derive(Debug, Default)]
pub struct ScratchDirs {
    dirs: Mutex<Vec<PathBuf>>,
}

impl ScratchDirs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<PathBuf>>, Error> {
        self.dirs
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock scratch registry: {}", e)))
    }

    /// Create and register a fresh directory under the system temp dir.
    pub fn create(&self, prefix: &str) -> Result<PathBuf, Error> {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir()?.into_path();
        debug!("Created scratch directory {}", dir.display());
        self.lock()?.push(dir.clone());
        Ok(dir)
    }

    /// Remove one directory. Unknown or already removed paths are ignored.
    pub fn remove(&self, path: &Path) -> Result<(), Error> {
        remove_tree(path)?;
        self.lock()?.retain(|d| d != path);
        Ok(())
    }

    /// Remove every registered directory.
    pub fn cleanup(&self) -> Result<(), Error> {
        let dirs: Vec<PathBuf> = std::mem::take(&mut *self.lock()?);
        debug!("Removing {} scratch directories", dirs.len());
        for dir in dirs {
            remove_tree(&dir)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn remove_tree(path: &Path) -> Result<(), Error> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ScratchDirs::new();
        let dir = registry.create("dcmsort-test").unwrap();
        assert!(dir.is_dir());
        assert_eq!(registry.len(), 1);

        registry.remove(&dir).unwrap();
        assert!(!dir.exists());
        assert!(registry.is_empty());
        registry.remove(&dir).unwrap();
    }

    #[test]
    fn test_cleanup_removes_all() {
        let registry = ScratchDirs::new();
        let a = registry.create("dcmsort-a").unwrap();
        let b = registry.create("dcmsort-b").unwrap();
        fs::write(b.join("f.json"), "{}").unwrap();

        registry.cleanup().unwrap();
        assert!(!a.exists() && !b.exists());
        assert!(registry.is_empty());
        registry.cleanup().unwrap();
    }
}
