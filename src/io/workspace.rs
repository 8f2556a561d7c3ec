use std::{
    fs,
    path::{Path, PathBuf},
};

use tempfile::{Builder, TempDir};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Scratch directory owned by a single run.
///
/// The directory name embeds the run id, so concurrent runs never share one.
/// [`Workspace::purge`] is idempotent; dropping an unpurged workspace still
/// removes it.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    artifacts: Vec<PathBuf>,
}

impl Workspace {
    pub fn create(root: &Path, run_id: Uuid) -> Result<Self> {
        fs::create_dir_all(root)?;
        let dir = Builder::new()
            .prefix(&format!("run-{run_id}-"))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        debug!("Created workspace {}", path.display());
        Ok(Self {
            dir: Some(dir),
            path,
            artifacts: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates (if needed) and returns a subdirectory.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let p = self.path.join(name);
        fs::create_dir_all(&p)?;
        Ok(p)
    }

    /// Records a file created on behalf of the run.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.artifacts.push(path.into());
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn is_purged(&self) -> bool {
        self.dir.is_none()
    }

    /// Deletes every tracked artifact and the directory itself.
    ///
    /// Returns the first error encountered, after attempting everything.
    pub fn purge(&mut self) -> Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        let mut first_err = None;
        for artifact in self.artifacts.drain(..) {
            if let Err(e) = remove_path(&artifact) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {e}", artifact.display());
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Err(e) = dir.close() {
            warn!("Failed to remove workspace {}: {e}", self.path.display());
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => {
                debug!("Purged workspace {}", self.path.display());
                Ok(())
            }
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
