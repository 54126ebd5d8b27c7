//! The flat directory holding every stored file.
//!
//! A stored file's name is also its only key: there is no index next to the files, so whatever
//! exists under the root is what the service will serve.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the storage root if it does not exist yet.
    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Open `name` for writing.
    ///
    /// With `exclusive` unset an existing file of the same name is truncated and replaced.
    /// With it set, an existing file makes this fail with [`io::ErrorKind::AlreadyExists`].
    pub async fn create(&self, name: &str, exclusive: bool) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }
        options.open(self.path_for(name)).await
    }

    /// Remove a file left behind by an interrupted write. Failures are logged, not returned.
    pub async fn discard(&self, name: &str) {
        match fs::remove_file(self.path_for(name)).await {
            Ok(()) => debug!(file_name = name, "Removed partial upload"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(file_name = name, error = %e, "Failed to remove partial upload"),
        }
    }
}
