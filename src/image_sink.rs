use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use log::debug;

use crate::error::{CameraError, Result};

/**
 * Stores finished images under a fixed directory, one file per capture.
 */
#[derive(Debug, Clone)]
pub(crate) struct ImageSink {
    directory: PathBuf,
}

impl ImageSink {
    pub(crate) fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub(crate) fn path_for(&self, filename: &str) -> PathBuf {
        self.directory.join(filename)
    }

    /**
     * Creates (or truncates) `path` and writes `image` to it. The directory is
     * expected to exist already.
     */
    pub(crate) fn store(&self, path: &Path, image: &[u8]) -> Result<()> {
        let storage_err = |source| CameraError::Storage {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::create(path).map_err(storage_err)?;
        file.write_all(image).map_err(storage_err)?;
        file.sync_all().map_err(storage_err)?;
        debug!("stored {} bytes at {}", image.len(), path.display());
        Ok(())
    }
}
