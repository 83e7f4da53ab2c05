//! A file-system backend storing one object per file.
//!
//! Objects live in a two-level directory tree below each configured cache directory:
//! `<path>/<L1>/<L2>/<filen>`, with the file number formatted as 8 upper-case hex digits.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::runtime::Handle;

use crate::config::CacheDirConfig;
use crate::entry::SwapLocation;

use super::{
    DISK_ERROR, DISK_OK, IoCompletion, OpenError, OpenRequest, StorageBackend, StoreIoState,
    SwapInCallbacks,
};

/// A single cache directory.
#[derive(Debug, Clone)]
pub struct UfsDir {
    path: PathBuf,
    l1: u32,
    l2: u32,
}

impl UfsDir {
    pub fn new(config: &CacheDirConfig) -> Self {
        Self {
            path: config.path.clone(),
            l1: config.l1.max(1),
            l2: config.l2.max(1),
        }
    }

    /// The path of the file holding object `filen`.
    pub fn file_path(&self, filen: u32) -> PathBuf {
        let l1 = ((filen / self.l2) / self.l2) % self.l1;
        let l2 = (filen / self.l2) % self.l2;
        self.path
            .join(format!("{l1:02X}"))
            .join(format!("{l2:02X}"))
            .join(format!("{filen:08X}"))
    }
}

/// Reads stored objects from the configured cache directories.
///
/// Reads run as tasks on the tokio runtime the backend was created with, which is also where
/// the swap-in callbacks fire.
#[derive(Debug, Clone)]
pub struct UfsBackend {
    dirs: Arc<[UfsDir]>,
    runtime: Handle,
}

impl UfsBackend {
    pub fn new(dirs: &[CacheDirConfig], runtime: Handle) -> Self {
        Self {
            dirs: dirs.iter().map(UfsDir::new).collect(),
            runtime,
        }
    }

    /// Creates a backend running its reads on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn from_current(dirs: &[CacheDirConfig]) -> Self {
        Self::new(dirs, Handle::current())
    }

    /// Resolves the path of the object at `location`.
    pub fn path_for(&self, location: SwapLocation) -> Result<PathBuf, OpenError> {
        let dir = usize::try_from(location.dirn)
            .ok()
            .and_then(|dirn| self.dirs.get(dirn))
            .ok_or(OpenError::UnknownDirectory(location.dirn))?;
        let filen =
            u32::try_from(location.filen).map_err(|_| OpenError::InvalidFileNumber(location.filen))?;
        Ok(dir.file_path(filen))
    }
}

impl StorageBackend for UfsBackend {
    fn open(
        &self,
        request: &OpenRequest,
        callbacks: SwapInCallbacks,
    ) -> Result<Arc<StoreIoState>, OpenError> {
        let path = self.path_for(request.location)?;
        let file = File::open(&path)?;
        tracing::trace!(path = %path.display(), key = %request.key, "Opened stored object");

        let io = StoreIoState::new(request.key.clone(), request.location);
        let mut completion = IoCompletion::new(io.clone(), callbacks);
        let location = request.location;

        self.runtime.spawn(async move {
            // The file was opened where the entry said it lives.
            completion.confirm_location(DISK_OK, location);

            let mut file = tokio::fs::File::from_std(file);
            let mut body = Vec::new();
            match file.read_to_end(&mut body).await {
                Ok(_) => completion.complete(DISK_OK, Bytes::from(body)),
                Err(error) => {
                    let dynerr: &dyn std::error::Error = &error;
                    tracing::error!(error = dynerr, path = %path.display(), "Failed to read stored object");
                    completion.complete(DISK_ERROR, Bytes::new());
                }
            }
        });

        Ok(io)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn dir_config(path: &Path) -> CacheDirConfig {
        CacheDirConfig {
            path: path.to_path_buf(),
            l1: 16,
            l2: 256,
        }
    }

    #[test]
    fn test_file_path_layout() {
        let dir = UfsDir::new(&dir_config(Path::new("/cache")));

        assert_eq!(dir.file_path(0), Path::new("/cache/00/00/00000000"));
        assert_eq!(dir.file_path(5), Path::new("/cache/00/00/00000005"));
        assert_eq!(dir.file_path(0x1234), Path::new("/cache/00/12/00001234"));
        assert_eq!(dir.file_path(0x12345), Path::new("/cache/01/23/00012345"));
        // the first level wraps around
        assert_eq!(dir.file_path(0x1234567), Path::new("/cache/03/45/01234567"));
    }

    #[tokio::test]
    async fn test_path_for_rejects_bad_locations() {
        let backend = UfsBackend::from_current(&[dir_config(Path::new("/cache"))]);

        assert!(matches!(
            backend.path_for(SwapLocation::new(1, 0)),
            Err(OpenError::UnknownDirectory(1))
        ));
        assert!(matches!(
            backend.path_for(SwapLocation::new(-1, 0)),
            Err(OpenError::UnknownDirectory(-1))
        ));
        assert!(matches!(
            backend.path_for(SwapLocation::new(0, -3)),
            Err(OpenError::InvalidFileNumber(-3))
        ));
        assert_eq!(
            backend.path_for(SwapLocation::new(0, 5)).unwrap(),
            Path::new("/cache/00/00/00000005")
        );
    }
}
