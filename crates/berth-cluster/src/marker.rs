//! Durable record of a completed join
//!
//! The marker lives at `<data_dir>/join` and holds nothing but the
//! initial-membership descriptor. Its presence is what makes every later
//! startup skip the join protocol, so a join whose marker cannot be written
//! is treated as failed.
//!
//! The descriptor is written and synced to `<data_dir>/join.tmp` first and
//! only then linked into place, so a failed write never leaves a partial
//! marker behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use berth_core::JOIN_MARKER_FILE;

use crate::error::{ClusterError, ClusterResult};

/// Owner may create and remove files inside the data directory
#[cfg(unix)]
const PRIVATE_DIR_MODE: u32 = 0o700;
/// Owner may read and write the marker
#[cfg(unix)]
const PRIVATE_FILE_MODE: u32 = 0o600;

/// The join marker of one data directory
#[derive(Debug, Clone)]
pub struct JoinMarker {
    data_dir: PathBuf,
}

impl JoinMarker {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(JOIN_MARKER_FILE)
    }

    fn staging_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.tmp", JOIN_MARKER_FILE))
    }

    /// Read a previously persisted descriptor, trimmed of surrounding whitespace.
    ///
    /// Returns `Ok(None)` when no marker exists; a marker that exists but
    /// cannot be read is an error.
    pub async fn load(&self) -> ClusterResult<Option<String>> {
        match fs::read_to_string(self.path()).await {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ClusterError::Persistence(e)),
        }
    }

    /// Write `descriptor` as the sole content of the marker.
    ///
    /// Creates the data directory owner-only if needed. An existing marker is
    /// never overwritten.
    pub async fn persist(&self, descriptor: &str) -> ClusterResult<()> {
        create_private_dir(&self.data_dir)
            .await
            .map_err(ClusterError::Persistence)?;

        let staging = self.staging_path();
        discard(&staging).await;
        if let Err(e) = write_synced(&staging, descriptor.as_bytes()).await {
            discard(&staging).await;
            return Err(ClusterError::Persistence(e));
        }

        // Linking fails with AlreadyExists instead of replacing a marker.
        let path = self.path();
        let linked = fs::hard_link(&staging, &path).await;
        discard(&staging).await;
        linked.map_err(ClusterError::Persistence)?;

        sync_dir(&self.data_dir)
            .await
            .map_err(ClusterError::Persistence)?;

        info!(path = %path.display(), "join marker persisted");
        Ok(())
    }
}

async fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(PRIVATE_DIR_MODE);
    builder.create(dir).await
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(PRIVATE_FILE_MODE);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

/// Remove a staging file if present
async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "failed to remove staging file");
        }
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
