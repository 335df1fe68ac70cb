use crate::error::{DriftError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Suffix of a blob that is still being streamed in.
const PARTIAL_SUFFIX: &str = ".part";

/// BlobStore keeps one file per upload, named `{root}/{id}.{ext}`
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the blob directory if needed. Idempotent.
    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| DriftError::BlobWriteFailed(format!("{}: {}", self.root.display(), e)))
    }

    /// Final location of the blob for `id`. An empty extension yields a bare `{id}`.
    pub fn blob_path(&self, id: &str, extension: &str) -> PathBuf {
        if extension.is_empty() {
            self.root.join(id)
        } else {
            self.root.join(format!("{}.{}", id, extension))
        }
    }

    /// Drain `reader` into the blob for `id` and return its path.
    ///
    /// Bytes land in a `.part` file that is synced and renamed into place only
    /// once the reader is exhausted; an interrupted write leaves nothing at the
    /// returned path.
    pub async fn write<R>(&self, id: &str, extension: &str, mut reader: R) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin,
    {
        let blob_path = self.blob_path(id, extension);
        let mut temp_path = blob_path.clone().into_os_string();
        temp_path.push(PARTIAL_SUFFIX);
        let temp_path = PathBuf::from(temp_path);

        let write_failed =
            |e: std::io::Error| DriftError::BlobWriteFailed(format!("{}: {}", blob_path.display(), e));

        let mut file = fs::File::create(&temp_path).await.map_err(write_failed)?;
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(write_failed)?;
        file.flush().await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        drop(file);

        fs::rename(&temp_path, &blob_path)
            .await
            .map_err(write_failed)?;

        tracing::debug!(id, path = %blob_path.display(), bytes = written, "stored blob");
        Ok(blob_path)
    }

    /// Open a stored blob for reading.
    pub async fn open(&self, storage_path: &Path) -> std::io::Result<fs::File> {
        fs::File::open(storage_path).await
    }

    /// Remove a blob. A blob that is already gone counts as removed.
    pub async fn delete(&self, storage_path: &Path) -> Result<()> {
        match fs::remove_file(storage_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %storage_path.display(), "blob already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Extension policy for uploaded names: text after the last `.` of the final
/// path component, kept only when it is non-empty ASCII alphanumeric (plus `-`
/// and `_`). Anything else yields an empty extension.
pub fn extension_of(file_name: &str) -> &str {
    let base = file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);

    match base.rsplit_once('.') {
        Some((_, ext))
            if !ext.is_empty()
                && ext
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
        {
            ext
        }
        _ => "",
    }
}
