use crate::{
    BlobStore, DriftError, FileRecord, IdGenerator, MetadataStore, Result, extension_of,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncRead;

#[derive(Clone)]
pub struct StoreFileOperation {
    metadata_store: Arc<MetadataStore>,
    blob_store: Arc<BlobStore>,
    id_generator: Arc<IdGenerator>,
}

#[derive(Debug, Clone)]
pub struct StoreFileOperationRequest {
    /// Client-supplied file name, kept verbatim for display and downloads.
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct StoreFileOperationResult {
    pub record: FileRecord,
}

impl StoreFileOperation {
    pub fn new(
        metadata_store: Arc<MetadataStore>,
        blob_store: Arc<BlobStore>,
        id_generator: Arc<IdGenerator>,
    ) -> Self {
        Self {
            metadata_store,
            blob_store,
            id_generator,
        }
    }

    /// Write `body` as a new blob and register it under a fresh id.
    ///
    /// The record is inserted only after the blob is fully on disk. If the
    /// insert fails the blob stays behind as an orphan; it is logged, not
    /// removed.
    pub async fn run<R>(
        &self,
        request: StoreFileOperationRequest,
        body: R,
    ) -> Result<StoreFileOperationResult>
    where
        R: AsyncRead + Unpin,
    {
        let StoreFileOperationRequest {
            file_name,
            content_type,
        } = request;

        if file_name.trim().is_empty() {
            return Err(DriftError::InvalidForm("file name is empty".to_string()));
        }

        self.blob_store.ensure_root().await?;

        let reservation = self.metadata_store.reserve_id(&self.id_generator)?;
        let id = reservation.id().to_string();

        let blob_path = self
            .blob_store
            .write(&id, extension_of(&file_name), body)
            .await?;

        let record = FileRecord {
            id: id.clone(),
            storage_path: blob_path.to_string_lossy().into_owned(),
            original_name: file_name,
            uploaded_at: Utc::now().timestamp(),
            content_type,
        };

        if let Err(error) = self.metadata_store.insert(record.clone()) {
            tracing::error!(
                id = %id,
                path = %record.storage_path,
                error = %error,
                "metadata insert failed; blob left orphaned"
            );
            return Err(match error {
                DriftError::StoreReadFailed(message) => DriftError::StoreWriteFailed(message),
                other => other,
            });
        }
        drop(reservation);

        tracing::info!(
            id = %id,
            name = %record.original_name,
            content_type = %record.content_type,
            "stored file"
        );

        Ok(StoreFileOperationResult { record })
    }
}
