use crate::{BlobStore, DriftError, FileRecord, MetadataStore, Result};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct RetrieveFileOperation {
    metadata_store: Arc<MetadataStore>,
    blob_store: Arc<BlobStore>,
}

#[derive(Debug, Clone)]
pub struct RetrieveFileOperationRequest {
    pub id: String,
    /// When false only the record is looked up and the blob is never touched.
    pub include_body: bool,
}

#[derive(Debug)]
pub struct BlobBody {
    pub file: tokio::fs::File,
    pub len: u64,
}

#[derive(Debug)]
pub struct RetrieveFileOperationResult {
    pub record: FileRecord,
    pub body: Option<BlobBody>,
}

#[derive(Debug)]
pub enum RetrieveFileOperationOutcome {
    Found(RetrieveFileOperationResult),
    NotFound,
}

impl RetrieveFileOperation {
    pub fn new(metadata_store: Arc<MetadataStore>, blob_store: Arc<BlobStore>) -> Self {
        Self {
            metadata_store,
            blob_store,
        }
    }

    pub async fn run(
        &self,
        request: RetrieveFileOperationRequest,
    ) -> Result<RetrieveFileOperationOutcome> {
        let RetrieveFileOperationRequest { id, include_body } = request;

        let Some(record) = self.metadata_store.lookup(&id)? else {
            return Ok(RetrieveFileOperationOutcome::NotFound);
        };

        if !include_body {
            return Ok(RetrieveFileOperationOutcome::Found(
                RetrieveFileOperationResult { record, body: None },
            ));
        }

        let blob_missing = |error: std::io::Error| {
            tracing::error!(
                id = %record.id,
                path = %record.storage_path,
                error = %error,
                "live record has no readable blob"
            );
            DriftError::BlobMissing {
                id: record.id.clone(),
                path: record.storage_path.clone(),
            }
        };

        let storage_path = Path::new(&record.storage_path);
        let file = self
            .blob_store
            .open(storage_path)
            .await
            .map_err(blob_missing)?;
        let len = file.metadata().await.map_err(blob_missing)?.len();

        Ok(RetrieveFileOperationOutcome::Found(
            RetrieveFileOperationResult {
                record,
                body: Some(BlobBody { file, len }),
            },
        ))
    }
}
