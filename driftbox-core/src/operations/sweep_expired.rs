use crate::{BlobStore, MetadataStore, Result, RetentionPolicy};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct SweepExpiredOperation {
    metadata_store: Arc<MetadataStore>,
    blob_store: Arc<BlobStore>,
    policy: RetentionPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct SweepExpiredOperationRequest {
    /// Reference time in seconds since the epoch.
    pub now: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepExpiredOperationResult {
    /// Ids whose blob and record were both removed.
    pub removed: Vec<String>,
    /// Expired ids kept because their blob could not be deleted.
    pub retained: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepExpiredOperationOutcome {
    /// Nothing was expired; the table was not written.
    Unchanged,
    Reclaimed(SweepExpiredOperationResult),
}

impl SweepExpiredOperation {
    pub fn new(
        metadata_store: Arc<MetadataStore>,
        blob_store: Arc<BlobStore>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            metadata_store,
            blob_store,
            policy,
        }
    }

    /// Delete every expired blob, then drop the matching records in one rewrite.
    ///
    /// A record whose blob cannot be deleted stays in the table for the next
    /// sweep. If the rewrite itself fails the whole sweep fails and the table
    /// is left as it was.
    pub async fn run(
        &self,
        request: SweepExpiredOperationRequest,
    ) -> Result<SweepExpiredOperationOutcome> {
        let table = self.metadata_store.load()?;

        let expired: Vec<_> = table
            .into_values()
            .filter(|record| self.policy.is_expired(record.uploaded_at, request.now))
            .collect();

        if expired.is_empty() {
            return Ok(SweepExpiredOperationOutcome::Unchanged);
        }

        let mut result = SweepExpiredOperationResult::default();
        for record in expired {
            match self.blob_store.delete(Path::new(&record.storage_path)).await {
                Ok(()) => result.removed.push(record.id),
                Err(error) => {
                    tracing::warn!(
                        id = %record.id,
                        path = %record.storage_path,
                        error = %error,
                        "failed to delete expired blob, keeping record"
                    );
                    result.retained.push(record.id);
                }
            }
        }

        if !result.removed.is_empty() {
            self.metadata_store.delete_many(&result.removed)?;
        }

        Ok(SweepExpiredOperationOutcome::Reclaimed(result))
    }
}
