use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriftError {
    #[error("file not found: {0}")]
    NotFound(String),

    /// A live record points at a blob that is no longer on disk.
    #[error("blob missing for {id} at {path}")]
    BlobMissing { id: String, path: String },

    #[error("blob write failed: {0}")]
    BlobWriteFailed(String),

    #[error("metadata store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("metadata store read failed: {0}")]
    StoreReadFailed(String),

    #[error("duplicate file id: {0}")]
    DuplicateId(String),

    #[error("could not generate a free id after {attempts} attempts")]
    GenerationExhausted { attempts: usize },

    #[error("invalid upload form: {0}")]
    InvalidForm(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriftError>;
