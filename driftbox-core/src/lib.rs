//! Driftbox Core - storage engine for short-lived file sharing
//!
//! Uploads are kept as one blob per file on local disk, indexed by a single
//! JSON metadata table keyed by a short random id:
//! - random alphanumeric ids, unique against the live table
//! - whole-table atomic rewrites serialized behind one lock
//! - time-based reclamation of records and blobs past the retention window

pub mod error;
pub mod id_generator;
pub mod operations;
pub mod retention;
pub mod storage;

pub use error::{DriftError, Result};
pub use id_generator::{DEFAULT_ID_LENGTH, ID_ALPHABET, IdGenerator};
pub use operations::{
    BlobBody, RetrieveFileOperation, RetrieveFileOperationOutcome, RetrieveFileOperationRequest,
    RetrieveFileOperationResult, StoreFileOperation, StoreFileOperationRequest,
    StoreFileOperationResult, SweepExpiredOperation, SweepExpiredOperationOutcome,
    SweepExpiredOperationRequest, SweepExpiredOperationResult,
};
pub use retention::{
    DEFAULT_RETENTION_WINDOW, DEFAULT_SWEEP_INTERVAL, RetentionPolicy, RetentionSweeper,
};
pub use storage::{BlobStore, FileRecord, FileTable, IdReservation, MetadataStore, extension_of};
