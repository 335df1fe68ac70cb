pub mod retrieve_file;
pub mod store_file;
pub mod sweep_expired;

pub use retrieve_file::{
    BlobBody, RetrieveFileOperation, RetrieveFileOperationOutcome, RetrieveFileOperationRequest,
    RetrieveFileOperationResult,
};
pub use store_file::{StoreFileOperation, StoreFileOperationRequest, StoreFileOperationResult};
pub use sweep_expired::{
    SweepExpiredOperation, SweepExpiredOperationOutcome, SweepExpiredOperationRequest,
    SweepExpiredOperationResult,
};
