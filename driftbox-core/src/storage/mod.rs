//! Storage modules for Driftbox
//!
//! Provides the on-disk blob directory and the JSON metadata table.

pub mod blob_store;
pub mod metadata_store;

pub use blob_store::{BlobStore, extension_of};
pub use metadata_store::{FileRecord, FileTable, IdReservation, MetadataStore};
