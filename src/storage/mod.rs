//! Persistence for pipeline output: SQLite rows plus content-addressed blobs.

mod blob_store;
mod db;
mod error;

pub use blob_store::BlobStore;
pub use db::{Database, NewArtifact};
pub use error::StorageError;
