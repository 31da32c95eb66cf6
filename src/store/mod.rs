//! Object-store facade. The ref engine, lock manager and LFS agent depend
//! only on the [`ObjectStore`] trait so that unit tests can substitute
//! [`memory::InMemoryStore`] for the real S3-backed client in [`s3`].

mod memory;
pub mod s3;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket not found {0}")]
    BucketNotFound(String),
    #[error("user not authorized to perform {action} on {bucket}")]
    NotAuthorized { action: String, bucket: String },
    #[error("invalid credentials {0}")]
    InvalidCredentials(String),
    #[error("precondition failed for key {0}")]
    PreconditionFailed(String),
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("object store error: {0}")]
    Other(String),
}

/// One entry as returned by [`ObjectStore::list`] or [`ObjectStore::head`].
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Part descriptor accumulated while streaming a multipart upload.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// Whether a `put` must fail if the key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Plain overwrite.
    Overwrite,
    /// `If-None-Match: *` — the lock manager's conditional create.
    CreateOnly,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists every object under `prefix`, paginating internally, sorted by
    /// `last_modified` descending (most-recent first).
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn get_to_file(&self, key: &str, dest: &std::path::Path) -> Result<(), StoreError>;

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        mode: PutMode,
        metadata: Option<std::collections::HashMap<String, String>>,
        content_disposition: Option<String>,
    ) -> Result<(), StoreError>;

    async fn put_file(
        &self,
        key: &str,
        path: &std::path::Path,
        metadata: Option<std::collections::HashMap<String, String>>,
        content_disposition: Option<String>,
    ) -> Result<(), StoreError>;

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn create_multipart(
        &self,
        key: &str,
        metadata: Option<std::collections::HashMap<String, String>>,
        content_disposition: Option<String>,
    ) -> Result<String, StoreError>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, StoreError>;

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError>;
}
