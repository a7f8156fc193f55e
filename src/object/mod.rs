//! The Object Backend contract.
//!
//! Bytes live here and nowhere else; rows in the metadata store only point
//! at them. The capability set is deliberately narrow: multipart staging,
//! ranged reads, and a delete that distinguishes NotFound so the GC sweep
//! can tolerate already-gone objects.

pub mod memory;

pub use memory::MemoryObjectStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("no such multipart upload: {0}")]
    NoSuchUpload(String),

    #[error("invalid part set: {0}")]
    InvalidPart(String),

    #[error("invalid range {start}..={end} for object of {length} bytes")]
    InvalidRange { start: u64, end: u64, length: u64 },

    #[error("object backend: {0}")]
    Backend(String),
}

pub type ObjectResult<T> = std::result::Result<T, ObjectError>;

/// One part acknowledged by the client after an out-of-band presigned PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub number: u32,
    pub etag: String,
}

/// Inclusive byte range of a ranged read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// The bytes and headers of a (possibly ranged) object read.
#[derive(Debug, Clone)]
pub struct ObjectGet {
    pub bytes: Vec<u8>,
    pub total_length: u64,
    pub etag: String,
    /// The satisfied range, when the read was ranged.
    pub range: Option<ByteRange>,
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Starts a multipart upload under `key`, returning the upload id.
    async fn begin_multipart(&self, key: &str) -> ObjectResult<String>;

    /// Issues a short-TTL URL a client can PUT part `part_number` to.
    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> ObjectResult<String>;

    /// Assembles the listed parts, in part-number order, into the committed
    /// object at `key`. Returns the object etag.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ObjectResult<String>;

    /// Discards a multipart upload. Idempotent: aborting an unknown upload
    /// succeeds.
    async fn abort_multipart(&self, key: &str, upload_id: &str) -> ObjectResult<()>;

    /// Reads the object, optionally a single inclusive byte range of it.
    async fn get_object(&self, key: &str, range: Option<ByteRange>) -> ObjectResult<ObjectGet>;

    /// Deletes the object. `NotFound` is reported distinctly; everything
    /// else propagates.
    async fn delete_object(&self, key: &str) -> ObjectResult<()>;

    /// Cheap liveness probe for the readiness endpoint.
    async fn check_availability(&self) -> ObjectResult<()>;
}
