//! In-memory object backend with multipart semantics.
//!
//! Committed objects are immutable byte sequences; staged parts live per
//! (key, upload id) until completed or aborted. Etags are the hex sha256 of
//! the object bytes, which keeps them deterministic across runs.

use super::{ByteRange, CompletedPart, ObjectBackend, ObjectError, ObjectGet, ObjectResult};
use async_trait::async_trait;
use sha2::{Digest as _, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Arc<Vec<u8>>,
    etag: String,
}

#[derive(Debug, Clone)]
struct StagedPart {
    bytes: Vec<u8>,
    etag: String,
}

#[derive(Debug, Default)]
struct MultipartUpload {
    parts: BTreeMap<u32, StagedPart>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    uploads: RwLock<HashMap<(String, String), MultipartUpload>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores part bytes for a staged upload, standing in for the client's
    /// PUT against a presigned URL. Returns the part etag the client would
    /// echo back on complete.
    pub async fn put_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> ObjectResult<String> {
        if part_number == 0 {
            return Err(ObjectError::InvalidPart("part numbers start at 1".to_string()));
        }
        let mut uploads = self.uploads.write().await;
        let upload = uploads
            .get_mut(&(key.to_string(), upload_id.to_string()))
            .ok_or_else(|| ObjectError::NoSuchUpload(upload_id.to_string()))?;
        let etag = etag_of(&bytes);
        upload.parts.insert(part_number, StagedPart { bytes, etag: etag.clone() });
        Ok(etag)
    }

    /// Seeds a committed object directly; test and tooling convenience.
    pub async fn put_object(&self, key: &str, bytes: Vec<u8>) -> String {
        let etag = etag_of(&bytes);
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes: Arc::new(bytes),
                etag: etag.clone(),
            },
        );
        etag
    }

    pub async fn object_exists(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    /// Number of multipart uploads currently staged.
    pub async fn active_upload_count(&self) -> usize {
        self.uploads.read().await.len()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectBackend for MemoryObjectStore {
    async fn begin_multipart(&self, key: &str) -> ObjectResult<String> {
        let upload_id = Uuid::new_v4().simple().to_string();
        self.uploads
            .write()
            .await
            .insert((key.to_string(), upload_id.clone()), MultipartUpload::default());
        Ok(upload_id)
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
    ) -> ObjectResult<String> {
        let uploads = self.uploads.read().await;
        if !uploads.contains_key(&(key.to_string(), upload_id.to_string())) {
            return Err(ObjectError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(format!(
            "memory://{key}?uploadId={upload_id}&partNumber={part_number}&ttl={}",
            ttl.as_secs()
        ))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> ObjectResult<String> {
        let mut uploads = self.uploads.write().await;
        let upload = uploads
            .remove(&(key.to_string(), upload_id.to_string()))
            .ok_or_else(|| ObjectError::NoSuchUpload(upload_id.to_string()))?;

        if parts.is_empty() {
            return Err(ObjectError::InvalidPart("part list is empty".to_string()));
        }

        let mut assembled = Vec::new();
        let mut listed = parts.to_vec();
        listed.sort_by_key(|p| p.number);
        for part in &listed {
            match upload.parts.get(&part.number) {
                Some(staged) if staged.etag == part.etag => {
                    assembled.extend_from_slice(&staged.bytes);
                }
                Some(_) => {
                    return Err(ObjectError::InvalidPart(format!(
                        "etag mismatch for part {}",
                        part.number
                    )));
                }
                None => {
                    return Err(ObjectError::InvalidPart(format!(
                        "part {} was never uploaded",
                        part.number
                    )));
                }
            }
        }

        let etag = etag_of(&assembled);
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                bytes: Arc::new(assembled),
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> ObjectResult<()> {
        self.uploads
            .write()
            .await
            .remove(&(key.to_string(), upload_id.to_string()));
        Ok(())
    }

    async fn get_object(&self, key: &str, range: Option<ByteRange>) -> ObjectResult<ObjectGet> {
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| ObjectError::NotFound(key.to_string()))?;
        let length = object.bytes.len() as u64;

        match range {
            None => Ok(ObjectGet {
                bytes: object.bytes.as_ref().clone(),
                total_length: length,
                etag: object.etag.clone(),
                range: None,
            }),
            Some(ByteRange { start, end }) => {
                if start > end || start >= length {
                    return Err(ObjectError::InvalidRange { start, end, length });
                }
                let end = end.min(length.saturating_sub(1));
                let bytes = object.bytes[start as usize..=end as usize].to_vec();
                Ok(ObjectGet {
                    bytes,
                    total_length: length,
                    etag: object.etag.clone(),
                    range: Some(ByteRange { start, end }),
                })
            }
        }
    }

    async fn delete_object(&self, key: &str) -> ObjectResult<()> {
        match self.objects.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(ObjectError::NotFound(key.to_string())),
        }
    }

    async fn check_availability(&self) -> ObjectResult<()> {
        Ok(())
    }
}

fn etag_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
