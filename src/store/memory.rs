//! An in-memory [`ObjectStore`] used to unit-test the ref engine and lock
//! manager without reaching the network, mirroring how the teacher's git
//! adapter tests spin up a hermetic git repo instead of mocking `git`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{CompletedPart, ObjectMeta, ObjectStore, PutMode, StoreError};

struct Entry {
    body: Vec<u8>,
    last_modified: chrono::DateTime<Utc>,
}

struct PendingUpload {
    key: String,
    metadata: Option<HashMap<String, String>>,
    content_disposition: Option<String>,
    parts: Vec<CompletedPart>,
    buffers: HashMap<i32, Vec<u8>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<String, Entry>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    next_upload_id: Mutex<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Test-only hook to backdate a key's `last_modified`, used to exercise
    /// stale-lock reclaim (§8 scenario 7).
    pub fn backdate(&self, key: &str, age: chrono::Duration) {
        if let Some(entry) = self.objects.lock().unwrap().get_mut(key) {
            entry.last_modified = Utc::now() - age;
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let objects = self.objects.lock().unwrap();
        let mut out: Vec<ObjectMeta> = objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectMeta {
                key: k.clone(),
                last_modified: v.last_modified,
            })
            .collect();
        out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(out)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|e| e.body.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))
    }

    async fn get_to_file(&self, key: &str, dest: &std::path::Path) -> Result<(), StoreError> {
        let body = self.get(key).await?;
        std::fs::write(dest, body).map_err(|e| StoreError::Other(e.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        mode: PutMode,
        _metadata: Option<HashMap<String, String>>,
        _content_disposition: Option<String>,
    ) -> Result<(), StoreError> {
        let mut objects = self.objects.lock().unwrap();
        if mode == PutMode::CreateOnly && objects.contains_key(key) {
            return Err(StoreError::PreconditionFailed(key.to_owned()));
        }
        objects.insert(
            key.to_owned(),
            Entry {
                body,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn put_file(
        &self,
        key: &str,
        path: &std::path::Path,
        metadata: Option<HashMap<String, String>>,
        content_disposition: Option<String>,
    ) -> Result<(), StoreError> {
        let body = std::fs::read(path).map_err(|e| StoreError::Other(e.to_string()))?;
        self.put(key, body, PutMode::Overwrite, metadata, content_disposition)
            .await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        Ok(self.objects.lock().unwrap().get(key).map(|e| ObjectMeta {
            key: key.to_owned(),
            last_modified: e.last_modified,
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn create_multipart(
        &self,
        key: &str,
        metadata: Option<HashMap<String, String>>,
        content_disposition: Option<String>,
    ) -> Result<String, StoreError> {
        let mut next_id = self.next_upload_id.lock().unwrap();
        *next_id += 1;
        let upload_id = format!("upload-{next_id}");
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_owned(),
                metadata,
                content_disposition,
                parts: Vec::new(),
                buffers: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, StoreError> {
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::Other(format!("unknown upload {upload_id}")))?;
        let e_tag = format!("etag-{part_number}-{}", body.len());
        upload.buffers.insert(part_number, body);
        let part = CompletedPart {
            part_number,
            e_tag,
        };
        upload.parts.push(part.clone());
        Ok(part)
    }

    async fn complete_multipart(
        &self,
        _key: &str,
        upload_id: &str,
        mut parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .remove(upload_id)
            .ok_or_else(|| StoreError::Other(format!("unknown upload {upload_id}")))?;
        parts.sort_by_key(|p| p.part_number);
        let mut body = Vec::new();
        for part in &parts {
            let chunk = upload
                .buffers
                .get(&part.part_number)
                .ok_or_else(|| StoreError::Other("missing buffered part".into()))?;
            body.extend_from_slice(chunk);
        }
        drop(uploads);
        self.put(
            &upload.key,
            body,
            PutMode::Overwrite,
            upload.metadata,
            upload.content_disposition,
        )
        .await
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(())
    }
}
