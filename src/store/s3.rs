//! S3-backed [`ObjectStore`] implementation, built from the process's
//! standard AWS credential chain with an optional named profile and an
//! optional endpoint override (`S3_ENDPOINT_URL`) for S3-compatible stores
//! used in tests — the same `aws-config` + `aws-sdk-s3` stack used by the
//! Rust port of this tool referenced in the example pack.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as SdkCompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use log::debug;

use super::{CompletedPart, ObjectMeta, ObjectStore, PutMode, StoreError};

pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Builds a client from the standard credential chain, optionally
    /// scoped to a named profile, and validates that `bucket` is reachable.
    pub async fn connect(bucket: &str, profile: Option<&str>) -> Result<Self, StoreError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(profile) = profile {
            loader = loader.profile_name(profile);
        }
        let shared_config = loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Ok(endpoint) = std::env::var("S3_ENDPOINT_URL") {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());
        let store = Self {
            client,
            bucket: bucket.to_owned(),
        };
        // Cheap existence probe, mirroring the constructor-time check the
        // Python source performs before entering the command loop.
        store.list("").await?;
        Ok(store)
    }

    fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
        DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_else(Utc::now)
    }
}

fn classify<E: ProvideErrorMetadata>(err: &E, bucket: &str, action: &str) -> StoreError {
    match err.code() {
        Some("NoSuchBucket") => StoreError::BucketNotFound(bucket.to_owned()),
        Some("AccessDenied") => StoreError::NotAuthorized {
            action: action.to_owned(),
            bucket: bucket.to_owned(),
        },
        Some("PreconditionFailed") => StoreError::PreconditionFailed(action.to_owned()),
        Some(code) => StoreError::Other(format!("{code}: {}", err.message().unwrap_or_default())),
        None => StoreError::Other(err.message().unwrap_or_default().to_owned()),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let mut out = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation_token {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| classify(&e.into_service_error(), &self.bucket, "ListObjectsV2"))?;

            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    let last_modified = obj
                        .last_modified()
                        .map(Self::to_chrono)
                        .unwrap_or_else(Utc::now);
                    out.push(ObjectMeta {
                        key: key.to_owned(),
                        last_modified,
                    });
                }
            }

            continuation_token = resp.next_continuation_token().map(str::to_owned);
            if continuation_token.is_none() {
                break;
            }
        }
        out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(out)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(&e.into_service_error(), &self.bucket, "GetObject"))?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        let body = self.get(key).await?;
        tokio::fs::write(dest, body)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        mode: PutMode,
        metadata: Option<HashMap<String, String>>,
        content_disposition: Option<String>,
    ) -> Result<(), StoreError> {
        let mut req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body));
        if mode == PutMode::CreateOnly {
            req = req.if_none_match("*");
        }
        if let Some(metadata) = metadata {
            for (k, v) in metadata {
                req = req.metadata(k, v);
            }
        }
        if let Some(cd) = content_disposition {
            req = req.content_disposition(cd);
        }
        req.send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e.into_service_error(), &self.bucket, "PutObject"))
    }

    async fn put_file(
        &self,
        key: &str,
        path: &Path,
        metadata: Option<HashMap<String, String>>,
        content_disposition: Option<String>,
    ) -> Result<(), StoreError> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Other(e.to_string()))?;
        self.put(key, body, PutMode::Overwrite, metadata, content_disposition)
            .await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => Ok(Some(ObjectMeta {
                key: key.to_owned(),
                last_modified: resp
                    .last_modified()
                    .map(Self::to_chrono)
                    .unwrap_or_else(Utc::now),
            })),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(None)
                } else {
                    Err(classify(&service_err, &self.bucket, "HeadObject"))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e.into_service_error(), &self.bucket, "DeleteObject"))
    }

    async fn create_multipart(
        &self,
        key: &str,
        metadata: Option<HashMap<String, String>>,
        content_disposition: Option<String>,
    ) -> Result<String, StoreError> {
        let mut req = self.client.create_multipart_upload().bucket(&self.bucket).key(key);
        if let Some(metadata) = metadata {
            for (k, v) in metadata {
                req = req.metadata(k, v);
            }
        }
        if let Some(cd) = content_disposition {
            req = req.content_disposition(cd);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| classify(&e.into_service_error(), &self.bucket, "CreateMultipartUpload"))?;
        resp.upload_id()
            .map(str::to_owned)
            .ok_or_else(|| StoreError::Other("multipart upload returned no upload id".into()))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, StoreError> {
        debug!("uploading part {part_number} ({} bytes) for {key}", body.len());
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify(&e.into_service_error(), &self.bucket, "UploadPart"))?;
        Ok(CompletedPart {
            part_number,
            e_tag: resp.e_tag().unwrap_or_default().to_owned(),
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StoreError> {
        let completed_parts: Vec<_> = parts
            .into_iter()
            .map(|p| {
                SdkCompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.e_tag)
                    .build()
            })
            .collect();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e.into_service_error(), &self.bucket, "CompleteMultipartUpload"))
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e.into_service_error(), &self.bucket, "AbortMultipartUpload"))
    }
}
