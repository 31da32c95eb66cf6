//! Size-threshold uploader: small files go through a single `put`; files
//! over the threshold are streamed in fixed-size parts via the store's
//! multipart primitives, aborting cleanly on any failure.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::defaults;
use crate::store::{ObjectStore, PutMode};

/// Invoked after each chunk (single-put or multipart part) is acknowledged
/// by the store; used by the LFS agent to emit `progress` events.
pub trait ProgressSink: Send + Sync {
    fn on_chunk(&self, bytes_so_far: u64, bytes_since_last: u64);
}

/// A no-op sink for callers (the ref engine) that don't report progress.
pub struct NoProgress;
impl ProgressSink for NoProgress {
    fn on_chunk(&self, _bytes_so_far: u64, _bytes_since_last: u64) {}
}

/// Uploads `path` to `key`, choosing single-put vs multipart based on file
/// size against [`defaults::multipart_threshold_bytes`].
pub async fn upload_file(
    store: &dyn ObjectStore,
    path: &Path,
    key: &str,
    metadata: Option<HashMap<String, String>>,
    content_disposition: Option<String>,
    progress: Arc<dyn ProgressSink>,
) -> Result<()> {
    let size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("stat {}", path.display()))?
        .len();

    if size <= defaults::multipart_threshold_bytes() {
        info!("single-put upload of {} ({size} bytes) to {key}", path.display());
        store
            .put_file(key, path, metadata, content_disposition)
            .await
            .with_context(|| format!("put_object {key}"))?;
        progress.on_chunk(size, size);
        return Ok(());
    }

    info!(
        "multipart upload of {} ({size} bytes, threshold {} bytes) to {key}",
        path.display(),
        defaults::multipart_threshold_bytes()
    );

    let upload_id = store
        .create_multipart(key, metadata, content_disposition)
        .await
        .with_context(|| format!("create_multipart_upload {key}"))?;

    match stream_parts(store, path, key, &upload_id, progress).await {
        Ok(parts) => store
            .complete_multipart(key, &upload_id, parts)
            .await
            .with_context(|| format!("complete_multipart_upload {key}")),
        Err(e) => {
            // On any failure the partial object must not linger.
            let _ = store.abort_multipart(key, &upload_id).await;
            Err(e)
        }
    }
}

async fn stream_parts(
    store: &dyn ObjectStore,
    path: &Path,
    key: &str,
    upload_id: &str,
    progress: Arc<dyn ProgressSink>,
) -> Result<Vec<crate::store::CompletedPart>> {
    use tokio::io::AsyncReadExt;

    let part_size = defaults::multipart_part_size_bytes() as usize;
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("open {}", path.display()))?;

    let mut parts = Vec::new();
    let mut part_number = 1i32;
    let mut bytes_so_far = 0u64;

    loop {
        let mut buf = vec![0u8; part_size];
        let mut filled = 0usize;
        while filled < part_size {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        buf.truncate(filled);

        let part = store
            .upload_part(key, upload_id, part_number, buf)
            .await
            .with_context(|| format!("upload_part {part_number} for {key}"))?;

        bytes_so_far += filled as u64;
        progress.on_chunk(bytes_so_far, filled as u64);
        parts.push(part);
        part_number += 1;

        if filled < part_size {
            break;
        }
    }

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSink {
        calls: AtomicU64,
    }
    impl ProgressSink for CountingSink {
        fn on_chunk(&self, _bytes_so_far: u64, _bytes_since_last: u64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_small_file_uses_single_put() {
        let store = InMemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle");
        std::fs::write(&path, b"small payload").unwrap();

        upload_file(&store, &path, "k", None, None, Arc::new(NoProgress)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"small payload");
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_large_file_streams_multiple_parts() {
        std::env::set_var("GIT_REMOTE_S3_MULTIPART_THRESHOLD_BYTES", "10");
        std::env::set_var("GIT_REMOTE_S3_MULTIPART_PART_SIZE_BYTES", "4");

        let store = InMemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"0123456789abcdef").unwrap();
        drop(f);

        let sink = Arc::new(CountingSink {
            calls: AtomicU64::new(0),
        });
        upload_file(&store, &path, "big-key", None, None, sink.clone())
            .await
            .unwrap();

        assert_eq!(store.get("big-key").await.unwrap(), b"0123456789abcdef");
        assert!(sink.calls.load(Ordering::SeqCst) >= 4);

        std::env::remove_var("GIT_REMOTE_S3_MULTIPART_THRESHOLD_BYTES");
        std::env::remove_var("GIT_REMOTE_S3_MULTIPART_PART_SIZE_BYTES");
    }
}
