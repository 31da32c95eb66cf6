//! Centralized default values for git-remote-s3's operational knobs.
//!
//! These are used as fallback values whenever the corresponding environment
//! variable (see `env_overrides`) is unset, so the defaults documented here
//! and the behaviour of an unconfigured install always agree.

/// Advisory lock TTL in seconds. A `LOCK#.lock` object older than this is
/// considered abandoned by a crashed holder and may be reclaimed.
pub const DEFAULT_LOCK_TTL_SECS: u64 = 60;

/// Maximum number of lock-acquisition attempts before giving up.
pub const DEFAULT_LOCK_MAX_ATTEMPTS: u32 = 5;

/// Initial backoff delay before the first retry of a contended lock acquire.
pub const DEFAULT_LOCK_INITIAL_BACKOFF_MS: u64 = 200;

/// Files at or below this size are uploaded with a single `put_object` call.
pub fn default_multipart_threshold_bytes() -> u64 {
    bytesize::ByteSize::gib(2).as_u64()
}

/// Size of each part streamed during a multipart upload.
pub fn default_multipart_part_size_bytes() -> u64 {
    bytesize::ByteSize::mib(100).as_u64()
}

/// Returns the lock TTL, honoring `GIT_REMOTE_S3_LOCK_TTL_SECS`.
pub fn lock_ttl_secs() -> u64 {
    env_u64("GIT_REMOTE_S3_LOCK_TTL_SECS", DEFAULT_LOCK_TTL_SECS)
}

/// Returns the bounded retry count, honoring `GIT_REMOTE_S3_LOCK_MAX_ATTEMPTS`.
pub fn lock_max_attempts() -> u32 {
    env_u64("GIT_REMOTE_S3_LOCK_MAX_ATTEMPTS", DEFAULT_LOCK_MAX_ATTEMPTS as u64) as u32
}

/// Returns the initial backoff delay, honoring `GIT_REMOTE_S3_LOCK_INITIAL_BACKOFF_MS`.
pub fn lock_initial_backoff_ms() -> u64 {
    env_u64(
        "GIT_REMOTE_S3_LOCK_INITIAL_BACKOFF_MS",
        DEFAULT_LOCK_INITIAL_BACKOFF_MS,
    )
}

/// Returns the multipart threshold, honoring `GIT_REMOTE_S3_MULTIPART_THRESHOLD_BYTES`.
pub fn multipart_threshold_bytes() -> u64 {
    env_u64(
        "GIT_REMOTE_S3_MULTIPART_THRESHOLD_BYTES",
        default_multipart_threshold_bytes(),
    )
}

/// Returns the multipart part size, honoring `GIT_REMOTE_S3_MULTIPART_PART_SIZE_BYTES`.
pub fn multipart_part_size_bytes() -> u64 {
    env_u64(
        "GIT_REMOTE_S3_MULTIPART_PART_SIZE_BYTES",
        default_multipart_part_size_bytes(),
    )
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lock_ttl() {
        assert_eq!(DEFAULT_LOCK_TTL_SECS, 60);
    }

    #[test]
    fn test_default_multipart_threshold() {
        assert_eq!(default_multipart_threshold_bytes(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_env_u64_falls_back_on_missing() {
        assert_eq!(env_u64("GIT_REMOTE_S3_DOES_NOT_EXIST", 42), 42);
    }
}
