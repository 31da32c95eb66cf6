//! Parsing of `s3://` and `s3+zip://` remote URLs into a [`Remote`] descriptor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteUrlError {
    #[error("invalid remote '{0}'. You need to have a bucket and a prefix.")]
    MissingBucketOrPrefix(String),
    #[error("invalid remote '{0}'. Unsupported scheme; expected s3:// or s3+zip://.")]
    UnsupportedScheme(String),
}

/// Which auxiliary artifacts a push produces alongside the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriScheme {
    /// Only the bundle is uploaded.
    S3,
    /// The bundle plus a `repo.zip` source archive are uploaded.
    S3Zip,
}

/// An immutable handle on the bucket/prefix this process was invoked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub scheme: RemoteScheme,
    pub profile: Option<String>,
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteScheme {
    S3,
    S3Zip,
}

impl Remote {
    pub fn uri_scheme(&self) -> UriScheme {
        match self.scheme {
            RemoteScheme::S3 => UriScheme::S3,
            RemoteScheme::S3Zip => UriScheme::S3Zip,
        }
    }
}

/// Parses `s3://[<profile>@]<bucket>/<prefix>` or `s3+zip://...`.
///
/// Invariant: on success, `bucket` and `prefix` are both non-empty.
pub fn parse_remote_url(url: &str) -> Result<Remote, RemoteUrlError> {
    let (scheme, rest) = if let Some(rest) = url.strip_prefix("s3+zip://") {
        (RemoteScheme::S3Zip, rest)
    } else if let Some(rest) = url.strip_prefix("s3://") {
        (RemoteScheme::S3, rest)
    } else {
        return Err(RemoteUrlError::UnsupportedScheme(url.to_owned()));
    };

    let (profile, rest) = match rest.split_once('@') {
        Some((profile, rest)) => (Some(profile.to_owned()), rest),
        None => (None, rest),
    };

    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix.trim_end_matches('/')),
        None => (rest, ""),
    };

    if bucket.is_empty() || prefix.is_empty() {
        return Err(RemoteUrlError::MissingBucketOrPrefix(url.to_owned()));
    }

    Ok(Remote {
        scheme,
        profile,
        bucket: bucket.to_owned(),
        prefix: prefix.to_owned(),
    })
}
