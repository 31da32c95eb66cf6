//! Per-ref push logic: bundle, ancestor check, atomic replace of a previous
//! bundle, optional archive upload, HEAD init, ref deletion.
//!
//! One [`push`] call handles exactly one `push <local>:<remote>` command; the
//! command loop is responsible for sequencing calls across a flush and for
//! formatting the `ok`/`error` response line from the returned [`Result`].

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::git;
use crate::lock;
use crate::multipart::{self, NoProgress};
use crate::store::ObjectStore;
use crate::url::{Remote, UriScheme};

const PROTECTED_MARKER: &str = "PROTECTED#";
const LOCK_SUFFIX: &str = "LOCK#.lock";

/// One of these maps to a single `error <remote> ...` wire reply; see
/// [`crate::protocol`]'s flush-push formatting, which wraps every variant
/// except [`PushError::DeleteTargetNotFound`] in a quoted, `?`-suffixed
/// message.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("{0} not found")]
    LocalRefNotFound(String),
    /// Unlike every other variant, the wire reply for this one is the bare,
    /// unquoted `error <remote> not found` (§4.2 step 1) — it carries no
    /// message of its own to quote.
    #[error("not found")]
    DeleteTargetNotFound,
    #[error("multiple bundles exists on server. Run git-s3 doctor to fix.")]
    MultipleBundles,
    #[error("remote ref is not ancestor of {0}.")]
    NotFastForward(String),
    #[error("{0}")]
    Store(#[from] crate::store::StoreError),
    #[error("{0}")]
    Git(#[from] git::GitError),
    #[error("{0}")]
    Lock(anyhow::Error),
    #[error("{0}")]
    Upload(anyhow::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// One ref entry currently present under `<prefix>/<remote_ref>/`.
struct RemoteState {
    bundle: Option<(String, String)>, // (key, sha)
    zip_key: Option<String>,
    protected: bool,
}

fn bundle_sha_regex() -> Regex {
    Regex::new(r"^(?:.*/)?([a-f0-9]{40})\.bundle$").expect("static regex is valid")
}

async fn inspect_remote(
    store: &dyn ObjectStore,
    prefix: &str,
    remote_ref: &str,
) -> Result<RemoteState, PushError> {
    let list_prefix = format!("{prefix}/{remote_ref}/");
    let objects = store.list(&list_prefix).await?;
    let sha_re = bundle_sha_regex();

    let mut bundles = Vec::new();
    let mut zip_key = None;
    let mut protected = false;

    for obj in &objects {
        if obj.key.ends_with(PROTECTED_MARKER) {
            protected = true;
            continue;
        }
        if obj.key.ends_with(LOCK_SUFFIX) {
            continue;
        }
        if obj.key.ends_with("repo.zip") {
            zip_key = Some(obj.key.clone());
            continue;
        }
        if let Some(caps) = sha_re.captures(&obj.key) {
            bundles.push((obj.key.clone(), caps[1].to_owned()));
        }
    }

    if bundles.len() > 1 {
        return Err(PushError::MultipleBundles);
    }

    Ok(RemoteState {
        bundle: bundles.into_iter().next(),
        zip_key,
        protected,
    })
}

/// Handles `push :<remote_ref>` (delete). For `S3+ZIP` remotes, a ref is
/// only considered present when both the bundle *and* `repo.zip` exist
/// (§4.2 step 1); a bundle with no archive is treated as not found.
async fn delete(store: &dyn ObjectStore, remote: &Remote, remote_ref: &str) -> Result<(), PushError> {
    let state = inspect_remote(store, &remote.prefix, remote_ref).await?;
    let Some((bundle_key, _)) = state.bundle else {
        return Err(PushError::DeleteTargetNotFound);
    };
    if remote.uri_scheme() == UriScheme::S3Zip && state.zip_key.is_none() {
        return Err(PushError::DeleteTargetNotFound);
    }
    store.delete(&bundle_key).await?;
    if let Some(zip_key) = state.zip_key {
        store.delete(&zip_key).await?;
    }
    Ok(())
}

/// Handles one non-delete `push [+]<local>:<remote_ref>`.
async fn push_update(
    store: &dyn ObjectStore,
    remote: &Remote,
    local_ref: &str,
    force: bool,
    remote_ref: &str,
) -> Result<(), PushError> {
    let state = inspect_remote(store, &remote.prefix, remote_ref).await?;
    let force = force && !state.protected;

    let local_sha = git::rev_parse(local_ref)
        .map_err(|_| PushError::LocalRefNotFound(local_ref.to_owned()))?;

    if let Some((_, remote_sha)) = &state.bundle {
        if !force && !git::is_ancestor(remote_sha, &local_sha)? {
            return Err(PushError::NotFastForward(local_ref.to_owned()));
        }
    }

    let tmp = tempfile::tempdir()?;
    let bundle_path = git::bundle(tmp.path(), &local_sha, local_ref)?;
    let bundle_key = format!("{}/{remote_ref}/{local_sha}.bundle", remote.prefix);

    multipart::upload_file(store, &bundle_path, &bundle_key, None, None, Arc::new(NoProgress))
        .await
        .map_err(PushError::Upload)?;

    let head_key = format!("{}/HEAD", remote.prefix);
    if store.head(&head_key).await?.is_none() {
        store
            .put(
                &head_key,
                remote_ref.as_bytes().to_vec(),
                crate::store::PutMode::Overwrite,
                None,
                None,
            )
            .await?;
    }

    if let Some((old_key, old_sha)) = &state.bundle {
        if old_sha != &local_sha {
            store.delete(old_key).await?;
        }
    }

    if remote.uri_scheme() == UriScheme::S3Zip {
        let zip_path = git::archive(tmp.path(), local_ref)?;
        let zip_key = format!("{}/{remote_ref}/repo.zip", remote.prefix);
        let commit_message = git::get_last_commit_message().unwrap_or_default();
        let mut metadata = HashMap::new();
        metadata.insert("codepipeline-artifact-revision-summary".to_owned(), commit_message);
        let content_disposition =
            format!("attachment; filename=repo-{}.zip", &local_sha[..8]);

        multipart::upload_file(
            store,
            &zip_path,
            &zip_key,
            Some(metadata),
            Some(content_disposition),
            Arc::new(NoProgress),
        )
        .await
        .map_err(PushError::Upload)?;
    }

    Ok(())
}

/// One push command as parsed from the wire: `push <local>:<remote>`,
/// `push +<local>:<remote>`, or `push :<remote>` (delete).
pub struct PushRequest {
    pub local: Option<String>,
    pub force: bool,
    pub remote: String,
}

/// Performs a single queued push: acquires the per-ref lock, runs the
/// update/delete logic, and releases the lock regardless of outcome.
pub async fn push(
    store: &dyn ObjectStore,
    remote: &Remote,
    request: &PushRequest,
) -> Result<(), PushError> {
    let held = lock::acquire(store, &remote.prefix, &request.remote)
        .await
        .map_err(PushError::Lock)?;

    let result = match &request.local {
        None => delete(store, remote, &request.remote).await,
        Some(local) => push_update(store, remote, local, request.force, &request.remote).await,
    };

    lock::release(store, &held).await;
    result
}
