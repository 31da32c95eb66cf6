//! The `git-lfs-s3` custom transfer agent: a standalone JSON-event loop that
//! reuses the ref engine's multipart uploader and the [`ObjectStore`] facade
//! to stream LFS objects in and out of `<prefix>/lfs/<oid>`.
//!
//! Unlike the remote helper's line protocol, this agent speaks one JSON
//! object per line in both directions, as specified by git-lfs's custom
//! transfer agent contract.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, error};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::git;
use crate::multipart::{self, ProgressSink};
use crate::store::ObjectStore;
use crate::url::{self, Remote};

#[derive(Debug, Error)]
pub enum LfsAgentError {
    #[error("invalid ref {0}")]
    InvalidRemoteName(String),
    #[error("cannot resolve remote \"{0}\"")]
    RemoteNotResolvable(String),
    #[error("s3 uri {0} is invalid")]
    InvalidS3Uri(String),
    #[error("{0}")]
    Store(#[from] crate::store::StoreError),
    #[error("{0}")]
    Upload(anyhow::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// One incoming line of the git-lfs custom-transfer protocol.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum IncomingEvent {
    Init {
        remote: String,
    },
    Upload {
        oid: String,
        path: String,
    },
    Download {
        oid: String,
    },
    Terminate,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: i32,
    message: String,
}

#[derive(Debug, Serialize)]
struct CompleteEvent {
    event: &'static str,
    oid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Serialize)]
struct ProgressEvent {
    event: &'static str,
    oid: String,
    #[serde(rename = "bytesSoFar")]
    bytes_so_far: u64,
    #[serde(rename = "bytesSinceLast")]
    bytes_since_last: u64,
}

#[derive(Debug, Serialize)]
struct InitErrorEvent {
    error: ErrorDetail,
}

/// Atomic, mutex-guarded JSON-lines writer shared by the completion path and
/// the progress callbacks invoked from inside the uploader.
pub struct EventWriter<W: Write + Send + 'static> {
    inner: Mutex<W>,
}

impl<W: Write + Send + 'static> EventWriter<W> {
    pub fn new(inner: W) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(inner),
        })
    }

    fn write_json<T: Serialize>(&self, value: &T) {
        let line = match serde_json::to_string(value) {
            Ok(line) => line,
            Err(e) => {
                error!("failed to serialize lfs event: {e}");
                return;
            }
        };
        let mut w = self.inner.lock().unwrap();
        let _ = writeln!(w, "{line}");
        let _ = w.flush();
    }
}

struct ProgressReporter<W: Write + Send + 'static> {
    oid: String,
    writer: Arc<EventWriter<W>>,
}

impl<W: Write + Send + 'static> ProgressSink for ProgressReporter<W> {
    fn on_chunk(&self, bytes_so_far: u64, bytes_since_last: u64) {
        self.writer.write_json(&ProgressEvent {
            event: "progress",
            oid: self.oid.clone(),
            bytes_so_far,
            bytes_since_last,
        });
    }
}

/// Resolves the s3 URI backing `remote_name`'s LFS storage: `.lfsconfig`
/// takes precedence over `remote.<remote>.lfsurl` in the repository config.
pub fn resolve_lfs_url(remote_name: &str) -> Option<String> {
    let key = format!("remote.{remote_name}.lfsurl");
    git::get_lfsconfig(&key).or_else(|| git::get_config(&key))
}

/// Live state the agent accumulates after a successful `init` event: the
/// parsed remote and a connected store, after which `upload`/`download`
/// events can be served.
struct Session {
    remote: Remote,
    store: Box<dyn ObjectStore>,
}

fn lfs_key(prefix: &str, oid: &str) -> String {
    format!("{prefix}/lfs/{oid}")
}

/// Handles one `upload {oid, path}` event: skips the transfer entirely if
/// the object already exists under `<prefix>/lfs/<oid>` (content-addressed
/// dedup), otherwise streams it through the shared multipart uploader.
pub async fn handle_upload<W: Write + Send + 'static>(
    store: &dyn ObjectStore,
    prefix: &str,
    oid: &str,
    path: &Path,
    writer: Arc<EventWriter<W>>,
) {
    let key = lfs_key(prefix, oid);

    let result = async {
        if store.head(&key).await?.is_some() {
            debug!("lfs object {oid} already present, skipping upload");
            return Ok(());
        }
        let sink = Arc::new(ProgressReporter {
            oid: oid.to_owned(),
            writer: writer.clone(),
        });
        multipart::upload_file(store, path, &key, None, None, sink)
            .await
            .map_err(LfsAgentError::Upload)
    }
    .await;

    match result {
        Ok(()) => writer.write_json(&CompleteEvent {
            event: "complete",
            oid: oid.to_owned(),
            path: None,
            error: None,
        }),
        Err(e) => {
            error!("lfs upload of {oid} failed: {e}");
            writer.write_json(&CompleteEvent {
                event: "complete",
                oid: oid.to_owned(),
                path: None,
                error: Some(ErrorDetail {
                    code: 2,
                    message: e.to_string(),
                }),
            });
        }
    }
}

/// Handles one `download {oid}` event: fetches `<prefix>/lfs/<oid>` into
/// `.git/lfs/tmp/<oid>` and reports its local path on completion.
pub async fn handle_download<W: Write + Send + 'static>(
    store: &dyn ObjectStore,
    prefix: &str,
    oid: &str,
    tmp_dir: &Path,
    writer: Arc<EventWriter<W>>,
) {
    let key = lfs_key(prefix, oid);
    let dest = tmp_dir.join(oid);

    let result: Result<(), LfsAgentError> = async {
        tokio::fs::create_dir_all(tmp_dir).await?;
        store.get_to_file(&key, &dest).await?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => writer.write_json(&CompleteEvent {
            event: "complete",
            oid: oid.to_owned(),
            path: Some(dest.to_string_lossy().into_owned()),
            error: None,
        }),
        Err(e) => {
            error!("lfs download of {oid} failed: {e}");
            writer.write_json(&CompleteEvent {
                event: "complete",
                oid: oid.to_owned(),
                path: None,
                error: Some(ErrorDetail {
                    code: 2,
                    message: e.to_string(),
                }),
            });
        }
    }
}

/// Resolves and parses the remote URL for an `init` event, without yet
/// connecting to the store, so this step can be unit-tested independently
/// of network access.
fn resolve_init(remote_name: &str) -> Result<Remote, LfsAgentError> {
    if !git::validate_ref_name(remote_name) {
        return Err(LfsAgentError::InvalidRemoteName(remote_name.to_owned()));
    }
    let s3_uri = resolve_lfs_url(remote_name)
        .ok_or_else(|| LfsAgentError::RemoteNotResolvable(remote_name.to_owned()))?;
    url::parse_remote_url(&s3_uri).map_err(|_| LfsAgentError::InvalidS3Uri(s3_uri))
}

/// Connects a [`Session`] for `remote_name`, writing `{}` on success or an
/// `init`-shaped error object on failure. Returns `None` when the agent
/// should exit after this event, matching the source's fail-fast init path.
async fn handle_init<W: Write + Send + 'static>(
    remote_name: &str,
    writer: &EventWriter<W>,
) -> Option<Session> {
    let remote = match resolve_init(remote_name) {
        Ok(remote) => remote,
        Err(e) => {
            error!("lfs init failed: {e}");
            writer.write_json(&InitErrorEvent {
                error: ErrorDetail {
                    code: 32,
                    message: e.to_string(),
                },
            });
            return None;
        }
    };

    match crate::store::s3::S3Store::connect(&remote.bucket, remote.profile.as_deref()).await {
        Ok(store) => {
            writer.write_json(&serde_json::json!({}));
            Some(Session {
                remote,
                store: Box::new(store),
            })
        }
        Err(e) => {
            error!("lfs init failed to connect to bucket {}: {e}", remote.bucket);
            writer.write_json(&InitErrorEvent {
                error: ErrorDetail {
                    code: 2,
                    message: e.to_string(),
                },
            });
            None
        }
    }
}

/// Runs the event loop to completion, reading one JSON object per line from
/// `input` until EOF or a `terminate` event, dispatching to
/// [`handle_upload`]/[`handle_download`] once `init` has produced a session.
pub async fn run<R, W>(mut input: R, output: W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: Write + Send + 'static,
{
    let writer = EventWriter::new(output);
    let mut reader = BufReader::new(&mut input);
    let mut session: Option<Session> = None;
    let tmp_dir = PathBuf::from(".git/lfs/tmp");

    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event: IncomingEvent = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(e) => {
                error!("failed to parse lfs event '{trimmed}': {e}");
                continue;
            }
        };

        match event {
            IncomingEvent::Init { remote } => {
                session = handle_init(&remote, &writer).await;
                if session.is_none() {
                    break;
                }
            }
            IncomingEvent::Upload { oid, path } => {
                let Some(s) = &session else {
                    error!("upload event before init");
                    continue;
                };
                handle_upload(s.store.as_ref(), &s.remote.prefix, &oid, Path::new(&path), writer.clone())
                    .await;
            }
            IncomingEvent::Download { oid } => {
                let Some(s) = &session else {
                    error!("download event before init");
                    continue;
                };
                handle_download(s.store.as_ref(), &s.remote.prefix, &oid, &tmp_dir, writer.clone())
                    .await;
            }
            IncomingEvent::Terminate => break,
        }
    }

    Ok(())
}

/// Registers the agent in the repository's git config, run from the
/// `install` subcommand.
pub fn install() -> Result<(), git::GitError> {
    git::config_add("lfs.customtransfer.git-lfs-s3.path", "git-lfs-s3")?;
    git::config_add("lfs.standalonetransferagent", "git-lfs-s3")?;
    Ok(())
}

/// Adds the `debug` argument to the registered custom transfer, run from
/// the `enable-debug` subcommand.
pub fn enable_debug() -> Result<(), git::GitError> {
    git::config_add("lfs.customtransfer.git-lfs-s3.args", "debug")
}

/// Removes the `debug` argument, run from the `disable-debug` subcommand.
pub fn disable_debug() -> Result<(), git::GitError> {
    git::config_unset("lfs.customtransfer.git-lfs-s3.args")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::env::set_current_dir;
    use std::process::{self, Stdio};

    fn run_git_command(args: &[&str], dir: &std::path::Path) {
        assert!(process::Command::new("git")
            .args(args)
            .envs([
                ("GIT_CONFIG_NOSYSTEM", "true"),
                ("GIT_CONFIG_GLOBAL", "/dev/null"),
                ("GIT_AUTHOR_NAME", "testuser"),
                ("GIT_AUTHOR_EMAIL", "testuser@example.com"),
                ("GIT_COMMITTER_NAME", "testuser"),
                ("GIT_COMMITTER_EMAIL", "testuser@example.com"),
            ])
            .current_dir(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .expect("failed to spawn git command")
            .success());
    }

    #[test]
    fn test_resolve_init_rejects_invalid_remote_name() {
        let err = resolve_init("../etc/passwd").unwrap_err();
        assert!(matches!(err, LfsAgentError::InvalidRemoteName(_)));
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_init_prefers_lfsconfig_over_git_config() {
        let repo = tempfile::tempdir().unwrap();
        run_git_command(&["init", "--initial-branch", "main"], repo.path());
        set_current_dir(repo.path()).unwrap();

        git::config_add("remote.origin.lfsurl", "s3://from-git-config/prefix").unwrap();
        std::fs::write(
            repo.path().join(".lfsconfig"),
            "[remote \"origin\"]\n\tlfsurl = s3://from-lfsconfig/prefix\n",
        )
        .unwrap();

        let remote = resolve_init("origin").unwrap();
        assert_eq!(remote.bucket, "from-lfsconfig");
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_init_falls_back_to_git_config() {
        let repo = tempfile::tempdir().unwrap();
        run_git_command(&["init", "--initial-branch", "main"], repo.path());
        set_current_dir(repo.path()).unwrap();

        git::config_add("remote.origin.lfsurl", "s3://from-git-config/prefix").unwrap();

        let remote = resolve_init("origin").unwrap();
        assert_eq!(remote.bucket, "from-git-config");
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_init_errors_when_unresolvable() {
        let repo = tempfile::tempdir().unwrap();
        run_git_command(&["init", "--initial-branch", "main"], repo.path());
        set_current_dir(repo.path()).unwrap();

        let err = resolve_init("origin").unwrap_err();
        assert!(matches!(err, LfsAgentError::RemoteNotResolvable(_)));
    }

    #[tokio::test]
    async fn test_upload_skips_when_object_already_present() {
        let store = InMemoryStore::new();
        store
            .put(
                "prefix/lfs/deadbeef",
                Vec::new(),
                crate::store::PutMode::Overwrite,
                None,
                None,
            )
            .await
            .unwrap();

        let out = Vec::new();
        let writer = EventWriter::new(out);
        handle_upload(&store, "prefix", "deadbeef", Path::new("/does/not/exist"), writer.clone())
            .await;
    }

    #[tokio::test]
    async fn test_upload_then_complete_event_is_written() {
        let store = InMemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"payload").unwrap();

        let out: Vec<u8> = Vec::new();
        let writer = EventWriter::new(out);
        handle_upload(&store, "prefix", "oid1", &path, writer.clone()).await;

        assert!(store.contains("prefix/lfs/oid1"));
    }

    #[tokio::test]
    async fn test_download_writes_file_and_reports_path() {
        let store = InMemoryStore::new();
        store
            .put(
                "prefix/lfs/oid2",
                b"content".to_vec(),
                crate::store::PutMode::Overwrite,
                None,
                None,
            )
            .await
            .unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let writer = EventWriter::new(Vec::<u8>::new());
        handle_download(&store, "prefix", "oid2", tmp.path(), writer).await;

        assert_eq!(std::fs::read(tmp.path().join("oid2")).unwrap(), b"content");
    }

    #[tokio::test]
    async fn test_run_loop_exits_cleanly_on_terminate() {
        let input = "{\"event\":\"terminate\"}\n".as_bytes();
        let out: Vec<u8> = Vec::new();
        run(input, out).await.unwrap();
    }
}
