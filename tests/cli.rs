//! End-to-end tests against the built `git-remote-s3` binary, exercising the
//! process boundary (argv parsing, stdin/stdout framing, exit codes) the way
//! `git` itself drives the remote helper — rather than calling `protocol::run`
//! in-process as the unit tests in `src/protocol.rs` do.

use assert_cmd::Command;

#[test]
fn test_invalid_remote_url_is_fatal() {
    Command::cargo_bin("git-remote-s3")
        .unwrap()
        .args(["origin", "ftp://not-an-s3-url/prefix"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("fatal:"));
}

#[test]
fn test_missing_bucket_or_prefix_is_fatal() {
    Command::cargo_bin("git-remote-s3")
        .unwrap()
        .args(["origin", "s3://bucket-with-no-prefix"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("fatal:"));
}

#[test]
fn test_lfs_agent_install_writes_config() {
    let repo = tempfile::tempdir().unwrap();
    std::process::Command::new("git")
        .args(["init", "--initial-branch", "main"])
        .env("GIT_CONFIG_NOSYSTEM", "true")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .current_dir(repo.path())
        .status()
        .unwrap();

    Command::cargo_bin("git-lfs-s3")
        .unwrap()
        .arg("install")
        .current_dir(repo.path())
        .assert()
        .success();

    let config = std::fs::read_to_string(repo.path().join(".git/config")).unwrap();
    assert!(config.contains("git-lfs-s3"));
    assert!(config.contains("standalonetransferagent"));
}
