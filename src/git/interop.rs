use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

use super::lowlevel::{capture_git_output, git_rev_parse};
use super::types::GitError;

/// Resolves `reference` to a 40-hex commit sha.
pub fn rev_parse(reference: &str) -> Result<String, GitError> {
    git_rev_parse(reference)
}

/// True if `ancestor` is an ancestor of (or equal to) `descendant`.
pub fn is_ancestor(ancestor: &str, descendant: &str) -> Result<bool, GitError> {
    match capture_git_output(&["merge-base", "--is-ancestor", ancestor, descendant], &None) {
        Ok(_) => Ok(true),
        Err(GitError::ExecError { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Bundles the single ref `local_ref` at `sha` into `<folder>/<sha>.bundle`.
pub fn bundle(folder: &Path, sha: &str, local_ref: &str) -> Result<PathBuf, GitError> {
    let path = folder.join(format!("{sha}.bundle"));
    capture_git_output(
        &[
            "bundle",
            "create",
            path.to_str().expect("temp path is valid utf-8"),
            local_ref,
        ],
        &None,
    )?;
    Ok(path)
}

/// Unbundles a previously fetched bundle and updates the local ref.
pub fn unbundle(bundle_path: &Path, sha: &str, remote_ref: &str) -> Result<(), GitError> {
    capture_git_output(
        &[
            "bundle",
            "unbundle",
            bundle_path.to_str().expect("bundle path is valid utf-8"),
            &format!("{remote_ref}:refs/s3-fetch/{sha}"),
        ],
        &None,
    )?;
    Ok(())
}

/// Produces a zip archive of the working tree at `local_ref` in `folder`.
pub fn archive(folder: &Path, local_ref: &str) -> Result<PathBuf, GitError> {
    let path = folder.join("repo.zip");
    capture_git_output(
        &[
            "archive",
            "--format=zip",
            "-o",
            path.to_str().expect("temp path is valid utf-8"),
            local_ref,
        ],
        &None,
    )?;
    Ok(path)
}

/// Returns the subject line of the most recent commit on HEAD.
pub fn get_last_commit_message() -> Result<String, GitError> {
    Ok(capture_git_output(&["log", "-1", "--pretty=%B"], &None)?
        .stdout
        .trim()
        .to_owned())
}

/// Conservative character-class check for a ref/remote name.
///
/// Mirrors what `git check-ref-format` would reject for the components we
/// actually construct S3 keys out of: no leading dash, no whitespace, no
/// shell-metacharacters, no path traversal.
pub fn validate_ref_name(name: &str) -> bool {
    let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/\-]*$").expect("static regex is valid");
    !name.is_empty() && !name.contains("..") && re.is_match(name)
}

/// Resolves the git executable's version check; unlike git-perf we do not
/// gate on a minimum version since the remote-helper protocol used here has
/// been stable since git 2.x.
pub fn get_repository_root() -> Result<String> {
    Ok(capture_git_output(&["rev-parse", "--show-toplevel"], &None)
        .context("Determine repository root")?
        .stdout
        .trim()
        .to_owned())
}

/// Looks up `remote.<name>.lfsurl`, returning `None` if unset.
pub fn get_config(key: &str) -> Option<String> {
    capture_git_output(&["config", "--get", key], &None)
        .ok()
        .map(|o| o.stdout.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// Looks up `key` in the repository's `.lfsconfig` file specifically,
/// returning `None` if the file or the key is absent.
pub fn get_lfsconfig(key: &str) -> Option<String> {
    capture_git_output(&["config", "-f", ".lfsconfig", "--get", key], &None)
        .ok()
        .map(|o| o.stdout.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// `git config --add <key> <value>`, used by the LFS agent's `install` subcommand.
pub fn config_add(key: &str, value: &str) -> Result<(), GitError> {
    capture_git_output(&["config", "--add", key, value], &None)?;
    Ok(())
}

/// `git config --unset <key>`, used by `disable-debug`.
pub fn config_unset(key: &str) -> Result<(), GitError> {
    capture_git_output(&["config", "--unset", key], &None)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::env::set_current_dir;
    use std::process::{self, Stdio};

    use serial_test::serial;
    use tempfile::{tempdir, TempDir};

    fn run_git_command(args: &[&str], dir: &Path) {
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

    fn init_repo(dir: &Path) {
        run_git_command(&["init", "--initial-branch", "main"], dir);
        run_git_command(&["commit", "--allow-empty", "-m", "first"], dir);
    }

    fn dir_with_repo() -> TempDir {
        let tempdir = tempdir().unwrap();
        init_repo(tempdir.path());
        tempdir
    }

    #[test]
    #[serial]
    fn test_rev_parse_resolves_head() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).unwrap();
        let sha = rev_parse("HEAD").unwrap();
        assert_eq!(sha.len(), 40);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    #[serial]
    fn test_rev_parse_missing_ref_errors() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).unwrap();
        assert!(rev_parse("refs/heads/does-not-exist").is_err());
    }

    #[test]
    #[serial]
    fn test_is_ancestor_true_for_self() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).unwrap();
        let sha = rev_parse("HEAD").unwrap();
        assert!(is_ancestor(&sha, &sha).unwrap());
    }

    #[test]
    #[serial]
    fn test_is_ancestor_false_for_unrelated_history() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).unwrap();
        let first = rev_parse("HEAD").unwrap();
        run_git_command(&["commit", "--allow-empty", "-m", "second"], repo_dir.path());
        let second = rev_parse("HEAD").unwrap();
        assert!(is_ancestor(&first, &second).unwrap());
        assert!(!is_ancestor(&second, &first).unwrap());
    }

    #[test]
    #[serial]
    fn test_bundle_then_unbundle_round_trips_a_branch() {
        let repo_dir = dir_with_repo();
        set_current_dir(repo_dir.path()).unwrap();
        run_git_command(&["branch", "topic"], repo_dir.path());
        let sha = rev_parse("refs/heads/topic").unwrap();

        let bundle_dir = tempdir().unwrap();
        let bundle_path = bundle(bundle_dir.path(), &sha, "refs/heads/topic").unwrap();
        assert!(bundle_path.exists());

        let clone_dir = tempdir().unwrap();
        run_git_command(&["init"], clone_dir.path());
        set_current_dir(clone_dir.path()).unwrap();
        unbundle(&bundle_path, &sha, "refs/heads/topic").unwrap();
        let fetched = rev_parse(&format!("refs/s3-fetch/{sha}")).unwrap();
        assert_eq!(fetched, sha);
    }

    #[test]
    fn test_validate_ref_name_accepts_normal_branches() {
        assert!(validate_ref_name("refs/heads/main"));
        assert!(validate_ref_name("origin"));
    }

    #[test]
    fn test_validate_ref_name_rejects_traversal_and_empty() {
        assert!(!validate_ref_name(""));
        assert!(!validate_ref_name("../etc/passwd"));
        assert!(!validate_ref_name("-rf"));
        assert!(!validate_ref_name("has space"));
    }
}
