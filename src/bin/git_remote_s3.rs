//! `git-remote-s3 <remote-name> <remote-url>` — the remote-helper entry
//! point git invokes as a subprocess for any `s3://`/`s3+zip://` remote.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::error;

use git_remote_s3::protocol;
use git_remote_s3::store::s3::S3Store;
use git_remote_s3::url::parse_remote_url;

/// The two positional arguments git always passes to a remote helper.
#[derive(Parser)]
#[command(name = "git-remote-s3")]
struct Cli {
    /// The name the remote was configured under (e.g. `origin`).
    remote_name: String,
    /// The `s3://` or `s3+zip://` URL configured for the remote.
    remote_url: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let remote = match parse_remote_url(&cli.remote_url) {
        Ok(remote) => remote,
        Err(e) => return fatal(&e),
    };

    let store = match S3Store::connect(&remote.bucket, remote.profile.as_deref()).await {
        Ok(store) => store,
        Err(e) => return fatal(&e),
    };

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    match protocol::run(stdin, stdout, &store, &remote).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if is_broken_pipe(&e) {
                ExitCode::SUCCESS
            } else {
                fatal(&e)
            }
        }
    }
}

fn is_broken_pipe(e: &anyhow::Error) -> bool {
    e.downcast_ref::<io::Error>()
        .map(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
        .unwrap_or(false)
}

fn fatal(e: &dyn std::fmt::Display) -> ExitCode {
    error!("{e}");
    eprintln!("fatal: {e}");
    ExitCode::FAILURE
}
