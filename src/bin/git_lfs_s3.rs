//! `git-lfs-s3 [install|debug|enable-debug|disable-debug]` — the git-lfs
//! custom transfer agent entry point. With no subcommand it enters the
//! JSON-event loop on stdio.

use std::fs::OpenOptions;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, LevelFilter};

use git_remote_s3::lfs;

#[derive(Parser)]
#[command(name = "git-lfs-s3")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Registers this binary as the repository's LFS standalone transfer agent.
    Install,
    /// Enters the event loop at debug verbosity.
    Debug,
    /// Adds `debug` to the registered transfer agent's invocation args.
    EnableDebug,
    /// Removes `debug` from the registered transfer agent's invocation args.
    DisableDebug,
}

/// The source's logger writes to a fixed path under `.git/lfs/tmp/`; a
/// missing directory (agent invoked outside a repo checkout) degrades to no
/// file logging rather than failing the event loop.
fn init_logging(default_level: LevelFilter) {
    let log_path = ".git/lfs/tmp/git-lfs-s3.log";
    let mut builder = env_logger::Builder::from_env(Env::default());
    builder.filter_level(default_level);
    match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(_) => {
            builder.target(env_logger::Target::Stderr);
        }
    }
    let _ = builder.try_init();
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Install) => {
            init_logging(LevelFilter::Warn);
            match lfs::install() {
                Ok(()) => {
                    println!("git-lfs-s3 installed");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Command::EnableDebug) => {
            init_logging(LevelFilter::Warn);
            match lfs::enable_debug() {
                Ok(()) => {
                    println!("debug enabled");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Command::DisableDebug) => {
            init_logging(LevelFilter::Warn);
            match lfs::disable_debug() {
                Ok(()) => {
                    println!("debug disabled");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Command::Debug) => run_event_loop(LevelFilter::Debug).await,
        None => run_event_loop(LevelFilter::Warn).await,
    }
}

async fn run_event_loop(level: LevelFilter) -> ExitCode {
    init_logging(level);
    let stdin = tokio::io::stdin();
    let stdout = std::io::stdout();
    match lfs::run(stdin, stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("git-lfs-s3 event loop failed: {e}");
            ExitCode::FAILURE
        }
    }
}
