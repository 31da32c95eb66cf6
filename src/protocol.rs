//! Line-oriented remote-helper protocol: reads commands from `stdin`,
//! writes responses to `stdout`, batching `push`/`fetch` commands until the
//! empty-line terminator, per §4.1.

use anyhow::{bail, Result};
use log::LevelFilter;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::fetcher::{self, FetchRequest, FetchedShas};
use crate::git;
use crate::refengine::{self, PushRequest};
use crate::store::ObjectStore;
use crate::url::Remote;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Mode {
    Idle,
    Push,
    Fetch,
}

/// Drives the command loop to completion against `input`/`output`, reading
/// one newline-terminated command at a time until EOF.
pub async fn run<R, W>(
    mut input: R,
    mut output: W,
    store: &dyn ObjectStore,
    remote: &Remote,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(&mut input);
    let mut mode = Mode::Idle;
    let mut push_cmds: Vec<PushRequest> = Vec::new();
    let mut fetch_cmds: Vec<FetchRequest> = Vec::new();
    let fetched = FetchedShas::new();

    let push_re = Regex::new(r"^push (\+)?([^:]*):(.+)$").expect("static regex is valid");
    let fetch_re = Regex::new(r"^fetch ([a-f0-9]{40}) (.+)$").expect("static regex is valid");

    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break;
        }
        let cmd = line.trim_end_matches(['\n', '\r']);

        if cmd.is_empty() {
            match mode {
                Mode::Push => {
                    flush_push(store, remote, &mut push_cmds, &mut output).await?;
                }
                Mode::Fetch => {
                    flush_fetch(store, remote, &mut fetch_cmds, &fetched, &mut output).await?;
                }
                Mode::Idle => {}
            }
            write_line(&mut output, "").await?;
            continue;
        }

        if cmd == "capabilities" {
            write_line(&mut output, "*push").await?;
            write_line(&mut output, "*fetch").await?;
            write_line(&mut output, "option").await?;
            write_line(&mut output, "").await?;
            continue;
        }

        if let Some(rest) = cmd.strip_prefix("option ") {
            handle_option(rest, &mut output).await?;
            continue;
        }

        if cmd == "list" || cmd == "list for-push" {
            let include_head = cmd == "list";
            list_refs(store, remote, include_head, &mut output).await?;
            continue;
        }

        if let Some(caps) = push_re.captures(cmd) {
            if mode != Mode::Push {
                fetch_cmds.clear();
                mode = Mode::Push;
            }
            let local = caps[2].to_owned();
            push_cmds.push(PushRequest {
                local: if local.is_empty() { None } else { Some(local) },
                force: caps.get(1).is_some(),
                remote: caps[3].to_owned(),
            });
            continue;
        }

        if let Some(caps) = fetch_re.captures(cmd) {
            if mode != Mode::Fetch {
                push_cmds.clear();
                mode = Mode::Fetch;
            }
            fetch_cmds.push(FetchRequest {
                sha: caps[1].to_owned(),
                remote_ref: caps[2].to_owned(),
            });
            continue;
        }

        bail!("invalid command '{cmd}'");
    }

    Ok(())
}

async fn handle_option<W: AsyncWrite + Unpin>(rest: &str, output: &mut W) -> Result<()> {
    let mut parts = rest.splitn(2, ' ');
    let name = parts.next().unwrap_or_default();
    let value = parts.next().unwrap_or_default();

    if name == "verbosity" {
        if let Ok(level) = value.parse::<i32>() {
            if level >= 1 {
                log::set_max_level(LevelFilter::Info);
            }
            if level >= 2 {
                log::set_max_level(LevelFilter::Debug);
                write_line(output, "ok").await?;
                return Ok(());
            }
        }
    }
    write_line(output, "unsupported").await?;
    Ok(())
}

async fn flush_push<W: AsyncWrite + Unpin>(
    store: &dyn ObjectStore,
    remote: &Remote,
    push_cmds: &mut Vec<PushRequest>,
    output: &mut W,
) -> Result<()> {
    for req in push_cmds.drain(..) {
        let remote_ref = req.remote.clone();
        match refengine::push(store, remote, &req).await {
            Ok(()) => write_line(output, &format!("ok {remote_ref}")).await?,
            Err(refengine::PushError::DeleteTargetNotFound) => {
                write_line(output, &format!("error {remote_ref} not found")).await?
            }
            Err(e) => write_line(output, &format!("error {remote_ref} \"{e}\"?")).await?,
        }
    }
    Ok(())
}

async fn flush_fetch<W: AsyncWrite + Unpin>(
    store: &dyn ObjectStore,
    remote: &Remote,
    fetch_cmds: &mut Vec<FetchRequest>,
    fetched: &FetchedShas,
    _output: &mut W,
) -> Result<()> {
    let batch = std::mem::take(fetch_cmds);
    fetcher::fetch_all(store, &remote.prefix, batch, fetched).await
}

fn bundle_ref_regex() -> Regex {
    Regex::new(r"^.+/.+/.+/([a-f0-9]{40})\.bundle$").expect("static regex is valid")
}

async fn list_refs<W: AsyncWrite + Unpin>(
    store: &dyn ObjectStore,
    remote: &Remote,
    include_head: bool,
    output: &mut W,
) -> Result<()> {
    let prefix = format!("{}/", remote.prefix);

    if include_head {
        let head_key = format!("{}/HEAD", remote.prefix);
        if let Ok(body) = store.get(&head_key).await {
            if let Ok(head_ref) = String::from_utf8(body) {
                write_line(output, &format!("@{} HEAD", head_ref.trim())).await?;
            }
        }
    }

    let objects = store.list(&prefix).await?;
    let re = bundle_ref_regex();

    for obj in &objects {
        if let Some(caps) = re.captures(&obj.key) {
            let sha = &caps[1];
            let rest = obj.key.strip_prefix(&prefix).unwrap_or(&obj.key);
            let ref_name = rest.rsplit_once('/').map(|(r, _)| r).unwrap_or(rest);
            if !ref_name.starts_with("refs/") {
                continue;
            }
            write_line(output, &format!("{sha} {ref_name}")).await?;
        }
    }

    write_line(output, "").await?;
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

/// Validates that a ref name parsed off the wire is well-formed before it is
/// used to build object-store keys, rejecting the command loop's input
/// outright rather than letting a crafted ref name escape the prefix.
pub fn validate_wire_ref(name: &str) -> bool {
    git::validate_ref_name(name)
}
