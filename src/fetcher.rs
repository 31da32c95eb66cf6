//! Parallel fetch with dedup by sha, used to drain a flushed `fetch_cmds`
//! batch concurrently while guaranteeing each sha is unbundled exactly once.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use log::debug;

use crate::git;
use crate::store::ObjectStore;

/// One `fetch <sha> <ref>` command as parsed from the wire.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub sha: String,
    pub remote_ref: String,
}

/// Dedups concurrent fetches of the same sha within and across batches.
#[derive(Default)]
pub struct FetchedShas {
    seen: Mutex<HashSet<String>>,
}

impl FetchedShas {
    pub fn new() -> Self {
        Self::default()
    }

    fn claim(&self, sha: &str) -> bool {
        let mut seen = self.seen.lock().unwrap();
        if seen.contains(sha) {
            false
        } else {
            seen.insert(sha.to_owned());
            true
        }
    }
}

/// Concurrency bound for a batch: `min(requests.len(), cpu_count * 4)`.
fn worker_count(n: usize) -> usize {
    let cpu_bound = num_cpus::get().max(1) * 4;
    n.min(cpu_bound).max(1)
}

/// Runs one flushed fetch batch to completion. Returns an error if any
/// worker failed; the helper then reports a fatal protocol error.
pub async fn fetch_all(
    store: &dyn ObjectStore,
    prefix: &str,
    requests: Vec<FetchRequest>,
    fetched: &FetchedShas,
) -> Result<()> {
    if requests.is_empty() {
        return Ok(());
    }

    let limit = worker_count(requests.len());
    let mut in_flight = FuturesUnordered::new();
    let mut pending = requests.into_iter();

    for req in pending.by_ref().take(limit) {
        in_flight.push(fetch_one(store, prefix, req, fetched));
    }

    while let Some(result) = in_flight.next().await {
        result?;
        if let Some(req) = pending.next() {
            in_flight.push(fetch_one(store, prefix, req, fetched));
        }
    }

    Ok(())
}

async fn fetch_one(
    store: &dyn ObjectStore,
    prefix: &str,
    request: FetchRequest,
    fetched: &FetchedShas,
) -> Result<()> {
    if !fetched.claim(&request.sha) {
        debug!("sha {} already fetched this session, skipping", request.sha);
        return Ok(());
    }

    let tmp = tempfile::tempdir().context("create temp dir for fetch")?;
    let bundle_path = tmp.path().join(format!("{}.bundle", request.sha));
    let key = format!("{prefix}/{}/{}.bundle", request.remote_ref, request.sha);

    store
        .get_to_file(&key, &bundle_path)
        .await
        .with_context(|| format!("download {key}"))?;

    git::unbundle(&bundle_path, &request.sha, &request.remote_ref)
        .with_context(|| format!("unbundle {} for {}", request.sha, request.remote_ref))?;

    Ok(())
}
