//! Scan-and-probe listing of a remote space.
//!
//! The remote returns root CIDs with no filenames, so each object is
//! downloaded (small, short timeout) and classified. The classifier is a
//! fixed rejection pipeline, not exception catching: every non-match has a
//! reason.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, instrument, trace};

use crate::error::Result;
use crate::fetch::{DownloadOptions, Downloader};
use crate::metadata::{BackupMetadata, DEFAULT_SPACE};
use crate::remote::RemoteStore;
use crate::retry::{retry, RetryConfig};

#[derive(Debug, Clone)]
pub struct ListOptions {
    /// Space label a backup must declare (or omit) to match.
    pub space_name: String,
    pub probe_timeout: Duration,
    /// Metadata documents are small; anything larger is a CAR.
    pub max_probe_size: usize,
    pub batch_size: usize,
    /// Stop scanning once this many backups matched.
    pub max_results: usize,
    /// Fresh uploads propagate slowly; an empty first pass is rescanned.
    pub empty_retries: u32,
    pub empty_retry_delay: Duration,
    pub retry: RetryConfig,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            space_name: DEFAULT_SPACE.to_string(),
            probe_timeout: Duration::from_secs(5),
            max_probe_size: 100 * 1024,
            batch_size: 10,
            max_results: 20,
            empty_retries: 5,
            empty_retry_delay: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupSummary {
    /// base32 root of the metadata object.
    pub metadata_cid: String,
    pub metadata: BackupMetadata,
}

/// Why a probed object is not a matching backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    /// Control characters up front: binary, almost certainly a CAR.
    Binary,
    /// Does not open like a JSON document.
    NotJson,
    Unparseable,
    /// Parsed, but not shaped like backup metadata.
    MissingFields,
    SpaceMismatch,
}

fn classify(bytes: &[u8], space: &str) -> Result<BackupMetadata, Rejection> {
    let head = &bytes[..bytes.len().min(100)];
    if head
        .iter()
        .any(|&b| b.is_ascii_control() && !matches!(b, b'\t' | b'\n' | b'\r'))
    {
        return Err(Rejection::Binary);
    }

    let first = bytes.iter().copied().find(|b| !b.is_ascii_whitespace());
    if !matches!(first, Some(b'{') | Some(b'[')) {
        return Err(Rejection::NotJson);
    }

    let value: Value = serde_json::from_slice(bytes).map_err(|_| Rejection::Unparseable)?;
    let object = value.as_object().ok_or(Rejection::MissingFields)?;

    let shaped = object.contains_key("version")
        && object.contains_key("timestamp")
        && object
            .get("databases")
            .and_then(Value::as_array)
            .map(|dbs| !dbs.is_empty())
            .unwrap_or(false);
    if !shaped {
        return Err(Rejection::MissingFields);
    }

    if let Some(declared) = object.get("spaceName").and_then(Value::as_str) {
        if declared != space {
            return Err(Rejection::SpaceMismatch);
        }
    }

    serde_json::from_value(value).map_err(|_| Rejection::MissingFields)
}

async fn probe(
    downloader: &Downloader,
    cid: &cid::Cid,
    opts: &ListOptions,
) -> Option<BackupSummary> {
    let download = DownloadOptions {
        timeout: opts.probe_timeout,
        max_size: Some(opts.max_probe_size),
        ..Default::default()
    };
    let bytes = match downloader.download(cid, &download).await {
        Ok(bytes) => bytes,
        Err(err) => {
            trace!(%cid, "probe download failed: {}", err);
            return None;
        }
    };
    match classify(&bytes, &opts.space_name) {
        Ok(metadata) => Some(BackupSummary {
            metadata_cid: cid.to_string(),
            metadata,
        }),
        Err(rejection) => {
            trace!(%cid, ?rejection, "object is not a matching backup");
            None
        }
    }
}

async fn scan_once(
    remote: &dyn RemoteStore,
    downloader: &Downloader,
    opts: &ListOptions,
) -> Result<Vec<BackupSummary>> {
    let roots = retry(&opts.retry, || remote.list_space()).await?;
    debug!(objects = roots.len(), "scanning space");

    let mut matches = Vec::new();
    for chunk in roots.chunks(opts.batch_size.max(1)) {
        let probed: Vec<Option<BackupSummary>> =
            stream::iter(chunk.iter().map(|cid| probe(downloader, cid, opts)))
                .buffer_unordered(opts.batch_size.max(1))
                .collect()
                .await;
        matches.extend(probed.into_iter().flatten());
        if matches.len() >= opts.max_results {
            break;
        }
    }

    // newest first; the cid breaks timestamp ties so listings are stable
    matches.sort_by(|a, b| {
        b.metadata
            .timestamp
            .cmp(&a.metadata.timestamp)
            .then_with(|| a.metadata_cid.cmp(&b.metadata_cid))
    });
    Ok(matches)
}

/// Lists the backups in a space, newest first.
#[instrument(skip_all, fields(space = %opts.space_name))]
pub async fn list_backups(
    remote: &dyn RemoteStore,
    downloader: &Downloader,
    opts: &ListOptions,
) -> Result<Vec<BackupSummary>> {
    let mut pass = 0u32;
    loop {
        let matches = scan_once(remote, downloader, opts).await?;
        if !matches.is_empty() || pass >= opts.empty_retries {
            debug!(matches = matches.len(), pass, "listing finished");
            return Ok(matches);
        }
        pass += 1;
        debug!(pass, "no backups surfaced yet, waiting for the store to settle");
        tokio::time::sleep(opts.empty_retry_delay).await;
    }
}
