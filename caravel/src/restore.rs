//! Restore: fetch a backup, install its blocks, and coax the engine into
//! seeing them.
//!
//! Opening a database only fetches the manifest and whatever heads the
//! engine already remembers; it never scans the block store for orphaned
//! log entries. So after installing blocks into both stores the restore
//! rediscovers the heads from the raw blocks and feeds them to the log,
//! which walks back through `next` over the installed log storage.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::car;
use crate::cids::{self, Role};
use crate::codecs::Codec;
use crate::engine::{Database, Engine, OpenOptions};
use crate::entry::LogEntry;
use crate::error::{Error, Result};
use crate::fetch::{DownloadOptions, Downloader};
use crate::gateway::looks_like_error_page;
use crate::index::{self, ListOptions};
use crate::metadata::BackupMetadata;
use crate::progress::{ProgressSender, RestoreEvent};
use crate::remote::RemoteStore;
use crate::retry::{retry, RetryConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STABLE_FOR: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Explicit metadata object to restore; skips the listing.
    pub metadata_cid: Option<String>,
    /// Restore the backup with exactly this timestamp instead of the latest.
    pub timestamp: Option<u64>,
    /// Listing parameters, including the space label.
    pub list: ListOptions,
    pub download: DownloadOptions,
    /// Overall budget; the post-join poll runs for at most half of it.
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub progress: ProgressSender<RestoreEvent>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            metadata_cid: None,
            timestamp: None,
            list: ListOptions::default(),
            download: DownloadOptions::default(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            progress: ProgressSender::none(),
        }
    }
}

#[derive(Debug)]
pub struct RestoreReport {
    pub database: Arc<dyn Database>,
    pub database_address: String,
    pub entries_recovered: usize,
    pub blocks_restored: usize,
    pub backup_timestamp: u64,
}

#[instrument(skip_all)]
pub async fn restore(
    engine: &dyn Engine,
    remote: &dyn RemoteStore,
    downloader: &Downloader,
    opts: &RestoreOptions,
) -> Result<RestoreReport> {
    match run(engine, remote, downloader, opts).await {
        Ok(report) => Ok(report),
        Err(err) => {
            opts.progress.send(RestoreEvent::Error {
                message: err.to_string(),
            });
            Err(err)
        }
    }
}

async fn resolve_target(
    remote: &dyn RemoteStore,
    downloader: &Downloader,
    opts: &RestoreOptions,
) -> Result<String> {
    if let Some(metadata_cid) = &opts.metadata_cid {
        return Ok(metadata_cid.clone());
    }
    let listed = index::list_backups(remote, downloader, &opts.list).await?;
    let chosen = match opts.timestamp {
        Some(wanted) => listed
            .into_iter()
            .find(|summary| summary.metadata.timestamp == wanted),
        None => listed.into_iter().next(),
    };
    chosen
        .map(|summary| summary.metadata_cid)
        .ok_or_else(|| Error::NoBackupFound {
            space: opts.list.space_name.clone(),
        })
}

async fn run(
    engine: &dyn Engine,
    remote: &dyn RemoteStore,
    downloader: &Downloader,
    opts: &RestoreOptions,
) -> Result<RestoreReport> {
    // 1. which backup
    let metadata_cid_str = resolve_target(remote, downloader, opts).await?;
    let metadata_cid = cids::parse(&metadata_cid_str)?;

    // 2. the metadata document
    let metadata_bytes = retry(&opts.retry, || {
        downloader.download(&metadata_cid, &opts.download)
    })
    .await?;
    let metadata: BackupMetadata = serde_json::from_slice(&metadata_bytes)
        .map_err(|e| Error::InvalidMetadata(format!("metadata does not parse: {}", e)))?;
    metadata.validate()?;
    opts.progress.send(RestoreEvent::Found {
        metadata_cid: metadata_cid_str.clone(),
        timestamp: metadata.timestamp,
    });

    // 3. the archive it names
    let car_cid_str = metadata
        .car_cid
        .clone()
        .ok_or_else(|| Error::InvalidMetadata("missing carCID".into()))?;
    let car_cid = cids::parse(&car_cid_str)?;
    opts.progress.send(RestoreEvent::DownloadingBlocks {
        car_cid: car_cid_str.clone(),
    });
    let car_bytes = retry(&opts.retry, || downloader.download(&car_cid, &opts.download)).await?;
    // overloaded gateways return 200 OK with an HTML body for missing
    // content; that must never reach the unpacker as archive bytes
    if looks_like_error_page(&car_bytes) {
        return Err(Error::DownloadFailed {
            cid: car_cid_str,
            reason: "body is an html error page".into(),
            status: None,
        });
    }

    // 4. unpack and cross-check the declared root
    let (root, blocks) = car::unpack(&car_bytes).await?;
    let manifest_cid = cids::parse(&metadata.manifest_cid)?;
    if root != manifest_cid {
        return Err(Error::InvalidMetadata(format!(
            "archive root {} does not match manifestCID {}",
            root, metadata.manifest_cid
        )));
    }

    let db_info = &metadata.databases[0];
    opts.progress.send(RestoreEvent::RestoringBlocks {
        blocks: blocks.len(),
    });

    // 5. blocks into the engine's block store, keyed base32
    let blockstore = engine.blockstore();
    for block in blocks.values() {
        blockstore.put(block.cid(), block.data().clone()).await?;
    }

    // 6. the same blocks into the log storage, keyed base58btc; the block
    // store answers content fetches, the log storage answers "is this entry
    // known" during hydration, and either alone leaves the log blind
    let open_opts = OpenOptions {
        db_type: db_info.db_type.parse().ok(),
    };
    let db = engine.open(&db_info.address, open_opts.clone()).await?;
    let log = db.log_storage();
    for block in blocks.values() {
        let key = cids::stringify_for(block.cid(), Role::LogStorage)?;
        log.put(&key, block.data().clone()).await?;
    }

    // 7. close and reopen so the log re-reads from storage
    db.close().await?;
    let db = engine.open(&db_info.address, open_opts).await?;

    // 8. rediscover the heads from the raw blocks: entries that no other
    // entry references through `next`
    let mut entries: Vec<LogEntry> = Vec::new();
    for block in blocks.values() {
        if block.cid().codec() != u64::from(Codec::DagCbor) {
            continue;
        }
        if let Some(entry) = LogEntry::sniff(block.cid(), block.data()) {
            entries.push(entry);
        }
    }
    let referenced: HashSet<&String> = entries
        .iter()
        .flat_map(|entry| entry.next.iter())
        .collect();
    let heads: Vec<LogEntry> = entries
        .iter()
        .filter(|entry| !referenced.contains(&entry.hash))
        .cloned()
        .collect();
    debug!(
        entries = entries.len(),
        heads = heads.len(),
        "rediscovered log heads"
    );

    // 9. feed each head to the log
    let mut failed_joins = 0usize;
    for head in &heads {
        if let Err(err) = db.join_entry(head.clone()).await {
            warn!(hash = %head.hash, "head failed to join: {}", err);
            failed_joins += 1;
        }
    }
    if !heads.is_empty() && failed_joins == heads.len() {
        return Err(Error::AllHeadsFailed {
            failed: failed_joins,
        });
    }

    // 10. wait for the log to settle
    let expected = metadata.total_entries;
    let recovered = poll_until_settled(db.as_ref(), expected, opts.timeout / 2).await?;
    if recovered < expected {
        return Err(Error::VerificationFailed {
            expected,
            actual: recovered,
        });
    }

    info!(
        entries = recovered,
        blocks = blocks.len(),
        "restore complete"
    );
    opts.progress.send(RestoreEvent::Completed {
        entries_recovered: recovered,
    });

    Ok(RestoreReport {
        database_address: db.address(),
        database: db,
        entries_recovered: recovered,
        blocks_restored: blocks.len(),
        backup_timestamp: metadata.timestamp,
    })
}

async fn poll_until_settled(
    db: &dyn Database,
    expected: usize,
    budget: Duration,
) -> Result<usize> {
    let started = Instant::now();
    let mut count = db.all_len().await?;
    let mut last_growth = Instant::now();

    while count < expected
        && last_growth.elapsed() < STABLE_FOR
        && started.elapsed() < budget
    {
        tokio::time::sleep(POLL_INTERVAL).await;
        let current = db.all_len().await?;
        if current > count {
            count = current;
            last_growth = Instant::now();
        }
    }
    Ok(count)
}
