//! One backup: extract, pack, upload the CAR, then upload the metadata that
//! names it.

use bytes::Bytes;
use tracing::{debug, info, instrument};

use crate::block::summarize_sources;
use crate::car;
use crate::cids;
use crate::engine::{BlockStore, Database};
use crate::error::Result;
use crate::extract::extract;
use crate::metadata::{
    car_filename, file_stamp, metadata_filename, now_millis, BackupMetadata, DatabaseInfo,
    DEFAULT_SPACE, METADATA_VERSION,
};
use crate::progress::{BackupEvent, ProgressSender};
use crate::remote::{RemoteStore, UploadInfo};
use crate::retry::{retry, RetryConfig};

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub space_name: String,
    pub retry: RetryConfig,
    pub progress: ProgressSender<BackupEvent>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            space_name: DEFAULT_SPACE.to_string(),
            retry: RetryConfig::default(),
            progress: ProgressSender::none(),
        }
    }
}

/// The two objects a backup leaves in the space.
#[derive(Debug, Clone)]
pub struct BackupFiles {
    pub metadata_cid: String,
    pub car_cid: String,
    /// Operator-facing names; the store itself only knows CIDs.
    pub metadata: String,
    pub blocks: String,
}

#[derive(Debug, Clone)]
pub struct BackupReport {
    pub manifest_cid: String,
    pub database_address: String,
    pub database_name: String,
    pub blocks_total: usize,
    pub car_file_size: usize,
    pub backup_files: BackupFiles,
    pub timestamp: u64,
}

/// Backs up one open database. The database stays open; closing it is the
/// caller's business.
#[instrument(skip_all, fields(address = %db.address()))]
pub async fn backup(
    db: &dyn Database,
    blockstore: &dyn BlockStore,
    remote: &dyn RemoteStore,
    opts: &BackupOptions,
) -> Result<BackupReport> {
    match run(db, blockstore, remote, opts).await {
        Ok(report) => Ok(report),
        Err(err) => {
            opts.progress.send(BackupEvent::Error {
                message: err.to_string(),
            });
            Err(err)
        }
    }
}

async fn run(
    db: &dyn Database,
    blockstore: &dyn BlockStore,
    remote: &dyn RemoteStore,
    opts: &BackupOptions,
) -> Result<BackupReport> {
    let address = db.address();
    opts.progress.send(BackupEvent::Creating {
        address: address.clone(),
    });

    let extraction = extract(db, blockstore).await?;
    let entry_count = db.all_len().await?;
    let manifest_cid = cids::to_base32(&extraction.manifest_cid)?;

    let timestamp = now_millis();
    let stamp = file_stamp(timestamp);
    let mut metadata = BackupMetadata {
        version: METADATA_VERSION.to_string(),
        timestamp,
        space_name: opts.space_name.clone(),
        database_count: 1,
        total_blocks: extraction.blocks.len(),
        total_entries: entry_count,
        manifest_cid: manifest_cid.clone(),
        // assigned once the archive is uploaded
        car_cid: None,
        databases: vec![DatabaseInfo {
            address: address.clone(),
            name: db.name(),
            db_type: db.db_type().as_str().to_string(),
            manifest_cid: manifest_cid.clone(),
            entry_count,
        }],
        block_summary: summarize_sources(&extraction.sources),
    };

    let car_bytes = car::pack(&extraction.blocks, &extraction.manifest_cid).await?;
    let car_file_size = car_bytes.len();
    debug!(
        blocks = extraction.blocks.len(),
        bytes = car_file_size,
        "archive packed"
    );

    opts.progress.send(BackupEvent::UploadingBlocks {
        blocks: extraction.blocks.len(),
        car_bytes: car_file_size,
    });

    let car_name = car_filename(&stamp);
    let car_payload = Bytes::from(car_bytes);
    let car_cid = retry(&opts.retry, || {
        remote.upload(car_payload.clone(), UploadInfo::car(car_name.clone()))
    })
    .await?;
    let car_cid = cids::to_base32(&car_cid)?;

    // the metadata is the single source of truth at restore time, so it must
    // observe the archive's CID
    metadata.car_cid = Some(car_cid.clone());

    opts.progress.send(BackupEvent::UploadingMetadata);
    let metadata_name = metadata_filename(&stamp);
    let metadata_payload = Bytes::from(serde_json::to_vec(&metadata)?);
    let metadata_cid = retry(&opts.retry, || {
        remote.upload(
            metadata_payload.clone(),
            UploadInfo::json(metadata_name.clone()),
        )
    })
    .await?;
    let metadata_cid = cids::to_base32(&metadata_cid)?;

    info!(%metadata_cid, %car_cid, entries = entry_count, "backup complete");
    opts.progress.send(BackupEvent::Completed {
        metadata_cid: metadata_cid.clone(),
        car_cid: car_cid.clone(),
    });

    Ok(BackupReport {
        manifest_cid,
        database_address: address,
        database_name: db.name(),
        blocks_total: extraction.blocks.len(),
        car_file_size,
        backup_files: BackupFiles {
            metadata_cid,
            car_cid,
            metadata: metadata_name,
            blocks: car_name,
        },
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use crate::engine::mem::MemEngine;
    use crate::engine::{DatabaseType, Engine};
    use crate::remote::mem::MemRemoteStore;

    use super::*;

    #[tokio::test]
    async fn backup_uploads_archive_then_metadata() {
        let engine = MemEngine::new();
        let db = engine.create("journal", DatabaseType::Events).await.unwrap();
        db.add("Entry 1").await.unwrap();
        db.add("Entry 2").await.unwrap();

        let remote = MemRemoteStore::new();
        let blockstore = engine.blockstore();
        let report = backup(
            db.as_ref(),
            blockstore.as_ref(),
            &remote,
            &BackupOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.blocks_total, 5);
        assert_eq!(remote.object_count(), 2);
        assert!(report.backup_files.metadata.ends_with("-metadata.json"));
        assert!(report.backup_files.blocks.ends_with("-blocks.car"));

        // the stored metadata names the stored archive
        let listed = remote.list_space().await.unwrap();
        let meta_cid = crate::cids::parse(&report.backup_files.metadata_cid).unwrap();
        assert!(listed.contains(&meta_cid));

        // the database was left open
        assert_eq!(db.all_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn metadata_embeds_the_car_cid() {
        let engine = MemEngine::new();
        let db = engine.create("journal", DatabaseType::Events).await.unwrap();
        db.add("Entry 1").await.unwrap();

        let remote = MemRemoteStore::new();
        let blockstore = engine.blockstore();
        let report = backup(
            db.as_ref(),
            blockstore.as_ref(),
            &remote,
            &BackupOptions::default(),
        )
        .await
        .unwrap();

        let meta_cid = crate::cids::parse(&report.backup_files.metadata_cid).unwrap();
        let limits = crate::fetch::FetchLimits {
            timeout: std::time::Duration::from_secs(1),
            max_size: None,
        };
        use crate::fetch::BlockSource as _;
        let bytes = remote.fetch(&meta_cid, &limits).await.unwrap();
        let metadata: BackupMetadata = serde_json::from_slice(&bytes).unwrap();
        metadata.validate().unwrap();
        assert_eq!(metadata.car_cid.as_deref(), Some(report.backup_files.car_cid.as_str()));
        assert_eq!(metadata.total_entries, 1);
    }
}
