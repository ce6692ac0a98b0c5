//! Walks an open database and collects every block a backup must carry.

use ahash::AHashSet;
use cid::Cid;
use tracing::{debug, instrument};

use crate::block::{Block, BlockMap, BlockSourceTag, BlockSources};
use crate::cids;
use crate::engine::{manifest_cid_of_address, BlockStore, Database, Manifest};
use crate::error::{Error, Result};

/// The result of walking one database.
#[derive(Debug)]
pub struct Extraction {
    pub blocks: BlockMap,
    /// Where each block came from; diagnostics only.
    pub sources: BlockSources,
    pub manifest_cid: Cid,
}

async fn fetch(blockstore: &dyn BlockStore, cid: &Cid, what: &str) -> Result<Block> {
    let bytes = blockstore
        .get(cid)
        .await?
        .ok_or_else(|| Error::Engine(format!("{} block {} not in block store", what, cid)))?;
    Ok(Block::new(*cid, bytes))
}

/// Collects the manifest, access-controller, identity and log-entry blocks
/// of `db` into a block map. The database is never mutated; entries added
/// concurrently may be missed, but every entry that is included brings its
/// whole ancestry, since the log iterator yields the transitive closure.
#[instrument(skip_all, fields(address = %db.address()))]
pub async fn extract(db: &dyn Database, blockstore: &dyn BlockStore) -> Result<Extraction> {
    let mut blocks = BlockMap::new();
    let mut sources = BlockSources::new();

    let manifest_cid = manifest_cid_of_address(&db.address())?;
    let manifest_block = fetch(blockstore, &manifest_cid, "manifest").await?;
    let manifest = Manifest::decode(manifest_block.data())?;
    let key = blocks.insert(manifest_block)?;
    sources.insert(key, BlockSourceTag::Manifest);

    if let Some(controller_cid) = manifest.access_controller_cid()? {
        let controller = fetch(blockstore, &controller_cid, "access controller").await?;
        let key = blocks.insert(controller)?;
        sources.insert(key, BlockSourceTag::AccessController);
    }

    let entries = db.log_entries().await?;
    let mut identity_hashes: AHashSet<String> = AHashSet::new();
    for entry in &entries {
        let entry_cid = cids::parse(&entry.hash)?;
        let block = fetch(blockstore, &entry_cid, "log entry").await?;
        let key = blocks.insert(block)?;
        sources.insert(key, BlockSourceTag::LogEntry);
        identity_hashes.insert(entry.identity.clone());
    }

    for hash in identity_hashes {
        let identity_cid = cids::parse(&hash)?;
        let block = fetch(blockstore, &identity_cid, "identity").await?;
        let key = blocks.insert(block)?;
        sources.insert(key, BlockSourceTag::Identity);
    }

    debug!(
        blocks = blocks.len(),
        entries = entries.len(),
        "extracted database blocks"
    );

    Ok(Extraction {
        blocks,
        sources,
        manifest_cid,
    })
}
