use std::collections::{hash_map, BTreeMap, HashMap};

use bytes::Bytes;
use cid::Cid;
use multihash::{Code, MultihashDigest};

use crate::cids;
use crate::error::{Error, Result};

/// A `(cid, bytes)` pair. The bytes are exactly the serialization that was
/// hashed to produce the CID; blocks are never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    pub fn new(cid: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            cid,
            data: data.into(),
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Re-hashes the data with the multihash declared in the CID.
    pub fn validate(&self) -> Result<()> {
        let code = self.cid.hash().code();
        let mh = Code::try_from(code)
            .map_err(|_| Error::InvalidCid(format!("unsupported multihash code {:#x}", code)))?
            .digest(&self.data);
        if mh.digest() != self.cid.hash().digest() {
            return Err(Error::Car(caravel_car::Error::CorruptBlock {
                cid: self.cid,
            }));
        }
        Ok(())
    }
}

/// Diagnostic tag recording where a block came from during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSourceTag {
    Manifest,
    AccessController,
    Identity,
    LogEntry,
}

impl BlockSourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSourceTag::Manifest => "manifest",
            BlockSourceTag::AccessController => "access_controller",
            BlockSourceTag::Identity => "identity",
            BlockSourceTag::LogEntry => "log_entry",
        }
    }
}

/// Source tags keyed by base32 CID string; informational only.
pub type BlockSources = HashMap<String, BlockSourceTag>;

/// Counts per source tag, for the metadata's block summary.
pub fn summarize_sources(sources: &BlockSources) -> BTreeMap<String, usize> {
    let mut summary = BTreeMap::new();
    for tag in sources.values() {
        *summary.entry(tag.as_str().to_string()).or_insert(0) += 1;
    }
    summary
}

/// Blocks keyed by their base32 CID string. Membership is the only property
/// consumers rely on; iteration order carries no meaning.
#[derive(Debug, Clone, Default)]
pub struct BlockMap {
    inner: HashMap<String, Block>,
}

impl BlockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a block under its base32 key. Re-inserting the same CID is a
    /// no-op; the bytes for a CID cannot differ.
    pub fn insert(&mut self, block: Block) -> Result<String> {
        let key = cids::to_base32(block.cid())?;
        self.inner.entry(key.clone()).or_insert(block);
        Ok(key)
    }

    pub fn get(&self, key: &str) -> Option<&Block> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Block> {
        self.inner.values()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Block> {
        self.inner.iter()
    }
}

impl IntoIterator for BlockMap {
    type Item = (String, Block);
    type IntoIter = hash_map::IntoIter<String, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use multihash::{Code, MultihashDigest};

    use crate::codecs::Codec;

    use super::*;

    fn block(data: &[u8]) -> Block {
        let cid = Cid::new_v1(Codec::Raw.into(), Code::Sha2_256.digest(data));
        Block::new(cid, data.to_vec())
    }

    #[test]
    fn insert_is_idempotent() {
        let mut map = BlockMap::new();
        let b = block(b"same bytes");
        let k1 = map.insert(b.clone()).unwrap();
        let k2 = map.insert(b).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(map.len(), 1);
        assert!(map.contains(&k1));
    }

    #[test]
    fn validate_catches_forged_bytes() {
        let honest = block(b"honest");
        honest.validate().unwrap();

        let forged = Block::new(*honest.cid(), b"forged".to_vec());
        assert!(forged.validate().is_err());
    }

    #[test]
    fn summary_counts_tags() {
        let mut sources = BlockSources::new();
        sources.insert("a".into(), BlockSourceTag::Manifest);
        sources.insert("b".into(), BlockSourceTag::LogEntry);
        sources.insert("c".into(), BlockSourceTag::LogEntry);
        let summary = summarize_sources(&sources);
        assert_eq!(summary.get("manifest"), Some(&1));
        assert_eq!(summary.get("log_entry"), Some(&2));
    }
}
