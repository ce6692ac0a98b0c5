//! Packing a block map into a CARv1 archive and back.

use cid::Cid;
use caravel_car::{CarHeader, CarReader, CarWriter};
use tracing::trace;

use crate::block::{Block, BlockMap};
use crate::error::Result;

/// Serializes the block map with `root` declared in the header. Each block
/// is written exactly once; order carries no meaning.
pub async fn pack(blocks: &BlockMap, root: &Cid) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut writer = CarWriter::new(CarHeader::new(*root), &mut buffer);
    for block in blocks.values() {
        writer.write(*block.cid(), block.data()).await?;
    }
    let written = writer.block_count();
    writer.finish().await?;
    trace!(blocks = written, bytes = buffer.len(), "packed archive");
    Ok(buffer)
}

/// Reads an archive back into a block map keyed by base32. Every block is
/// re-hashed by the reader; a tampered archive fails here rather than
/// reaching a store.
pub async fn unpack(bytes: &[u8]) -> Result<(Cid, BlockMap)> {
    let mut reader = CarReader::new(bytes).await?;
    let root = *reader.header().root();

    let mut blocks = BlockMap::new();
    while let Some((cid, data)) = reader.next_block().await? {
        blocks.insert(Block::new(cid, data))?;
    }
    trace!(blocks = blocks.len(), %root, "unpacked archive");
    Ok((root, blocks))
}

#[cfg(test)]
mod tests {
    use multihash::{Code, MultihashDigest};

    use crate::cids;
    use crate::codecs::Codec;

    use super::*;

    fn raw_block(data: &[u8]) -> Block {
        let cid = Cid::new_v1(Codec::Raw.into(), Code::Sha2_256.digest(data));
        Block::new(cid, data.to_vec())
    }

    #[tokio::test]
    async fn round_trip_preserves_keys_and_bytes() {
        let mut blocks = BlockMap::new();
        let root_block = raw_block(b"root");
        let root = *root_block.cid();
        blocks.insert(root_block).unwrap();
        blocks.insert(raw_block(b"one")).unwrap();
        blocks.insert(raw_block(b"two")).unwrap();

        let car = pack(&blocks, &root).await.unwrap();
        let (unpacked_root, unpacked) = unpack(&car).await.unwrap();

        assert_eq!(unpacked_root, root);
        assert_eq!(unpacked.len(), blocks.len());
        for (key, block) in blocks.iter() {
            assert_eq!(unpacked.get(key).unwrap().data(), block.data());
        }
    }

    #[tokio::test]
    async fn any_corrupted_byte_fails_unpack() {
        let mut blocks = BlockMap::new();
        let block = raw_block(b"precious bytes");
        let root = *block.cid();
        let key = blocks.insert(block).unwrap();

        let car = pack(&blocks, &root).await.unwrap();

        // corrupt the final byte of the payload
        let mut tampered = car.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(unpack(&tampered).await.is_err());

        // untouched archive still parses
        let (_, unpacked) = unpack(&car).await.unwrap();
        assert!(unpacked.contains(&key));
        let _ = cids::parse(&key).unwrap();
    }
}
