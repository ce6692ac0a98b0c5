use cid::Cid;
use futures::Stream;
use tokio::io::AsyncRead;

use crate::{
    error::Error,
    header::CarHeader,
    util::{ld_read, read_block},
};

/// Streaming CARv1 reader.
///
/// Every block frame is re-hashed against the multihash declared in its CID
/// before it is yielded.
pub struct CarReader<R> {
    reader: R,
    header: CarHeader,
    buffer: Vec<u8>,
}

impl<R> CarReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Creates a new CarReader and parses the header.
    pub async fn new(mut reader: R) -> Result<Self, Error> {
        let mut buffer = Vec::new();

        if !ld_read(&mut reader, &mut buffer).await? {
            return Err(Error::InvalidHeader(
                "failed to parse uvarint for header".to_string(),
            ));
        }

        let header = CarHeader::decode(&buffer)?;

        Ok(CarReader {
            reader,
            header,
            buffer,
        })
    }

    /// Returns the header of this car file.
    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Returns the next verified block, or `None` at the end of the archive.
    pub async fn next_block(&mut self) -> Result<Option<(Cid, Vec<u8>)>, Error> {
        read_block(&mut self.reader, &mut self.buffer).await
    }

    pub fn stream(self) -> impl Stream<Item = Result<(Cid, Vec<u8>), Error>> {
        futures::stream::try_unfold(self, |mut this| async move {
            let maybe_block = read_block(&mut this.reader, &mut this.buffer).await?;
            Ok(maybe_block.map(|b| (b, this)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use cid::Cid;
    use futures::TryStreamExt;
    use libipld::cbor::DagCborCodec;
    use multihash::{Code, MultihashDigest};

    use crate::writer::CarWriter;

    use super::*;

    fn cbor_cid(data: &[u8]) -> Cid {
        Cid::new_v1(DagCborCodec.into(), Code::Sha2_256.digest(data))
    }

    #[tokio::test]
    async fn car_write_read() {
        let cid_test = cbor_cid(b"test");
        let cid_foo = cbor_cid(b"foo");

        let header = CarHeader::new(cid_foo);

        let mut buffer = Vec::new();
        let mut writer = CarWriter::new(header.clone(), &mut buffer);
        writer.write(cid_test, b"test").await.unwrap();
        writer.write(cid_foo, b"foo").await.unwrap();
        writer.finish().await.unwrap();

        let car_reader = CarReader::new(Cursor::new(&buffer)).await.unwrap();
        assert_eq!(car_reader.header(), &header);
        let blocks: Vec<_> = car_reader.stream().try_collect().await.unwrap();

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, cid_test);
        assert_eq!(blocks[0].1, b"test");
        assert_eq!(blocks[1].0, cid_foo);
        assert_eq!(blocks[1].1, b"foo");
    }

    #[tokio::test]
    async fn duplicate_blocks_written_once() {
        let cid = cbor_cid(b"dup");

        let mut buffer = Vec::new();
        let mut writer = CarWriter::new(CarHeader::new(cid), &mut buffer);
        writer.write(cid, b"dup").await.unwrap();
        writer.write(cid, b"dup").await.unwrap();
        assert_eq!(writer.block_count(), 1);
        writer.finish().await.unwrap();

        let car_reader = CarReader::new(Cursor::new(&buffer)).await.unwrap();
        let blocks: Vec<_> = car_reader.stream().try_collect().await.unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_block_rejected() {
        let cid = cbor_cid(b"honest bytes");

        let mut buffer = Vec::new();
        let mut writer = CarWriter::new(CarHeader::new(cid), &mut buffer);
        writer.write(cid, b"honest bytes").await.unwrap();
        writer.finish().await.unwrap();

        // flip one payload byte
        let last = buffer.len() - 1;
        buffer[last] ^= 0xff;

        let mut car_reader = CarReader::new(Cursor::new(&buffer)).await.unwrap();
        assert!(matches!(
            car_reader.next_block().await,
            Err(Error::CorruptBlock { .. })
        ));
    }

    #[tokio::test]
    async fn truncated_archive_rejected() {
        let cid = cbor_cid(b"will be cut short");

        let mut buffer = Vec::new();
        let mut writer = CarWriter::new(CarHeader::new(cid), &mut buffer);
        writer.write(cid, b"will be cut short").await.unwrap();
        writer.finish().await.unwrap();

        buffer.truncate(buffer.len() - 4);

        let mut car_reader = CarReader::new(Cursor::new(&buffer)).await.unwrap();
        assert!(matches!(
            car_reader.next_block().await,
            Err(Error::Truncated)
        ));
    }
}
