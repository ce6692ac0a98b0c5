use cid::Cid;
use integer_encoding::VarIntAsyncReader;
use multihash::{Code, MultihashDigest};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::Error;

/// Reads a varint-length-prefixed section. Returns `false` on a clean end of
/// stream, `Error::Truncated` when the stream ends inside the section.
pub(crate) async fn ld_read<R>(mut reader: R, buf: &mut Vec<u8>) -> Result<bool, Error>
where
    R: AsyncRead + Send + Unpin,
{
    let len: usize = match VarIntAsyncReader::read_varint_async(&mut reader).await {
        Ok(len) => len,
        Err(e) => {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(false);
            }
            return Err(Error::Io(e));
        }
    };

    buf.clear();
    reader.take(len as u64).read_to_end(buf).await?;
    if buf.len() != len {
        return Err(Error::Truncated);
    }
    Ok(true)
}

pub(crate) async fn read_block<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> Result<Option<(Cid, Vec<u8>)>, Error>
where
    R: AsyncRead + Send + Unpin,
{
    if ld_read(reader, buf).await? {
        let mut cursor = std::io::Cursor::new(&buf);
        let cid = Cid::read_bytes(&mut cursor)?;
        let pos = cursor.position() as usize;
        let data = buf[pos..].to_vec();

        verify_block(&cid, &data)?;

        return Ok(Some((cid, data)));
    }
    Ok(None)
}

/// Re-hashes `data` with the multihash declared in `cid` and compares digests.
pub(crate) fn verify_block(cid: &Cid, data: &[u8]) -> Result<(), Error> {
    let code = cid.hash().code();
    let mh = Code::try_from(code)
        .map_err(|_| Error::UnsupportedHash(code))?
        .digest(data);
    if mh.digest() != cid.hash().digest() {
        return Err(Error::CorruptBlock { cid: *cid });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use integer_encoding::VarIntAsyncWriter;
    use tokio::io::{AsyncWrite, AsyncWriteExt};

    use super::*;

    async fn ld_write<W>(writer: &mut W, bytes: &[u8]) -> Result<(), Error>
    where
        W: AsyncWrite + Send + Unpin,
    {
        writer.write_varint_async(bytes.len()).await?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    #[tokio::test]
    async fn ld_read_write() {
        let mut buffer = Vec::<u8>::new();
        ld_write(&mut buffer, b"test bytes").await.unwrap();
        let reader = std::io::Cursor::new(buffer);
        let mut buffer = Vec::new();
        let read = ld_read(reader, &mut buffer).await.unwrap();
        assert!(read);
        assert_eq!(&buffer, b"test bytes");
    }

    #[tokio::test]
    async fn ld_read_truncated() {
        let mut buffer = Vec::<u8>::new();
        ld_write(&mut buffer, b"test bytes").await.unwrap();
        buffer.truncate(buffer.len() - 3);
        let reader = std::io::Cursor::new(buffer);
        let mut buffer = Vec::new();
        assert!(matches!(
            ld_read(reader, &mut buffer).await,
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn verify_rejects_tampered_bytes() {
        let digest = Code::Sha2_256.digest(b"payload");
        let cid = Cid::new_v1(0x55, digest);
        verify_block(&cid, b"payload").unwrap();
        assert!(matches!(
            verify_block(&cid, b"paylaod"),
            Err(Error::CorruptBlock { .. })
        ));
    }
}
