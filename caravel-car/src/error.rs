use cid::Cid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid car header: {0}")]
    InvalidHeader(String),

    #[error("block {cid} does not match its multihash")]
    CorruptBlock { cid: Cid },

    #[error("car stream ended inside a block frame")]
    Truncated,

    #[error("unsupported multihash code {0:#x}")]
    UnsupportedHash(u64),

    #[error(transparent)]
    Cid(#[from] cid::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
