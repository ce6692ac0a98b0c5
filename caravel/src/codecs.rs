use crate::error::Error;

/// The two IPLD codecs a backup carries: `raw` payload blocks and `dag-cbor`
/// manifests, access controllers, identities and log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Codec {
    Raw = 0x55,
    DagCbor = 0x71,
}

impl TryFrom<u64> for Codec {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0x55 => Ok(Codec::Raw),
            0x71 => Ok(Codec::DagCbor),
            other => Err(Error::InvalidCid(format!("unsupported codec {:#x}", other))),
        }
    }
}

impl From<Codec> for u64 {
    fn from(codec: Codec) -> Self {
        codec as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trip() {
        assert_eq!(Codec::try_from(0x55).unwrap(), Codec::Raw);
        assert_eq!(Codec::try_from(0x71).unwrap(), Codec::DagCbor);
        assert_eq!(u64::from(Codec::DagCbor), 0x71);
        assert!(Codec::try_from(0x70).is_err());
    }
}
