//! CID string-form and codec conversions.
//!
//! The remote store speaks base32 and reports roots under the `raw` codec;
//! the log engine keys its storage by base58btc. Conversions here swap the
//! codec byte or the string base and never touch the multihash, so block
//! identity survives every crossing.

use cid::Cid;
use multibase::Base;

use crate::codecs::Codec;
use crate::error::{Error, Result};

/// Which store a CID string is destined for. This is the only place in the
/// crate where the base32-vs-base58btc decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Remote-store operations: canonical base32.
    RemoteStore,
    /// Log-storage keys: canonical base58btc.
    LogStorage,
}

pub fn parse(s: &str) -> Result<Cid> {
    Cid::try_from(s).map_err(|e| Error::InvalidCid(format!("{:?}: {}", s, e)))
}

pub fn to_base32(cid: &Cid) -> Result<String> {
    cid.to_string_of_base(Base::Base32Lower)
        .map_err(|e| Error::InvalidCid(format!("{}: {}", cid, e)))
}

pub fn to_base58btc(cid: &Cid) -> Result<String> {
    cid.to_string_of_base(Base::Base58Btc)
        .map_err(|e| Error::InvalidCid(format!("{}: {}", cid, e)))
}

/// Same multihash, different codec byte.
pub fn re_codec(cid: &Cid, codec: Codec) -> Cid {
    Cid::new_v1(codec.into(), *cid.hash())
}

pub fn stringify_for(cid: &Cid, role: Role) -> Result<String> {
    match role {
        Role::RemoteStore => to_base32(cid),
        Role::LogStorage => to_base58btc(cid),
    }
}

#[cfg(test)]
mod tests {
    use multihash::{Code, MultihashDigest};

    use super::*;

    fn sample(codec: Codec) -> Cid {
        Cid::new_v1(codec.into(), Code::Sha2_256.digest(b"caravel test block"))
    }

    #[test]
    fn base32_round_trip() {
        let cid = sample(Codec::DagCbor);
        let s = to_base32(&cid).unwrap();
        assert!(s.starts_with('b'));
        assert_eq!(parse(&s).unwrap(), cid);
    }

    #[test]
    fn base58btc_preserves_multihash() {
        let cid = sample(Codec::DagCbor);
        let b58 = to_base58btc(&cid).unwrap();
        assert!(b58.starts_with('z'));
        let back = parse(&b58).unwrap();
        assert_eq!(back.hash(), cid.hash());
        assert_eq!(back, cid);
    }

    #[test]
    fn dag_cbor_entries_stringify_as_zdpu() {
        let cid = sample(Codec::DagCbor);
        let s = stringify_for(&cid, Role::LogStorage).unwrap();
        assert!(s.starts_with("zdpu"), "got {}", s);
    }

    #[test]
    fn re_codec_changes_only_the_codec() {
        let cbor = sample(Codec::DagCbor);
        let raw = re_codec(&cbor, Codec::Raw);
        assert_eq!(raw.codec(), 0x55);
        assert_eq!(raw.hash(), cbor.hash());
        assert_eq!(re_codec(&raw, Codec::DagCbor), cbor);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(parse("not a cid"), Err(Error::InvalidCid(_))));
        assert!(matches!(parse(""), Err(Error::InvalidCid(_))));
    }
}
