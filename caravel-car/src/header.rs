use std::collections::BTreeMap;

use cid::Cid;
use libipld::cbor::DagCborCodec;
use libipld::prelude::Codec as _;
use libipld::Ipld;

use crate::error::Error;

/// A CARv1 header declaring a single root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarHeader {
    root: Cid,
}

impl CarHeader {
    pub fn new(root: Cid) -> Self {
        CarHeader { root }
    }

    pub fn root(&self) -> &Cid {
        &self.root
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut map = BTreeMap::new();
        map.insert(
            "roots".to_string(),
            Ipld::List(vec![Ipld::Link(self.root)]),
        );
        map.insert("version".to_string(), Ipld::Integer(1));

        DagCborCodec
            .encode(&Ipld::Map(map))
            .map_err(|e| Error::InvalidHeader(e.to_string()))
    }

    pub fn decode(buffer: &[u8]) -> Result<Self, Error> {
        let header: Ipld = DagCborCodec
            .decode(buffer)
            .map_err(|e| Error::InvalidHeader(e.to_string()))?;

        let map = match header {
            Ipld::Map(map) => map,
            other => {
                return Err(Error::InvalidHeader(format!(
                    "expected a map, got {:?}",
                    other
                )))
            }
        };

        match map.get("version") {
            Some(Ipld::Integer(1)) => {}
            Some(other) => {
                return Err(Error::InvalidHeader(format!(
                    "unsupported version {:?}",
                    other
                )))
            }
            None => return Err(Error::InvalidHeader("missing version".to_string())),
        }

        let roots = match map.get("roots") {
            Some(Ipld::List(roots)) => roots,
            _ => return Err(Error::InvalidHeader("missing roots".to_string())),
        };

        // A backup archive carries exactly one root.
        match roots.as_slice() {
            [Ipld::Link(root)] => Ok(CarHeader { root: *root }),
            _ => Err(Error::InvalidHeader(format!(
                "expected a single root, got {}",
                roots.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use multihash::{Code, MultihashDigest};

    use super::*;

    #[test]
    fn header_round_trip() {
        let digest = Code::Sha2_256.digest(b"test");
        let root = Cid::new_v1(0x71, digest);

        let header = CarHeader::new(root);
        let bytes = header.encode().unwrap();
        assert_eq!(CarHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn rejects_garbage_header() {
        assert!(matches!(
            CarHeader::decode(b"not cbor at all"),
            Err(Error::InvalidHeader(_))
        ));
    }
}
