//! Signed log entries: the dag-cbor shape `{v, id, key, sig, next, refs,
//! clock, payload, identity}`.
//!
//! Signatures are carried byte-for-byte and never verified here; access
//! control is the engine's concern.

use std::collections::BTreeMap;

use bytes::Bytes;
use cid::Cid;
use libipld::cbor::DagCborCodec;
use libipld::prelude::Codec as _;
use libipld::Ipld;
use multihash::{Code, MultihashDigest};

use crate::cids;
use crate::codecs::Codec;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryClock {
    /// The author's public key.
    pub id: String,
    /// Lamport time.
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub op: String,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl Payload {
    pub fn add(value: impl Into<String>) -> Self {
        Payload {
            op: "ADD".into(),
            key: None,
            value: Some(value.into()),
        }
    }

    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Payload {
            op: "PUT".into(),
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Payload {
            op: "DEL".into(),
            key: Some(key.into()),
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// base58btc CID of the entry block; derived from the encoded bytes.
    pub hash: String,
    pub v: u64,
    /// Log id, which is the database address.
    pub id: String,
    /// Author public key, hex.
    pub key: String,
    /// Signature over the unsigned encoding, hex.
    pub sig: String,
    /// base58btc CIDs of the direct predecessors.
    pub next: Vec<String>,
    /// base58btc CIDs of older entries, as skip links.
    pub refs: Vec<String>,
    pub clock: EntryClock,
    pub payload: Payload,
    /// CID string of the author's identity block.
    pub identity: String,
}

impl LogEntry {
    fn to_ipld(&self, with_sig: bool) -> Ipld {
        let mut payload = BTreeMap::new();
        payload.insert("op".to_string(), Ipld::String(self.payload.op.clone()));
        payload.insert(
            "key".to_string(),
            match &self.payload.key {
                Some(k) => Ipld::String(k.clone()),
                None => Ipld::Null,
            },
        );
        payload.insert(
            "value".to_string(),
            match &self.payload.value {
                Some(v) => Ipld::String(v.clone()),
                None => Ipld::Null,
            },
        );

        let mut clock = BTreeMap::new();
        clock.insert("id".to_string(), Ipld::String(self.clock.id.clone()));
        clock.insert("time".to_string(), Ipld::Integer(self.clock.time as i128));

        let mut map = BTreeMap::new();
        map.insert("v".to_string(), Ipld::Integer(self.v as i128));
        map.insert("id".to_string(), Ipld::String(self.id.clone()));
        map.insert("key".to_string(), Ipld::String(self.key.clone()));
        if with_sig {
            map.insert("sig".to_string(), Ipld::String(self.sig.clone()));
        }
        map.insert(
            "next".to_string(),
            Ipld::List(self.next.iter().cloned().map(Ipld::String).collect()),
        );
        map.insert(
            "refs".to_string(),
            Ipld::List(self.refs.iter().cloned().map(Ipld::String).collect()),
        );
        map.insert("clock".to_string(), Ipld::Map(clock));
        map.insert("payload".to_string(), Ipld::Map(payload));
        map.insert("identity".to_string(), Ipld::String(self.identity.clone()));
        Ipld::Map(map)
    }

    /// The bytes an author signs: the entry encoding without `sig`.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        DagCborCodec
            .encode(&self.to_ipld(false))
            .map_err(|e| Error::Engine(format!("entry encoding failed: {}", e)))
    }

    /// Encodes the full entry, derives its CID and fills in `hash`.
    pub fn seal(&mut self) -> Result<(Cid, Bytes)> {
        let bytes = DagCborCodec
            .encode(&self.to_ipld(true))
            .map_err(|e| Error::Engine(format!("entry encoding failed: {}", e)))?;
        let cid = Cid::new_v1(Codec::DagCbor.into(), Code::Sha2_256.digest(&bytes));
        self.hash = cids::to_base58btc(&cid)?;
        Ok((cid, bytes.into()))
    }

    /// Decodes an entry block. Fails when the bytes are not dag-cbor or the
    /// map is not entry-shaped.
    pub fn decode(cid: &Cid, bytes: &[u8]) -> Result<LogEntry> {
        let ipld: Ipld = DagCborCodec
            .decode(bytes)
            .map_err(|e| Error::Engine(format!("entry decoding failed: {}", e)))?;
        let map = match ipld {
            Ipld::Map(map) => map,
            _ => return Err(Error::Engine("entry block is not a map".into())),
        };

        let sig = require_str(&map, "sig")?;
        let key = require_str(&map, "key")?;
        let identity = require_str(&map, "identity")?;

        let clock = match map.get("clock") {
            Some(Ipld::Map(clock)) => EntryClock {
                id: require_str(clock, "id")?,
                time: require_int(clock, "time")?,
            },
            _ => return Err(Error::Engine("entry clock missing".into())),
        };

        let payload = match map.get("payload") {
            Some(Ipld::Map(payload)) => Payload {
                op: require_str(payload, "op")?,
                key: optional_str(payload, "key"),
                value: optional_str(payload, "value"),
            },
            _ => return Err(Error::Engine("entry payload missing".into())),
        };

        Ok(LogEntry {
            hash: cids::to_base58btc(cid)?,
            v: require_int(&map, "v")?,
            id: require_str(&map, "id")?,
            key,
            sig,
            next: str_list(&map, "next"),
            refs: str_list(&map, "refs"),
            clock,
            payload,
            identity,
        })
    }

    /// Shape-sniffing variant used by head rediscovery: `None` for any
    /// dag-cbor block that is not a log entry.
    pub fn sniff(cid: &Cid, bytes: &[u8]) -> Option<LogEntry> {
        LogEntry::decode(cid, bytes).ok()
    }
}

fn require_str(map: &BTreeMap<String, Ipld>, field: &str) -> Result<String> {
    match map.get(field) {
        Some(Ipld::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(Error::Engine(format!("entry field {:?} missing", field))),
    }
}

fn optional_str(map: &BTreeMap<String, Ipld>, field: &str) -> Option<String> {
    match map.get(field) {
        Some(Ipld::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn require_int(map: &BTreeMap<String, Ipld>, field: &str) -> Result<u64> {
    match map.get(field) {
        Some(Ipld::Integer(i)) if *i >= 0 => Ok(*i as u64),
        _ => Err(Error::Engine(format!("entry field {:?} missing", field))),
    }
}

fn str_list(map: &BTreeMap<String, Ipld>, field: &str) -> Vec<String> {
    match map.get(field) {
        Some(Ipld::List(items)) => items
            .iter()
            .filter_map(|item| match item {
                Ipld::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
