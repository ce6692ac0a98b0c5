//! The database-engine contract the backup/restore flows consume.
//!
//! The engine itself is an external collaborator; these traits name exactly
//! the operations the flows need and nothing else. [`mem`] provides a
//! drop-in in-memory engine.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use libipld::cbor::DagCborCodec;
use libipld::prelude::Codec as _;
use libipld::Ipld;
use multihash::{Code, MultihashDigest};

use crate::cids;
use crate::codecs::Codec;
use crate::entry::LogEntry;
use crate::error::{Error, Result};

pub mod mem;

pub const ADDRESS_PREFIX: &str = "/orbitdb/";

/// Extracts the manifest CID from a `/orbitdb/<cid>` address.
pub fn manifest_cid_of_address(address: &str) -> Result<Cid> {
    let tail = address
        .rsplit('/')
        .next()
        .filter(|tail| !tail.is_empty())
        .ok_or_else(|| Error::InvalidCid(format!("bad database address {:?}", address)))?;
    cids::parse(tail)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Events,
    KeyValue,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Events => "events",
            DatabaseType::KeyValue => "keyvalue",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "events" => Ok(DatabaseType::Events),
            "keyvalue" => Ok(DatabaseType::KeyValue),
            other => Err(Error::Engine(format!("unknown database type {:?}", other))),
        }
    }
}

/// A decoded database manifest block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub db_type: DatabaseType,
    /// `/ipfs/<cid>` pointer to the access-controller block, if any.
    pub access_controller: Option<String>,
}

impl Manifest {
    pub fn encode(&self) -> Result<(Cid, Bytes)> {
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Ipld::String(self.name.clone()));
        map.insert(
            "type".to_string(),
            Ipld::String(self.db_type.as_str().to_string()),
        );
        if let Some(ac) = &self.access_controller {
            map.insert("accessController".to_string(), Ipld::String(ac.clone()));
        }
        let bytes = DagCborCodec
            .encode(&Ipld::Map(map))
            .map_err(|e| Error::Engine(format!("manifest encoding failed: {}", e)))?;
        let cid = Cid::new_v1(Codec::DagCbor.into(), Code::Sha2_256.digest(&bytes));
        Ok((cid, bytes.into()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Manifest> {
        let ipld: Ipld = DagCborCodec
            .decode(bytes)
            .map_err(|e| Error::InvalidMetadata(format!("manifest decoding failed: {}", e)))?;
        let map = match ipld {
            Ipld::Map(map) => map,
            _ => return Err(Error::InvalidMetadata("manifest is not a map".into())),
        };
        let name = match map.get("name") {
            Some(Ipld::String(name)) => name.clone(),
            _ => return Err(Error::InvalidMetadata("manifest has no name".into())),
        };
        let db_type = match map.get("type") {
            Some(Ipld::String(t)) => t.parse()?,
            _ => return Err(Error::InvalidMetadata("manifest has no type".into())),
        };
        let access_controller = match map.get("accessController") {
            Some(Ipld::String(ac)) => Some(ac.clone()),
            _ => None,
        };
        Ok(Manifest {
            name,
            db_type,
            access_controller,
        })
    }

    /// The access-controller block CID, parsed out of the `/ipfs/` pointer.
    pub fn access_controller_cid(&self) -> Result<Option<Cid>> {
        match &self.access_controller {
            Some(pointer) => {
                let tail = pointer
                    .rsplit('/')
                    .next()
                    .filter(|tail| !tail.is_empty())
                    .ok_or_else(|| {
                        Error::InvalidCid(format!("bad access controller pointer {:?}", pointer))
                    })?;
                Ok(Some(cids::parse(tail)?))
            }
            None => Ok(None),
        }
    }
}

/// Content-addressed block store, keyed by CID.
#[async_trait]
pub trait BlockStore: fmt::Debug + Send + Sync {
    async fn put(&self, cid: &Cid, data: Bytes) -> Result<()>;
    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>>;
    async fn has(&self, cid: &Cid) -> Result<bool>;
}

/// The log-storage side of an open database, keyed by base58btc strings.
#[async_trait]
pub trait LogStore: fmt::Debug + Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
}

/// An open database handle.
#[async_trait]
pub trait Database: fmt::Debug + Send + Sync {
    fn address(&self) -> String;
    fn name(&self) -> String;
    fn db_type(&self) -> DatabaseType;

    /// The full log: every currently-visible entry, already transitively
    /// closed over `next`/`refs`.
    async fn log_entries(&self) -> Result<Vec<LogEntry>>;

    /// `database.all().length` semantics: entry count for `events`,
    /// live-key count for `keyvalue`.
    async fn all_len(&self) -> Result<usize>;

    fn log_storage(&self) -> Arc<dyn LogStore>;

    /// Feeds one entry to the log; the engine walks `next` through its log
    /// storage from there. Returns whether the entry was new.
    async fn join_entry(&self, entry: LogEntry) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub db_type: Option<DatabaseType>,
}

/// A database engine instance.
#[async_trait]
pub trait Engine: fmt::Debug + Send + Sync {
    fn blockstore(&self) -> Arc<dyn BlockStore>;
    async fn open(&self, address: &str, opts: OpenOptions) -> Result<Arc<dyn Database>>;
}
