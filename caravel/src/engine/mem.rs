//! Drop-in in-memory database engine.
//!
//! Behaves like the real engine where it matters for backup and restore: a
//! fresh engine instance opening a restored address sees the manifest but an
//! empty log, because opening only consults the engine's own head registry.
//! Entries appear once heads are joined and the log re-reads its storage.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use data_encoding::HEXLOWER;
use ed25519_dalek::{Signer, SigningKey};
use libipld::cbor::DagCborCodec;
use libipld::prelude::Codec as _;
use libipld::Ipld;
use multihash::{Code, MultihashDigest};
use rand::rngs::OsRng;
use tracing::{debug, trace, warn};

use crate::cids;
use crate::codecs::Codec;
use crate::entry::{EntryClock, LogEntry, Payload};
use crate::error::{Error, Result};

use super::{
    manifest_cid_of_address, BlockStore, Database, DatabaseType, Engine, LogStore, Manifest,
    OpenOptions, ADDRESS_PREFIX,
};

#[derive(Debug, Default)]
pub struct MemBlockStore {
    blocks: Mutex<AHashMap<String, Bytes>>,
}

#[async_trait]
impl BlockStore for MemBlockStore {
    async fn put(&self, cid: &Cid, data: Bytes) -> Result<()> {
        let key = cids::to_base32(cid)?;
        self.blocks.lock().unwrap().insert(key, data);
        Ok(())
    }

    async fn get(&self, cid: &Cid) -> Result<Option<Bytes>> {
        let key = cids::to_base32(cid)?;
        Ok(self.blocks.lock().unwrap().get(&key).cloned())
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        let key = cids::to_base32(cid)?;
        Ok(self.blocks.lock().unwrap().contains_key(&key))
    }
}

#[derive(Debug, Default)]
pub struct MemLogStore {
    entries: Mutex<AHashMap<String, Bytes>>,
}

#[async_trait]
impl LogStore for MemLogStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }
}

/// A writer identity: an ed25519 key pair plus its published identity block.
struct MemIdentity {
    signing_key: SigningKey,
    public_key: String,
    hash: String,
    cid: Cid,
    bytes: Bytes,
}

impl fmt::Debug for MemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemIdentity")
            .field("public_key", &self.public_key)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

impl MemIdentity {
    fn generate() -> Result<Self> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = HEXLOWER.encode(signing_key.verifying_key().as_bytes());

        let id_sig = HEXLOWER.encode(&signing_key.sign(public_key.as_bytes()).to_bytes());
        let pk_sig = HEXLOWER.encode(&signing_key.sign(id_sig.as_bytes()).to_bytes());

        let mut signatures = BTreeMap::new();
        signatures.insert("id".to_string(), Ipld::String(id_sig));
        signatures.insert("publicKey".to_string(), Ipld::String(pk_sig));

        let mut map = BTreeMap::new();
        map.insert("id".to_string(), Ipld::String(public_key.clone()));
        map.insert("publicKey".to_string(), Ipld::String(public_key.clone()));
        map.insert("signatures".to_string(), Ipld::Map(signatures));
        map.insert("type".to_string(), Ipld::String("ed25519".to_string()));

        let bytes = DagCborCodec
            .encode(&Ipld::Map(map))
            .map_err(|e| Error::Engine(format!("identity encoding failed: {}", e)))?;
        let cid = Cid::new_v1(Codec::DagCbor.into(), Code::Sha2_256.digest(&bytes));
        let hash = cids::to_base58btc(&cid)?;

        Ok(MemIdentity {
            signing_key,
            public_key,
            hash,
            cid,
            bytes: bytes.into(),
        })
    }
}

#[derive(Debug, Default)]
struct EngineState {
    /// Heads this engine instance remembers per address.
    heads: AHashMap<String, Vec<String>>,
    /// Log storage per address, shared across close/reopen.
    log_stores: AHashMap<String, Arc<MemLogStore>>,
}

/// An in-memory engine instance. Cloning shares the underlying stores.
#[derive(Debug, Clone, Default)]
pub struct MemEngine {
    blockstore: Arc<MemBlockStore>,
    state: Arc<Mutex<EngineState>>,
}

impl MemEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a brand-new database: identity, access controller and
    /// manifest blocks are written and the address is derived from the
    /// manifest CID.
    pub async fn create(&self, name: &str, db_type: DatabaseType) -> Result<Arc<MemDatabase>> {
        let identity = Arc::new(MemIdentity::generate()?);
        self.blockstore
            .put(&identity.cid, identity.bytes.clone())
            .await?;

        let mut controller = BTreeMap::new();
        controller.insert("type".to_string(), Ipld::String("ipfs".to_string()));
        controller.insert(
            "write".to_string(),
            Ipld::List(vec![Ipld::String(identity.public_key.clone())]),
        );
        let controller_bytes = DagCborCodec
            .encode(&Ipld::Map(controller))
            .map_err(|e| Error::Engine(format!("controller encoding failed: {}", e)))?;
        let controller_cid =
            Cid::new_v1(Codec::DagCbor.into(), Code::Sha2_256.digest(&controller_bytes));
        self.blockstore
            .put(&controller_cid, controller_bytes.into())
            .await?;

        let manifest = Manifest {
            name: name.to_string(),
            db_type,
            access_controller: Some(format!("/ipfs/{}", cids::to_base58btc(&controller_cid)?)),
        };
        let (manifest_cid, manifest_bytes) = manifest.encode()?;
        self.blockstore.put(&manifest_cid, manifest_bytes).await?;

        let address = format!("{}{}", ADDRESS_PREFIX, cids::to_base32(&manifest_cid)?);
        debug!(%address, name, "created database");

        let log = self.log_store_for(&address);
        let db = Arc::new(MemDatabase {
            address,
            name: name.to_string(),
            db_type,
            blockstore: self.blockstore.clone(),
            log,
            engine: self.state.clone(),
            identity: Mutex::new(Some(identity)),
            state: Mutex::new(DbState::default()),
            closed: AtomicBool::new(false),
        });
        db.sync_registry();
        Ok(db)
    }

    /// Opens an existing address. The manifest must already be in the block
    /// store; the log holds whatever this engine instance remembers.
    pub async fn open_mem(&self, address: &str, opts: OpenOptions) -> Result<Arc<MemDatabase>> {
        let manifest_cid = manifest_cid_of_address(address)?;
        let manifest_bytes = self
            .blockstore
            .get(&manifest_cid)
            .await?
            .ok_or_else(|| Error::Engine(format!("unknown database {:?}", address)))?;
        let manifest = Manifest::decode(&manifest_bytes)?;

        if let Some(expected) = opts.db_type {
            if expected != manifest.db_type {
                return Err(Error::Engine(format!(
                    "address {:?} is a {} database, not {}",
                    address, manifest.db_type, expected
                )));
            }
        }

        let log = self.log_store_for(address);
        let heads = self
            .state
            .lock()
            .unwrap()
            .heads
            .get(address)
            .cloned()
            .unwrap_or_default();

        let db = Arc::new(MemDatabase {
            address: address.to_string(),
            name: manifest.name,
            db_type: manifest.db_type,
            blockstore: self.blockstore.clone(),
            log,
            engine: self.state.clone(),
            identity: Mutex::new(None),
            state: Mutex::new(DbState::default()),
            closed: AtomicBool::new(false),
        });
        db.hydrate(heads).await?;
        Ok(db)
    }

    fn log_store_for(&self, address: &str) -> Arc<MemLogStore> {
        self.state
            .lock()
            .unwrap()
            .log_stores
            .entry(address.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Engine for MemEngine {
    fn blockstore(&self) -> Arc<dyn BlockStore> {
        self.blockstore.clone()
    }

    async fn open(&self, address: &str, opts: OpenOptions) -> Result<Arc<dyn Database>> {
        let db = self.open_mem(address, opts).await?;
        Ok(db)
    }
}

#[derive(Debug, Default)]
struct DbState {
    entries: AHashMap<String, LogEntry>,
    heads: Vec<String>,
    time: u64,
}

#[derive(Debug)]
pub struct MemDatabase {
    address: String,
    name: String,
    db_type: DatabaseType,
    blockstore: Arc<MemBlockStore>,
    log: Arc<MemLogStore>,
    engine: Arc<Mutex<EngineState>>,
    identity: Mutex<Option<Arc<MemIdentity>>>,
    state: Mutex<DbState>,
    closed: AtomicBool,
}

impl MemDatabase {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Engine(format!(
                "database {:?} is closed",
                self.address
            )));
        }
        Ok(())
    }

    async fn writer_identity(&self) -> Result<Arc<MemIdentity>> {
        if let Some(identity) = self.identity.lock().unwrap().clone() {
            return Ok(identity);
        }
        let identity = Arc::new(MemIdentity::generate()?);
        self.blockstore
            .put(&identity.cid, identity.bytes.clone())
            .await?;
        let mut slot = self.identity.lock().unwrap();
        Ok(slot.get_or_insert(identity).clone())
    }

    /// Appends one operation to the log.
    async fn append(&self, payload: Payload) -> Result<String> {
        self.ensure_open()?;
        let identity = self.writer_identity().await?;

        let mut entry = {
            let state = self.state.lock().unwrap();
            let next = state.heads.clone();
            let refs = refs_for(&state, &next);
            LogEntry {
                hash: String::new(),
                v: 2,
                id: self.address.clone(),
                key: identity.public_key.clone(),
                sig: String::new(),
                next,
                refs,
                clock: EntryClock {
                    id: identity.public_key.clone(),
                    time: state.time + 1,
                },
                payload,
                identity: identity.hash.clone(),
            }
        };

        let unsigned = entry.signing_payload()?;
        entry.sig = HEXLOWER.encode(&identity.signing_key.sign(&unsigned).to_bytes());
        let (cid, bytes) = entry.seal()?;

        self.blockstore.put(&cid, bytes.clone()).await?;
        self.log.put(&entry.hash, bytes).await?;

        {
            let mut state = self.state.lock().unwrap();
            state.time = state.time.max(entry.clock.time);
            state.heads.retain(|head| !entry.next.contains(head));
            state.heads.push(entry.hash.clone());
            state.entries.insert(entry.hash.clone(), entry.clone());
        }
        self.sync_registry();
        trace!(hash = %entry.hash, "appended entry");
        Ok(entry.hash)
    }

    pub async fn add(&self, value: impl Into<String>) -> Result<String> {
        self.append(Payload::add(value)).await
    }

    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<String> {
        self.append(Payload::put(key, value)).await
    }

    pub async fn del(&self, key: impl Into<String>) -> Result<String> {
        self.append(Payload::del(key)).await
    }

    /// Event payload values in clock order.
    pub async fn values(&self) -> Result<Vec<String>> {
        Ok(self
            .sorted_entries()
            .into_iter()
            .filter_map(|entry| entry.payload.value)
            .collect())
    }

    /// The reduced key-value view: last write wins, deletes remove.
    pub async fn as_map(&self) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for entry in self.sorted_entries() {
            let Some(key) = entry.payload.key else {
                continue;
            };
            match entry.payload.op.as_str() {
                "PUT" => {
                    map.insert(key, entry.payload.value.unwrap_or_default());
                }
                "DEL" => {
                    map.remove(&key);
                }
                _ => {}
            }
        }
        Ok(map)
    }

    fn sorted_entries(&self) -> Vec<LogEntry> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<_> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.clock
                .time
                .cmp(&b.clock.time)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        entries
    }

    fn sync_registry(&self) {
        let heads = self.state.lock().unwrap().heads.clone();
        self.engine
            .lock()
            .unwrap()
            .heads
            .insert(self.address.clone(), heads);
    }

    fn recompute_heads(state: &mut DbState) {
        let referenced: AHashSet<&String> = state
            .entries
            .values()
            .flat_map(|entry| entry.next.iter())
            .collect();
        let mut heads: Vec<String> = state
            .entries
            .keys()
            .filter(|hash| !referenced.contains(*hash))
            .cloned()
            .collect();
        heads.sort();
        state.heads = heads;
    }

    /// Loads the entry set reachable from `heads` out of log storage.
    async fn hydrate(&self, heads: Vec<String>) -> Result<()> {
        let mut stack = heads.clone();
        let mut loaded: Vec<LogEntry> = Vec::new();
        let mut seen: AHashSet<String> = AHashSet::new();

        while let Some(hash) = stack.pop() {
            if !seen.insert(hash.clone()) {
                continue;
            }
            let Some(bytes) = self.log.get(&hash).await? else {
                warn!(%hash, "head refers to an entry missing from log storage");
                continue;
            };
            let cid = cids::parse(&hash)?;
            match LogEntry::decode(&cid, &bytes) {
                Ok(entry) => {
                    stack.extend(entry.next.iter().cloned());
                    loaded.push(entry);
                }
                Err(err) => warn!(%hash, "undecodable entry in log storage: {}", err),
            }
        }

        let mut state = self.state.lock().unwrap();
        for entry in loaded {
            state.time = state.time.max(entry.clock.time);
            state.entries.insert(entry.hash.clone(), entry);
        }
        Self::recompute_heads(&mut state);
        Ok(())
    }
}

/// Skip links: the parents' own predecessors, deduped and capped.
fn refs_for(state: &DbState, next: &[String]) -> Vec<String> {
    let mut refs = Vec::new();
    for hash in next {
        if let Some(parent) = state.entries.get(hash) {
            for older in &parent.next {
                if !next.contains(older) && !refs.contains(older) {
                    refs.push(older.clone());
                }
            }
        }
    }
    refs.truncate(8);
    refs
}

#[async_trait]
impl Database for MemDatabase {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    async fn log_entries(&self) -> Result<Vec<LogEntry>> {
        self.ensure_open()?;
        Ok(self.sorted_entries())
    }

    async fn all_len(&self) -> Result<usize> {
        self.ensure_open()?;
        match self.db_type {
            DatabaseType::Events => Ok(self.state.lock().unwrap().entries.len()),
            DatabaseType::KeyValue => Ok(self.as_map().await?.len()),
        }
    }

    fn log_storage(&self) -> Arc<dyn LogStore> {
        self.log.clone()
    }

    async fn join_entry(&self, entry: LogEntry) -> Result<bool> {
        self.ensure_open()?;

        // collect the entry plus every ancestor reachable through log
        // storage before touching the log state
        let mut pending: Vec<LogEntry> = Vec::new();
        let mut seen: AHashSet<String> = AHashSet::new();
        let mut stack = vec![entry];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.hash.clone()) {
                continue;
            }
            if self.state.lock().unwrap().entries.contains_key(&current.hash) {
                continue;
            }
            for hash in &current.next {
                if seen.contains(hash)
                    || self.state.lock().unwrap().entries.contains_key(hash)
                {
                    continue;
                }
                match self.log.get(hash).await? {
                    Some(bytes) => {
                        let cid = cids::parse(hash)?;
                        match LogEntry::decode(&cid, &bytes) {
                            Ok(parent) => stack.push(parent),
                            Err(err) => {
                                warn!(%hash, "undecodable ancestor skipped: {}", err)
                            }
                        }
                    }
                    None => warn!(%hash, "ancestor missing from log storage"),
                }
            }
            pending.push(current);
        }

        let mut added = false;
        {
            let mut state = self.state.lock().unwrap();
            for entry in pending {
                state.time = state.time.max(entry.clock.time);
                if state.entries.insert(entry.hash.clone(), entry).is_none() {
                    added = true;
                }
            }
            Self::recompute_heads(&mut state);
        }
        self.sync_registry();
        Ok(added)
    }

    async fn close(&self) -> Result<()> {
        self.sync_registry();
        self.state.lock().unwrap().entries.clear();
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_hash_as_zdpu() {
        let engine = MemEngine::new();
        let db = engine.create("journal", DatabaseType::Events).await.unwrap();
        let hash = db.add("Entry 1").await.unwrap();
        assert!(hash.starts_with("zdpu"));
    }

    #[tokio::test]
    async fn close_and_reopen_preserves_entries() {
        let engine = MemEngine::new();
        let db = engine.create("journal", DatabaseType::Events).await.unwrap();
        let address = db.address();
        db.add("Entry 1").await.unwrap();
        db.add("Entry 2").await.unwrap();
        db.close().await.unwrap();

        let db = engine
            .open_mem(&address, OpenOptions::default())
            .await
            .unwrap();
        assert_eq!(db.all_len().await.unwrap(), 2);
        assert_eq!(db.values().await.unwrap(), vec!["Entry 1", "Entry 2"]);
    }

    #[tokio::test]
    async fn fresh_engine_opens_empty_until_heads_join() {
        let source = MemEngine::new();
        let db = source.create("journal", DatabaseType::Events).await.unwrap();
        let address = db.address();
        db.add("Entry 1").await.unwrap();
        let entries = db.log_entries().await.unwrap();

        // move the manifest and log blocks by hand
        let target = MemEngine::new();
        let manifest_cid = manifest_cid_of_address(&address).unwrap();
        let manifest_bytes = source
            .blockstore()
            .get(&manifest_cid)
            .await
            .unwrap()
            .unwrap();
        target
            .blockstore()
            .put(&manifest_cid, manifest_bytes)
            .await
            .unwrap();

        let restored = target
            .open_mem(&address, OpenOptions::default())
            .await
            .unwrap();
        assert_eq!(restored.all_len().await.unwrap(), 0);

        // install the entry bytes and join the head
        for entry in &entries {
            let bytes = db.log_storage().get(&entry.hash).await.unwrap().unwrap();
            restored.log_storage().put(&entry.hash, bytes).await.unwrap();
        }
        restored.join_entry(entries.last().unwrap().clone()).await.unwrap();
        assert_eq!(restored.all_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn keyvalue_reduces_last_write() {
        let engine = MemEngine::new();
        let db = engine.create("kv", DatabaseType::KeyValue).await.unwrap();
        db.put("todo-1", "write tests").await.unwrap();
        db.put("todo-2", "ship it").await.unwrap();
        db.put("todo-1", "write more tests").await.unwrap();
        db.del("todo-2").await.unwrap();

        assert_eq!(db.all_len().await.unwrap(), 1);
        let map = db.as_map().await.unwrap();
        assert_eq!(map.get("todo-1").map(String::as_str), Some("write more tests"));

        // the log itself still carries every operation
        assert_eq!(db.log_entries().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn closed_handles_refuse_io() {
        let engine = MemEngine::new();
        let db = engine.create("journal", DatabaseType::Events).await.unwrap();
        db.close().await.unwrap();
        assert!(db.add("too late").await.is_err());
        assert!(db.all_len().await.is_err());
    }
}
