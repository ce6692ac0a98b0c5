//! Drop-in in-memory remote store.
//!
//! Uploads are hashed into `raw`-codec roots the way the real store reports
//! them; the same object map doubles as a [`BlockSource`] so the whole
//! download chain can run offline.

use std::sync::Mutex;

use ahash::AHashMap;
use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use multihash::{Code, MultihashDigest};
use tracing::trace;

use crate::cids;
use crate::codecs::Codec;
use crate::error::{Error, Result};
use crate::fetch::{BlockSource, FetchLimits};

use super::{RemoteStore, UploadInfo};

#[derive(Debug, Default)]
pub struct MemRemoteStore {
    objects: Mutex<AHashMap<String, Bytes>>,
    /// Roots in upload order; listings are stable for a static store.
    order: Mutex<Vec<Cid>>,
}

impl MemRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        self.order.lock().unwrap().len()
    }

    fn lookup(&self, cid: &Cid) -> Result<Option<Bytes>> {
        let objects = self.objects.lock().unwrap();
        let key = cids::to_base32(cid)?;
        if let Some(bytes) = objects.get(&key) {
            return Ok(Some(bytes.clone()));
        }
        // the store keys by raw roots; accept a re-codec'd form of the same
        // multihash
        let raw_key = cids::to_base32(&cids::re_codec(cid, Codec::Raw))?;
        Ok(objects.get(&raw_key).cloned())
    }
}

#[async_trait]
impl RemoteStore for MemRemoteStore {
    async fn upload(&self, data: Bytes, info: UploadInfo) -> Result<Cid> {
        let cid = Cid::new_v1(Codec::Raw.into(), Code::Sha2_256.digest(&data));
        let key = cids::to_base32(&cid)?;
        trace!(name = %info.name, %cid, bytes = data.len(), "stored object");

        let mut objects = self.objects.lock().unwrap();
        if objects.insert(key, data).is_none() {
            self.order.lock().unwrap().push(cid);
        }
        Ok(cid)
    }

    async fn list_space(&self) -> Result<Vec<Cid>> {
        Ok(self.order.lock().unwrap().clone())
    }
}

#[async_trait]
impl BlockSource for MemRemoteStore {
    fn name(&self) -> String {
        "mem-store".into()
    }

    async fn fetch(&self, cid: &Cid, limits: &FetchLimits) -> Result<Bytes> {
        let bytes = self.lookup(cid)?.ok_or_else(|| Error::DownloadFailed {
            cid: cid.to_string(),
            reason: "object not in store".into(),
            status: Some(404),
        })?;
        if let Some(max) = limits.max_size {
            if bytes.len() > max {
                return Err(Error::DownloadFailed {
                    cid: cid.to_string(),
                    reason: format!("{} bytes exceeds the {} byte limit", bytes.len(), max),
                    status: None,
                });
            }
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_assigns_raw_base32_roots() {
        let store = MemRemoteStore::new();
        let cid = store
            .upload(Bytes::from_static(b"{}"), UploadInfo::json("meta.json"))
            .await
            .unwrap();
        assert_eq!(cid.codec(), 0x55);
        assert!(cid.to_string().starts_with('b'));

        let listed = store.list_space().await.unwrap();
        assert_eq!(listed, vec![cid]);
    }

    #[tokio::test]
    async fn same_bytes_same_root() {
        let store = MemRemoteStore::new();
        let a = store
            .upload(Bytes::from_static(b"dup"), UploadInfo::json("a"))
            .await
            .unwrap();
        let b = store
            .upload(Bytes::from_static(b"dup"), UploadInfo::json("b"))
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn fetch_round_trips() {
        let store = MemRemoteStore::new();
        let cid = store
            .upload(Bytes::from_static(b"bytes"), UploadInfo::car("b.car"))
            .await
            .unwrap();
        let limits = FetchLimits {
            timeout: std::time::Duration::from_secs(1),
            max_size: None,
        };
        assert_eq!(
            store.fetch(&cid, &limits).await.unwrap(),
            Bytes::from_static(b"bytes")
        );
    }
}
