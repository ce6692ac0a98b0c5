//! Hash-preserving backups for a log-structured, content-addressed database.
//!
//! A backup walks the database's log, packs every reachable block into a
//! single-root CAR archive and uploads it alongside a JSON metadata document
//! to a content-addressed remote store. A restore pulls both back (block
//! network first, public HTTP gateways as fallback), installs the blocks
//! into the engine's block store and the log's storage, rediscovers the log
//! heads from the raw blocks and replays them, so the replica reopens at the
//! exact address of the source with every byte intact.
//!
//! Entry points live on [`Bridge`]; the pieces underneath are public for
//! hosts that need finer control.

pub mod backup;
pub mod block;
pub mod car;
pub mod cids;
pub mod codecs;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod gateway;
pub mod index;
pub mod metadata;
pub mod progress;
pub mod remote;
pub mod restore;
pub mod retry;

use std::sync::Arc;

pub use crate::backup::{BackupOptions, BackupReport};
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::fetch::{BlockNetwork, DownloadOptions, Downloader};
pub use crate::index::{BackupSummary, ListOptions};
pub use crate::progress::{BackupEvent, RestoreEvent};
pub use crate::remote::{Credentials, RemoteStore};
pub use crate::restore::{RestoreOptions, RestoreReport};

use crate::engine::{BlockStore, Database, Engine};

/// The backup/restore bridge: one remote store, one download chain, shared
/// configuration.
#[derive(Debug)]
pub struct Bridge {
    remote: Arc<dyn RemoteStore>,
    downloader: Downloader,
    config: Config,
}

impl Bridge {
    /// Builds a bridge with the configured gateway chain and an optional
    /// block-network handle in front of it.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        network: Option<Arc<dyn BlockNetwork>>,
        config: Config,
    ) -> Result<Self> {
        let downloader = Downloader::new(network, config.gateway_sources()?, config.retry());
        Ok(Self {
            remote,
            downloader,
            config,
        })
    }

    /// Uses an explicit downloader, e.g. one whose sources are not HTTP.
    pub fn with_downloader(
        remote: Arc<dyn RemoteStore>,
        downloader: Downloader,
        config: Config,
    ) -> Self {
        Self {
            remote,
            downloader,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Options pre-filled from this bridge's configuration.
    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            space_name: self.config.space_name.clone(),
            retry: self.config.retry(),
            ..Default::default()
        }
    }

    pub fn list_options(&self) -> ListOptions {
        ListOptions {
            space_name: self.config.space_name.clone(),
            retry: self.config.retry(),
            ..Default::default()
        }
    }

    pub fn restore_options(&self) -> RestoreOptions {
        RestoreOptions {
            list: self.list_options(),
            download: DownloadOptions {
                timeout: self.config.timeout(),
                ..Default::default()
            },
            timeout: self.config.timeout(),
            retry: self.config.retry(),
            ..Default::default()
        }
    }

    /// Backs up one open database; the database stays open.
    pub async fn backup(
        &self,
        db: &dyn Database,
        blockstore: &dyn BlockStore,
        opts: &BackupOptions,
    ) -> Result<BackupReport> {
        backup::backup(db, blockstore, self.remote.as_ref(), opts).await
    }

    /// Lists backups in the space, newest first.
    pub async fn list_backups(&self, opts: &ListOptions) -> Result<Vec<BackupSummary>> {
        index::list_backups(self.remote.as_ref(), &self.downloader, opts).await
    }

    /// Restores a backup into `engine` and returns the reopened database.
    pub async fn restore(&self, engine: &dyn Engine, opts: &RestoreOptions) -> Result<RestoreReport> {
        restore::restore(engine, self.remote.as_ref(), &self.downloader, opts).await
    }
}
