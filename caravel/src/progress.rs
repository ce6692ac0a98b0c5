//! Progress events for UI integrations.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum BackupEvent {
    Creating {
        address: String,
    },
    UploadingBlocks {
        blocks: usize,
        car_bytes: usize,
    },
    UploadingMetadata,
    Completed {
        metadata_cid: String,
        car_cid: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RestoreEvent {
    Found {
        metadata_cid: String,
        timestamp: u64,
    },
    DownloadingBlocks {
        car_cid: String,
    },
    RestoringBlocks {
        blocks: usize,
    },
    Completed {
        entries_recovered: usize,
    },
    Error {
        message: String,
    },
}

/// Optional event sink; sending never blocks and a dropped receiver is fine.
#[derive(Debug, Clone)]
pub struct ProgressSender<E> {
    tx: Option<UnboundedSender<E>>,
}

impl<E> ProgressSender<E> {
    pub fn new(tx: UnboundedSender<E>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: E) {
        if let Some(tx) = &self.tx {
            tx.send(event).ok();
        }
    }
}

impl<E> Default for ProgressSender<E> {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_kebab_case() {
        let ev = BackupEvent::UploadingBlocks {
            blocks: 5,
            car_bytes: 1024,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["status"], "uploading-blocks");

        let ev = RestoreEvent::Found {
            metadata_cid: "bafy".into(),
            timestamp: 1,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["status"], "found");
    }

    #[tokio::test]
    async fn dropped_receiver_is_harmless() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let progress = ProgressSender::new(tx);
        progress.send(BackupEvent::UploadingMetadata);
    }
}
