//! The remote content-addressed store, as consumed: upload bytes, list the
//! space. The wire client behind this trait is not our concern; credentials
//! are validated for presence only and carry no policy.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;

use crate::error::{Error, Result};

pub mod mem;

/// Operator-facing name and mime type for an uploaded object. The remote
/// indexes by CID; the name exists for human inspection only.
#[derive(Debug, Clone)]
pub struct UploadInfo {
    pub name: String,
    pub mime: String,
}

impl UploadInfo {
    pub fn json(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime: "application/json".into(),
        }
    }

    pub fn car(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime: "application/vnd.ipld.car".into(),
        }
    }
}

/// Authentication material for the remote store: a static key/proof pair or
/// a delegated capability archive. Which one is in use changes nothing for
/// the flows here.
#[derive(Clone)]
pub enum Credentials {
    KeyProof { key: String, proof: String },
    Delegation { archive: Vec<u8> },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::KeyProof { .. } => f.write_str("Credentials::KeyProof(..)"),
            Credentials::Delegation { .. } => f.write_str("Credentials::Delegation(..)"),
        }
    }
}

impl Credentials {
    pub fn validate(&self) -> Result<()> {
        match self {
            Credentials::KeyProof { key, proof } => {
                if key.is_empty() {
                    return Err(Error::MissingCredentials("empty key"));
                }
                if proof.is_empty() {
                    return Err(Error::MissingCredentials("empty proof"));
                }
            }
            Credentials::Delegation { archive } => {
                if archive.is_empty() {
                    return Err(Error::MissingCredentials("empty delegation archive"));
                }
            }
        }
        Ok(())
    }
}

/// The two remote-store operations the flows consume.
#[async_trait]
pub trait RemoteStore: fmt::Debug + Send + Sync {
    /// Uploads an opaque file; the remote assigns and returns its root CID.
    async fn upload(&self, data: Bytes, info: UploadInfo) -> Result<Cid>;

    /// Root CIDs of every object in the authenticated space. No filenames
    /// come back, which is why listings must sniff object contents.
    async fn list_space(&self) -> Result<Vec<Cid>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_must_be_present() {
        let ok = Credentials::KeyProof {
            key: "mkey".into(),
            proof: "mproof".into(),
        };
        ok.validate().unwrap();

        let missing = Credentials::KeyProof {
            key: "mkey".into(),
            proof: String::new(),
        };
        assert!(matches!(
            missing.validate(),
            Err(Error::MissingCredentials("empty proof"))
        ));

        let empty = Credentials::Delegation { archive: vec![] };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn credentials_debug_redacts() {
        let creds = Credentials::KeyProof {
            key: "super secret".into(),
            proof: "even more secret".into(),
        };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret"));
    }
}
