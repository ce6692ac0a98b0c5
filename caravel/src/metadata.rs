//! The backup metadata document: the single source of truth a restore
//! consults.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cids;
use crate::error::{Error, Result};

pub const METADATA_VERSION: &str = "1.0";
pub const DEFAULT_SPACE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    pub address: String,
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(rename = "manifestCID")]
    pub manifest_cid: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub version: String,
    /// Millis since epoch; also the sort key for listings.
    pub timestamp: u64,
    #[serde(default = "default_space")]
    pub space_name: String,
    #[serde(default = "one")]
    pub database_count: u32,
    #[serde(default)]
    pub total_blocks: usize,
    /// Authoritative entry count for restore verification.
    #[serde(default)]
    pub total_entries: usize,
    #[serde(rename = "manifestCID", default)]
    pub manifest_cid: String,
    /// Filled in after the CAR upload assigns its root.
    #[serde(rename = "carCID", default, skip_serializing_if = "Option::is_none")]
    pub car_cid: Option<String>,
    pub databases: Vec<DatabaseInfo>,
    #[serde(default)]
    pub block_summary: BTreeMap<String, usize>,
}

fn default_space() -> String {
    DEFAULT_SPACE.to_string()
}

fn one() -> u32 {
    1
}

impl BackupMetadata {
    /// Shape validation for the restore path; every key §3 marks required
    /// must be present and coherent.
    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(Error::InvalidMetadata("empty version".into()));
        }
        if self.timestamp == 0 {
            return Err(Error::InvalidMetadata("missing timestamp".into()));
        }
        let db = self
            .databases
            .first()
            .ok_or_else(|| Error::InvalidMetadata("no databases listed".into()))?;
        if !db.address.starts_with("/orbitdb/") {
            return Err(Error::InvalidMetadata(format!(
                "unexpected database address {:?}",
                db.address
            )));
        }
        cids::parse(&self.manifest_cid)
            .map_err(|_| Error::InvalidMetadata(format!("bad manifestCID {:?}", self.manifest_cid)))?;
        match &self.car_cid {
            Some(car_cid) => {
                cids::parse(car_cid)
                    .map_err(|_| Error::InvalidMetadata(format!("bad carCID {:?}", car_cid)))?;
            }
            None => return Err(Error::InvalidMetadata("missing carCID".into())),
        }
        Ok(())
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// ISO-like stamp with `:` and `.` replaced so it is safe in file names.
pub fn file_stamp(timestamp_millis: u64) -> String {
    let stamp = OffsetDateTime::from_unix_timestamp_nanos(timestamp_millis as i128 * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| timestamp_millis.to_string());
    stamp.replace([':', '.'], "-")
}

pub fn metadata_filename(stamp: &str) -> String {
    format!("backup-{}-metadata.json", stamp)
}

pub fn car_filename(stamp: &str) -> String {
    format!("backup-{}-blocks.car", stamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BackupMetadata {
        BackupMetadata {
            version: METADATA_VERSION.to_string(),
            timestamp: 1_700_000_000_000,
            space_name: "test-space".into(),
            database_count: 1,
            total_blocks: 7,
            total_entries: 3,
            manifest_cid: "bafyreihyrpefhacm6kkp4ql6j6udakdit7g3dmkzfriqfykhjw6cad5lrm".into(),
            car_cid: Some("bafkreifw7plhl6mofk6sfvhnfh64qmkq73oeqwl6sloru6rehaoujituke".into()),
            databases: vec![DatabaseInfo {
                address: "/orbitdb/bafyreihyrpefhacm6kkp4ql6j6udakdit7g3dmkzfriqfykhjw6cad5lrm"
                    .into(),
                name: "todos".into(),
                db_type: "events".into(),
                manifest_cid: "bafyreihyrpefhacm6kkp4ql6j6udakdit7g3dmkzfriqfykhjw6cad5lrm".into(),
                entry_count: 3,
            }],
            block_summary: BTreeMap::from([("log_entry".into(), 3)]),
        }
    }

    #[test]
    fn wire_keys_match_the_document_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("manifestCID").is_some());
        assert!(json.get("carCID").is_some());
        assert!(json.get("spaceName").is_some());
        assert!(json.get("blockSummary").is_some());
        assert_eq!(json["databases"][0]["type"], "events");
        assert!(json["databases"][0].get("manifestCID").is_some());
        assert!(json["databases"][0].get("entryCount").is_some());
    }

    #[test]
    fn car_cid_is_omitted_until_assigned() {
        let mut meta = sample();
        meta.car_cid = None;
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("carCID").is_none());
        assert!(matches!(meta.validate(), Err(Error::InvalidMetadata(_))));
    }

    #[test]
    fn validates_complete_document() {
        sample().validate().unwrap();
    }

    #[test]
    fn lenient_parse_fills_defaults() {
        let json = r#"{
            "version": "1.0",
            "timestamp": 1700000000000,
            "databases": [{
                "address": "/orbitdb/bafy",
                "name": "x",
                "type": "events",
                "manifestCID": "bafy",
                "entryCount": 1
            }]
        }"#;
        let meta: BackupMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.space_name, DEFAULT_SPACE);
        assert_eq!(meta.database_count, 1);
    }

    #[test]
    fn file_stamp_has_no_reserved_chars() {
        let stamp = file_stamp(1_700_000_000_123);
        assert!(!stamp.contains(':'));
        assert!(!stamp.contains('.'));
        assert!(metadata_filename(&stamp).starts_with("backup-"));
        assert!(car_filename(&stamp).ends_with("-blocks.car"));
    }
}
