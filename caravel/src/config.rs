use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fetch::BlockSource;
use crate::gateway::{HttpGateway, DEFAULT_GATEWAYS};
use crate::metadata::DEFAULT_SPACE;
use crate::retry::RetryConfig;

/// Configuration shared by the public entry points. Serializable so hosts
/// can load it from their own config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Priority-ordered gateway base urls for the fallback read path.
    pub gateways: Vec<String>,
    /// Space label written into backup metadata and matched on listing.
    pub space_name: String,
    /// Per-call timeout for remote operations, in milliseconds.
    pub timeout_ms: u64,
    /// Retry budget for remote calls.
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateways: DEFAULT_GATEWAYS.iter().map(|g| g.to_string()).collect(),
            space_name: DEFAULT_SPACE.to_string(),
            timeout_ms: 30_000,
            max_retries: 3,
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            ..Default::default()
        }
    }

    /// Builds the gateway chain in configured order.
    pub fn gateway_sources(&self) -> Result<Vec<Arc<dyn BlockSource>>> {
        self.gateways
            .iter()
            .map(|base| {
                HttpGateway::from_base(base).map(|gw| Arc::new(gw) as Arc<dyn BlockSource>)
            })
            .collect()
    }
}
