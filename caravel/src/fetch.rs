//! The prioritized read chain for remote blocks: block network first, then
//! each configured HTTP gateway in order.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::retry::{retry, RetryConfig};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call limits handed to a source.
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_size: Option<usize>,
}

/// A streaming fetch through the peer-to-peer block network.
#[async_trait]
pub trait BlockNetwork: fmt::Debug + Send + Sync {
    async fn cat(&self, cid: &Cid, timeout: Duration) -> Result<Bytes>;
}

/// One place bytes can be fetched from by CID; gateways implement this.
#[async_trait]
pub trait BlockSource: fmt::Debug + Send + Sync {
    fn name(&self) -> String;
    async fn fetch(&self, cid: &Cid, limits: &FetchLimits) -> Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub timeout: Duration,
    /// Try the block network before any gateway.
    pub use_network: bool,
    /// Fall back to the gateway chain when the network path fails. When
    /// disabled, a failed network attempt is the final answer.
    pub gateway_fallback: bool,
    pub max_size: Option<usize>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            use_network: true,
            gateway_fallback: true,
            max_size: None,
        }
    }
}

/// Multi-source downloader. Always yields the requested bytes or an error;
/// hash verification is the consumer's job.
#[derive(Debug, Clone)]
pub struct Downloader {
    network: Option<Arc<dyn BlockNetwork>>,
    gateways: Vec<Arc<dyn BlockSource>>,
    retry: RetryConfig,
}

impl Downloader {
    pub fn new(
        network: Option<Arc<dyn BlockNetwork>>,
        gateways: Vec<Arc<dyn BlockSource>>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            network,
            gateways,
            retry,
        }
    }

    pub fn gateway_count(&self) -> usize {
        self.gateways.len()
    }

    pub async fn download(&self, cid: &Cid, opts: &DownloadOptions) -> Result<Bytes> {
        let limits = FetchLimits {
            timeout: opts.timeout,
            max_size: opts.max_size,
        };

        let mut network_failure: Option<Error> = None;
        if opts.use_network {
            if let Some(network) = &self.network {
                match retry(&self.retry, || network.cat(cid, opts.timeout)).await {
                    Ok(bytes) => {
                        check_size(cid, &bytes, limits.max_size)?;
                        debug!(%cid, bytes = bytes.len(), "fetched via block network");
                        return Ok(bytes);
                    }
                    Err(err) => {
                        warn!(%cid, "network fetch failed: {}", err);
                        network_failure = Some(err);
                    }
                }
            }
        }

        if !opts.gateway_fallback {
            let reason = network_failure
                .map(|err| err.to_string())
                .unwrap_or_else(|| "network path unavailable".to_string());
            return Err(Error::GatewayFallbackDisabled { reason });
        }

        let mut last_failure: Option<Error> = None;
        for gateway in &self.gateways {
            match gateway.fetch(cid, &limits).await {
                Ok(bytes) => {
                    check_size(cid, &bytes, limits.max_size)?;
                    debug!(%cid, gateway = %gateway.name(), "fetched via gateway");
                    return Ok(bytes);
                }
                Err(err) => {
                    warn!(%cid, gateway = %gateway.name(), "gateway fetch failed: {}", err);
                    last_failure = Some(err);
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| Error::DownloadFailed {
            cid: cid.to_string(),
            reason: "no download sources configured".into(),
            status: None,
        }))
    }
}

fn check_size(cid: &Cid, bytes: &Bytes, max_size: Option<usize>) -> Result<()> {
    if let Some(max) = max_size {
        if bytes.len() > max {
            return Err(Error::DownloadFailed {
                cid: cid.to_string(),
                reason: format!("{} bytes exceeds the {} byte limit", bytes.len(), max),
                status: None,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use multihash::{Code, MultihashDigest};

    use crate::codecs::Codec;

    use super::*;

    fn cid_of(data: &[u8]) -> Cid {
        Cid::new_v1(Codec::Raw.into(), Code::Sha2_256.digest(data))
    }

    #[derive(Debug)]
    struct FailingNetwork {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BlockNetwork for FailingNetwork {
        async fn cat(&self, _cid: &Cid, _timeout: Duration) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Engine("injected network failure".into()))
        }
    }

    #[derive(Debug)]
    struct FixedSource {
        data: Bytes,
    }

    #[async_trait]
    impl BlockSource for FixedSource {
        fn name(&self) -> String {
            "fixed".into()
        }

        async fn fetch(&self, _cid: &Cid, _limits: &FetchLimits) -> Result<Bytes> {
            Ok(self.data.clone())
        }
    }

    #[tokio::test]
    async fn falls_back_to_gateways_when_the_network_fails() {
        let network = Arc::new(FailingNetwork {
            calls: AtomicUsize::new(0),
        });
        let downloader = Downloader::new(
            Some(network.clone()),
            vec![Arc::new(FixedSource {
                data: Bytes::from_static(b"payload"),
            })],
            RetryConfig::default(),
        );

        let bytes = downloader
            .download(&cid_of(b"payload"), &DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(bytes, Bytes::from_static(b"payload"));
        // the injected failure is terminal, so exactly one attempt
        assert_eq!(network.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_fallback_reports_the_network_failure() {
        let network = Arc::new(FailingNetwork {
            calls: AtomicUsize::new(0),
        });
        let downloader = Downloader::new(
            Some(network),
            vec![Arc::new(FixedSource {
                data: Bytes::from_static(b"payload"),
            })],
            RetryConfig::default(),
        );

        let opts = DownloadOptions {
            gateway_fallback: false,
            ..Default::default()
        };
        let err = downloader
            .download(&cid_of(b"payload"), &opts)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gateway fallback is disabled"));
    }

    #[tokio::test]
    async fn size_limit_applies_to_every_source() {
        let downloader = Downloader::new(
            None,
            vec![Arc::new(FixedSource {
                data: Bytes::from(vec![0u8; 2048]),
            })],
            RetryConfig::default(),
        );
        let opts = DownloadOptions {
            max_size: Some(1024),
            ..Default::default()
        };
        assert!(downloader
            .download(&cid_of(b"big"), &opts)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn empty_chain_is_an_error() {
        let downloader = Downloader::new(None, vec![], RetryConfig::default());
        let err = downloader
            .download(&cid_of(b"nothing"), &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DownloadFailed { .. }));
    }
}
