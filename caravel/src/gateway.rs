//! Public HTTP gateway read path.
//!
//! Overloaded gateways answer 200 OK with an HTML error page for content
//! they do not have; treating such a body as block bytes would poison the
//! restore, so the body is sniffed before it counts as a success.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use tracing::{trace, warn};
use url::Url;

use crate::error::{Error, GatewayErrorKind, Result};
use crate::fetch::{BlockSource, FetchLimits};

/// Priority-ordered defaults.
pub const DEFAULT_GATEWAYS: &[&str] = &[
    "https://w3s.link",
    "https://storacha.link",
    "https://dweb.link",
    "https://ipfs.io",
];

const HTML_SIGNATURES: &[&[u8]] = &[b"<!DOCTYPE", b"<html", b"<?xml"];

/// How often a single fetch tolerates 429 before giving up on the gateway.
const MAX_THROTTLE_ATTEMPTS: u32 = 3;
const THROTTLE_BASE: Duration = Duration::from_secs(1);
const THROTTLE_CAP: Duration = Duration::from_secs(10);

/// Whether a body starts like an HTML/XML error page.
pub fn looks_like_error_page(body: &[u8]) -> bool {
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let trimmed = &body[start..];
    HTML_SIGNATURES
        .iter()
        .any(|sig| trimmed.len() >= sig.len() && trimmed[..sig.len()].eq_ignore_ascii_case(sig))
}

#[derive(Debug, Clone)]
pub struct HttpGateway {
    base: Url,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_base(base: &str) -> Result<Self> {
        let url = Url::parse(base).map_err(|e| Error::DownloadFailed {
            cid: String::new(),
            reason: format!("bad gateway url {:?}: {}", base, e),
            status: None,
        })?;
        Ok(Self::new(url))
    }

    fn url_for(&self, cid: &Cid) -> Result<Url> {
        self.base
            .join(&format!("/ipfs/{}", cid))
            .map_err(|e| Error::DownloadFailed {
                cid: cid.to_string(),
                reason: format!("bad gateway url: {}", e),
                status: None,
            })
    }

    fn error(&self, kind: GatewayErrorKind) -> Error {
        Error::Gateway {
            gateway: self.name(),
            kind,
        }
    }
}

fn retry_after(response: &reqwest::Response, attempt: u32) -> Duration {
    let hinted = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    hinted
        .unwrap_or_else(|| THROTTLE_BASE * 2u32.saturating_pow(attempt))
        .min(THROTTLE_CAP)
}

#[async_trait]
impl BlockSource for HttpGateway {
    fn name(&self) -> String {
        self.base.host_str().unwrap_or("gateway").to_string()
    }

    async fn fetch(&self, cid: &Cid, limits: &FetchLimits) -> Result<Bytes> {
        let url = self.url_for(cid)?;
        let mut throttle_attempt = 0u32;

        loop {
            trace!(%url, "gateway fetch");
            let response =
                tokio::time::timeout(limits.timeout, self.client.get(url.clone()).send())
                    .await
                    .map_err(|_| Error::Timeout(limits.timeout))??;

            let status = response.status();
            if status.as_u16() == 429 && throttle_attempt < MAX_THROTTLE_ATTEMPTS {
                let delay = retry_after(&response, throttle_attempt);
                warn!(gateway = %self.name(), ?delay, "throttled, backing off");
                tokio::time::sleep(delay).await;
                throttle_attempt += 1;
                continue;
            }
            if !status.is_success() {
                return Err(self.error(GatewayErrorKind::Status(status.as_u16())));
            }

            let html_content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.starts_with("text/html"))
                .unwrap_or(false);
            if html_content_type {
                return Err(self.error(GatewayErrorKind::HtmlBody));
            }

            let body = tokio::time::timeout(limits.timeout, response.bytes())
                .await
                .map_err(|_| Error::Timeout(limits.timeout))??;

            if body.is_empty() {
                return Err(self.error(GatewayErrorKind::EmptyBody));
            }
            if let Some(max) = limits.max_size {
                if body.len() > max {
                    return Err(self.error(GatewayErrorKind::TooLarge(body.len())));
                }
            }
            if looks_like_error_page(&body) {
                return Err(self.error(GatewayErrorKind::HtmlBody));
            }
            return Ok(body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_signatures_are_rejected() {
        assert!(looks_like_error_page(b"<!DOCTYPE html><html>..."));
        assert!(looks_like_error_page(b"<html><body>504</body></html>"));
        assert!(looks_like_error_page(b"<?xml version=\"1.0\"?>"));
        assert!(looks_like_error_page(b"  \n\t<!doctype html>"));
    }

    #[test]
    fn real_payloads_pass() {
        assert!(!looks_like_error_page(b"{\"version\":\"1.0\"}"));
        assert!(!looks_like_error_page(&[0x0a, 0xa1, 0x67]));
        assert!(!looks_like_error_page(b""));
        // angle bracket alone is not a signature
        assert!(!looks_like_error_page(b"<car>"));
    }

    #[test]
    fn gateway_urls_follow_the_ipfs_path() {
        let gw = HttpGateway::from_base("https://w3s.link").unwrap();
        let cid: Cid = "bafkreifw7plhl6mofk6sfvhnfh64qmkq73oeqwl6sloru6rehaoujituke"
            .parse()
            .unwrap();
        assert_eq!(
            gw.url_for(&cid).unwrap().as_str(),
            "https://w3s.link/ipfs/bafkreifw7plhl6mofk6sfvhnfh64qmkq73oeqwl6sloru6rehaoujituke"
        );
        assert_eq!(gw.name(), "w3s.link");
    }

    #[test]
    fn default_gateways_parse() {
        for base in DEFAULT_GATEWAYS {
            HttpGateway::from_base(base).unwrap();
        }
    }
}
