//! `ProxyRenderFetch`: delegate rendering to a paid scraping API.
//!
//! The API receives the target URL plus render options as query
//! parameters and returns the rendered HTML, which goes through the same
//! extractor as the other strategies. Requests are never sent without an
//! API key.

use super::Fetcher;
use super::extract::ContentExtractor;
use crate::config::ProxyConfig;
use crate::error::FetchError;
use crate::models::{RawPage, StrategyKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use urlencoding::encode;

/// Headroom left between the API's own render timeout and ours.
const API_TIMEOUT_HEADROOM_MS: u64 = 5_000;

pub struct ProxyRenderFetcher {
    client: reqwest::Client,
    extractor: Arc<ContentExtractor>,
    config: ProxyConfig,
}

impl ProxyRenderFetcher {
    pub fn new(
        config: &ProxyConfig,
        extractor: Arc<ContentExtractor>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        if config.api_key.is_none() {
            warn!("No rendering proxy API key configured; proxy attempts will fail fast");
        }
        Ok(Self {
            client,
            extractor,
            config: config.clone(),
        })
    }

    /// Full request URL for `target`, including the API key.
    fn request_url(&self, api_key: &str, target: &str) -> String {
        let api_timeout = self
            .config
            .timeout_ms
            .saturating_sub(API_TIMEOUT_HEADROOM_MS)
            .max(1_000);

        let mut params = vec![
            format!("api_key={}", encode(api_key)),
            format!("url={}", encode(target)),
            format!("render_js={}", self.config.render_js),
            format!("timeout={api_timeout}"),
        ];
        if let Some(wait_for) = &self.config.wait_for {
            params.push(format!("wait_for={}", encode(wait_for)));
        }
        if self.config.premium_proxy {
            params.push("premium_proxy=true".to_string());
        }
        if self.config.stealth_proxy {
            params.push("stealth_proxy=true".to_string());
        }

        let sep = if self.config.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.config.endpoint, sep, params.join("&"))
    }
}

#[async_trait]
impl Fetcher for ProxyRenderFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ProxyRenderFetch
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let api_key = match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key,
            _ => return Err(FetchError::ProxyCredentialsMissing),
        };

        let response = self
            .client
            .get(self.request_url(api_key, url))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.config.timeout_ms)
                } else {
                    // Strip the URL so the API key never lands in logs.
                    FetchError::ProxyUnavailable(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::ProxyUnavailable(format!("HTTP {status}")));
        }

        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.config.timeout_ms)
            } else {
                FetchError::ProxyUnavailable(e.without_url().to_string())
            }
        })?;

        let (title, body_text) = self.extractor.extract(&html);
        debug!(%url, bytes = html.len(), "Proxy render parsed");
        Ok(RawPage {
            title,
            body_text,
            source_strategy: StrategyKind::ProxyRenderFetch,
            fetched_at: Utc::now(),
        })
    }
}
