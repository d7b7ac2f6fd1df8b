//! `DirectFetch`: one HTTP GET with browser-like headers, no script execution.

use super::Fetcher;
use super::extract::ContentExtractor;
use crate::config::DirectConfig;
use crate::error::FetchError;
use crate::models::{RawPage, StrategyKind};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct DirectFetcher {
    client: reqwest::Client,
    extractor: Arc<ContentExtractor>,
    timeout_ms: u64,
}

impl DirectFetcher {
    pub fn new(
        config: &DirectConfig,
        extractor: Arc<ContentExtractor>,
    ) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7,ar;q=0.6"),
        );
        headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            extractor,
            timeout_ms: config.timeout_ms,
        })
    }

    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&e, self.timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!("HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&e, self.timeout_ms))
    }
}

#[async_trait]
impl Fetcher for DirectFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectFetch
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let html = self.fetch_html(url).await?;
        let (title, body_text) = self.extractor.extract(&html);
        debug!(%url, bytes = html.len(), chars = body_text.chars().count(), "Direct fetch parsed");
        Ok(RawPage {
            title,
            body_text,
            source_strategy: StrategyKind::DirectFetch,
            fetched_at: Utc::now(),
        })
    }
}
