//! URL canonicalisation: resolve shortener links to their final target.
//!
//! Only URLs whose host appears in the shortener table are resolved. The
//! lookup issues a redirect-following `HEAD`, then falls back to `GET` when
//! `HEAD` went nowhere or landed on another shortener. Any error or timeout
//! yields the original URL; canonicalisation never blocks a target.

use crate::config::{CanonicalizerConfig, DEFAULT_USER_AGENT};
use crate::utils::host_of;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub struct Canonicalizer {
    client: Client,
    shortener_hosts: Vec<String>,
    cache: Mutex<HashMap<String, String>>,
}

impl Canonicalizer {
    pub fn new(config: &CanonicalizerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(DEFAULT_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            shortener_hosts: config
                .shortener_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Whether `url` points at a known shortener host.
    pub fn is_shortened(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        self.shortener_hosts
            .iter()
            .any(|s| host == *s || host.ends_with(&format!(".{s}")))
    }

    /// Resolve `url` to its final destination, or return it unchanged.
    #[instrument(level = "debug", skip(self))]
    pub async fn canonicalize(&self, url: &str) -> String {
        if !self.is_shortened(url) {
            return url.to_string();
        }
        if let Some(hit) = self.cached(url) {
            debug!(%url, canonical = %hit, "Canonical URL cache hit");
            return hit;
        }

        let resolved = self.resolve(url).await;
        if resolved != url {
            info!(%url, canonical = %resolved, "Resolved shortened URL");
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(url.to_string(), resolved.clone());
        }
        resolved
    }

    fn cached(&self, url: &str) -> Option<String> {
        self.cache.lock().ok().and_then(|c| c.get(url).cloned())
    }

    async fn resolve(&self, url: &str) -> String {
        let after_head = match self.client.head(url).send().await {
            Ok(resp) => Some(resp.url().to_string()),
            Err(e) => {
                debug!(%url, error = %e, "HEAD resolution failed; trying GET");
                None
            }
        };

        if let Some(final_url) = &after_head {
            if final_url != url && !self.is_shortened(final_url) {
                return final_url.clone();
            }
        }

        match self.client.get(url).send().await {
            Ok(resp) => resp.url().to_string(),
            Err(e) => {
                warn!(%url, error = %e, "Could not resolve shortened URL; keeping original");
                url.to_string()
            }
        }
    }
}
