//! `BrowserFetch`: render the page in headless Chromium.
//!
//! One tab per attempt. Stored cookies for the domain are installed before
//! navigation and whatever the tab holds afterwards is merged back into the
//! session store under the host the tab landed on, whether or not the
//! attempt produced usable text.

use super::Fetcher;
use super::extract::ContentExtractor;
use crate::config::BrowserConfig;
use crate::error::FetchError;
use crate::models::{RawPage, StrategyKind};
use crate::renderer::{RenderContext, Renderer};
use crate::session::SessionStore;
use crate::utils::host_of;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, instrument, warn};

const READINESS_POLL: Duration = Duration::from_millis(250);
/// Pause after a consent click so the overlay can go away.
const CONSENT_SETTLE: Duration = Duration::from_millis(500);

pub struct BrowserFetcher {
    renderer: Arc<dyn Renderer>,
    sessions: Arc<SessionStore>,
    extractor: Arc<ContentExtractor>,
    config: BrowserConfig,
}

impl BrowserFetcher {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        sessions: Arc<SessionStore>,
        extractor: Arc<ContentExtractor>,
        config: &BrowserConfig,
    ) -> Self {
        Self {
            renderer,
            sessions,
            extractor,
            config: config.clone(),
        }
    }

    /// Navigate, wait for content, dismiss consent, and return the HTML.
    async fn render(
        &self,
        ctx: &mut Box<dyn RenderContext>,
        url: &str,
    ) -> Result<String, FetchError> {
        let nav_timeout = self.config.navigation_timeout_ms;
        match timeout(Duration::from_millis(nav_timeout), ctx.navigate(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(FetchError::Network(format!("{e:#}"))),
            Err(_) => return Err(FetchError::Timeout(nav_timeout)),
        }

        self.wait_until_ready(&**ctx).await;

        match ctx.click_consent(&self.config.consent_patterns).await {
            Ok(true) => {
                debug!(%url, "Clicked consent control");
                sleep(CONSENT_SETTLE).await;
            }
            Ok(false) => {}
            Err(e) => debug!(%url, error = %e, "Consent click failed; continuing"),
        }

        ctx.html()
            .await
            .map_err(|e| FetchError::Network(format!("{e:#}")))
    }

    /// Poll readiness selectors in order until one is present or the shared
    /// budget runs out. Returns the selector that matched.
    async fn wait_until_ready(&self, ctx: &dyn RenderContext) -> Option<String> {
        if self.config.readiness_selectors.is_empty() {
            return None;
        }
        let deadline = Instant::now() + Duration::from_millis(self.config.readiness_budget_ms);
        loop {
            for selector in &self.config.readiness_selectors {
                if let Ok(true) = ctx.has_selector(selector).await {
                    debug!(%selector, "Page ready");
                    return Some(selector.clone());
                }
            }
            if Instant::now() + READINESS_POLL >= deadline {
                debug!("No readiness selector appeared; proceeding");
                return None;
            }
            sleep(READINESS_POLL).await;
        }
    }

    /// Host of the document the tab ended up on, or `requested` when the tab
    /// never reached an http(s) page.
    async fn landed_host(&self, ctx: &dyn RenderContext, requested: &str) -> String {
        match ctx.current_url().await {
            Ok(Some(url)) if url.starts_with("http") => {
                host_of(&url).unwrap_or_else(|| requested.to_string())
            }
            Ok(_) => requested.to_string(),
            Err(e) => {
                debug!(error = %e, "Could not read tab URL");
                requested.to_string()
            }
        }
    }

    async fn save_cookies(&self, ctx: &dyn RenderContext, domain: &str) {
        match ctx.cookies().await {
            Ok(cookies) => self.sessions.put(domain, cookies),
            Err(e) => warn!(%domain, error = %e, "Could not read browser cookies"),
        }
        if let Err(e) = self.sessions.persist().await {
            warn!(%domain, error = %e, "Could not persist session cookies");
        }
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BrowserFetch
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
        let domain = host_of(url).unwrap_or_default();
        let mut ctx = self
            .renderer
            .new_context()
            .await
            .map_err(|e| FetchError::Network(format!("browser context: {e:#}")))?;

        let stored = self.sessions.get(&domain);
        if !stored.is_empty() {
            if let Err(e) = ctx.set_cookies(&stored).await {
                warn!(%domain, error = %e, "Could not install stored cookies");
            }
        }

        let rendered = self.render(&mut ctx, url).await;
        let landed = self.landed_host(&*ctx, &domain).await;
        if landed != domain {
            debug!(requested = %domain, %landed, "Navigation changed host");
        }
        self.save_cookies(&*ctx, &landed).await;
        if let Err(e) = ctx.close().await {
            debug!(error = %e, "Closing tab failed");
        }

        let html = rendered?;
        let (title, body_text) = self.extractor.extract(&html);
        debug!(%url, bytes = html.len(), "Browser render parsed");
        Ok(RawPage {
            title,
            body_text,
            source_strategy: StrategyKind::BrowserFetch,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::session::StoredCookie;
    use anyhow::{Result, bail};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What the fake tab does on navigation.
    #[derive(Clone, Copy)]
    enum NavBehaviour {
        Load,
        Fail,
        Hang,
    }

    #[derive(Default)]
    struct Shared {
        installed: Mutex<Vec<StoredCookie>>,
        closed: AtomicUsize,
        consent_clicks: AtomicUsize,
    }

    struct FakeRenderer {
        nav: NavBehaviour,
        html: String,
        redirect_to: Option<String>,
        shared: Arc<Shared>,
    }

    struct FakeContext {
        nav: NavBehaviour,
        html: String,
        redirect_to: Option<String>,
        current: Option<String>,
        shared: Arc<Shared>,
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
            Ok(Box::new(FakeContext {
                nav: self.nav,
                html: self.html.clone(),
                redirect_to: self.redirect_to.clone(),
                current: None,
                shared: Arc::clone(&self.shared),
            }))
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl RenderContext for FakeContext {
        async fn set_cookies(&mut self, cookies: &[StoredCookie]) -> Result<()> {
            self.shared.installed.lock().unwrap().extend_from_slice(cookies);
            Ok(())
        }

        async fn navigate(&mut self, url: &str) -> Result<()> {
            match self.nav {
                NavBehaviour::Load => {
                    let landed = self.redirect_to.clone().unwrap_or_else(|| url.to_string());
                    self.current = Some(landed);
                    Ok(())
                }
                NavBehaviour::Fail => bail!("net::ERR_NAME_NOT_RESOLVED"),
                NavBehaviour::Hang => {
                    sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }
        }

        async fn has_selector(&self, selector: &str) -> Result<bool> {
            Ok(self.html.contains(&format!("<{selector}")))
        }

        async fn click_consent(&mut self, _patterns: &[String]) -> Result<bool> {
            self.shared.consent_clicks.fetch_add(1, Ordering::SeqCst);
            bail!("no consent banner")
        }

        async fn current_url(&self) -> Result<Option<String>> {
            Ok(self.current.clone())
        }

        async fn html(&self) -> Result<String> {
            Ok(self.html.clone())
        }

        async fn cookies(&self) -> Result<Vec<StoredCookie>> {
            Ok(vec![StoredCookie {
                name: "cf_clearance".to_string(),
                value: "token".to_string(),
                domain: ".example.com".to_string(),
                path: "/".to_string(),
                expires: None,
                secure: true,
                http_only: true,
            }])
        }

        async fn close(self: Box<Self>) -> Result<()> {
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fetcher(
        nav: NavBehaviour,
        html: &str,
        sessions: Arc<SessionStore>,
    ) -> (BrowserFetcher, Arc<Shared>) {
        redirecting_fetcher(nav, html, None, sessions)
    }

    fn redirecting_fetcher(
        nav: NavBehaviour,
        html: &str,
        redirect_to: Option<&str>,
        sessions: Arc<SessionStore>,
    ) -> (BrowserFetcher, Arc<Shared>) {
        let shared = Arc::new(Shared::default());
        let renderer = Arc::new(FakeRenderer {
            nav,
            html: html.to_string(),
            redirect_to: redirect_to.map(str::to_string),
            shared: Arc::clone(&shared),
        });
        let config = BrowserConfig {
            navigation_timeout_ms: 100,
            readiness_budget_ms: 300,
            ..BrowserConfig::default()
        };
        let fetcher = BrowserFetcher::new(
            renderer,
            sessions,
            Arc::new(ContentExtractor::new(&ExtractionConfig::default())),
            &config,
        );
        (fetcher, shared)
    }

    #[tokio::test]
    async fn test_renders_and_round_trips_cookies() {
        let sessions = Arc::new(SessionStore::in_memory());
        sessions.put(
            "www.example.com",
            vec![StoredCookie {
                name: "consent".to_string(),
                value: "yes".to_string(),
                domain: ".example.com".to_string(),
                path: "/".to_string(),
                expires: None,
                secure: false,
                http_only: false,
            }],
        );
        let (fetcher, shared) = fetcher(
            NavBehaviour::Load,
            "<html><body><h1>Rendered headline</h1><article>Body text</article></body></html>",
            Arc::clone(&sessions),
        );

        let page = fetcher.fetch("https://www.example.com/story").await.unwrap();
        assert_eq!(page.title.as_deref(), Some("Rendered headline"));
        assert_eq!(page.source_strategy, StrategyKind::BrowserFetch);

        assert_eq!(shared.installed.lock().unwrap()[0].name, "consent");
        // A failing consent click does not fail the attempt.
        assert_eq!(shared.consent_clicks.load(Ordering::SeqCst), 1);
        assert_eq!(shared.closed.load(Ordering::SeqCst), 1);
        let names: Vec<_> = sessions.get("example.com").into_iter().map(|c| c.name).collect();
        assert!(names.contains(&"consent".to_string()));
        assert!(names.contains(&"cf_clearance".to_string()));
    }

    #[tokio::test]
    async fn test_navigation_failure_still_saves_cookies() {
        let sessions = Arc::new(SessionStore::in_memory());
        let (fetcher, shared) = fetcher(NavBehaviour::Fail, "", Arc::clone(&sessions));

        let err = fetcher.fetch("https://example.com/a").await.unwrap_err();
        assert!(matches!(err, FetchError::Network(ref m) if m.contains("ERR_NAME_NOT_RESOLVED")));
        assert_eq!(shared.closed.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.get("example.com").len(), 1);
    }

    #[tokio::test]
    async fn test_cookies_saved_under_redirect_host() {
        let sessions = Arc::new(SessionStore::in_memory());
        let (fetcher, _) = redirecting_fetcher(
            NavBehaviour::Load,
            "<html><body><h1>Moved</h1><article>Body text</article></body></html>",
            Some("https://www.landing.example.org/story"),
            Arc::clone(&sessions),
        );

        fetcher.fetch("https://example.com/old-link").await.unwrap();
        assert_eq!(sessions.get("landing.example.org").len(), 1);
        assert!(sessions.get("example.com").is_empty());
    }

    #[tokio::test]
    async fn test_navigation_timeout() {
        let (fetcher, shared) =
            fetcher(NavBehaviour::Hang, "", Arc::new(SessionStore::in_memory()));
        let err = fetcher.fetch("https://example.com/a").await.unwrap_err();
        assert_eq!(err, FetchError::Timeout(100));
        assert_eq!(shared.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_readiness_selectors_proceed_after_budget() {
        let (fetcher, _) = fetcher(
            NavBehaviour::Load,
            "<html><body><div>Plain page without markers</div></body></html>",
            Arc::new(SessionStore::in_memory()),
        );
        let started = Instant::now();
        let page = fetcher.fetch("https://example.com/a").await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(page.body_text, "Plain page without markers");
    }
}
