//! Chromium renderer on top of chromiumoxide.

use super::{RenderContext, Renderer};
use crate::config::BrowserConfig;
use crate::session::StoredCookie;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Locate a Chromium binary: the configured path first, then `PATH`.
pub fn find_chromium(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = configured {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
        warn!(path = %p, "Configured Chromium path does not exist; searching PATH");
    }
    ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

pub struct ChromiumRenderer {
    browser: Mutex<Option<Browser>>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let chrome_path = find_chromium(config.chromium_path.as_deref())
            .context("Chromium not found; install it or set browser.chromium_path")?;
        info!(path = %chrome_path.display(), "Launching headless Chromium");

        let chrome_config = ChromeConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--lang=fr-FR")
            .arg(format!("--user-agent={}", config.user_agent))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Chromium handler event error");
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let guard = self.browser.lock().await;
        let Some(browser) = guard.as_ref() else {
            bail!("browser already shut down");
        };
        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open tab")?;
        Ok(Box::new(ChromiumContext { page }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut browser) = guard.take() {
            browser.close().await.context("failed to close Chromium")?;
            let _ = browser.wait().await;
            info!("Chromium shut down");
        }
        Ok(())
    }
}

pub struct ChromiumContext {
    page: Page,
}

const CONSENT_SCRIPT: &str = r#"
(patterns) => {
  const wanted = patterns.map(p => new RegExp('\\b' + p.replace(/[.*+?^${}()|[\]\\]/g, '\\$&') + '\\b', 'i'));
  const nodes = document.querySelectorAll('button, a, [role=button], input[type=button], input[type=submit]');
  for (const el of nodes) {
    const text = (el.innerText || el.value || '').trim();
    if (!text || text.length > 40) continue;
    const rect = el.getBoundingClientRect();
    if (rect.width === 0 || rect.height === 0) continue;
    if (wanted.some(re => re.test(text))) { el.click(); return true; }
  }
  return false;
}
"#;

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn set_cookies(&mut self, cookies: &[StoredCookie]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<Result<Vec<_>>>()?;
        self.page
            .set_cookies(params)
            .await
            .context("failed to install cookies")?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.page.goto(url).await.context("navigation failed")?;
        Ok(())
    }

    async fn has_selector(&self, selector: &str) -> Result<bool> {
        let script = format!(
            "document.querySelector({}) !== null",
            serde_json::to_string(selector)?
        );
        let found: bool = self
            .page
            .evaluate(script)
            .await
            .context("selector check failed")?
            .into_value()
            .map_err(|e| anyhow::anyhow!("unexpected selector check result: {e:?}"))?;
        Ok(found)
    }

    async fn click_consent(&mut self, patterns: &[String]) -> Result<bool> {
        if patterns.is_empty() {
            return Ok(false);
        }
        let script = format!("({})({})", CONSENT_SCRIPT.trim(), serde_json::to_string(patterns)?);
        let clicked: bool = self
            .page
            .evaluate(script)
            .await
            .context("consent click failed")?
            .into_value()
            .map_err(|e| anyhow::anyhow!("unexpected consent click result: {e:?}"))?;
        Ok(clicked)
    }

    async fn current_url(&self) -> Result<Option<String>> {
        self.page.url().await.context("failed to read page URL")
    }

    async fn html(&self) -> Result<String> {
        self.page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to read HTML")?
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("failed to read cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: if c.session || c.expires <= 0.0 {
                    None
                } else {
                    Some(c.expires)
                },
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.page.close().await.context("failed to close tab")?;
        Ok(())
    }
}

fn to_cookie_param(cookie: &StoredCookie) -> Result<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only);
    if let Some(expires) = cookie.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    builder.build().map_err(anyhow::Error::msg)
}
