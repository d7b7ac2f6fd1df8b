//! Headless browser abstraction used by the browser strategy.
//!
//! `Renderer` owns the browser process; `RenderContext` is one isolated tab.
//! The browser strategy only talks to these traits, so tests drive it with
//! an in-process fake and production uses Chromium.

pub mod chromium;

use crate::session::StoredCookie;
use anyhow::Result;
use async_trait::async_trait;

/// A browser engine that hands out isolated rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a fresh context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut the browser down. Safe to call more than once.
    async fn shutdown(&self) -> Result<()>;
}

/// A single browser tab.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Install cookies before navigation.
    async fn set_cookies(&mut self, cookies: &[StoredCookie]) -> Result<()>;
    /// Navigate and wait for the initial document load.
    async fn navigate(&mut self, url: &str) -> Result<()>;
    /// Whether an element matching the CSS `selector` is present.
    async fn has_selector(&self, selector: &str) -> Result<bool>;
    /// Click the first visible button whose text matches one of `patterns`
    /// (case-insensitive, whole word). Returns whether anything was clicked.
    async fn click_consent(&mut self, patterns: &[String]) -> Result<bool>;
    /// URL of the loaded document, after any redirects.
    async fn current_url(&self) -> Result<Option<String>>;
    /// Current document HTML.
    async fn html(&self) -> Result<String>;
    /// Cookies currently held by the context.
    async fn cookies(&self) -> Result<Vec<StoredCookie>>;
    /// Close the tab.
    async fn close(self: Box<Self>) -> Result<()>;
}
