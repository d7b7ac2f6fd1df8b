//! Retrieval strategies.
//!
//! Every strategy implements [`Fetcher`]: given a canonical URL it returns a
//! [`RawPage`] or a [`FetchError`]. Strategies never judge content; that is
//! the oracle's job.
//!
//! | Strategy | Module | Method | Notes |
//! |----------|--------|--------|-------|
//! | `DirectFetch` | [`direct`] | Plain HTTP GET | Cheapest; static pages only |
//! | `BrowserFetch` | [`browser`] | Headless Chromium | Runs scripts, clicks consent, keeps cookies |
//! | `ProxyRenderFetch` | [`proxy`] | Paid rendering API | Costliest; used for bot-protected sites |
//!
//! All three finish with the shared [`extract::ContentExtractor`].

pub mod browser;
pub mod direct;
pub mod extract;
pub mod proxy;

use crate::error::FetchError;
use crate::models::{RawPage, StrategyKind};
use async_trait::async_trait;

#[async_trait]
pub trait Fetcher: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn fetch(&self, url: &str) -> Result<RawPage, FetchError>;
}
