//! Data models shared by every stage of the retrieval pipeline.
//!
//! - [`Target`]: one immutable input unit (`code` + `url`)
//! - [`StrategyKind`]: the retrieval backends, ordered by cost
//! - [`RawPage`]: what a strategy hands back before judgment
//! - [`ValidityVerdict`]: the oracle's judgment of a page
//! - [`Attempt`]: diagnostic trace of one strategy invocation
//! - [`ExtractionResult`]: the single terminal record emitted per target

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One article to retrieve, as supplied by the input adapter.
///
/// Targets are never mutated after construction; downstream consumers only
/// ever see clones inside [`ExtractionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    code: String,
    url: String,
}

impl Target {
    /// Build a target, rejecting empty fields.
    pub fn new(code: impl Into<String>, url: impl Into<String>) -> Option<Self> {
        let code = code.into().trim().to_string();
        let url = url.into().trim().to_string();
        if code.is_empty() || url.is_empty() {
            return None;
        }
        Some(Self { code, url })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// A retrieval backend.
///
/// Variant order doubles as cost order: `DirectFetch` is the cheapest,
/// `ProxyRenderFetch` the costliest and most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    DirectFetch,
    BrowserFetch,
    ProxyRenderFetch,
}

impl StrategyKind {
    /// Relative cost/latency class, used only to order strategies.
    pub fn cost_class(self) -> u8 {
        match self {
            StrategyKind::DirectFetch => 1,
            StrategyKind::BrowserFetch => 2,
            StrategyKind::ProxyRenderFetch => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::DirectFetch => "direct_fetch",
            StrategyKind::BrowserFetch => "browser_fetch",
            StrategyKind::ProxyRenderFetch => "proxy_render_fetch",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page content as produced by one strategy, before judgment.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub title: Option<String>,
    pub body_text: String,
    pub source_strategy: StrategyKind,
    pub fetched_at: DateTime<Utc>,
}

/// Why a page was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    Ok,
    TooShort,
    ChallengePage,
    EmptyBody,
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictReason::Ok => "ok",
            VerdictReason::TooShort => "too_short",
            VerdictReason::ChallengePage => "challenge_page",
            VerdictReason::EmptyBody => "empty_body",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityVerdict {
    pub is_valid: bool,
    pub reason: VerdictReason,
}

impl ValidityVerdict {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            reason: VerdictReason::Ok,
        }
    }

    pub fn rejected(reason: VerdictReason) -> Self {
        Self {
            is_valid: false,
            reason,
        }
    }
}

/// Diagnostic trace of one strategy invocation for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub code: String,
    pub strategy: StrategyKind,
    pub attempt_no: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<ValidityVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the judged page was retrieved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Cheap, derived facts about a retrieved article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub char_count: usize,
    pub word_count: usize,
    pub language: String,
    pub source_type: SourceType,
}

/// Coarse classification of the publishing site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Official,
    Social,
    Media,
}

/// Terminal state of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        title: String,
        body_text: String,
        strategy_used: StrategyKind,
        metadata: ArticleMetadata,
    },
    Failure {
        failure_reason: String,
        last_attempts: Vec<Attempt>,
    },
}

/// The one record emitted per target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub code: String,
    pub url: String,
    pub canonical_url: String,
    pub completed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }

    pub fn strategy_used(&self) -> Option<StrategyKind> {
        match &self.outcome {
            Outcome::Success { strategy_used, .. } => Some(*strategy_used),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { failure_reason, .. } => Some(failure_reason),
        }
    }
}
