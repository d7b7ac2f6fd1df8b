//! Run configuration: built-in defaults, optionally overridden by a YAML file.
//!
//! Every table that drives a decision (shortener hosts, domain rules,
//! challenge phrases, content selectors, consent button patterns) lives here
//! as data so it can be extended without touching control flow. CLI flags are
//! applied on top in `main` after loading.
//!
//! ```yaml
//! classifier:
//!   rules:
//!     - label: bot-protected
//!       patterns: ["lemonde.fr"]
//!       strategies: [proxy_render_fetch, browser_fetch]
//! oracle:
//!   min_words: 50
//! ```

use crate::error::ConfigError;
use crate::models::StrategyKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub canonicalizer: CanonicalizerConfig,
    pub classifier: ClassifierConfig,
    pub extraction: ExtractionConfig,
    pub direct: DirectConfig,
    pub browser: BrowserConfig,
    pub proxy: ProxyConfig,
    pub oracle: OracleConfig,
    pub controller: ControllerConfig,
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalizerConfig {
    /// Hosts (or host suffixes) of known URL shorteners.
    pub shortener_hosts: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for CanonicalizerConfig {
    fn default() -> Self {
        Self {
            shortener_hosts: strings(&[
                "lc.cx",
                "bit.ly",
                "tinyurl.com",
                "t.co",
                "goo.gl",
                "ow.ly",
                "buff.ly",
                "is.gd",
                "rebrand.ly",
                "shorturl.at",
            ]),
            timeout_ms: 10_000,
        }
    }
}

/// One row of the strategy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRule {
    pub label: String,
    /// Host patterns. A leading `.` means "host ends with", anything else
    /// means "host contains".
    pub patterns: Vec<String>,
    pub strategies: Vec<StrategyKind>,
    /// Strategies that should be skipped past, not merely stepped over, when
    /// they return a challenge page for this domain.
    #[serde(default)]
    pub weak: Vec<StrategyKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub rules: Vec<DomainRule>,
    pub default_strategies: Vec<StrategyKind>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        use StrategyKind::*;
        Self {
            rules: vec![
                DomainRule {
                    label: "bot-protected".to_string(),
                    patterns: strings(&["reuters.com", "bloomberg.com", "wsj.com", "ft.com"]),
                    strategies: vec![ProxyRenderFetch, BrowserFetch],
                    weak: Vec::new(),
                },
                DomainRule {
                    label: "script-rendered".to_string(),
                    patterns: strings(&[
                        "wahis.woah.org",
                        "app.",
                        "dashboard.",
                        "alyoum",
                        "aljazeera",
                        "akhbar",
                        "elfagr",
                        ".sa",
                        ".eg",
                        ".qa",
                        ".ae",
                        ".ma",
                        ".dz",
                    ]),
                    strategies: vec![BrowserFetch, ProxyRenderFetch],
                    weak: Vec::new(),
                },
                DomainRule {
                    label: "static".to_string(),
                    patterns: strings(&["who.int", "fao.org", "woah.org", ".gov", ".gouv.fr"]),
                    strategies: vec![DirectFetch, BrowserFetch],
                    weak: vec![DirectFetch],
                },
            ],
            default_strategies: vec![DirectFetch, BrowserFetch],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Content containers tried after `article` and before `main`.
    pub content_selectors: Vec<String>,
    /// Regions shorter than this fall back to whole-page text.
    pub min_region_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            content_selectors: strings(&[
                ".article-body",
                ".article-content",
                ".article-details",
                ".post-content",
                ".entry-content",
                ".content",
            ]),
            min_region_chars: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub navigation_timeout_ms: u64,
    /// Waited for in order; the first one present ends the wait.
    pub readiness_selectors: Vec<String>,
    /// Total wait shared by all readiness selectors.
    pub readiness_budget_ms: u64,
    /// Case-insensitive texts of consent/cookie buttons to click.
    pub consent_patterns: Vec<String>,
    /// Explicit Chromium binary; otherwise discovered on PATH.
    pub chromium_path: Option<String>,
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30_000,
            readiness_selectors: strings(&[
                "h1",
                "article",
                "main",
                ".article-body",
                ".article-content",
                ".content",
            ]),
            readiness_budget_ms: 20_000,
            consent_patterns: strings(&["accept", "accepter", "ok", "autoriser"]),
            chromium_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub endpoint: String,
    /// Usually supplied through `--proxy-api-key` / `SCRAPINGBEE_API_KEY`.
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub render_js: bool,
    pub wait_for: Option<String>,
    pub premium_proxy: bool,
    pub stealth_proxy: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://app.scrapingbee.com/api/v1/".to_string(),
            api_key: None,
            timeout_ms: 40_000,
            render_js: true,
            wait_for: Some("body".to_string()),
            premium_proxy: false,
            stealth_proxy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Bodies under this many characters are empty.
    pub empty_body_chars: usize,
    pub min_chars: usize,
    pub min_words: usize,
    /// Distinct challenge phrases needed to call a page a challenge.
    pub challenge_min_hits: usize,
    pub challenge_phrases: Vec<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            empty_body_chars: 50,
            min_chars: 100,
            min_words: 30,
            challenge_min_hits: 2,
            challenge_phrases: strings(&[
                "checking your browser",
                "verify you are human",
                "must verify you are human",
                "just a moment",
                "please wait",
                "cloudflare",
                "ray id",
                "checking if the site connection is secure",
                "enable javascript and cookies to continue",
                "attention required",
                "ddos protection by",
                "vérifions que vous êtes humain",
                "sécurité de votre connexion",
                "vérifier la sécurité",
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub max_attempts_per_strategy: u32,
    pub inter_attempt_delay_ms: u64,
    /// Upper bound of random jitter added to the inter-attempt delay.
    pub jitter_ms: u64,
    pub politeness_delay_ms: u64,
    pub concurrency: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_strategy: 2,
            inter_attempt_delay_ms: 3_000,
            jitter_ms: 250,
            politeness_delay_ms: 1_500,
            concurrency: 1,
        }
    }
}

impl ControllerConfig {
    pub fn inter_attempt_delay(&self) -> Duration {
        Duration::from_millis(self.inter_attempt_delay_ms)
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Flush after this many completed targets.
    pub every: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { every: 5 }
    }
}

/// Upper bound for `controller.concurrency`.
pub const MAX_CONCURRENCY: usize = 8;

impl HarvestConfig {
    /// Load defaults, overlaid with the YAML file at `path` when given.
    #[instrument(level = "info", skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let parsed: HarvestConfig =
                    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                info!(path = %path.display(), "Loaded configuration file");
                parsed
            }
            None => HarvestConfig::default(),
        };
        Ok(config)
    }

    /// Reject values the controller and pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifier.default_strategies.is_empty() {
            return Err(ConfigError::Invalid(
                "classifier.default_strategies must not be empty".into(),
            ));
        }
        if let Some(rule) = self.classifier.rules.iter().find(|r| r.strategies.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "classifier rule `{}` has no strategies",
                rule.label
            )));
        }
        if self.controller.max_attempts_per_strategy == 0 {
            return Err(ConfigError::Invalid(
                "controller.max_attempts_per_strategy must be at least 1".into(),
            ));
        }
        if self.checkpoint.every == 0 {
            return Err(ConfigError::Invalid("checkpoint.every must be at least 1".into()));
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.controller.concurrency) {
            return Err(ConfigError::Invalid(format!(
                "controller.concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }
        if self.oracle.challenge_min_hits == 0 {
            return Err(ConfigError::Invalid(
                "oracle.challenge_min_hits must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Whether any plan this config can produce involves the browser.
    pub fn uses_strategy(&self, kind: StrategyKind) -> bool {
        self.classifier.default_strategies.contains(&kind)
            || self
                .classifier
                .rules
                .iter()
                .any(|r| r.strategies.contains(&kind))
    }

    /// Strip a strategy from every plan, keeping lists non-empty.
    pub fn disable_strategy(&mut self, kind: StrategyKind) {
        let strip = |list: &mut Vec<StrategyKind>| {
            if list.len() > 1 || list.first() != Some(&kind) {
                list.retain(|k| *k != kind);
            }
        };
        strip(&mut self.classifier.default_strategies);
        for rule in &mut self.classifier.rules {
            strip(&mut rule.strategies);
            rule.weak.retain(|k| *k != kind);
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
