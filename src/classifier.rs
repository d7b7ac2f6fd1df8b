//! Strategy classification: which retrieval strategies to try, in what order.
//!
//! The decision is driven entirely by the [`ClassifierConfig`] table. The
//! first rule whose pattern matches the URL host wins; unmatched hosts get
//! `default_strategies`.

use crate::config::{ClassifierConfig, DomainRule};
use crate::models::StrategyKind;
use crate::utils::host_of;
use tracing::debug;

/// Ordered strategy plan for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Label of the matching rule, or `"default"`.
    pub label: String,
    pub strategies: Vec<StrategyKind>,
    /// Strategies that, on a challenge page, escalate straight to the
    /// strongest remaining strategy.
    pub weak: Vec<StrategyKind>,
}

impl Classification {
    pub fn is_weak(&self, kind: StrategyKind) -> bool {
        self.weak.contains(&kind)
    }
}

pub struct StrategyClassifier {
    rules: Vec<DomainRule>,
    default_strategies: Vec<StrategyKind>,
}

impl StrategyClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            rules: config.rules.clone(),
            default_strategies: config.default_strategies.clone(),
        }
    }

    pub fn classify(&self, url: &str) -> Classification {
        let host = host_of(url).unwrap_or_default();
        let matched = self
            .rules
            .iter()
            .find(|rule| rule.patterns.iter().any(|p| pattern_matches(p, &host)));

        let classification = match matched {
            Some(rule) => Classification {
                label: rule.label.clone(),
                strategies: dedup_in_order(&rule.strategies),
                weak: rule.weak.clone(),
            },
            None => Classification {
                label: "default".to_string(),
                strategies: dedup_in_order(&self.default_strategies),
                weak: Vec::new(),
            },
        };
        debug!(
            %url,
            %host,
            label = %classification.label,
            strategies = ?classification.strategies,
            "Classified URL"
        );
        classification
    }
}

fn pattern_matches(pattern: &str, host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    let pattern = pattern.to_ascii_lowercase();
    if pattern.starts_with('.') {
        host.ends_with(&pattern)
    } else {
        host.contains(&pattern)
    }
}

fn dedup_in_order(kinds: &[StrategyKind]) -> Vec<StrategyKind> {
    let mut out = Vec::with_capacity(kinds.len());
    for k in kinds {
        if !out.contains(k) {
            out.push(*k);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use StrategyKind::*;

    #[test]
    fn test_unclassified_domain_uses_default_order() {
        let c = StrategyClassifier::new(&ClassifierConfig::default());
        let plan = c.classify("https://www.example-news.com/story/1");
        assert_eq!(plan.label, "default");
        assert_eq!(plan.strategies, vec![DirectFetch, BrowserFetch]);
        assert!(plan.weak.is_empty());
    }

    #[test]
    fn test_protected_domain_prefers_proxy() {
        let c = StrategyClassifier::new(&ClassifierConfig::default());
        let plan = c.classify("https://www.reuters.com/world/africa/x");
        assert_eq!(plan.label, "bot-protected");
        assert_eq!(plan.strategies, vec![ProxyRenderFetch, BrowserFetch]);
    }

    #[test]
    fn test_suffix_pattern_only_matches_host_end() {
        let c = StrategyClassifier::new(&ClassifierConfig::default());
        assert_eq!(c.classify("https://www.moa.gov.sa/ar/news").label, "script-rendered");
        // ".sa" must not match a host that merely contains "sa".
        assert_eq!(c.classify("https://www.salon.com/2025/a").label, "default");
    }

    #[test]
    fn test_new_domain_added_through_table_only() {
        let mut config = ClassifierConfig::default();
        config.rules.insert(
            0,
            DomainRule {
                label: "paywalled".to_string(),
                patterns: vec!["lemonde.fr".to_string()],
                strategies: vec![BrowserFetch, ProxyRenderFetch, BrowserFetch],
                weak: vec![BrowserFetch],
            },
        );
        let c = StrategyClassifier::new(&config);
        let plan = c.classify("https://www.lemonde.fr/planete/article/x.html");
        assert_eq!(plan.label, "paywalled");
        assert_eq!(plan.strategies, vec![BrowserFetch, ProxyRenderFetch]);
        assert!(plan.is_weak(BrowserFetch));
        assert!(!plan.is_weak(ProxyRenderFetch));
    }

    #[test]
    fn test_unparseable_url_falls_back_to_default() {
        let c = StrategyClassifier::new(&ClassifierConfig::default());
        assert_eq!(c.classify("not a url").strategies, vec![DirectFetch, BrowserFetch]);
    }
}
