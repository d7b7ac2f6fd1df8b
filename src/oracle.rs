//! Validity oracle: decide whether a fetched page holds usable article text.
//!
//! Judgment is pure and deterministic. Rule order matters: a short
//! bot-verification interstitial must come out as `ChallengePage` (which
//! escalates to a stronger strategy) rather than `TooShort` (which retries the
//! same one).

use crate::config::OracleConfig;
use crate::models::{RawPage, ValidityVerdict, VerdictReason};
use crate::utils::{char_count, word_count};

pub struct ValidityOracle {
    empty_body_chars: usize,
    min_chars: usize,
    min_words: usize,
    challenge_min_hits: usize,
    challenge_phrases: Vec<String>,
}

impl ValidityOracle {
    pub fn new(config: &OracleConfig) -> Self {
        Self {
            empty_body_chars: config.empty_body_chars,
            min_chars: config.min_chars,
            min_words: config.min_words,
            challenge_min_hits: config.challenge_min_hits,
            challenge_phrases: config
                .challenge_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn judge(&self, page: &RawPage) -> ValidityVerdict {
        let body = page.body_text.trim();
        let chars = char_count(body);

        if chars == 0 || chars < self.empty_body_chars {
            return ValidityVerdict::rejected(VerdictReason::EmptyBody);
        }
        if self.challenge_hits(body) >= self.challenge_min_hits {
            return ValidityVerdict::rejected(VerdictReason::ChallengePage);
        }
        if word_count(body) < self.min_words || chars < self.min_chars {
            return ValidityVerdict::rejected(VerdictReason::TooShort);
        }
        ValidityVerdict::ok()
    }

    /// Number of distinct challenge phrases present in `body`.
    fn challenge_hits(&self, body: &str) -> usize {
        let lower = body.to_lowercase();
        self.challenge_phrases
            .iter()
            .filter(|phrase| lower.contains(phrase.as_str()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StrategyKind;
    use chrono::Utc;

    fn page(title: &str, body: &str) -> RawPage {
        RawPage {
            title: Some(title.to_string()),
            body_text: body.to_string(),
            source_strategy: StrategyKind::DirectFetch,
            fetched_at: Utc::now(),
        }
    }

    fn oracle() -> ValidityOracle {
        ValidityOracle::new(&OracleConfig::default())
    }

    /// Exactly `words` words and `chars` characters, no challenge phrases.
    fn body_with(words: usize, chars: usize) -> String {
        let mut body = vec!["w"; words].join(" ");
        assert!(body.len() <= chars, "cannot fit {words} words in {chars} chars");
        let pad = chars - body.len();
        body.push_str(&"s".repeat(pad));
        body
    }

    #[test]
    fn test_challenge_page_example() {
        let verdict = oracle().judge(&page(
            "",
            "Please wait... checking your browser before accessing... verify you are human",
        ));
        assert_eq!(verdict, ValidityVerdict::rejected(VerdictReason::ChallengePage));
        assert!(!verdict.is_valid);
    }

    #[test]
    fn test_short_content_example() {
        let body = body_with(20, 80);
        assert_eq!(word_count(&body), 20);
        assert_eq!(body.chars().count(), 80);
        let verdict = oracle().judge(&page("Some title", &body));
        assert_eq!(verdict, ValidityVerdict::rejected(VerdictReason::TooShort));
    }

    #[test]
    fn test_valid_example() {
        let body = body_with(90, 500);
        assert_eq!(word_count(&body), 90);
        assert_eq!(body.chars().count(), 500);
        let verdict = oracle().judge(&page("Outbreak reported in region X", &body));
        assert_eq!(verdict, ValidityVerdict::ok());
        assert!(verdict.is_valid);
    }

    #[test]
    fn test_empty_and_tiny_bodies() {
        assert_eq!(oracle().judge(&page("t", "")).reason, VerdictReason::EmptyBody);
        assert_eq!(oracle().judge(&page("t", "   \n ")).reason, VerdictReason::EmptyBody);
        assert_eq!(
            oracle().judge(&page("t", "just a moment cloudflare")).reason,
            VerdictReason::EmptyBody
        );
    }

    #[test]
    fn test_single_phrase_is_not_a_challenge() {
        let mut body = body_with(90, 500);
        body.push_str(" protected by cloudflare");
        assert_eq!(oracle().judge(&page("t", &body)).reason, VerdictReason::Ok);
    }

    #[test]
    fn test_long_challenge_page_still_detected() {
        let mut body = body_with(90, 500);
        body.push_str(" Just a moment... Ray ID: 7f3a");
        assert_eq!(oracle().judge(&page("t", &body)).reason, VerdictReason::ChallengePage);
    }

    #[test]
    fn test_judgment_is_idempotent() {
        let p = page("t", &body_with(40, 300));
        let o = oracle();
        assert_eq!(o.judge(&p), o.judge(&p));
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let config = OracleConfig {
            min_words: 10,
            min_chars: 60,
            ..OracleConfig::default()
        };
        let body = body_with(20, 80);
        assert_eq!(ValidityOracle::new(&config).judge(&page("t", &body)).reason, VerdictReason::Ok);
    }
}
