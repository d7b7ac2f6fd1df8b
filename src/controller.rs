//! Escalation controller: drive one target through its strategy plan.
//!
//! Per target the controller walks an explicit state machine:
//!
//! ```text
//! Pending ─► Attempting(strategy, n) ─┬─► Succeeded
//!                 ▲   │ retry          ├─► Escalating ─► Attempting(next, 1)
//!                 └───┘                └─► Exhausted
//! ```
//!
//! - Fetch errors escalate straight to the next untried strategy.
//! - `ChallengePage` escalates; if the plan marks the current strategy weak,
//!   the jump goes to the costliest untried strategy instead.
//! - `EmptyBody` / `TooShort` retry the same strategy up to the
//!   per-strategy cap, then escalate.
//!
//! Every strategy in the plan is entered at most once and never runs more
//! than the cap, so a target makes at most `strategies × cap` attempts.
//! Nothing escapes: exhaustion becomes a failure record.

use crate::canonicalize::Canonicalizer;
use crate::classifier::{Classification, StrategyClassifier};
use crate::config::ControllerConfig;
use crate::models::{
    Attempt, ExtractionResult, Outcome, RawPage, StrategyKind, Target, VerdictReason,
};
use crate::oracle::ValidityOracle;
use crate::scrapers::Fetcher;
use crate::utils::{article_metadata, truncate_for_log};
use chrono::Utc;
use rand::{Rng, rng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Error text recorded when the plan names a strategy with no backend.
const UNAVAILABLE: &str = "strategy unavailable";

#[derive(Debug)]
enum State {
    Pending,
    Attempting {
        idx: usize,
        attempt_no: u32,
    },
    Escalating {
        from: usize,
        skip_to_strongest: bool,
    },
    Succeeded {
        page: RawPage,
    },
    Exhausted,
}

/// What one attempt concluded.
enum Step {
    Accept(RawPage),
    Retry,
    Escalate { skip_to_strongest: bool },
}

pub struct EscalationController {
    canonicalizer: Arc<Canonicalizer>,
    classifier: StrategyClassifier,
    oracle: ValidityOracle,
    fetchers: HashMap<StrategyKind, Arc<dyn Fetcher>>,
    config: ControllerConfig,
}

impl EscalationController {
    pub fn new(
        canonicalizer: Arc<Canonicalizer>,
        classifier: StrategyClassifier,
        oracle: ValidityOracle,
        fetchers: Vec<Arc<dyn Fetcher>>,
        config: ControllerConfig,
    ) -> Self {
        let fetchers = fetchers.into_iter().map(|f| (f.kind(), f)).collect();
        Self {
            canonicalizer,
            classifier,
            oracle,
            fetchers,
            config,
        }
    }

    pub async fn canonical_url(&self, target: &Target) -> String {
        self.canonicalizer.canonicalize(target.url()).await
    }

    /// Resolve `target` whose URL has already been canonicalized.
    #[instrument(level = "info", skip_all, fields(code = %target.code(), url = %canonical))]
    pub async fn resolve_with(&self, target: &Target, canonical: String) -> ExtractionResult {
        let started = Instant::now();
        let plan = self.classifier.classify(&canonical);
        let mut tried = vec![false; plan.strategies.len()];
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut last_cause = String::from("no_strategies");
        let mut state = State::Pending;

        loop {
            state = match state {
                State::Pending => match next_index(&plan, &tried, None, false) {
                    Some(idx) => State::Attempting { idx, attempt_no: 1 },
                    None => State::Exhausted,
                },

                State::Attempting { idx, attempt_no } => {
                    tried[idx] = true;
                    if !attempts.is_empty() {
                        sleep(self.inter_attempt_delay()).await;
                    }
                    let strategy = plan.strategies[idx];
                    let step = self
                        .attempt(
                            target,
                            &canonical,
                            &plan,
                            strategy,
                            attempt_no,
                            &mut attempts,
                            &mut last_cause,
                        )
                        .await;
                    match step {
                        Step::Accept(page) => State::Succeeded { page },
                        Step::Retry if attempt_no < self.config.max_attempts_per_strategy => {
                            debug!(%strategy, attempt = attempt_no, "Retrying same strategy");
                            State::Attempting {
                                idx,
                                attempt_no: attempt_no + 1,
                            }
                        }
                        Step::Retry => State::Escalating {
                            from: idx,
                            skip_to_strongest: false,
                        },
                        Step::Escalate { skip_to_strongest } => State::Escalating {
                            from: idx,
                            skip_to_strongest,
                        },
                    }
                }

                State::Escalating {
                    from,
                    skip_to_strongest,
                } => match next_index(&plan, &tried, Some(from), skip_to_strongest) {
                    Some(idx) => {
                        info!(
                            code = %target.code(),
                            from = %plan.strategies[from],
                            to = %plan.strategies[idx],
                            reason = %last_cause,
                            "Escalating"
                        );
                        State::Attempting { idx, attempt_no: 1 }
                    }
                    None => State::Exhausted,
                },

                State::Succeeded { page } => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    info!(
                        code = %target.code(),
                        strategy = %page.source_strategy,
                        attempts = attempts.len(),
                        elapsed_ms,
                        "Target succeeded"
                    );
                    return self.success(target, canonical, page);
                }

                State::Exhausted => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    warn!(
                        code = %target.code(),
                        reason = %last_cause,
                        attempts = attempts.len(),
                        elapsed_ms,
                        "Target exhausted all strategies"
                    );
                    return ExtractionResult {
                        code: target.code().to_string(),
                        url: target.url().to_string(),
                        canonical_url: canonical,
                        completed_at: Utc::now(),
                        outcome: Outcome::Failure {
                            failure_reason: last_cause,
                            last_attempts: attempts,
                        },
                    };
                }
            };
        }
    }

    /// Run one strategy once, record the attempt, and decide what follows.
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        target: &Target,
        url: &str,
        plan: &Classification,
        strategy: StrategyKind,
        attempt_no: u32,
        attempts: &mut Vec<Attempt>,
        last_cause: &mut String,
    ) -> Step {
        let mut record = Attempt {
            code: target.code().to_string(),
            strategy,
            attempt_no,
            verdict: None,
            error: None,
            fetched_at: None,
        };

        let Some(fetcher) = self.fetchers.get(&strategy) else {
            warn!(code = %target.code(), %strategy, "No backend for strategy; skipping");
            record.error = Some(UNAVAILABLE.to_string());
            attempts.push(record);
            *last_cause = "strategy_unavailable".to_string();
            return Step::Escalate {
                skip_to_strongest: false,
            };
        };

        let started = Instant::now();
        let fetched = fetcher.fetch(url).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let page = match fetched {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    code = %target.code(),
                    %strategy,
                    attempt = attempt_no,
                    reason = e.code(),
                    error = %e,
                    elapsed_ms,
                    "Fetch failed"
                );
                *last_cause = e.code().to_string();
                record.error = Some(e.to_string());
                attempts.push(record);
                return Step::Escalate {
                    skip_to_strongest: false,
                };
            }
        };

        let verdict = self.oracle.judge(&page);
        info!(
            code = %target.code(),
            %strategy,
            attempt = attempt_no,
            reason = %verdict.reason,
            elapsed_ms,
            "Page judged"
        );
        if !verdict.is_valid {
            debug!(body = %truncate_for_log(&page.body_text, 200), "Rejected body");
        }
        record.verdict = Some(verdict);
        record.fetched_at = Some(page.fetched_at);
        attempts.push(record);

        match verdict.reason {
            VerdictReason::Ok => Step::Accept(page),
            VerdictReason::ChallengePage => {
                *last_cause = verdict.reason.to_string();
                Step::Escalate {
                    skip_to_strongest: plan.is_weak(strategy),
                }
            }
            VerdictReason::EmptyBody | VerdictReason::TooShort => {
                *last_cause = verdict.reason.to_string();
                Step::Retry
            }
        }
    }

    fn success(&self, target: &Target, canonical: String, page: RawPage) -> ExtractionResult {
        let title = page
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "untitled".to_string());
        let metadata = article_metadata(&canonical, &page.body_text);
        ExtractionResult {
            code: target.code().to_string(),
            url: target.url().to_string(),
            canonical_url: canonical,
            completed_at: Utc::now(),
            outcome: Outcome::Success {
                title,
                body_text: page.body_text,
                strategy_used: page.source_strategy,
                metadata,
            },
        }
    }

    fn inter_attempt_delay(&self) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=self.config.jitter_ms)
        };
        self.config.inter_attempt_delay() + Duration::from_millis(jitter)
    }
}

/// Pick the next strategy to enter.
///
/// Normally the first untried strategy in plan order; when skipping ahead,
/// the untried strategy with the highest cost class.
fn next_index(
    plan: &Classification,
    tried: &[bool],
    from: Option<usize>,
    skip_to_strongest: bool,
) -> Option<usize> {
    let mut untried = (0..plan.strategies.len()).filter(|&i| !tried[i]);
    if skip_to_strongest {
        let strongest =
            untried.max_by_key(|&i| (plan.strategies[i].cost_class(), std::cmp::Reverse(i)));
        if let (Some(from), Some(idx)) = (from, strongest) {
            debug!(
                from = %plan.strategies[from],
                to = %plan.strategies[idx],
                "Weak strategy challenged; skipping to strongest"
            );
        }
        strongest
    } else {
        untried.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CanonicalizerConfig, ClassifierConfig, DomainRule, OracleConfig};
    use crate::error::FetchError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use StrategyKind::*;

    /// A fetcher that replays a fixed script of responses.
    struct ScriptedFetcher {
        kind: StrategyKind,
        script: Mutex<VecDeque<Result<RawPage, FetchError>>>,
        seen: Mutex<Vec<String>>,
        seen_at: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedFetcher {
        fn new(kind: StrategyKind, script: Vec<Result<RawPage, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
                seen_at: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn fetch(&self, url: &str) -> Result<RawPage, FetchError> {
            self.seen.lock().unwrap().push(url.to_string());
            self.seen_at.lock().unwrap().push(tokio::time::Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Network("script exhausted".into())))
        }
    }

    fn page(kind: StrategyKind, body: &str) -> Result<RawPage, FetchError> {
        Ok(RawPage {
            title: Some("Outbreak reported in region X".to_string()),
            body_text: body.to_string(),
            source_strategy: kind,
            fetched_at: Utc::now(),
        })
    }

    fn article(kind: StrategyKind) -> Result<RawPage, FetchError> {
        page(kind, &"officials in the region confirmed the outbreak of the disease ".repeat(12))
    }

    fn dyns(fetchers: &[&Arc<ScriptedFetcher>]) -> Vec<Arc<dyn Fetcher>> {
        fetchers.iter().map(|f| (*f).clone() as Arc<dyn Fetcher>).collect()
    }

    fn challenge(kind: StrategyKind) -> Result<RawPage, FetchError> {
        page(
            kind,
            "Please wait... checking your browser before accessing... verify you are human",
        )
    }

    fn too_short(kind: StrategyKind) -> Result<RawPage, FetchError> {
        page(kind, "A short teaser paragraph with only a handful of words in it.")
    }

    fn network(_: StrategyKind) -> Result<RawPage, FetchError> {
        Err(FetchError::Network("HTTP 503 Service Unavailable".into()))
    }

    fn quick_config() -> ControllerConfig {
        ControllerConfig {
            inter_attempt_delay_ms: 0,
            jitter_ms: 0,
            politeness_delay_ms: 0,
            ..ControllerConfig::default()
        }
    }

    fn controller_with(
        strategies: Vec<StrategyKind>,
        weak: Vec<StrategyKind>,
        fetchers: Vec<Arc<dyn Fetcher>>,
    ) -> EscalationController {
        configured(strategies, weak, fetchers, quick_config())
    }

    fn configured(
        strategies: Vec<StrategyKind>,
        weak: Vec<StrategyKind>,
        fetchers: Vec<Arc<dyn Fetcher>>,
        config: ControllerConfig,
    ) -> EscalationController {
        let classifier = ClassifierConfig {
            rules: vec![DomainRule {
                label: "test".to_string(),
                patterns: vec!["news.example.test".to_string()],
                strategies,
                weak,
            }],
            ..ClassifierConfig::default()
        };
        EscalationController::new(
            Arc::new(Canonicalizer::new(&CanonicalizerConfig::default()).unwrap()),
            StrategyClassifier::new(&classifier),
            ValidityOracle::new(&OracleConfig::default()),
            fetchers,
            config,
        )
    }

    async fn resolve(controller: &EscalationController, target: &Target) -> ExtractionResult {
        let canonical = controller.canonical_url(target).await;
        controller.resolve_with(target, canonical).await
    }

    fn target() -> Target {
        Target::new("T1", "https://news.example.test/story/1").unwrap()
    }

    #[tokio::test]
    async fn test_challenge_escalates_to_next_strategy() {
        let a = ScriptedFetcher::new(DirectFetch, vec![challenge(DirectFetch)]);
        let b = ScriptedFetcher::new(BrowserFetch, vec![article(BrowserFetch)]);
        let c = ScriptedFetcher::new(ProxyRenderFetch, vec![article(ProxyRenderFetch)]);
        let controller = controller_with(
            vec![DirectFetch, BrowserFetch, ProxyRenderFetch],
            vec![],
            dyns(&[&a, &b, &c]),
        );

        let result = resolve(&controller, &target()).await;
        assert_eq!(result.strategy_used(), Some(BrowserFetch));
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 0);
        match result.outcome {
            Outcome::Success { title, metadata, .. } => {
                assert_eq!(title, "Outbreak reported in region X");
                assert_eq!(metadata.language, "en");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exhaustion_yields_failure_record() {
        let a = ScriptedFetcher::new(DirectFetch, vec![network(DirectFetch)]);
        let b = ScriptedFetcher::new(BrowserFetch, vec![network(BrowserFetch)]);
        let controller = controller_with(vec![DirectFetch, BrowserFetch], vec![], dyns(&[&a, &b]));

        let result = resolve(&controller, &target()).await;
        assert!(!result.is_success());
        assert_eq!(result.failure_reason(), Some("network_error"));
        match result.outcome {
            Outcome::Failure { last_attempts, .. } => {
                assert_eq!(last_attempts.len(), 2);
                assert_eq!(last_attempts[0].strategy, DirectFetch);
                assert_eq!(last_attempts[1].strategy, BrowserFetch);
                assert!(last_attempts.iter().all(|a| a.error.is_some() && a.verdict.is_none()));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_short_content_retries_up_to_cap() {
        let a = ScriptedFetcher::new(
            DirectFetch,
            vec![too_short(DirectFetch), too_short(DirectFetch)],
        );
        let b = ScriptedFetcher::new(BrowserFetch, vec![article(BrowserFetch)]);
        let controller = controller_with(vec![DirectFetch, BrowserFetch], vec![], dyns(&[&a, &b]));

        let result = resolve(&controller, &target()).await;
        assert_eq!(result.strategy_used(), Some(BrowserFetch));
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_can_recover_on_same_strategy() {
        let a = ScriptedFetcher::new(
            DirectFetch,
            vec![too_short(DirectFetch), article(DirectFetch)],
        );
        let b = ScriptedFetcher::new(BrowserFetch, vec![]);
        let controller = controller_with(vec![DirectFetch, BrowserFetch], vec![], dyns(&[&a, &b]));

        let result = resolve(&controller, &target()).await;
        assert_eq!(result.strategy_used(), Some(DirectFetch));
        assert_eq!(a.calls(), 2);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_attempts_never_exceed_bound() {
        // Every strategy only ever returns short pages.
        let fetchers: Vec<Arc<ScriptedFetcher>> = [DirectFetch, BrowserFetch, ProxyRenderFetch]
            .into_iter()
            .map(|k| ScriptedFetcher::new(k, (0..10).map(|_| too_short(k)).collect()))
            .collect();
        let controller = controller_with(
            vec![DirectFetch, BrowserFetch, ProxyRenderFetch],
            vec![],
            dyns(&fetchers.iter().collect::<Vec<_>>()),
        );

        let result = resolve(&controller, &target()).await;
        assert_eq!(result.failure_reason(), Some("too_short"));
        let total: usize = fetchers.iter().map(|f| f.calls()).sum();
        assert_eq!(total, 3 * 2);
        assert!(fetchers.iter().all(|f| f.calls() == 2));
    }

    #[tokio::test]
    async fn test_weak_strategy_skips_to_strongest() {
        let a = ScriptedFetcher::new(DirectFetch, vec![challenge(DirectFetch)]);
        let b = ScriptedFetcher::new(BrowserFetch, vec![article(BrowserFetch)]);
        let c = ScriptedFetcher::new(ProxyRenderFetch, vec![article(ProxyRenderFetch)]);
        let controller = controller_with(
            vec![DirectFetch, BrowserFetch, ProxyRenderFetch],
            vec![DirectFetch],
            dyns(&[&a, &b, &c]),
        );

        let result = resolve(&controller, &target()).await;
        assert_eq!(result.strategy_used(), Some(ProxyRenderFetch));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_skipped_strategy_still_tried_after_strongest_fails() {
        let a = ScriptedFetcher::new(DirectFetch, vec![challenge(DirectFetch)]);
        let b = ScriptedFetcher::new(BrowserFetch, vec![article(BrowserFetch)]);
        let c = ScriptedFetcher::new(ProxyRenderFetch, vec![network(ProxyRenderFetch)]);
        let controller = controller_with(
            vec![DirectFetch, BrowserFetch, ProxyRenderFetch],
            vec![DirectFetch],
            dyns(&[&a, &b, &c]),
        );

        let result = resolve(&controller, &target()).await;
        assert_eq!(result.strategy_used(), Some(BrowserFetch));
        assert_eq!(c.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_backend_is_recorded_and_skipped() {
        let b = ScriptedFetcher::new(DirectFetch, vec![article(DirectFetch)]);
        let controller = controller_with(vec![BrowserFetch, DirectFetch], vec![], dyns(&[&b]));

        let result = resolve(&controller, &target()).await;
        assert_eq!(result.strategy_used(), Some(DirectFetch));
    }

    #[tokio::test]
    async fn test_untitled_fallback() {
        let mut raw = article(DirectFetch).unwrap();
        raw.title = None;
        let a = ScriptedFetcher::new(DirectFetch, vec![Ok(raw)]);
        let controller = controller_with(vec![DirectFetch], vec![], dyns(&[&a]));

        match resolve(&controller, &target()).await.outcome {
            Outcome::Success { title, .. } => assert_eq!(title, "untitled"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_canonicalization_timeout_still_retrieves() {
        use wiremock::matchers::any;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1_500)))
            .mount(&server)
            .await;

        let canonicalizer = Canonicalizer::new(&CanonicalizerConfig {
            shortener_hosts: vec!["127.0.0.1".to_string()],
            timeout_ms: 200,
        })
        .unwrap();
        let direct = ScriptedFetcher::new(DirectFetch, vec![article(DirectFetch)]);
        let controller = EscalationController::new(
            Arc::new(canonicalizer),
            StrategyClassifier::new(&ClassifierConfig::default()),
            ValidityOracle::new(&OracleConfig::default()),
            dyns(&[&direct]),
            quick_config(),
        );

        let short = format!("{}/s/abc", server.uri());
        let result = resolve(&controller, &Target::new("S1", short.clone()).unwrap()).await;
        assert_eq!(result.canonical_url, short);
        assert_eq!(result.strategy_used(), Some(DirectFetch));
        assert_eq!(direct.seen.lock().unwrap().as_slice(), &[short]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_spaced_by_inter_attempt_delay() {
        let a = ScriptedFetcher::new(
            DirectFetch,
            vec![too_short(DirectFetch), network(DirectFetch)],
        );
        let b = ScriptedFetcher::new(BrowserFetch, vec![article(BrowserFetch)]);
        let controller = configured(
            vec![DirectFetch, BrowserFetch],
            vec![],
            dyns(&[&a, &b]),
            ControllerConfig {
                inter_attempt_delay_ms: 3_000,
                jitter_ms: 250,
                politeness_delay_ms: 0,
                ..ControllerConfig::default()
            },
        );

        let result = resolve(&controller, &target()).await;
        assert_eq!(result.strategy_used(), Some(BrowserFetch));

        let mut times = a.seen_at.lock().unwrap().clone();
        times.extend(b.seen_at.lock().unwrap().iter().copied());
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(3_000), "gap {gap:?}");
            assert!(gap <= Duration::from_millis(3_250), "gap {gap:?}");
        }
    }

    #[tokio::test]
    async fn test_judged_attempts_carry_fetch_time() {
        let a = ScriptedFetcher::new(DirectFetch, vec![challenge(DirectFetch)]);
        let b = ScriptedFetcher::new(BrowserFetch, vec![network(BrowserFetch)]);
        let controller =
            controller_with(vec![DirectFetch, BrowserFetch], vec![], dyns(&[&a, &b]));

        let result = resolve(&controller, &target()).await;
        let Outcome::Failure { last_attempts, .. } = result.outcome else {
            panic!("expected failure");
        };
        assert!(last_attempts[0].fetched_at.is_some());
        assert!(last_attempts[1].fetched_at.is_none());
    }
}
