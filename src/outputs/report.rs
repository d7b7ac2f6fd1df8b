//! End-of-run summary.

use crate::models::{ExtractionResult, StrategyKind};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub by_strategy: BTreeMap<StrategyKind, usize>,
    pub failures_by_reason: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn from_results(results: &[ExtractionResult]) -> Self {
        let mut summary = RunSummary {
            total: results.len(),
            ..RunSummary::default()
        };
        for result in results {
            match (result.strategy_used(), result.failure_reason()) {
                (Some(strategy), _) => {
                    summary.succeeded += 1;
                    *summary.by_strategy.entry(strategy).or_default() += 1;
                }
                (None, reason) => {
                    summary.failed += 1;
                    *summary
                        .failures_by_reason
                        .entry(reason.unwrap_or("unknown").to_string())
                        .or_default() += 1;
                }
            }
        }
        summary
    }

    pub fn log(&self) {
        info!(
            total = self.total,
            succeeded = self.succeeded,
            failed = self.failed,
            "Run summary"
        );
        for (strategy, count) in &self.by_strategy {
            info!(%strategy, count, "Successes by strategy");
        }
        for (reason, count) in &self.failures_by_reason {
            info!(%reason, count, "Failures by reason");
        }
    }
}
