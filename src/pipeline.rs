//! Run driver: push every target through the controller and checkpoint.
//!
//! Targets are processed through a bounded `buffer_unordered` pool. With the
//! default concurrency of 1 this is strictly one target at a time. Two
//! targets on the same host never overlap: a target holds the lock of its
//! input host while its URL is canonicalized, then the locks of both the
//! input and canonical hosts through resolution and the politeness delay.
//!
//! Cancellation is checked at target granularity. A target still in flight
//! when the token fires is dropped without a record and will be picked up
//! again on resume. Whatever completed is flushed before returning.

use crate::controller::EscalationController;
use crate::error::CheckpointError;
use crate::models::{ExtractionResult, Target};
use crate::outputs::checkpoint::CheckpointWriter;
use crate::utils::host_of;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One async lock per host.
#[derive(Default)]
pub struct HostLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl HostLocks {
    pub fn for_host(&self, host: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(host.to_string()).or_default())
    }

    pub async fn lock(&self, host: &str) -> OwnedMutexGuard<()> {
        self.for_host(host).lock_owned().await
    }

    /// Extend `held` (the lock on `origin`) to also cover `host`.
    ///
    /// A task only ever waits for a host ordered after every host it holds,
    /// so targets redirected across each other's hosts cannot deadlock.
    pub async fn widen(
        &self,
        held: OwnedMutexGuard<()>,
        origin: &str,
        host: &str,
    ) -> Vec<OwnedMutexGuard<()>> {
        if host == origin {
            return vec![held];
        }
        if origin < host {
            let next = self.lock(host).await;
            return vec![held, next];
        }
        drop(held);
        let first = self.lock(host).await;
        let second = self.lock(origin).await;
        vec![first, second]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Targets recorded during this run.
    pub completed: usize,
    pub interrupted: bool,
}

/// Targets still to process given the results of a previous run.
///
/// Targets with any prior record are skipped, except failures when
/// `retry_failed` is set.
pub fn partition_resume(
    targets: Vec<Target>,
    prior: &[ExtractionResult],
    retry_failed: bool,
) -> Vec<Target> {
    let done: HashSet<&str> = prior
        .iter()
        .filter(|r| r.is_success() || !retry_failed)
        .map(|r| r.code.as_str())
        .collect();
    let remaining: Vec<Target> = targets
        .into_iter()
        .filter(|t| !done.contains(t.code()))
        .collect();
    info!(
        previously_done = done.len(),
        remaining = remaining.len(),
        retry_failed,
        "Resume plan"
    );
    remaining
}

#[instrument(level = "info", skip_all, fields(targets = targets.len(), concurrency = concurrency))]
pub async fn run(
    controller: Arc<EscalationController>,
    writer: Arc<CheckpointWriter>,
    targets: Vec<Target>,
    concurrency: usize,
    politeness: Duration,
    cancel: CancellationToken,
) -> Result<RunStats, CheckpointError> {
    let total = targets.len();
    let locks = Arc::new(HostLocks::default());
    let completed = Arc::new(AtomicUsize::new(0));

    stream::iter(targets)
        .map(|target| {
            let controller = Arc::clone(&controller);
            let writer = Arc::clone(&writer);
            let locks = Arc::clone(&locks);
            let completed = Arc::clone(&completed);
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return;
                }
                let work = async {
                    let origin = host_of(target.url()).unwrap_or_default();
                    let origin_guard = locks.lock(&origin).await;
                    let canonical = controller.canonical_url(&target).await;
                    let host = host_of(&canonical).unwrap_or_default();
                    let _host_guards = locks.widen(origin_guard, &origin, &host).await;

                    let result = controller.resolve_with(&target, canonical).await;
                    if let Err(e) = writer.record(result).await {
                        error!(
                            code = %target.code(),
                            error = %e,
                            "Checkpoint write failed; will retry at next flush"
                        );
                    }
                    let n = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(
                        code = %target.code(),
                        progress = %format!("{n}/{total}"),
                        "Target completed"
                    );

                    sleep(politeness).await;
                };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(code = %target.code(), "Cancelled; target abandoned");
                    }
                    _ = work => {}
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<()>>()
        .await;

    let interrupted = cancel.is_cancelled();
    if interrupted {
        warn!("Run interrupted; flushing completed results");
    }
    writer.flush().await?;

    Ok(RunStats {
        completed: completed.load(Ordering::SeqCst),
        interrupted,
    })
}
