//! Durable, incremental persistence of completed results.
//!
//! The checkpoint file is also the run's output:
//!
//! ```json
//! {
//!   "generated_at": "2025-05-06T10:00:00Z",
//!   "results": [ { "code": "A1", "status": "success", ... } ]
//! }
//! ```
//!
//! Results are keyed by target code; recording a code again replaces its
//! earlier record in place. Flushes rewrite the whole file through a temp
//! file and are serialized by the writer's lock.

use crate::error::CheckpointError;
use crate::models::ExtractionResult;
use crate::utils::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub generated_at: DateTime<Utc>,
    pub results: Vec<ExtractionResult>,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    generated_at: DateTime<Utc>,
    results: &'a [ExtractionResult],
}

#[derive(Default)]
struct Inner {
    results: Vec<ExtractionResult>,
    by_code: HashMap<String, usize>,
    since_flush: usize,
}

impl Inner {
    fn upsert(&mut self, result: ExtractionResult) {
        match self.by_code.get(&result.code) {
            Some(&i) => self.results[i] = result,
            None => {
                self.by_code.insert(result.code.clone(), self.results.len());
                self.results.push(result);
            }
        }
    }
}

pub struct CheckpointWriter {
    path: PathBuf,
    every: usize,
    inner: Mutex<Inner>,
}

impl CheckpointWriter {
    /// A writer seeded with `prior` results (from [`CheckpointWriter::load`]).
    pub fn new(path: &Path, every: usize, prior: Vec<ExtractionResult>) -> Self {
        let mut inner = Inner::default();
        for result in prior {
            inner.upsert(result);
        }
        Self {
            path: path.to_path_buf(),
            every: every.max(1),
            inner: Mutex::new(inner),
        }
    }

    /// Read a previous checkpoint. A missing file is an empty checkpoint.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Vec<ExtractionResult>, CheckpointError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No previous checkpoint");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(CheckpointError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let doc: CheckpointDocument =
            serde_json::from_slice(&raw).map_err(|source| CheckpointError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        info!(results = doc.results.len(), generated_at = %doc.generated_at, "Loaded checkpoint");
        Ok(doc.results)
    }

    /// Record a completed result, flushing every `every` records.
    pub async fn record(&self, result: ExtractionResult) -> Result<(), CheckpointError> {
        let mut inner = self.inner.lock().await;
        inner.upsert(result);
        inner.since_flush += 1;
        if inner.since_flush >= self.every {
            self.write(&mut inner).await?;
        }
        Ok(())
    }

    /// Write everything recorded so far. Safe to call repeatedly.
    pub async fn flush(&self) -> Result<(), CheckpointError> {
        let mut inner = self.inner.lock().await;
        self.write(&mut inner).await
    }

    pub async fn snapshot(&self) -> Vec<ExtractionResult> {
        self.inner.lock().await.results.clone()
    }

    async fn write(&self, inner: &mut Inner) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec_pretty(&DocumentRef {
            generated_at: Utc::now(),
            results: &inner.results,
        })?;

        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| CheckpointError::Io {
                path: self.path.clone(),
                source,
            })?;
        inner.since_flush = 0;
        info!(path = %self.path.display(), results = inner.results.len(), "Checkpoint written");
        Ok(())
    }
}
