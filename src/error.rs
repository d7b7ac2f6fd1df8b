//! Error taxonomy for the retrieval pipeline.
//!
//! Two families live here:
//!
//! - [`FetchError`]: transient or configuration failures raised by a single
//!   retrieval strategy. These never leave the escalation controller; they
//!   only decide whether the next attempt retries or escalates.
//! - Startup errors ([`ConfigError`], [`InputError`], [`CheckpointError`]):
//!   the only conditions allowed to abort a run.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of one fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection failure, non-2xx status, or driver-level navigation failure.
    #[error("network error: {0}")]
    Network(String),

    /// The request or navigation exceeded its time budget.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The rendering proxy answered with a non-2xx status or could not be reached.
    #[error("rendering proxy unavailable: {0}")]
    ProxyUnavailable(String),

    /// No API key is configured for the rendering proxy.
    #[error("rendering proxy credentials missing")]
    ProxyCredentialsMissing,
}

impl FetchError {
    /// Map a reqwest failure onto the taxonomy, keeping timeouts distinct.
    pub fn from_reqwest(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout_ms)
        } else {
            FetchError::Network(err.to_string())
        }
    }

    /// Short machine-readable cause, used in failure records and reports.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network_error",
            FetchError::Timeout(_) => "timeout",
            FetchError::ProxyUnavailable(_) => "proxy_unavailable",
            FetchError::ProxyCredentialsMissing => "proxy_credentials_missing",
        }
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Problems reading the list of targets.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read input {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("input {path} has no `{column}` column (found: {found})")]
    MissingColumn {
        path: PathBuf,
        column: &'static str,
        found: String,
    },
}

/// Problems reading or writing the checkpoint file.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}
