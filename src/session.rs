//! Per-domain cookie store shared by browser fetches across runs.
//!
//! The store is an explicit instance passed to whoever needs it. Reads hand
//! out a copy of a domain's cookies; writes merge into the stored set while
//! holding the map lock, so concurrent updates for one domain cannot lose
//! each other's cookies. Persistence is a whole-file rewrite through a temp
//! file. Unreadable or corrupt files start the run with an empty store.

use crate::utils::{domain_key, write_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// One browser cookie as persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Seconds since the Unix epoch; `None` for session cookies.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl StoredCookie {
    fn same_slot(&self, other: &StoredCookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn is_expired(&self, now_secs: f64) -> bool {
        matches!(self.expires, Some(exp) if exp > 0.0 && exp <= now_secs)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CookieFile {
    saved_at: Option<DateTime<Utc>>,
    domains: HashMap<String, Vec<StoredCookie>>,
}

pub struct SessionStore {
    path: Option<PathBuf>,
    domains: Mutex<HashMap<String, Vec<StoredCookie>>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl SessionStore {
    /// A store that never touches disk.
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            domains: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the store from `path`. Missing, unreadable, or corrupt files
    /// yield an empty store; expired cookies are dropped.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Self {
        let domains = match tokio::fs::read_to_string(path).await {
            Ok(raw) => match serde_json::from_str::<CookieFile>(&raw) {
                Ok(file) => {
                    let now = Utc::now().timestamp() as f64;
                    let mut domains = file.domains;
                    for cookies in domains.values_mut() {
                        cookies.retain(|c| !c.is_expired(now));
                    }
                    domains.retain(|_, cookies| !cookies.is_empty());
                    info!(domains = domains.len(), "Loaded session cookies");
                    domains
                }
                Err(e) => {
                    warn!(error = %e, "Cookie store is corrupt; starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cookie store yet; starting empty");
                HashMap::new()
            }
            Err(e) => {
                warn!(error = %e, "Cookie store unreadable; starting empty");
                HashMap::new()
            }
        };

        Self {
            path: Some(path.to_path_buf()),
            domains: Mutex::new(domains),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Cookies stored for `domain` (any host form; normalised internally).
    pub fn get(&self, domain: &str) -> Vec<StoredCookie> {
        let key = domain_key(domain);
        match self.domains.lock() {
            Ok(map) => map.get(&key).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Merge `cookies` into the set for `domain`. Cookies replace stored ones
    /// with the same name, domain, and path.
    pub fn put(&self, domain: &str, cookies: Vec<StoredCookie>) {
        if cookies.is_empty() {
            return;
        }
        let key = domain_key(domain);
        let Ok(mut map) = self.domains.lock() else {
            warn!(domain = %key, "Cookie store lock poisoned; dropping update");
            return;
        };
        let stored = map.entry(key).or_default();
        for cookie in cookies {
            match stored.iter_mut().find(|c| c.same_slot(&cookie)) {
                Some(existing) => *existing = cookie,
                None => stored.push(cookie),
            }
        }
    }

    pub fn domain_count(&self) -> usize {
        self.domains.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Write the whole store to disk. A no-op for in-memory stores.
    pub async fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let snapshot = CookieFile {
            saved_at: Some(Utc::now()),
            domains: self.domains.lock().map(|m| m.clone()).unwrap_or_default(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(path, &bytes).await?;
        debug!(
            path = %path.display(),
            domains = snapshot.domains.len(),
            "Persisted session cookies"
        );
        Ok(())
    }
}
