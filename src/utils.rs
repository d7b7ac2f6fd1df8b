//! Small helpers shared across the pipeline.
//!
//! - Text normalisation and counting (whitespace collapse, word/char counts)
//! - Host extraction and cookie-store domain keys
//! - Article metadata heuristics (language, source type)
//! - Log-friendly truncation and output directory validation

use crate::models::{ArticleMetadata, SourceType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};
use url::Url;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static ARABIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[؀-ۿ]").unwrap());

const FRENCH_MARKERS: &[&str] = &[" le ", " la ", " les ", " des ", " une ", " dans ", " pour "];
const ENGLISH_MARKERS: &[&str] = &[" the ", " and ", " of ", " in ", " to ", " with "];
const OFFICIAL_MARKERS: &[&str] = &[
    "gouv", "gov", "gob", "who.int", "woah", "oie.int", "fao.org", "europa.eu", "cdc",
];
const SOCIAL_MARKERS: &[&str] = &["facebook", "twitter", "x.com", "instagram", "linkedin"];

/// Collapse every run of whitespace into a single space and trim.
pub fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// Character (not byte) count of the trimmed text.
pub fn char_count(s: &str) -> usize {
    s.trim().chars().count()
}

/// Lowercase host of a URL, if it parses.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Key under which cookies for a host are stored: lowercase, no leading
/// `www.` and no leading dot.
pub fn domain_key(host: &str) -> String {
    let host = host.trim().trim_start_matches('.').to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

/// Guess the article language from script and function-word frequency.
///
/// Returns `"ar"`, `"fr"`, `"en"`, or `"unknown"`.
pub fn detect_language(text: &str) -> String {
    if text.trim().chars().count() < 10 {
        return "unknown".to_string();
    }
    if ARABIC.find_iter(text).take(6).count() > 5 {
        return "ar".to_string();
    }

    let lower = format!(" {} ", text.to_lowercase());
    let fr = FRENCH_MARKERS.iter().filter(|w| lower.contains(*w)).count();
    let en = ENGLISH_MARKERS.iter().filter(|w| lower.contains(*w)).count();
    match fr.cmp(&en) {
        std::cmp::Ordering::Greater => "fr",
        std::cmp::Ordering::Less => "en",
        std::cmp::Ordering::Equal => "unknown",
    }
    .to_string()
}

pub fn source_type(url: &str) -> SourceType {
    let url = url.to_lowercase();
    if OFFICIAL_MARKERS.iter().any(|m| url.contains(m)) {
        SourceType::Official
    } else if SOCIAL_MARKERS.iter().any(|m| url.contains(m)) {
        SourceType::Social
    } else {
        SourceType::Media
    }
}

/// Derive [`ArticleMetadata`] for an accepted body.
pub fn article_metadata(url: &str, body_text: &str) -> ArticleMetadata {
    ArticleMetadata {
        char_count: char_count(body_text),
        word_count: word_count(body_text),
        language: detect_language(body_text),
        source_type: source_type(url),
    }
}

/// Truncate a string for logging, respecting char boundaries.
///
/// Strings longer than `max` characters get `"…(+N chars)"` appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let total = s.chars().count();
    if total <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}…(+{} chars)", head, total - max)
    }
}

/// Ensure the parent directory of `path` exists and is writable.
///
/// Creates the directory if missing, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_parent(path: &Path) -> Result<(), Box<dyn Error>> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&dir).await?;
    let scratch_path = dir.join("..__write_check__");
    match stdfs::File::create(&scratch_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&scratch_path);
            info!(dir = %dir.display(), "Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Write `bytes` to `path` via a sibling temp file and a rename, so readers
/// never observe a partially written file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp_path, path).await
}
