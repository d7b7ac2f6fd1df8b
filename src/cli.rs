//! Command-line interface definitions for Article Harvest.
//!
//! Flags override the matching values from the YAML config file; anything not
//! given on the command line keeps the config (or built-in default) value.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the Article Harvest application.
///
/// # Examples
///
/// ```sh
/// # Basic usage: read targets, write results next to them
/// article_harvest -i targets.csv -o results.json
///
/// # Resume a previous run and retry everything that failed
/// article_harvest -i targets.csv -o results.json --retry-failed
///
/// # No Chromium on this machine
/// article_harvest -i targets.csv -o results.json --no-browser
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// CSV file of targets (a code column and a URL column)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Results file; also the checkpoint that resumed runs continue from
    #[arg(short, long)]
    pub output: PathBuf,

    /// Session cookie store
    #[arg(long, default_value = "cookies.json")]
    pub cookies: PathBuf,

    /// Optional path to a YAML config file
    #[arg(short, long, env = "HARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Rendering proxy API key
    #[arg(long, env = "SCRAPINGBEE_API_KEY", hide_env_values = true)]
    pub proxy_api_key: Option<String>,

    /// Targets processed in parallel (1-8)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Flush the checkpoint after this many completed targets
    #[arg(long)]
    pub checkpoint_every: Option<usize>,

    /// Pause between targets, in milliseconds
    #[arg(long)]
    pub politeness_ms: Option<u64>,

    /// Re-run targets whose previous record is a failure
    #[arg(long)]
    pub retry_failed: bool,

    /// Remove the browser strategy from every plan and skip launching Chromium
    #[arg(long)]
    pub no_browser: bool,

    /// CSV field delimiter
    #[arg(long, default_value_t = ',')]
    pub delimiter: char,
}
