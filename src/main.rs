//! # Article Harvest
//!
//! Retrieve validated plain-text article content for a list of URLs, each
//! tagged with a caller-supplied code, escalating from cheap to expensive
//! retrieval strategies until a page passes validation.
//!
//! ## Features
//!
//! - Resolves shortened links before retrieval
//! - Chooses a per-domain strategy order from a configurable table
//! - Three strategies: plain HTTP, headless Chromium, and a paid rendering proxy
//! - Rejects bot-challenge interstitials and stub pages before accepting text
//! - Replays browser cookies across runs
//! - Checkpoints results incrementally; interrupted runs resume where they stopped
//!
//! ## Usage
//!
//! ```sh
//! article_harvest -i targets.csv -o results.json
//! ```
//!
//! ## Architecture
//!
//! 1. **Input**: read `(code, url)` targets from CSV, skipping ones already done
//! 2. **Canonicalize**: expand shortener links
//! 3. **Classify**: pick the strategy order for the host
//! 4. **Escalate**: run strategies in order, judging each page
//! 5. **Output**: record one result per target in the checkpoint file

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod canonicalize;
mod classifier;
mod cli;
mod config;
mod controller;
mod error;
mod input;
mod models;
mod oracle;
mod outputs;
mod pipeline;
mod renderer;
mod scrapers;
mod session;
mod utils;

use canonicalize::Canonicalizer;
use classifier::StrategyClassifier;
use cli::Cli;
use config::{HarvestConfig, MAX_CONCURRENCY};
use controller::EscalationController;
use models::StrategyKind;
use oracle::ValidityOracle;
use outputs::checkpoint::CheckpointWriter;
use outputs::report::RunSummary;
use renderer::Renderer;
use renderer::chromium::ChromiumRenderer;
use scrapers::Fetcher;
use scrapers::browser::BrowserFetcher;
use scrapers::direct::DirectFetcher;
use scrapers::extract::ContentExtractor;
use scrapers::proxy::ProxyRenderFetcher;
use session::SessionStore;
use utils::ensure_writable_parent;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("article_harvest starting up");

    let args = Cli::parse();
    debug!(input = %args.input.display(), output = %args.output.display(), "Parsed CLI arguments");

    // ---- Configuration ----
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    if let Err(e) = ensure_writable_parent(&args.output).await {
        error!(
            path = %args.output.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Targets and resume state ----
    if !args.delimiter.is_ascii() {
        return Err(format!(
            "delimiter must be a single ASCII character, got {:?}",
            args.delimiter
        )
        .into());
    }
    let targets = input::read_targets(&args.input, args.delimiter as u8)?;
    let prior = CheckpointWriter::load(&args.output).await?;
    let remaining = pipeline::partition_resume(targets, &prior, args.retry_failed);

    // ---- Collaborators ----
    let sessions = Arc::new(SessionStore::load(&args.cookies).await);
    let extractor = Arc::new(ContentExtractor::new(&config.extraction));
    let canonicalizer = Arc::new(Canonicalizer::new(&config.canonicalizer)?);

    let mut fetchers: Vec<Arc<dyn Fetcher>> = Vec::new();
    fetchers.push(Arc::new(DirectFetcher::new(&config.direct, Arc::clone(&extractor))?));
    fetchers.push(Arc::new(ProxyRenderFetcher::new(&config.proxy, Arc::clone(&extractor))?));

    let mut browser: Option<Arc<dyn Renderer>> = None;
    let wants_browser = !args.no_browser && config.uses_strategy(StrategyKind::BrowserFetch);
    if wants_browser && !remaining.is_empty() {
        let chromium = match ChromiumRenderer::launch(&config.browser).await {
            Ok(r) => r,
            Err(e) => {
                error!(
                    error = %e,
                    "Browser backend failed to launch (use --no-browser to run without it)"
                );
                return Err(e.into());
            }
        };
        let renderer: Arc<dyn Renderer> = Arc::new(chromium);
        fetchers.push(Arc::new(BrowserFetcher::new(
            Arc::clone(&renderer),
            Arc::clone(&sessions),
            Arc::clone(&extractor),
            &config.browser,
        )));
        browser = Some(renderer);
    }

    let controller = Arc::new(EscalationController::new(
        canonicalizer,
        StrategyClassifier::new(&config.classifier),
        ValidityOracle::new(&config.oracle),
        fetchers,
        config.controller.clone(),
    ));
    let writer = Arc::new(CheckpointWriter::new(&args.output, config.checkpoint.every, prior));

    // ---- Ctrl+C ----
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C; finishing up and saving progress");
            on_signal.cancel();
        }
    });

    // ---- Run ----
    let stats = pipeline::run(
        controller,
        Arc::clone(&writer),
        remaining,
        config.controller.concurrency,
        config.controller.politeness_delay(),
        cancel,
    )
    .await;

    // ---- Shutdown ----
    if let Err(e) = sessions.persist().await {
        warn!(error = %e, "Failed to persist session cookies");
    }
    if let Some(renderer) = browser {
        if let Err(e) = renderer.shutdown().await {
            warn!(error = %e, "Browser shutdown failed");
        }
    }

    let stats = match stats {
        Ok(stats) => stats,
        Err(e) => {
            error!(path = %args.output.display(), error = %e, "Failed to write results");
            return Err(e.into());
        }
    };

    RunSummary::from_results(&writer.snapshot().await).log();

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        completed_this_run = stats.completed,
        interrupted = stats.interrupted,
        cookie_domains = sessions.domain_count(),
        "Execution complete"
    );

    Ok(())
}

/// Defaults, then the YAML file, then CLI flags.
fn load_config(args: &Cli) -> Result<HarvestConfig, Box<dyn Error>> {
    let mut config = HarvestConfig::load(args.config.as_deref())?;

    if let Some(key) = &args.proxy_api_key {
        config.proxy.api_key = Some(key.clone());
    }
    if let Some(concurrency) = args.concurrency {
        let clamped = concurrency.clamp(1, MAX_CONCURRENCY);
        if clamped != concurrency {
            warn!(requested = concurrency, using = clamped, "Concurrency clamped");
        }
        config.controller.concurrency = clamped;
    }
    if let Some(every) = args.checkpoint_every {
        config.checkpoint.every = every;
    }
    if let Some(ms) = args.politeness_ms {
        config.controller.politeness_delay_ms = ms;
    }
    if args.no_browser {
        info!("Browser strategy disabled");
        config.disable_strategy(StrategyKind::BrowserFetch);
    }

    config.validate()?;
    Ok(config)
}
