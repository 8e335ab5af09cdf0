use anyhow::{Context, Result};
use clap::Parser;
use detik_relay::caption::Captioner;
use detik_relay::config::Config;
use detik_relay::facebook::rest::GraphClient;
use detik_relay::feed::detik::DetikSource;
use detik_relay::ledger::Ledger;
use detik_relay::media::downloader::YtDlpAcquirer;
use detik_relay::media::staging::StagingDir;
use detik_relay::pages::{self, PageConfig};
use detik_relay::pipeline::{Orchestrator, RunReport, RunSettings};
use detik_relay::publish::graph::GraphPublisher;
use detik_relay::publish::Publisher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "detik-relay", version, about = "Repost new 20detik videos to Facebook pages")]
struct Args {
    /// TOML settings file. Missing is fine unless passed explicitly.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page list (overrides FB_PAGES_FILE)
    #[arg(long)]
    pages: Option<PathBuf>,

    /// Posted-video ledger (overrides DATA_FILE)
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Write logs here instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Keep running, one pass every CHECK_INTERVAL seconds
    #[arg(long)]
    watch: bool,

    /// Pre-flight and token checks only
    #[arg(long)]
    check: bool,

    /// Write the page list with masked tokens to this path
    #[arg(long)]
    redacted_pages: Option<PathBuf>,
}

const DEFAULT_CONFIG: &str = "relay.toml";

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("detik_relay=info"));
    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let (path, required) = match &args.config {
        Some(p) => (p.as_path(), true),
        None => (Path::new(DEFAULT_CONFIG), false),
    };
    let mut config = Config::load(path, required)?;
    config.apply_env()?;
    if let Some(p) = &args.pages {
        config.files.pages_file = p.clone();
    }
    if let Some(p) = &args.ledger {
        config.files.ledger_file = p.clone();
    }
    config.validate()?;
    Ok(config)
}

fn print_report(report: &RunReport) {
    println!();
    println!(
        "  {:<32} {:>9} {:>7} {:>6} {:>11}",
        "page", "published", "skipped", "failed", "not started"
    );
    for page in &report.pages {
        let name = format!("{} ({})", page.page_name, page.page_id);
        let note = if page.auth_aborted {
            "  auth failed"
        } else if page.aborted.is_some() {
            "  aborted"
        } else {
            ""
        };
        println!(
            "  {:<32} {:>9} {:>7} {:>6} {:>11}{}",
            name,
            page.published(),
            page.skipped(),
            page.failed(),
            page.not_started(),
            note
        );
    }
    if report.timed_out {
        println!("  run deadline reached, unstarted work left for the next run");
    }
    println!();
}

async fn check_tokens(publisher: &GraphPublisher, pages: &[PageConfig]) -> Result<()> {
    let mut rejected = 0;
    for page in pages {
        match publisher.verify(page).await {
            Ok(()) => tracing::info!(page = %page.label(), "token ok"),
            Err(e) => {
                tracing::error!(page = %page.label(), error = %e, "token check failed");
                rejected += 1;
            }
        }
    }
    if rejected > 0 {
        anyhow::bail!("{} of {} page tokens rejected", rejected, pages.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    // Load saved keys from .env (real env vars take precedence)
    Config::load_env_file();
    let config = load_config(&args)?;

    // --- Pre-flight: anything failing here aborts before network work ---
    let pages = pages::load(&config.files.pages_file)?;
    tracing::info!(count = pages.len(), file = %config.files.pages_file.display(), "pages loaded");
    if let Some(path) = &args.redacted_pages {
        pages::write_redacted(&pages, path)?;
        tracing::info!(path = %path.display(), "redacted page list written");
    }
    let ledger = Ledger::load(&config.files.ledger_file)?;

    let staging = StagingDir::new(&config.files.download_dir);
    staging
        .ensure()
        .with_context(|| format!("cannot create {}", staging.root().display()))?;

    let graph = Arc::new(GraphClient::new(&config.publish, config.request_timeout())?);
    let publisher = Arc::new(GraphPublisher::new(graph, &config.publish));

    if args.check {
        check_tokens(&publisher, &pages).await?;
        println!("  pre-flight ok: {} pages, {} ledger records", pages.len(), ledger.len());
        return Ok(());
    }

    let source = Arc::new(DetikSource::new(
        &config.source.base_url,
        &config.source.user_agent,
        config.request_timeout(),
    )?);
    let acquirer = Arc::new(YtDlpAcquirer::new(&config, staging.clone())?);
    let api_key = Config::openai_api_key();
    if api_key.is_none() {
        tracing::info!("OPENAI_API_KEY not set, captions use the plain fallback");
    }
    let captioner = Arc::new(Captioner::new(config.caption.clone(), api_key)?);

    let orchestrator = Orchestrator::new(
        source,
        acquirer,
        publisher,
        captioner,
        ledger,
        RunSettings::from_config(&config),
    );

    let interval = Duration::from_secs(config.schedule.check_interval_s.max(1));
    loop {
        match staging.purge() {
            Ok(0) => {}
            Ok(n) => tracing::info!(removed = n, "cleared leftover staged media"),
            Err(e) => tracing::warn!(error = %e, "could not clear staging dir"),
        }

        let report = tokio::select! {
            report = orchestrator.run(&pages) => report?,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted, in-flight work left unrecorded");
                break;
            }
        };
        print_report(&report);

        if !args.watch {
            break;
        }
        tracing::info!(next_check_s = interval.as_secs(), "waiting for next check");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, exiting");
                break;
            }
        }
    }
    Ok(())
}
