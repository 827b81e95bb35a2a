//! release-digest: binary entrypoint.
//! One invocation is one digest run; schedule it with cron or a systemd timer.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use release_digest::config::{DigestConfig, ParserKind};
use release_digest::error::DeliveryError;
use release_digest::fetch::providers::{github::GithubReleases, web::WebChangelog};
use release_digest::fetch::HttpFetcher;
use release_digest::metrics::{ensure_metrics_described, TextfileExporter};
use release_digest::notify::{TelegramNotifier, Transport};
use release_digest::parse::cache::CachingParser;
use release_digest::parse::claude::ClaudeParser;
use release_digest::parse::rules::RuleParser;
use release_digest::parse::ReleaseParser;
use release_digest::retry::RetryPolicy;
use release_digest::sources::config::load_catalog_default;
use release_digest::{PipelineDriver, PipelineSettings, StateStore};

/// Exit code for configuration errors.
const EXIT_CONFIG: u8 = 1;

#[derive(Debug, Parser)]
#[command(name = "release-digest", version, about)]
struct Cli {
    /// Config file (TOML). Defaults to $DIGEST_CONFIG_PATH, then config/digest.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Render and print the digest; no delivery, no state write.
    #[arg(long)]
    preview: bool,

    /// Only process these source keys (repeatable).
    #[arg(long = "source", value_name = "KEY")]
    sources: Vec<String>,

    /// Print the source catalog and exit.
    #[arg(long)]
    list_sources: bool,
}

/// Compact logs by default, JSON lines when DIGEST_LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("release_digest=info,warn"));
    let json = std::env::var("DIGEST_LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

/// Stand-in transport for preview runs; the driver never calls it.
struct NoDelivery;

#[async_trait::async_trait]
impl Transport for NoDelivery {
    async fn send(&self, _text: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Rejected("preview mode does not deliver".to_string()))
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

fn build_parser(cfg: &DigestConfig, http: &reqwest::Client) -> Result<Arc<dyn ReleaseParser>> {
    let p = &cfg.parser;
    let key = cfg.anthropic_key();
    let use_claude = match (p.provider, &key) {
        (ParserKind::Rules, _) => false,
        (ParserKind::Auto, k) => k.is_some(),
        (ParserKind::Claude, None) => {
            anyhow::bail!("parser.provider = \"claude\" but no ANTHROPIC_API_KEY is available")
        }
        (ParserKind::Claude, Some(_)) => true,
    };

    if !use_claude {
        tracing::info!("using rule-based parser");
        let parser: Arc<dyn ReleaseParser> = match &p.cache_dir {
            Some(dir) => Arc::new(CachingParser::new(RuleParser::new(), dir.clone(), p.cache_max_age())),
            None => Arc::new(RuleParser::new()),
        };
        return Ok(parser);
    }

    let mut claude = ClaudeParser::new(http.clone(), key.unwrap_or_default())
        .with_model(p.model.clone())
        .with_max_tokens(p.max_tokens)
        .with_timeout(Duration::from_secs(p.timeout_secs))
        .with_retry(RetryPolicy::default().with_attempts(p.retries));
    if let Some(base) = &p.api_base {
        claude = claude.with_api_base(base.clone());
    }
    tracing::info!(model = %p.model, "using Claude parser");
    let parser: Arc<dyn ReleaseParser> = match &p.cache_dir {
        Some(dir) => Arc::new(CachingParser::new(claude, dir.clone(), p.cache_max_age())),
        None => Arc::new(claude),
    };
    Ok(parser)
}

async fn run(cli: Cli) -> Result<u8> {
    let cfg = DigestConfig::load(cli.config.as_deref()).context("loading digest config")?;

    let mut catalog =
        load_catalog_default(cfg.sources_path.as_deref()).context("loading source catalog")?;
    if !cli.sources.is_empty() {
        catalog = catalog.only(&cli.sources).context("applying --source filter")?;
    }

    if cli.list_sources {
        for s in catalog.iter() {
            println!("{:<16} {:<7} {:<24} {}", s.key, s.kind_label(), s.name, s.link());
        }
        return Ok(0);
    }

    let exporter = match &cfg.metrics_textfile {
        Some(path) => Some(TextfileExporter::install(path.clone())?),
        None => {
            ensure_metrics_described();
            None
        }
    };

    let user_agent = cfg
        .fetch
        .user_agent
        .clone()
        .unwrap_or_else(|| release_digest::fetch::providers::web::DEFAULT_USER_AGENT.to_string());
    let http = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;

    let fetch_timeout = Duration::from_secs(cfg.fetch.timeout_secs);
    let fetch_retry = RetryPolicy::default().with_attempts(cfg.fetch.retries);
    let mut github = GithubReleases::new(http.clone())
        .with_token(cfg.github_token())
        .with_max_releases(cfg.fetch.max_releases)
        .with_timeout(fetch_timeout)
        .with_retry(fetch_retry);
    if let Some(base) = &cfg.fetch.github_api_base {
        github = github.with_api_base(base.clone());
    }
    let web = WebChangelog::new(http.clone())
        .with_max_lines(cfg.fetch.web_max_lines)
        .with_timeout(fetch_timeout)
        .with_retry(fetch_retry);
    let fetcher = Arc::new(HttpFetcher::new(github, web));

    let parser = build_parser(&cfg, &http)?;

    let transport: Arc<dyn Transport> = if cli.preview {
        Arc::new(NoDelivery)
    } else {
        let (token, chat_id) = cfg
            .telegram_credentials()
            .context("telegram credentials")?;
        let mut tg = TelegramNotifier::new(http.clone(), token, chat_id)
            .with_timeout(cfg.telegram.timeout_secs)
            .with_retries(cfg.telegram.retries)
            .with_silent(cfg.telegram.silent);
        if let Some(base) = &cfg.telegram.api_base {
            tg = tg.with_api_base(base.clone());
        }
        Arc::new(tg)
    };

    // Outer per-stage caps leave room for the client-level retries.
    let attempts = |n: u8| u32::from(n.max(1));
    let settings = PipelineSettings {
        workers: cfg.fetch.workers,
        max_chunk: cfg.render.max_chunk,
        fetch_timeout: fetch_timeout * attempts(cfg.fetch.retries) + Duration::from_secs(30),
        parse_timeout: Duration::from_secs(cfg.parser.timeout_secs) * attempts(cfg.parser.retries)
            + Duration::from_secs(30),
        send_timeout: Duration::from_secs(cfg.telegram.timeout_secs) * attempts(cfg.telegram.retries)
            + Duration::from_secs(60),
        lock_path: Some(cfg.state.lock_path.clone()),
        lock_stale_after: cfg.lock_stale_after(),
        preview: cli.preview,
        date: None,
    };

    let driver = PipelineDriver::new(
        catalog,
        fetcher,
        parser,
        transport,
        StateStore::new(cfg.state.path.clone()),
        settings,
    );
    let report = driver.run().await;

    if cli.preview {
        for (i, chunk) in report.chunks.iter().enumerate() {
            println!("----- chunk {}/{} ({} chars) -----", i + 1, report.chunks.len(), chunk.text.chars().count());
            println!("{}", chunk.text);
        }
    }
    for line in report.summary_lines() {
        tracing::info!("{line}");
    }

    if let Some(exporter) = exporter {
        if let Err(e) = exporter.write() {
            tracing::warn!(error = %e, "metrics textfile not written");
        }
    }

    Ok(report.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env for local runs; missing file is fine.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "run failed");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}
