// src/fetch/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::FetchError;
use crate::fetch::providers::{github::GithubReleases, web::WebChangelog};
use crate::fetch::types::{FetchOutcome, SourceFetcher, VersionMarker};
use crate::sources::{SourceCatalog, SourceDescriptor, SourceKind};
use crate::state::SeenState;

/// Elements whose content never belongs to a changelog.
const NOISE_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "noscript", "svg"];

fn noise_res() -> &'static [Regex] {
    static RES: OnceCell<Vec<Regex>> = OnceCell::new();
    RES.get_or_init(|| {
        NOISE_TAGS
            .iter()
            .map(|t| Regex::new(&format!(r"(?is)<{t}\b[^>]*>.*?</{t}\s*>")).unwrap())
            .collect()
    })
}

fn region(html: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*)</{tag}\s*>")).ok()?;
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reduce an HTML page to its readable text: one trimmed, non-empty line per
/// text run, capped at `max_lines`.
pub fn extract_text(html: &str, max_lines: usize) -> String {
    // 1) Drop comments and noise elements
    static RE_COMMENT: OnceCell<Regex> = OnceCell::new();
    let re_comment = RE_COMMENT.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
    let mut out = re_comment.replace_all(html, "").to_string();
    for re in noise_res() {
        out = re.replace_all(&out, "").to_string();
    }

    // 2) Prefer the main content region
    if let Some(inner) = ["main", "article", "body"]
        .iter()
        .find_map(|t| region(&out, t))
    {
        out = inner;
    }

    // 3) Every tag is a text boundary
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?s)</?[A-Za-z!][^>]*>").unwrap());
    out = re_tags.replace_all(&out, "\n").to_string();

    // 4) Entities, then whitespace per line
    let decoded = html_escape::decode_html_entities(&out).to_string();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[ \t\u{00A0}\r\f\v]+").unwrap());

    decoded
        .lines()
        .map(|l| re_ws.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty())
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fetcher over HTTP; each source kind owns its own marker rule.
#[derive(Clone)]
pub struct HttpFetcher {
    github: GithubReleases,
    web: WebChangelog,
}

impl HttpFetcher {
    pub fn new(github: GithubReleases, web: WebChangelog) -> Self {
        Self { github, web }
    }
}

#[async_trait::async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        previous: Option<&VersionMarker>,
    ) -> Result<FetchOutcome, FetchError> {
        match &source.kind {
            SourceKind::Tagged { repo } => self.github.fetch(repo, previous).await,
            SourceKind::Hashed { url } => self.web.fetch(url, previous).await,
        }
    }
}

pub type FetchResult = (SourceDescriptor, Result<FetchOutcome, FetchError>);

/// Fetch every catalog source on a bounded pool. Results follow catalog order.
/// `deadline` caps each source as a whole, retries included.
pub async fn fetch_all(
    fetcher: Arc<dyn SourceFetcher>,
    catalog: &SourceCatalog,
    seen: &SeenState,
    workers: usize,
    deadline: Duration,
) -> Vec<FetchResult> {
    let jobs: Vec<(SourceDescriptor, Option<VersionMarker>)> = catalog
        .iter()
        .map(|s| (s.clone(), seen.get(&s.key).cloned()))
        .collect();
    let keys: Vec<SourceDescriptor> = jobs.iter().map(|(s, _)| s.clone()).collect();

    let done = crate::workers::map_bounded(jobs, workers, |(source, previous)| {
        let fetcher = Arc::clone(&fetcher);
        async move {
            let res = tokio::time::timeout(deadline, fetcher.fetch(&source, previous.as_ref()))
                .await
                .unwrap_or(Err(FetchError::Timeout(deadline)));
            match &res {
                Ok(outcome) => {
                    tracing::debug!(source = %source.key, outcome = outcome.label(), "fetched");
                    counter!("digest_fetch_total", "outcome" => outcome.label()).increment(1);
                }
                Err(e) => {
                    tracing::warn!(source = %source.key, error = %e, "fetch failed");
                    counter!("digest_fetch_total", "outcome" => "failed").increment(1);
                }
            }
            res
        }
    })
    .await;

    keys.into_iter()
        .zip(done)
        .map(|(source, res)| {
            let res = res.unwrap_or_else(|| {
                Err(FetchError::Malformed("fetch worker panicked".to_string()))
            });
            (source, res)
        })
        .collect()
}
