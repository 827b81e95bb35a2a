// src/fetch/providers/web.rs
//! Hashed sources: web changelog pages.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::FetchError;
use crate::fetch::types::{FetchOutcome, RawDelta, VersionMarker};
use crate::retry::RetryPolicy;

/// Used by the binary when `[fetch] user_agent` is unset. Requests carry the
/// client's configured agent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; release-digest/0.1)";

#[derive(Clone)]
pub struct WebChangelog {
    client: reqwest::Client,
    max_lines: usize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl WebChangelog {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_lines: 200,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_max_lines(mut self, n: usize) -> Self {
        self.max_lines = n.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn fetch(
        &self,
        url: &str,
        previous: Option<&VersionMarker>,
    ) -> Result<FetchOutcome, FetchError> {
        let html = self.retry.run(url, || self.get_page(url)).await?;
        let text = crate::fetch::extract_text(&html, self.max_lines);
        if text.is_empty() {
            return Err(FetchError::Malformed(format!(
                "no readable content at {url}"
            )));
        }
        Ok(compare(text, previous))
    }

    async fn get_page(&self, url: &str) -> Result<String, FetchError> {
        let req = self.client.get(url).timeout(self.timeout);
        let resp = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        let body = tokio::time::timeout(self.timeout, resp.text())
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;
        Ok(body)
    }
}

/// SHA-256 hex digest of extracted page text.
pub fn content_digest(text: &str) -> VersionMarker {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    VersionMarker::new(out)
}

/// A digest cannot tell what changed, so the whole page is the delta.
pub fn compare(text: String, previous: Option<&VersionMarker>) -> FetchOutcome {
    let marker = content_digest(&text);
    match previous {
        None => FetchOutcome::Baseline(marker),
        Some(prev) if prev == &marker => FetchOutcome::NoChange,
        Some(prev) => FetchOutcome::Changed {
            marker,
            delta: RawDelta {
                text,
                versions: Vec::new(),
                previous: Some(prev.clone()),
            },
        },
    }
}
