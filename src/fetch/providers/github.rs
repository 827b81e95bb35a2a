// src/fetch/providers/github.rs
//! Tagged sources: GitHub releases.

use std::time::Duration;

use serde::Deserialize;

use crate::error::FetchError;
use crate::fetch::types::{FetchOutcome, RawDelta, VersionMarker};
use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Clone)]
pub struct GithubReleases {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    max_releases: usize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl GithubReleases {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            max_releases: 10,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_max_releases(mut self, n: usize) -> Self {
        self.max_releases = n.clamp(1, 100);
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
        repo: &str,
        previous: Option<&VersionMarker>,
    ) -> Result<FetchOutcome, FetchError> {
        let releases = self
            .retry
            .run(repo, || self.list_releases(repo))
            .await?;
        Ok(collect_delta(&releases, previous, self.max_releases))
    }

    async fn list_releases(&self, repo: &str) -> Result<Vec<Release>, FetchError> {
        let url = format!("{}/repos/{}/releases", self.api_base, repo);
        let mut req = self
            .client
            .get(&url)
            .query(&[("per_page", self.max_releases)])
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .timeout(self.timeout);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

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
        serde_json::from_str(&body)
            .map_err(|e| FetchError::Malformed(format!("releases JSON for {repo}: {e}")))
    }
}

/// Decide what is new given the release listing (newest first).
///
/// Tags carry no ordering guarantee, so "newer than the stored tag" means
/// "listed before it". If the stored tag fell out of the window, the whole
/// window is treated as new.
pub fn collect_delta(
    releases: &[Release],
    previous: Option<&VersionMarker>,
    max_releases: usize,
) -> FetchOutcome {
    let published: Vec<&Release> = releases.iter().filter(|r| !r.draft).collect();
    let Some(latest) = published.first() else {
        return FetchOutcome::NoChange;
    };
    let marker = VersionMarker::new(latest.tag_name.clone());

    let Some(prev) = previous else {
        return FetchOutcome::Baseline(marker);
    };
    if prev == &marker {
        return FetchOutcome::NoChange;
    }

    let mut text = String::new();
    let mut versions = Vec::new();
    for r in published
        .iter()
        .take_while(|r| r.tag_name != prev.as_str())
        .take(max_releases.max(1))
    {
        text.push_str(&format!(
            "## {}\n{}\n\n",
            r.tag_name,
            r.body.as_deref().unwrap_or_default().trim()
        ));
        versions.push(r.tag_name.clone());
    }

    FetchOutcome::Changed {
        marker,
        delta: RawDelta {
            text,
            versions,
            previous: Some(prev.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(tag: &str, body: &str) -> Release {
        Release {
            tag_name: tag.into(),
            body: Some(body.into()),
            draft: false,
        }
    }

    #[test]
    fn first_observation_is_a_baseline() {
        let rs = vec![rel("v3", "c"), rel("v2", "b"), rel("v1", "a")];
        assert_eq!(
            collect_delta(&rs, None, 10),
            FetchOutcome::Baseline("v3".into())
        );
    }

    #[test]
    fn same_latest_tag_is_no_change() {
        let rs = vec![rel("v3", "c"), rel("v2", "b")];
        assert_eq!(
            collect_delta(&rs, Some(&"v3".into()), 10),
            FetchOutcome::NoChange
        );
    }

    #[test]
    fn collects_releases_newer_than_marker_newest_first() {
        let rs = vec![rel("v4", "- d"), rel("v3", "- c"), rel("v2", "- b")];
        let FetchOutcome::Changed { marker, delta } = collect_delta(&rs, Some(&"v2".into()), 10)
        else {
            panic!("expected a change");
        };
        assert_eq!(marker, "v4".into());
        assert_eq!(delta.versions, vec!["v4", "v3"]);
        assert_eq!(delta.text, "## v4\n- d\n\n## v3\n- c\n\n");
        assert_eq!(delta.previous, Some("v2".into()));
    }

    #[test]
    fn vanished_marker_is_bounded_by_window() {
        let rs = vec![rel("v9", "x"), rel("v8", "y"), rel("v7", "z")];
        let FetchOutcome::Changed { delta, .. } = collect_delta(&rs, Some(&"v1".into()), 2) else {
            panic!("expected a change");
        };
        assert_eq!(delta.versions, vec!["v9", "v8"]);
    }

    #[test]
    fn drafts_and_empty_listings_are_ignored() {
        let mut draft = rel("v5", "wip");
        draft.draft = true;
        let rs = vec![draft, rel("v4", "d")];
        assert_eq!(
            collect_delta(&rs, Some(&"v4".into()), 10),
            FetchOutcome::NoChange
        );
        assert_eq!(collect_delta(&[], None, 10), FetchOutcome::NoChange);
    }
}
