// src/change_detector.rs
//! Splits a batch of fetch results into what must be parsed, what only needs
//! a baseline recorded, and what is skipped this run.

use std::fmt;

use crate::fetch::types::{FetchOutcome, RawDelta, VersionMarker};
use crate::fetch::FetchResult;
use crate::sources::SourceDescriptor;

/// A source with new content: the marker to store once delivered, and the
/// text to summarize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changed {
    pub source: SourceDescriptor,
    pub marker: VersionMarker,
    pub delta: RawDelta,
}

/// Per-source result line of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Baseline,
    Unchanged,
    /// Parsed and rendered; not (yet) delivered.
    Rendered,
    Delivered,
    FetchFailed(String),
    ParseFailed(String),
}

impl SourceStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, SourceStatus::FetchFailed(_) | SourceStatus::ParseFailed(_))
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Baseline => f.write_str("baseline recorded"),
            SourceStatus::Unchanged => f.write_str("no change"),
            SourceStatus::Rendered => f.write_str("rendered, not delivered"),
            SourceStatus::Delivered => f.write_str("delivered"),
            SourceStatus::FetchFailed(e) => write!(f, "fetch failed: {e}"),
            SourceStatus::ParseFailed(e) => write!(f, "parse failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub key: String,
    pub name: String,
    pub status: SourceStatus,
}

impl SourceReport {
    pub fn new(source: &SourceDescriptor, status: SourceStatus) -> Self {
        Self {
            key: source.key.clone(),
            name: source.name.clone(),
            status,
        }
    }
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    /// In catalog order.
    pub changed: Vec<Changed>,
    pub baselines: Vec<(SourceDescriptor, VersionMarker)>,
    pub unchanged: Vec<SourceDescriptor>,
    pub failed: Vec<(SourceDescriptor, String)>,
}

impl ChangeSet {
    pub fn is_quiet(&self) -> bool {
        self.changed.is_empty() && self.baselines.is_empty()
    }

    /// Report lines for everything decided at this stage. Changed sources are
    /// reported later, once their parse outcome is known.
    pub fn reports(&self) -> Vec<SourceReport> {
        let mut out = Vec::new();
        out.extend(
            self.baselines
                .iter()
                .map(|(s, _)| SourceReport::new(s, SourceStatus::Baseline)),
        );
        out.extend(
            self.unchanged
                .iter()
                .map(|s| SourceReport::new(s, SourceStatus::Unchanged)),
        );
        out.extend(
            self.failed
                .iter()
                .map(|(s, e)| SourceReport::new(s, SourceStatus::FetchFailed(e.clone()))),
        );
        out
    }
}

pub fn detect(results: Vec<FetchResult>) -> ChangeSet {
    let mut set = ChangeSet::default();
    for (source, res) in results {
        match res {
            Ok(FetchOutcome::Changed { marker, delta }) => set.changed.push(Changed {
                source,
                marker,
                delta,
            }),
            Ok(FetchOutcome::Baseline(marker)) => set.baselines.push((source, marker)),
            Ok(FetchOutcome::NoChange) => set.unchanged.push(source),
            Err(e) => set.failed.push((source, e.to_string())),
        }
    }
    tracing::info!(
        changed = set.changed.len(),
        baselines = set.baselines.len(),
        unchanged = set.unchanged.len(),
        failed = set.failed.len(),
        "change detection complete"
    );
    set
}
