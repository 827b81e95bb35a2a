// src/pipeline.rs
//! # Pipeline driver
//! One invocation: lock, load seen markers, fetch, detect, parse, render,
//! deliver, commit.
//!
//! Phases: `Idle → Fetching → Rendering → Delivering → Committing → Done`,
//! with `Aborted` reachable from any non-terminal phase. Shortcuts:
//! `Fetching → Committing` (only baselines to record), `Fetching → Done`
//! (nothing to do), `Rendering → Done` (preview). Parsing runs inside
//! `Fetching`, so the driver knows what is renderable before it leaves it.
//!
//! State is written only in `Committing`, which is entered after every chunk
//! was acknowledged. A failed delivery aborts with the state file untouched.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use metrics::{counter, gauge};

use crate::change_detector::{detect, SourceReport, SourceStatus};
use crate::error::StateError;
use crate::fetch::fetch_all;
use crate::fetch::types::{SourceFetcher, VersionMarker};
use crate::notify::{dispatch, Transport};
use crate::parse::{parse_all, ParseRequest, ReleaseParser, StructuredRecord};
use crate::render::{pack, render_digest, RenderedChunk, DEFAULT_MAX_CHUNK};
use crate::sources::{SourceCatalog, SourceDescriptor};
use crate::state::{Commit, RunLock, SeenState, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    Rendering,
    Delivering,
    Committing,
    Done,
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborted)
    }

    pub fn can_transition(self, to: RunPhase) -> bool {
        use RunPhase::*;
        if to == Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Idle, Fetching)
                | (Fetching, Rendering)
                | (Fetching, Committing)
                | (Fetching, Done)
                | (Rendering, Delivering)
                | (Rendering, Done)
                | (Delivering, Committing)
                | (Committing, Done)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Fetching => "fetching",
            RunPhase::Rendering => "rendering",
            RunPhase::Delivering => "delivering",
            RunPhase::Committing => "committing",
            RunPhase::Done => "done",
            RunPhase::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    LockHeld(PathBuf),
    State(String),
    Delivery {
        sent: usize,
        total: usize,
        error: String,
    },
    IllegalTransition {
        from: RunPhase,
        to: RunPhase,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::LockHeld(p) => write!(f, "another run holds {}", p.display()),
            AbortReason::State(e) => write!(f, "state: {e}"),
            AbortReason::Delivery { sent, total, error } => {
                write!(f, "delivery stopped after {sent}/{total} chunks: {error}")
            }
            AbortReason::IllegalTransition { from, to } => {
                write!(f, "illegal phase transition {from} -> {to}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Delivered,
    NothingNew,
    /// Completed, but at least one source failed to fetch or parse.
    Degraded,
    Previewed,
    Aborted(AbortReason),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Delivered => "delivered",
            RunOutcome::NothingNew => "nothing_new",
            RunOutcome::Degraded => "degraded",
            RunOutcome::Previewed => "previewed",
            RunOutcome::Aborted(_) => "aborted",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Delivered | RunOutcome::NothingNew | RunOutcome::Previewed => 0,
            RunOutcome::Degraded => 2,
            RunOutcome::Aborted(AbortReason::LockHeld(_)) => 75,
            RunOutcome::Aborted(_) => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub max_chunk: usize,
    pub fetch_timeout: Duration,
    pub parse_timeout: Duration,
    pub send_timeout: Duration,
    /// `None` runs without a lock (tests, preview).
    pub lock_path: Option<PathBuf>,
    pub lock_stale_after: Option<Duration>,
    pub preview: bool,
    /// Date printed in the digest header; today (UTC) when unset.
    pub date: Option<NaiveDate>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            max_chunk: DEFAULT_MAX_CHUNK,
            fetch_timeout: Duration::from_secs(60),
            parse_timeout: Duration::from_secs(180),
            send_timeout: Duration::from_secs(60),
            lock_path: None,
            lock_stale_after: Some(Duration::from_secs(6 * 3600)),
            preview: false,
            date: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Every phase entered, starting with `Idle`.
    pub phases: Vec<RunPhase>,
    /// One line per catalog source, in catalog order.
    pub sources: Vec<SourceReport>,
    pub chunks: Vec<RenderedChunk>,
    pub chunks_sent: usize,
    pub committed: bool,
    pub elapsed: Duration,
}

impl RunReport {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::NothingNew,
            phases: vec![RunPhase::Idle],
            sources: Vec::new(),
            chunks: Vec::new(),
            chunks_sent: 0,
            committed: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phases.last().copied().unwrap_or(RunPhase::Idle)
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome.exit_code()
    }

    fn advance(&mut self, to: RunPhase) -> Result<(), AbortReason> {
        let from = self.phase();
        if !from.can_transition(to) {
            return Err(AbortReason::IllegalTransition { from, to });
        }
        tracing::debug!(phase = %to, "phase");
        self.phases.push(to);
        Ok(())
    }

    fn set_status(&mut self, key: &str, status: SourceStatus) {
        if let Some(r) = self.sources.iter_mut().find(|r| r.key == key) {
            r.status = status;
        }
    }

    fn any_failed(&self) -> bool {
        self.sources.iter().any(|r| r.status.is_failure())
    }

    /// Human-readable run summary, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.sources.len() + 1);
        let head = match &self.outcome {
            RunOutcome::Aborted(reason) => format!("run aborted in {}: {reason}", self.phases_before_abort()),
            other => format!(
                "run {}: {}/{} chunks sent, state {}, {:.1}s",
                other.label(),
                self.chunks_sent,
                self.chunks.len(),
                if self.committed { "committed" } else { "unchanged" },
                self.elapsed.as_secs_f64()
            ),
        };
        lines.push(head);
        for r in &self.sources {
            lines.push(format!("  {} [{}]: {}", r.name, r.key, r.status));
        }
        lines
    }

    fn phases_before_abort(&self) -> RunPhase {
        self.phases
            .iter()
            .rev()
            .find(|p| **p != RunPhase::Aborted)
            .copied()
            .unwrap_or(RunPhase::Idle)
    }
}

pub struct PipelineDriver {
    catalog: SourceCatalog,
    fetcher: Arc<dyn SourceFetcher>,
    parser: Arc<dyn ReleaseParser>,
    transport: Arc<dyn Transport>,
    store: StateStore,
    settings: PipelineSettings,
}

impl PipelineDriver {
    pub fn new(
        catalog: SourceCatalog,
        fetcher: Arc<dyn SourceFetcher>,
        parser: Arc<dyn ReleaseParser>,
        transport: Arc<dyn Transport>,
        store: StateStore,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            parser,
            transport,
            store,
            settings,
        }
    }

    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new();

        let outcome = match self.execute(&mut report).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                if !report.phase().is_terminal() {
                    report.phases.push(RunPhase::Aborted);
                }
                RunOutcome::Aborted(reason)
            }
        };
        report.outcome = outcome;
        report.elapsed = started.elapsed();

        counter!("digest_runs_total", "outcome" => report.outcome.label()).increment(1);
        gauge!("digest_last_run_ts").set(Utc::now().timestamp() as f64);

        match &report.outcome {
            RunOutcome::Aborted(reason) => {
                tracing::error!(reason = %reason, sent = report.chunks_sent, "run aborted")
            }
            o => tracing::info!(
                outcome = o.label(),
                chunks = report.chunks.len(),
                committed = report.committed,
                "run finished"
            ),
        }
        report
    }

    async fn execute(&self, report: &mut RunReport) -> Result<RunOutcome, AbortReason> {
        let s = &self.settings;

        // Held until this function returns, i.e. past Committing.
        let _lock = match (&s.lock_path, s.preview) {
            (Some(path), false) => Some(RunLock::acquire(path, s.lock_stale_after).map_err(|e| match e {
                StateError::LockHeld { path } => AbortReason::LockHeld(path),
                other => AbortReason::State(other.to_string()),
            })?),
            _ => None,
        };

        let seen = self
            .store
            .load()
            .map_err(|e| AbortReason::State(e.to_string()))?;

        report.advance(RunPhase::Fetching)?;
        tracing::info!(sources = self.catalog.len(), known = seen.len(), "fetching");
        let results = fetch_all(
            Arc::clone(&self.fetcher),
            &self.catalog,
            &seen,
            s.workers,
            s.fetch_timeout,
        )
        .await;
        let changes = detect(results);

        let mut reports = changes.reports();
        let mut commit = Commit::default();
        for (source, marker) in &changes.baselines {
            tracing::info!(source = %source.key, marker = %marker, "first observation; recording baseline");
            commit.record(&source.key, marker.clone());
        }

        let requests: Vec<ParseRequest> = changes
            .changed
            .iter()
            .map(|c| ParseRequest::new(&c.source.name, &c.delta))
            .collect();
        let parsed = parse_all(Arc::clone(&self.parser), requests, s.workers, s.parse_timeout).await;

        let mut records: Vec<(SourceDescriptor, StructuredRecord)> = Vec::new();
        let mut pending: Vec<(String, VersionMarker)> = Vec::new();
        for (change, res) in changes.changed.into_iter().zip(parsed) {
            match res {
                Ok(record) => {
                    reports.push(SourceReport::new(&change.source, SourceStatus::Rendered));
                    pending.push((change.source.key.clone(), change.marker));
                    records.push((change.source, record));
                }
                Err(e) => {
                    reports.push(SourceReport::new(
                        &change.source,
                        SourceStatus::ParseFailed(e.to_string()),
                    ));
                }
            }
        }
        report.sources = self.in_catalog_order(reports);
        let degraded = report.any_failed();
        let settled = if degraded {
            RunOutcome::Degraded
        } else {
            RunOutcome::NothingNew
        };

        if records.is_empty() {
            if commit.is_empty() || s.preview {
                report.advance(RunPhase::Done)?;
                return Ok(settled);
            }
            report.advance(RunPhase::Committing)?;
            self.commit(report, commit, &seen)?;
            report.advance(RunPhase::Done)?;
            return Ok(settled);
        }

        report.advance(RunPhase::Rendering)?;
        let date = s.date.unwrap_or_else(|| Utc::now().date_naive());
        let segments = render_digest(date, &records);
        report.chunks = pack(&segments, s.max_chunk);
        tracing::info!(sources = records.len(), chunks = report.chunks.len(), "rendered");

        if s.preview {
            report.advance(RunPhase::Done)?;
            return Ok(RunOutcome::Previewed);
        }

        report.advance(RunPhase::Delivering)?;
        match dispatch(self.transport.as_ref(), &report.chunks, s.send_timeout).await {
            Ok(sent) => report.chunks_sent = sent,
            Err(partial) => {
                report.chunks_sent = partial.sent;
                return Err(AbortReason::Delivery {
                    sent: partial.sent,
                    total: partial.total,
                    error: partial.error.to_string(),
                });
            }
        }

        for (key, marker) in pending {
            report.set_status(&key, SourceStatus::Delivered);
            commit.record(key, marker);
        }

        report.advance(RunPhase::Committing)?;
        self.commit(report, commit, &seen)?;
        report.advance(RunPhase::Done)?;

        Ok(if degraded {
            RunOutcome::Degraded
        } else {
            RunOutcome::Delivered
        })
    }

    fn commit(
        &self,
        report: &mut RunReport,
        commit: Commit,
        seen: &SeenState,
    ) -> Result<(), AbortReason> {
        let updates = commit.len();
        let next = commit.apply(seen);
        self.store
            .commit(&next)
            .map_err(|e| AbortReason::State(e.to_string()))?;
        report.committed = true;
        tracing::info!(updates, path = %self.store.path().display(), "state committed");
        Ok(())
    }

    fn in_catalog_order(&self, mut reports: Vec<SourceReport>) -> Vec<SourceReport> {
        let rank = |key: &str| {
            self.catalog
                .iter()
                .position(|s| s.key == key)
                .unwrap_or(usize::MAX)
        };
        reports.sort_by_key(|r| rank(&r.key));
        reports
    }
}
