// tests/common/mod.rs
// Scripted collaborators for driving the pipeline without a network.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use release_digest::error::{DeliveryError, FetchError, ParseError};
use release_digest::fetch::providers::github::{collect_delta, Release};
use release_digest::fetch::providers::web::compare;
use release_digest::parse::rules::RuleParser;
use release_digest::parse::ParseRequest;
use release_digest::{
    FetchOutcome, PipelineDriver, PipelineSettings, ReleaseParser, SeenState, SourceCatalog,
    SourceDescriptor, SourceFetcher, StateStore, StructuredRecord, Transport, VersionMarker,
};

pub fn release(tag: &str, body: &str) -> Release {
    Release {
        tag_name: tag.to_string(),
        body: Some(body.to_string()),
        draft: false,
    }
}

/// What each source currently shows upstream.
pub enum Upstream {
    /// Newest first, as the releases API lists them.
    Releases(Vec<Release>),
    Page(String),
    Down,
    /// Never answers.
    Hang,
}

/// Fetcher backed by an in-memory upstream, using the real marker rules.
#[derive(Default)]
pub struct FakeUpstream {
    sources: Mutex<HashMap<String, Upstream>>,
    pub calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn set(&self, key: &str, up: Upstream) {
        self.sources.lock().unwrap().insert(key.to_string(), up);
    }

    /// Prepend a release to a tagged source.
    pub fn publish(&self, key: &str, tag: &str, body: &str) {
        let mut map = self.sources.lock().unwrap();
        match map.get_mut(key) {
            Some(Upstream::Releases(list)) => list.insert(0, release(tag, body)),
            _ => {
                map.insert(key.to_string(), Upstream::Releases(vec![release(tag, body)]));
            }
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for FakeUpstream {
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        previous: Option<&VersionMarker>,
    ) -> Result<FetchOutcome, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = {
            let map = self.sources.lock().unwrap();
            match map.get(&source.key) {
                Some(Upstream::Releases(list)) => Some(Ok(collect_delta(list, previous, 10))),
                Some(Upstream::Page(text)) => Some(Ok(compare(text.clone(), previous))),
                Some(Upstream::Down) | None => Some(Err(FetchError::Status { status: 503 })),
                Some(Upstream::Hang) => None,
            }
        };
        match answer {
            Some(res) => res,
            None => std::future::pending().await,
        }
    }
}

/// Rule parser that fails, or never answers, for the named sources.
#[derive(Default)]
pub struct FlakyParser {
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    inner: RuleParser,
}

impl FlakyParser {
    pub fn fail_for(&self, source_name: &str) {
        self.failing.lock().unwrap().insert(source_name.to_string());
    }

    pub fn hang_for(&self, source_name: &str) {
        self.hanging.lock().unwrap().insert(source_name.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.hanging.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl ReleaseParser for FlakyParser {
    async fn parse(&self, req: &ParseRequest) -> Result<StructuredRecord, ParseError> {
        let failing = self.failing.lock().unwrap().contains(&req.source_name);
        if failing {
            return Err(ParseError::NotJson("scripted failure".to_string()));
        }
        let hanging = self.hanging.lock().unwrap().contains(&req.source_name);
        if hanging {
            std::future::pending::<()>().await;
        }
        self.inner.parse(req).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Records delivered texts; can be told to reject, or stall on, the n-th
/// send (1-based, counted across runs).
#[derive(Default)]
pub struct RecordingTransport {
    pub delivered: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail_on: Mutex<Option<usize>>,
    hang_on: Mutex<Option<usize>>,
}

impl RecordingTransport {
    pub fn fail_on_attempt(&self, n: Option<usize>) {
        *self.fail_on.lock().unwrap() = n;
    }

    pub fn hang_on_attempt(&self, n: Option<usize>) {
        *self.hang_on.lock().unwrap() = n;
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_on.lock().unwrap() == Some(n) {
            return Err(DeliveryError::Status {
                status: 502,
                description: "Bad Gateway".to_string(),
                retry_after: None,
            });
        }
        let hang = *self.hang_on.lock().unwrap() == Some(n);
        if hang {
            std::future::pending::<()>().await;
        }
        self.delivered.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub fn digest_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

pub fn settings(dir: &Path) -> PipelineSettings {
    PipelineSettings {
        workers: 2,
        lock_path: Some(dir.join("digest.lock")),
        date: Some(digest_date()),
        ..PipelineSettings::default()
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub catalog: SourceCatalog,
    pub upstream: Arc<FakeUpstream>,
    pub parser: Arc<FlakyParser>,
    pub transport: Arc<RecordingTransport>,
    pub settings: PipelineSettings,
}

impl Harness {
    pub fn new(sources: Vec<SourceDescriptor>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        Self {
            catalog: SourceCatalog::new(sources).unwrap(),
            upstream: Arc::new(FakeUpstream::default()),
            parser: Arc::new(FlakyParser::default()),
            transport: Arc::new(RecordingTransport::default()),
            settings,
            dir,
        }
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(self.dir.path().join("seen.json"))
    }

    pub fn seed(&self, markers: &[(&str, &str)]) {
        let state: SeenState = markers
            .iter()
            .map(|(k, m)| (k.to_string(), VersionMarker::from(*m)))
            .collect();
        self.store().commit(&state).unwrap();
    }

    pub fn state_bytes(&self) -> Option<Vec<u8>> {
        std::fs::read(self.store().path()).ok()
    }

    pub fn driver(&self) -> PipelineDriver {
        PipelineDriver::new(
            self.catalog.clone(),
            self.upstream.clone(),
            self.parser.clone(),
            self.transport.clone(),
            self.store(),
            self.settings.clone(),
        )
    }
}
