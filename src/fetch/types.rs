// src/fetch/types.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::sources::SourceDescriptor;

/// Opaque per-source version value. Only equality is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionMarker(String);

impl VersionMarker {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionMarker {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Content attributed to "new since the last marker".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDelta {
    pub text: String,
    /// Versions covered, newest first. Empty for hashed sources.
    pub versions: Vec<String>,
    pub previous: Option<VersionMarker>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// First observation: remember the marker, emit nothing.
    Baseline(VersionMarker),
    NoChange,
    Changed {
        marker: VersionMarker,
        delta: RawDelta,
    },
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Baseline(_) => "baseline",
            FetchOutcome::NoChange => "unchanged",
            FetchOutcome::Changed { .. } => "changed",
        }
    }
}

#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &SourceDescriptor,
        previous: Option<&VersionMarker>,
    ) -> Result<FetchOutcome, FetchError>;
}
