// src/error.rs
//! Error taxonomy for a digest run.
//!
//! Fetch and parse errors are per-source and only ever end up in the run
//! report. Delivery and state errors are run-level: they abort the run before
//! anything is committed.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(e) => !e.is_decode() && !e.is_builder(),
            FetchError::Status { status } => *status == 429 || *status >= 500,
            FetchError::Timeout(_) => true,
            FetchError::Malformed(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("parser request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("parser returned HTTP {status}")]
    Status { status: u16 },
    #[error("parser timed out after {0:?}")]
    Timeout(Duration),
    #[error("parser response is not JSON: {0}")]
    NotJson(String),
    #[error("parser response has the wrong shape: {0}")]
    Shape(String),
}

impl Retryable for ParseError {
    fn is_retryable(&self) -> bool {
        match self {
            ParseError::Request(e) => !e.is_decode() && !e.is_builder(),
            ParseError::Status { status } => *status == 429 || *status >= 500,
            ParseError::Timeout(_) => true,
            ParseError::NotJson(_) | ParseError::Shape(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("transport returned HTTP {status}: {description}")]
    Status {
        status: u16,
        description: String,
        retry_after: Option<Duration>,
    },
    #[error("transport rejected message: {0}")]
    Rejected(String),
    #[error("transport timed out after {0:?}")]
    Timeout(Duration),
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Request(e) => !e.is_builder(),
            DeliveryError::Status { status, .. } => *status == 429 || *status >= 500,
            DeliveryError::Rejected(_) => false,
            DeliveryError::Timeout(_) => true,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state document {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("another run holds the lock at {path}")]
    LockHeld { path: PathBuf },
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StateError::Io {
            path: path.into(),
            source,
        }
    }
}
