// src/state.rs
//! Persisted "seen" markers and the run-level lock.
//!
//! The state document is only ever replaced wholesale: serialize, write to a
//! sibling temp file, fsync, rename. A crash leaves either the old or the new
//! document, never a mix.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::fetch::types::VersionMarker;

pub const DEFAULT_STATE_PATH: &str = "state/seen.json";
pub const DEFAULT_LOCK_PATH: &str = "state/digest.lock";

/// source key -> last acknowledged marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenState {
    markers: BTreeMap<String, VersionMarker>,
}

impl SeenState {
    pub fn get(&self, key: &str) -> Option<&VersionMarker> {
        self.markers.get(key)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

impl FromIterator<(String, VersionMarker)> for SeenState {
    fn from_iter<I: IntoIterator<Item = (String, VersionMarker)>>(iter: I) -> Self {
        Self {
            markers: iter.into_iter().collect(),
        }
    }
}

/// Marker updates earned by a run. Applied only once the run has succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    updates: BTreeMap<String, VersionMarker>,
}

impl Commit {
    pub fn record(&mut self, key: impl Into<String>, marker: VersionMarker) {
        self.updates.insert(key.into(), marker);
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// New state = `base` with this commit's markers laid over it.
    pub fn apply(self, base: &SeenState) -> SeenState {
        let mut markers = base.markers.clone();
        markers.extend(self.updates);
        SeenState { markers }
    }
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing document is an empty state; an unreadable or corrupt one is
    /// an error, never silently reset.
    pub fn load(&self) -> Result<SeenState, StateError> {
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(SeenState::default()),
            Ok(s) => serde_json::from_str(&s).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SeenState::default()),
            Err(e) => Err(StateError::io(&self.path, e)),
        }
    }

    pub fn commit(&self, state: &SeenState) -> Result<(), StateError> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;

        let mut json = serde_json::to_vec_pretty(state).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        json.push(b'\n');

        let tmp = self
            .path
            .with_extension(format!("json.tmp.{}", std::process::id()));
        {
            let mut f = fs::File::create(&tmp).map_err(|e| StateError::io(&tmp, e))?;
            f.write_all(&json).map_err(|e| StateError::io(&tmp, e))?;
            f.sync_all().map_err(|e| StateError::io(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StateError::io(&self.path, e)
        })?;
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// Exclusive run lock held for the whole fetch..commit span.
///
/// The file carries a per-acquisition token. Drop removes the file only while
/// it still holds that token, so a holder whose lock was taken over never
/// deletes the new owner's lock.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    token: String,
}

impl RunLock {
    /// Fails fast with `LockHeld` if another run owns the lock. A lock file
    /// older than `stale_after` is treated as abandoned and replaced.
    pub fn acquire(path: &Path, stale_after: Option<Duration>) -> Result<Self, StateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        match Self::try_create(path, new_token()) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if is_stale(path, stale_after) {
                    return Self::take_over(path);
                }
                Err(lock_held(path))
            }
            Err(e) => Err(StateError::io(path, e)),
        }
    }

    /// Move the stale file aside under a unique name, then create a fresh
    /// lock. Only one contender's rename can pick up a given file.
    fn take_over(path: &Path) -> Result<Self, StateError> {
        let token = new_token();
        let observed = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Self::try_create(path, token).map_err(|e| create_error(path, e));
            }
            Err(e) => return Err(StateError::io(path, e)),
        };

        let aside = path.with_extension(format!("lock.stale.{token}"));
        match fs::rename(path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(lock_held(path)),
            Err(e) => return Err(StateError::io(path, e)),
        }
        let moved = fs::read_to_string(&aside).unwrap_or_default();
        if moved != observed {
            // A competing run replaced the stale file first; hand it back.
            if let Err(e) = fs::hard_link(&aside, path) {
                tracing::warn!(lock = %path.display(), error = %e, "could not restore run lock");
            }
            let _ = fs::remove_file(&aside);
            return Err(lock_held(path));
        }
        let _ = fs::remove_file(&aside);

        tracing::warn!(lock = %path.display(), previous = %observed.trim(), "replacing stale run lock");
        Self::try_create(path, token).map_err(|e| create_error(path, e))
    }

    fn try_create(path: &Path, token: String) -> std::io::Result<Self> {
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let written = writeln!(
            f,
            "pid={} token={} started={}",
            std::process::id(),
            token,
            chrono::Utc::now().to_rfc3339()
        )
        .and_then(|_| f.sync_all());
        if let Err(e) = written {
            let _ = fs::remove_file(path);
            return Err(e);
        }
        Ok(Self {
            path: path.to_path_buf(),
            token,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(content) if lock_token(&content) == Some(self.token.as_str()) => {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!(lock = %self.path.display(), error = %e, "could not remove run lock");
                }
            }
            Ok(_) => {
                tracing::warn!(lock = %self.path.display(), "run lock was taken over; leaving it to its new owner");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(lock = %self.path.display(), error = %e, "could not read run lock");
            }
        }
    }
}

fn new_token() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!(
        "{}-{:x}-{}",
        std::process::id(),
        nanos,
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

fn lock_token(content: &str) -> Option<&str> {
    content
        .split_whitespace()
        .find_map(|field| field.strip_prefix("token="))
}

fn lock_held(path: &Path) -> StateError {
    StateError::LockHeld {
        path: path.to_path_buf(),
    }
}

fn create_error(path: &Path, e: std::io::Error) -> StateError {
    if e.kind() == ErrorKind::AlreadyExists {
        lock_held(path)
    } else {
        StateError::io(path, e)
    }
}

fn is_stale(path: &Path, stale_after: Option<Duration>) -> bool {
    let Some(limit) = stale_after else {
        return false;
    };
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age > limit)
}
