// src/parse/cache.rs
//! File cache in front of a parser.
//!
//! A run that fails at delivery re-parses the same deltas on the next
//! invocation; the cache makes that retry free. Entries are keyed by a hash
//! of the full request plus the inner parser's name. Entries older than the
//! configured age are pruned when the cache is opened.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};

use super::{ParseRequest, ReleaseParser, StructuredRecord};
use crate::error::ParseError;

pub struct CachingParser<P: ReleaseParser> {
    inner: P,
    cache_dir: PathBuf,
}

impl<P: ReleaseParser> CachingParser<P> {
    /// `max_age` of `None` keeps every entry.
    pub fn new(inner: P, cache_dir: PathBuf, max_age: Option<Duration>) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            tracing::warn!(dir = %cache_dir.display(), error = %e, "parse cache dir unavailable");
        }
        if let Some(age) = max_age {
            let removed = prune_cache(&cache_dir, age);
            if removed > 0 {
                tracing::info!(dir = %cache_dir.display(), removed, "pruned old parse cache entries");
            }
        }
        Self { inner, cache_dir }
    }

    fn key(&self, req: &ParseRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.name().as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_json::to_vec(req).unwrap_or_default());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait::async_trait]
impl<P: ReleaseParser> ReleaseParser for CachingParser<P> {
    async fn parse(&self, req: &ParseRequest) -> Result<StructuredRecord, ParseError> {
        let key = self.key(req);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            tracing::debug!(source = %req.source_name, "parse cache hit");
            return Ok(hit);
        }
        let fresh = self.inner.parse(req).await?;
        if let Err(e) = write_cache_file(&self.cache_dir, &key, &fresh) {
            tracing::warn!(source = %req.source_name, error = %e, "parse cache write failed");
        }
        Ok(fresh)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Delete cache entries (and stray temp files) last written more than
/// `max_age` ago. Returns how many were removed.
pub fn prune_cache(dir: &Path, max_age: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.ends_with(".json") || name.ends_with(".json.tmp")) {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| now.duration_since(t).ok())
            .is_some_and(|age| age > max_age);
        if !expired {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not prune parse cache entry"),
        }
    }
    removed
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<StructuredRecord> {
    let buf = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&buf).ok()
}

fn write_cache_file(dir: &Path, key: &str, value: &StructuredRecord) -> io::Result<()> {
    let path = cache_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(&json)?;
    fs::rename(tmp, path)?;
    Ok(())
}
