// src/sources/mod.rs
//! Source catalog: the fixed set of release sources a digest run watches.

pub mod config;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a source is fetched and how its version marker is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceKind {
    /// GitHub repository (`owner/name`); the marker is the latest release tag.
    Tagged { repo: String },
    /// Web changelog page; the marker is a digest of the page text.
    Hashed { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub key: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: SourceKind,
    /// Human-facing link shown in the digest; derived from `kind` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl SourceDescriptor {
    pub fn tagged(key: &str, name: &str, repo: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            kind: SourceKind::Tagged {
                repo: repo.to_string(),
            },
            link: None,
        }
    }

    pub fn hashed(key: &str, name: &str, url: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            kind: SourceKind::Hashed {
                url: url.to_string(),
            },
            link: None,
        }
    }

    pub fn link(&self) -> String {
        if let Some(l) = &self.link {
            return l.clone();
        }
        match &self.kind {
            SourceKind::Tagged { repo } => format!("https://github.com/{repo}/releases"),
            SourceKind::Hashed { url } => url.clone(),
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            SourceKind::Tagged { .. } => "tagged",
            SourceKind::Hashed { .. } => "hashed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("source catalog is empty")]
    Empty,
    #[error("source #{0} has an empty key")]
    EmptyKey(usize),
    #[error("duplicate source key `{0}`")]
    DuplicateKey(String),
    #[error("source `{key}` has an empty {field}")]
    EmptyField { key: String, field: &'static str },
    #[error("unknown source key `{0}`")]
    UnknownKey(String),
}

/// Ordered, validated set of sources. Catalog order drives digest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCatalog {
    sources: Vec<SourceDescriptor>,
}

impl SourceCatalog {
    pub fn new(sources: Vec<SourceDescriptor>) -> Result<Self, CatalogError> {
        if sources.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = std::collections::HashSet::new();
        for (i, s) in sources.iter().enumerate() {
            if s.key.trim().is_empty() {
                return Err(CatalogError::EmptyKey(i));
            }
            if !seen.insert(s.key.as_str()) {
                return Err(CatalogError::DuplicateKey(s.key.clone()));
            }
            if s.name.trim().is_empty() {
                return Err(CatalogError::EmptyField {
                    key: s.key.clone(),
                    field: "name",
                });
            }
            let (target, field) = match &s.kind {
                SourceKind::Tagged { repo } => (repo, "repo"),
                SourceKind::Hashed { url } => (url, "url"),
            };
            if target.trim().is_empty() {
                return Err(CatalogError::EmptyField {
                    key: s.key.clone(),
                    field,
                });
            }
        }
        Ok(Self { sources })
    }

    /// Built-in catalog used when no sources file is configured.
    pub fn builtin() -> Self {
        Self {
            sources: vec![
                SourceDescriptor::tagged("claude-code", "Claude Code", "anthropics/claude-code"),
                SourceDescriptor::tagged("pydantic-ai", "Pydantic AI", "pydantic/pydantic-ai"),
                SourceDescriptor::tagged("agent-deck", "Agent Deck", "asheshgoplani/agent-deck"),
                SourceDescriptor::hashed("linear", "Linear", "https://linear.app/changelog"),
                SourceDescriptor::hashed("cursor", "Cursor", "https://cursor.com/changelog"),
                SourceDescriptor::hashed(
                    "granola",
                    "Granola",
                    "https://www.granola.ai/docs/changelog",
                ),
                SourceDescriptor::hashed(
                    "claude-app",
                    "Claude App",
                    "https://support.claude.com/en/articles/12138966-release-notes",
                ),
            ],
        }
    }

    /// Restrict the catalog to `keys`, keeping catalog order.
    pub fn only(&self, keys: &[String]) -> Result<Self, CatalogError> {
        if keys.is_empty() {
            return Ok(self.clone());
        }
        for k in keys {
            if self.get(k).is_none() {
                return Err(CatalogError::UnknownKey(k.clone()));
            }
        }
        let sources = self
            .sources
            .iter()
            .filter(|s| keys.iter().any(|k| k == &s.key))
            .cloned()
            .collect();
        Ok(Self { sources })
    }

    pub fn get(&self, key: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
