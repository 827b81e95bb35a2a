// src/sources/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{SourceCatalog, SourceDescriptor};

const ENV_PATH: &str = "DIGEST_SOURCES_PATH";

/// Load a catalog from an explicit path. Supports TOML (`[[source]]` tables)
/// or a JSON array of descriptors.
pub fn load_catalog_from(path: &Path) -> Result<SourceCatalog> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let list = parse_sources(&content, ext.as_str())?;
    SourceCatalog::new(list).with_context(|| format!("validating {}", path.display()))
}

/// Resolve the catalog:
/// 1) explicit `configured` path (from the digest config)
/// 2) $DIGEST_SOURCES_PATH
/// 3) config/sources.toml
/// 4) built-in catalog
pub fn load_catalog_default(configured: Option<&Path>) -> Result<SourceCatalog> {
    if let Some(p) = configured {
        return load_catalog_from(p);
    }
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_catalog_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_catalog_from(&toml_p);
    }
    Ok(SourceCatalog::builtin())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<SourceDescriptor>> {
    if hint_ext == "json" {
        return parse_json(s);
    }
    match parse_toml(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => parse_json(s).map_err(|_| toml_err),
    }
}

fn parse_toml(s: &str) -> Result<Vec<SourceDescriptor>> {
    #[derive(serde::Deserialize)]
    struct TomlSources {
        #[serde(rename = "source")]
        sources: Vec<SourceDescriptor>,
    }
    let v: TomlSources = toml::from_str(s).context("parsing sources TOML")?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<SourceDescriptor>> {
    let v: Vec<SourceDescriptor> = serde_json::from_str(s).context("parsing sources JSON")?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;

    #[test]
    fn toml_and_json_formats_work() {
        let toml = r#"
[[source]]
key = "claude-code"
name = "Claude Code"
kind = "tagged"
repo = "anthropics/claude-code"

[[source]]
key = "linear"
name = "Linear"
kind = "hashed"
url = "https://linear.app/changelog"
link = "https://linear.app/changelog#latest"
"#;
        let out = parse_sources(toml, "toml").unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].kind,
            SourceKind::Tagged {
                repo: "anthropics/claude-code".into()
            }
        );
        assert_eq!(out[1].link(), "https://linear.app/changelog#latest");

        let json = r#"[{"key":"cursor","name":"Cursor","kind":"hashed","url":"https://cursor.com/changelog"}]"#;
        let out = parse_sources(json, "json").unwrap();
        assert_eq!(out[0].key, "cursor");
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let toml = r#"
[[source]]
key = "x"
name = "X"
kind = "rss"
url = "https://x.test/feed"
"#;
        assert!(parse_sources(toml, "toml").is_err());
    }
}
