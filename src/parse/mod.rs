// src/parse/mod.rs
//! Release parser boundary: raw delta text in, structured record out.
//!
//! Three implementations share the `ReleaseParser` trait:
//! * `claude::ClaudeParser`: remote natural-language parsing (Anthropic API)
//! * `rules::RuleParser`: deterministic keyword rules, no network
//! * `cache::CachingParser`: on-disk cache wrapper for either of the above

pub mod cache;
pub mod category;
pub mod claude;
pub mod rules;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

pub use category::Category;

use crate::error::ParseError;
use crate::fetch::types::RawDelta;

pub const MAX_TRY_THIS: usize = 3;

/// One parsed digest entry for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub summary: String,
    pub try_this: Vec<String>,
    /// Only non-empty categories; iteration order is display order.
    pub categories: BTreeMap<Category, Vec<String>>,
}

impl StructuredRecord {
    /// Normalizing constructor: trims text, drops empty entries and
    /// categories, caps highlights. Fails only on an empty summary.
    pub fn new(
        summary: &str,
        try_this: Vec<String>,
        categories: impl IntoIterator<Item = (Category, Vec<String>)>,
    ) -> Result<Self, ParseError> {
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(ParseError::Shape("summary is empty".to_string()));
        }
        let try_this = try_this
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(MAX_TRY_THIS)
            .collect();

        let mut map: BTreeMap<Category, Vec<String>> = BTreeMap::new();
        for (cat, items) in categories {
            let items: Vec<String> = items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !items.is_empty() {
                map.entry(cat).or_default().extend(items);
            }
        }

        Ok(Self {
            summary: summary.to_string(),
            try_this,
            categories: map,
        })
    }
}

/// Everything a parser gets to see about one source's delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseRequest {
    pub source_name: String,
    pub raw_text: String,
    pub versions: Vec<String>,
    pub previous: Option<String>,
}

impl ParseRequest {
    pub fn new(source_name: &str, delta: &RawDelta) -> Self {
        Self {
            source_name: source_name.to_string(),
            raw_text: delta.text.clone(),
            versions: delta.versions.clone(),
            previous: delta.previous.as_ref().map(|m| m.to_string()),
        }
    }

    pub fn vocabulary(&self) -> Vec<&'static str> {
        Category::vocabulary()
    }
}

#[async_trait::async_trait]
pub trait ReleaseParser: Send + Sync {
    async fn parse(&self, req: &ParseRequest) -> Result<StructuredRecord, ParseError>;
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

#[derive(Deserialize)]
struct WireRecord {
    summary: String,
    #[serde(default)]
    try_this: Vec<String>,
    #[serde(default)]
    categories: BTreeMap<String, Vec<String>>,
}

/// Validate a parser response body.
///
/// Accepts a bare JSON object or one wrapped in a Markdown code fence.
/// Unknown category names fold into `Other Changes`.
pub fn parse_response(raw: &str) -> Result<StructuredRecord, ParseError> {
    let body = strip_code_fence(raw);
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ParseError::NotJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ParseError::Shape("expected a JSON object".to_string()));
    }
    let wire: WireRecord =
        serde_json::from_value(value).map_err(|e| ParseError::Shape(e.to_string()))?;

    let categories = wire
        .categories
        .into_iter()
        .map(|(name, items)| (Category::from_name_or_other(&name), items));
    StructuredRecord::new(&wire.summary, wire.try_this, categories)
}

fn strip_code_fence(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    // drop the info string (e.g. "json") up to the first newline
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse every request on a bounded pool; output follows input order.
pub async fn parse_all(
    parser: Arc<dyn ReleaseParser>,
    requests: Vec<ParseRequest>,
    workers: usize,
    deadline: Duration,
) -> Vec<Result<StructuredRecord, ParseError>> {
    let done = crate::workers::map_bounded(requests, workers, |req| {
        let parser = Arc::clone(&parser);
        async move {
            let res = tokio::time::timeout(deadline, parser.parse(&req))
                .await
                .unwrap_or(Err(ParseError::Timeout(deadline)));
            if let Err(e) = &res {
                tracing::warn!(source = %req.source_name, parser = parser.name(), error = %e, "parse failed");
                counter!("digest_parse_failures_total").increment(1);
            }
            res
        }
    })
    .await;

    done.into_iter()
        .map(|r| r.unwrap_or_else(|| Err(ParseError::Shape("parse worker panicked".to_string()))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fenced_json_and_folds_unknown_categories() {
        let raw = "```json\n{\"summary\":\" Linear shipped stuff \",\"try_this\":[\"a\",\"\",\"b\",\"c\",\"d\"],\
                   \"categories\":{\"Bug Fixes\":[\"x\"],\"Security\":[\"y\"],\"Other Changes\":[\"z\"],\"Performance\":[]}}\n```";
        let rec = parse_response(raw).unwrap();
        assert_eq!(rec.summary, "Linear shipped stuff");
        assert_eq!(rec.try_this, vec!["a", "b", "c"]);
        assert_eq!(rec.categories[&Category::BugFixes], vec!["x"]);
        let other = &rec.categories[&Category::Other];
        assert_eq!(other.len(), 2);
        assert!(other.contains(&"y".to_string()) && other.contains(&"z".to_string()));
        assert!(!rec.categories.contains_key(&Category::Performance));
    }

    #[test]
    fn non_json_is_a_failure_not_an_empty_record() {
        assert!(matches!(
            parse_response("Sorry, I cannot help with that."),
            Err(ParseError::NotJson(_))
        ));
    }

    #[test]
    fn wrong_shapes_are_failures() {
        assert!(matches!(parse_response("[1,2]"), Err(ParseError::Shape(_))));
        assert!(matches!(
            parse_response(r#"{"summary":"   ","categories":{}}"#),
            Err(ParseError::Shape(_))
        ));
        assert!(matches!(
            parse_response(r#"{"summary":"ok","categories":{"Bug Fixes":"x"}}"#),
            Err(ParseError::Shape(_))
        ));
        assert!(matches!(
            parse_response(r#"{"try_this":[]}"#),
            Err(ParseError::Shape(_))
        ));
    }
}
