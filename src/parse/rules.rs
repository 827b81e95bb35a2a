// src/parse/rules.rs
//! Offline parser: bullet extraction plus ordered keyword rules.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Category, ParseRequest, ReleaseParser, StructuredRecord, MAX_TRY_THIS};
use crate::error::ParseError;

/// Checked in order, first match wins. Fixes go first because fix notes
/// often also say "add" or "improve".
static CATEGORY_RULES: Lazy<Vec<(Category, Regex)>> = Lazy::new(|| {
    let rules: [(Category, &str); 7] = [
        (Category::BugFixes, r"^fix|\bfixed\b|\bfix\b|\bresolve|\bpatch\b"),
        (
            Category::IdeEditor,
            r"\[vscode\]|\[ide\]|\bvscode\b|\bvim\b|\bneovim\b|\bjetbrains\b",
        ),
        (
            Category::Performance,
            r"\bperformance\b|\bfaster\b|\bspeed\b|\bmemory\b|\boptimiz",
        ),
        (
            Category::NewFeatures,
            r"^added?\b|^new\b|\bintroduce|^enabled?\b|^implement",
        ),
        (
            Category::Improvements,
            r"^improved?\b|^enhanced?\b|^updated?\b|^better\b|^refactor",
        ),
        (
            Category::Documentation,
            r"\bdoc\b|\breadme\b|\bguide\b|\btutorial\b",
        ),
        (Category::Changes, r"^changed?\b"),
    ];
    rules
        .into_iter()
        .map(|(c, p)| (c, Regex::new(p).unwrap()))
        .collect()
});

static RE_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[-*•]\s*|\d+[.)]\s*)").unwrap());
static RE_TRY_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\bshortcut\b|\bcommand\b|\bsetting\b|\bmode\b|\bautocomplete\b|\bnavigation\b|ctrl\+|cmd\+",
    )
    .unwrap()
});
static RE_TRY_SKIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^fix|\binternal\b|\brefactor|\btypo\b|\[sdk\]|\[ide\]|\bdeprecation\b").unwrap()
});
static RE_TRY_ACTIONABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:added?|changed?)\b").unwrap());

/// Shortest line worth reporting.
const MIN_CHANGE_CHARS: usize = 6;

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleParser;

impl RuleParser {
    pub fn new() -> Self {
        Self
    }
}

/// Pull individual change lines out of release text. Bullet and numbered
/// lines win; text without any (e.g. a scraped page) falls back to plain
/// lines, skipping `## <tag>` headings.
pub fn extract_changes(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let bullets: Vec<String> = lines
        .iter()
        .filter(|l| RE_BULLET.is_match(l))
        .map(|l| RE_BULLET.replace(l, "").trim().to_string())
        .filter(|c| c.chars().count() >= MIN_CHANGE_CHARS)
        .collect();
    if !bullets.is_empty() {
        return bullets;
    }
    lines
        .iter()
        .filter(|l| !l.starts_with('#'))
        .map(|l| l.to_string())
        .filter(|c| c.chars().count() >= MIN_CHANGE_CHARS)
        .collect()
}

pub fn categorize(change: &str) -> Category {
    let lower = change.to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, re)| re.is_match(&lower))
        .map(|(c, _)| *c)
        .unwrap_or(Category::Other)
}

/// Actionable "Added"/"Changed" items; keyword hits are moved to the front.
pub fn pick_try_this(changes: &[String]) -> Vec<String> {
    let mut preferred = Vec::new();
    let mut rest = Vec::new();
    for change in changes {
        let lower = change.to_lowercase();
        if RE_TRY_SKIP.is_match(&lower) || !RE_TRY_ACTIONABLE.is_match(&lower) {
            continue;
        }
        if RE_TRY_KEYWORDS.is_match(&lower) {
            preferred.push(change.clone());
        } else {
            rest.push(change.clone());
        }
    }
    // Later keyword hits rank first.
    preferred.reverse();
    preferred
        .into_iter()
        .chain(rest)
        .take(MAX_TRY_THIS)
        .collect()
}

pub fn summarize(req: &ParseRequest, change_count: usize) -> String {
    let noun = if change_count == 1 { "change" } else { "changes" };
    match (req.versions.first(), req.previous.as_deref()) {
        (Some(newest), Some(prev)) => {
            format!("{} {prev} → {newest} • {change_count} {noun}", req.source_name)
        }
        (Some(newest), None) => {
            format!("{} {newest} • {change_count} {noun}", req.source_name)
        }
        (None, _) => format!("{} changelog updated • {change_count} {noun}", req.source_name),
    }
}

#[async_trait::async_trait]
impl ReleaseParser for RuleParser {
    async fn parse(&self, req: &ParseRequest) -> Result<StructuredRecord, ParseError> {
        let changes = extract_changes(&req.raw_text);
        let mut categories: BTreeMap<Category, Vec<String>> = BTreeMap::new();
        for c in &changes {
            categories.entry(categorize(c)).or_default().push(c.clone());
        }
        let try_this = pick_try_this(&changes);
        StructuredRecord::new(&summarize(req, changes.len()), try_this, categories)
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}
