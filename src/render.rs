// src/render.rs
//! # Renderer
//! Turns parsed records into Telegram-ready Markdown and packs the result into
//! size-bounded chunks. Pure and deterministic: no I/O, no clock (the digest
//! date is passed in).
//!
//! Sizes are measured in UTF-16 code units, which is how the transport counts
//! message length.
//!
//! Packing rules:
//! * whole source sections are appended to the current chunk while it stays
//!   within the limit; a section that does not fit starts a new chunk
//! * a section larger than the limit on its own is split at block (category)
//!   boundaries
//! * a single block larger than the limit is cut, preferably at a line
//!   boundary, and marked as truncated

use chrono::NaiveDate;

use crate::parse::StructuredRecord;
use crate::sources::SourceDescriptor;

pub const DEFAULT_MAX_CHUNK: usize = 4000;
pub const MAX_ITEMS_PER_CATEGORY: usize = 8;
pub const MAX_ITEM_CHARS: usize = 100;
pub const MAX_TRY_THIS_CHARS: usize = 80;
pub const MAX_SUMMARY_CHARS: usize = 300;

const SEPARATOR: &str = "\n\n";
const TRUNCATION_MARKER: &str = "\n_(truncated)_";

/// One source's rendered section (or the digest header), as ordered blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub source_key: Option<String>,
    pub blocks: Vec<String>,
}

impl Segment {
    pub fn text(&self) -> String {
        self.blocks.join(SEPARATOR)
    }
}

/// A deliverable unit of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChunk {
    pub text: String,
    /// Keys of the sources whose content appears in this chunk.
    pub sources: Vec<String>,
}

/// Length as the transport counts it.
pub fn measure(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Neutralize Telegram (legacy) Markdown control characters outside an
/// entity. `]` only matters after an unescaped `[`, so it is left alone.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '[' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Text for inside `*...*`. Legacy Markdown takes no escapes within an
/// entity, so markup characters are replaced or dropped instead.
pub fn entity_text(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '`' | '[' | '\\'))
        .map(|c| if c == '_' { ' ' } else { c })
        .collect()
}

/// Keep a URL from closing the surrounding `(...)` early.
fn escape_url(url: &str) -> String {
    url.replace('(', "%28")
        .replace(')', "%29")
        .replace(' ', "%20")
}

/// Cut to at most `max` chars, ending in "...". Counts chars, not bytes.
pub fn clip(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}

pub fn render_header(date: NaiveDate) -> Segment {
    Segment {
        source_key: None,
        blocks: vec![format!("☀️ *Release Digest* · {}", date.format("%a %d %b %Y"))],
    }
}

pub fn render_source(source: &SourceDescriptor, record: &StructuredRecord) -> Segment {
    let mut blocks = Vec::new();

    blocks.push(format!(
        "📦 *{}*\n📌 {}",
        entity_text(&source.name),
        escape_markdown(&clip(&record.summary, MAX_SUMMARY_CHARS))
    ));

    if !record.try_this.is_empty() {
        let mut b = String::from("🎯 *Try This*");
        for item in &record.try_this {
            b.push_str("\n  → ");
            b.push_str(&escape_markdown(&clip(item, MAX_TRY_THIS_CHARS)));
        }
        blocks.push(b);
    }

    for (cat, items) in &record.categories {
        if items.is_empty() {
            continue;
        }
        let mut b = format!("{} *{}*", cat.emoji(), entity_text(cat.name()));
        for item in items.iter().take(MAX_ITEMS_PER_CATEGORY) {
            b.push_str("\n  • ");
            b.push_str(&escape_markdown(&clip(item, MAX_ITEM_CHARS)));
        }
        let hidden = items.len().saturating_sub(MAX_ITEMS_PER_CATEGORY);
        if hidden > 0 {
            b.push_str(&format!("\n  _...and {hidden} more_"));
        }
        blocks.push(b);
    }

    if let Some(last) = blocks.last_mut() {
        last.push_str(&format!("\n🔗 [Changelog]({})", escape_url(&source.link())));
    }

    Segment {
        source_key: Some(source.key.clone()),
        blocks,
    }
}

/// Header plus one segment per record, in the given (catalog) order.
pub fn render_digest(
    date: NaiveDate,
    records: &[(SourceDescriptor, StructuredRecord)],
) -> Vec<Segment> {
    std::iter::once(render_header(date))
        .chain(records.iter().map(|(s, r)| render_source(s, r)))
        .collect()
}

struct Packer {
    max: usize,
    chunks: Vec<RenderedChunk>,
    cur: String,
    cur_len: usize,
    cur_sources: Vec<String>,
}

impl Packer {
    fn new(max: usize) -> Self {
        Self {
            max,
            chunks: Vec::new(),
            cur: String::new(),
            cur_len: 0,
            cur_sources: Vec::new(),
        }
    }

    fn fits(&self, len: usize) -> bool {
        if self.cur.is_empty() {
            len <= self.max
        } else {
            self.cur_len + measure(SEPARATOR) + len <= self.max
        }
    }

    fn append(&mut self, text: &str, len: usize, key: Option<&String>) {
        if !self.cur.is_empty() {
            self.cur.push_str(SEPARATOR);
            self.cur_len += measure(SEPARATOR);
        }
        self.cur.push_str(text);
        self.cur_len += len;
        if let Some(k) = key {
            if !self.cur_sources.contains(k) {
                self.cur_sources.push(k.clone());
            }
        }
    }

    fn flush(&mut self) {
        if self.cur.is_empty() {
            return;
        }
        self.chunks.push(RenderedChunk {
            text: std::mem::take(&mut self.cur),
            sources: std::mem::take(&mut self.cur_sources),
        });
        self.cur_len = 0;
    }

    fn push(&mut self, text: &str, key: Option<&String>) {
        let len = measure(text);
        if !self.fits(len) {
            self.flush();
        }
        self.append(text, len, key);
    }
}

/// Pack segments into chunks of at most `max` UTF-16 units.
pub fn pack(segments: &[Segment], max: usize) -> Vec<RenderedChunk> {
    let max = max.max(1);
    let mut p = Packer::new(max);
    for seg in segments {
        let text = seg.text();
        if measure(&text) <= max {
            p.push(&text, seg.source_key.as_ref());
            continue;
        }

        // Forced split: this section gets chunks of its own.
        tracing::debug!(source = ?seg.source_key, "section exceeds chunk limit; splitting at category boundaries");
        p.flush();
        for block in &seg.blocks {
            if measure(block) <= max {
                p.push(block, seg.source_key.as_ref());
            } else {
                p.flush();
                let cut = truncate_block(block, max);
                p.push(&cut, seg.source_key.as_ref());
                p.flush();
            }
        }
        p.flush();
    }
    p.flush();
    p.chunks
}

/// Shorten a block to fit `max`, appending a visible marker.
pub fn truncate_block(block: &str, max: usize) -> String {
    let marker_len = measure(TRUNCATION_MARKER);
    let (budget, marker) = if max > marker_len * 2 {
        (max - marker_len, TRUNCATION_MARKER)
    } else {
        (max, "")
    };

    let mut prefix = String::new();
    let mut used = 0usize;
    for ch in block.chars() {
        let w = ch.len_utf16();
        if used + w > budget {
            break;
        }
        prefix.push(ch);
        used += w;
    }
    if let Some(nl) = prefix.rfind('\n') {
        if nl > 0 {
            prefix.truncate(nl);
        }
    }
    // A cut right after an escape backslash would escape the marker instead.
    while prefix.ends_with('\\') {
        prefix.pop();
    }
    prefix.push_str(marker);
    prefix
}
