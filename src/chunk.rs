//! Structure-aware chunking of raw document text.
//!
//! Input is classified as table-like or prose by a cheap per-line test.
//! Table-like text is handed to [`crate::table`] for per-record field
//! extraction; prose goes through a recursive splitter that prefers
//! paragraph, then line, then space boundaries before hard character cuts.
//! Loader-native structured documents (csv rows, docx elements) bypass the
//! splitter entirely.

use serde_json::json;

use crate::config::ChunkingConfig;
use crate::models::{DocumentUnit, Metadata, RawDocument};
use crate::table;

/// Boundary preference order for the recursive splitter.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// True if any line contains a tab, two consecutive spaces, or more than
/// three whitespace-separated tokens. A heuristic, not a parser: a pure
/// function of the text, so classification is deterministic.
pub fn is_table_like(text: &str) -> bool {
    text.lines().any(|line| {
        line.contains('\t') || line.contains("  ") || line.split_whitespace().count() > 3
    })
}

/// Splits raw documents into retrievable units.
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1)),
        }
    }

    /// Turns one raw document into ordered units.
    ///
    /// Structured documents pass through verbatim. Table-like text yields
    /// per-record units (degrading gracefully, see [`crate::table`]). Prose
    /// is split into chunks carrying `chunk_index` / `total_chunks`, with
    /// unit-specific metadata keys winning over source metadata on conflict.
    /// Whitespace-only units are dropped.
    pub fn chunk(&self, doc: &RawDocument) -> Vec<DocumentUnit> {
        if doc.structured {
            if doc.text.trim().is_empty() {
                return Vec::new();
            }
            let mut metadata = doc.metadata.clone();
            metadata.insert("is_structured".to_string(), json!(true));
            return vec![DocumentUnit::new(doc.text.clone(), metadata)];
        }

        if is_table_like(&doc.text) {
            return table::process_table_block(&doc.text)
                .into_units()
                .into_iter()
                .filter(|u| !u.text.trim().is_empty())
                .map(|u| DocumentUnit::new(u.text, merge(&doc.metadata, u.metadata)))
                .collect();
        }

        let chunks: Vec<String> = self
            .split_text(&doc.text)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        let total = chunks.len();

        chunks
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let mut unit_meta = Metadata::new();
                unit_meta.insert("chunk_index".to_string(), json!(i));
                unit_meta.insert("total_chunks".to_string(), json!(total));
                DocumentUnit::new(text, merge(&doc.metadata, unit_meta))
            })
            .collect()
    }

    /// Recursive character splitting with the configured size and overlap.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let Some((sep, rest)) = separators.split_first() else {
            return self.hard_cut(text);
        };

        let parts: Vec<&str> = text.split(sep).collect();
        if parts.len() == 1 {
            return self.split_with(text, rest);
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut buf = String::new();

        for part in parts {
            if part.is_empty() {
                continue;
            }

            // A single part over budget recurses into finer separators.
            if char_len(part) > self.chunk_size {
                if !buf.is_empty() {
                    chunks.push(std::mem::take(&mut buf));
                }
                chunks.extend(self.split_with(part, rest));
                continue;
            }

            let would_be = if buf.is_empty() {
                char_len(part)
            } else {
                char_len(&buf) + sep.chars().count() + char_len(part)
            };

            if would_be > self.chunk_size && !buf.is_empty() {
                let tail = self.overlap_tail(&buf);
                chunks.push(std::mem::take(&mut buf));
                buf = tail;
            }

            if !buf.is_empty() {
                buf.push_str(sep);
            }
            buf.push_str(part);
        }

        if !buf.is_empty() {
            chunks.push(buf);
        }

        chunks
    }

    /// Last `overlap` characters of a flushed chunk, carried into the next.
    fn overlap_tail(&self, chunk: &str) -> String {
        if self.overlap == 0 {
            return String::new();
        }
        let total = char_len(chunk);
        if total <= self.overlap {
            return chunk.to_string();
        }
        chunk.chars().skip(total - self.overlap).collect()
    }

    fn hard_cut(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size.saturating_sub(self.overlap).max(1);
        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Source metadata merged with unit metadata; unit keys win on conflict.
fn merge(source: &Metadata, unit: Metadata) -> Metadata {
    let mut merged = source.clone();
    for (k, v) in unit {
        merged.insert(k, v);
    }
    merged
}
