//! Structured field extraction for table-like text.
//!
//! Table blocks are processed line by line: header-like lines are skipped,
//! each record line is normalized and run through a fixed, ordered list of
//! field recognizers, and the matched fields are rendered into a readable
//! unit. Extraction failure never aborts a document — the whole block
//! degrades to a single plain-text unit and processing continues.

use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::error::{RagError, Result};
use crate::models::{DocumentUnit, Metadata};

/// The fixed field vocabulary, in recognizer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldName {
    Name,
    Format,
    Source,
    Location,
    Cadence,
    Type,
    System,
}

impl FieldName {
    pub const ALL: [FieldName; 7] = [
        FieldName::Name,
        FieldName::Format,
        FieldName::Source,
        FieldName::Location,
        FieldName::Cadence,
        FieldName::Type,
        FieldName::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::Name => "name",
            FieldName::Format => "format",
            FieldName::Source => "source",
            FieldName::Location => "location",
            FieldName::Cadence => "cadence",
            FieldName::Type => "type",
            FieldName::System => "system",
        }
    }

    /// Human-readable label used when rendering a structured unit.
    fn label(&self) -> &'static str {
        match self {
            FieldName::Name => "Name",
            FieldName::Format => "Format",
            FieldName::Source => "Source",
            FieldName::Location => "Location",
            FieldName::Cadence => "Update Frequency",
            FieldName::Type => "Update Type",
            FieldName::System => "System",
        }
    }
}

/// One recognizer per field, applied in [`FieldName::ALL`] order.
///
/// The `name` pattern matches a leading run of lowercase-initial tokens only,
/// so uppercase-initial system names (AnnexCloud, BazaarVoice, ...) fall
/// through to the `system` recognizer instead of being swallowed.
static RECOGNIZERS: LazyLock<Vec<(FieldName, Regex)>> = LazyLock::new(|| {
    vec![
        (
            FieldName::Name,
            Regex::new(r"^[a-z][\w.-]*(?: [a-z][\w.-]*)*").unwrap(),
        ),
        (FieldName::Format, Regex::new(r"\bCSV\b").unwrap()),
        (FieldName::Source, Regex::new(r"\bSFTP\b|\bS3\b").unwrap()),
        (
            FieldName::Location,
            Regex::new(r"SFTP/[\w/-]+|s3://[\w/-]+").unwrap(),
        ),
        (
            FieldName::Cadence,
            Regex::new(r"15 minute sentinel|8 PM Daily|monthly drop").unwrap(),
        ),
        (
            FieldName::Type,
            Regex::new(r"\bIncremental\b|\bSnapshot\b").unwrap(),
        ),
        (
            FieldName::System,
            Regex::new(r"AnnexCloud|BazaarVoice|CommerceCloud|MarketingCloud|GoogleAnalytics")
                .unwrap(),
        ),
    ]
});

static WORD_PERIOD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w)\.(\w)").unwrap());
static WS_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static HEADER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)file\s*name|source\s*tables|description|format").unwrap());

/// Normalizes a record line for matching. Lossy by design: underscores
/// become spaces, OCR-joined `word.word` pairs are split, and whitespace
/// runs collapse to single spaces.
pub fn normalize(line: &str) -> String {
    let s = line.replace('_', " ");
    let s = WORD_PERIOD.replace_all(&s, "${1} ${2}");
    // Second pass catches chains like a.b.c where the first pass consumed
    // the shared middle character.
    let s = WORD_PERIOD.replace_all(&s, "${1} ${2}");
    let s = WS_RUN.replace_all(&s, " ");
    s.trim().to_string()
}

/// Extracts structured fields from one record line.
///
/// A pure fold over the recognizer list carrying `(remaining, fields)`:
/// each recognizer that matches records the substring under its field name
/// and removes the first occurrence of that substring from the working text,
/// so one span never satisfies two fields. Absent fields are simply missing
/// from the map.
pub fn extract_fields(line: &str) -> BTreeMap<FieldName, String> {
    let normalized = normalize(line);
    let (fields, _remaining) = RECOGNIZERS.iter().fold(
        (BTreeMap::new(), normalized),
        |(mut fields, text), (field, pattern)| {
            if let Some(found) = pattern.find(&text) {
                let matched = found.as_str().to_string();
                let rest = text.replacen(&matched, "", 1);
                fields.insert(*field, matched);
                (fields, rest)
            } else {
                (fields, text)
            }
        },
    );
    fields
}

/// True for header-like lines ("File Name", "Source Tables", ...) that are
/// skipped entirely and never emitted as units.
pub fn is_header_line(line: &str) -> bool {
    HEADER_LINE.is_match(line)
}

/// Outcome of processing one table-like block.
#[derive(Debug)]
pub enum TableOutcome {
    /// Per-line units (structured where fields matched, plain otherwise).
    Processed(Vec<DocumentUnit>),
    /// Extraction failed somewhere; the whole block became one plain unit.
    Degraded(DocumentUnit),
}

impl TableOutcome {
    pub fn into_units(self) -> Vec<DocumentUnit> {
        match self {
            TableOutcome::Processed(units) => units,
            TableOutcome::Degraded(unit) => vec![unit],
        }
    }
}

/// Processes a table block into units, degrading to a single plain-text
/// unit on any internal error. Never returns an error: degradation is
/// surfaced as a warning and an explicit [`TableOutcome::Degraded`].
pub fn process_table_block(content: &str) -> TableOutcome {
    process_table_block_with(content, |line| Ok(extract_fields(line)))
}

/// Like [`process_table_block`] but with an injectable extractor — the seam
/// used to exercise the degraded path in tests.
pub fn process_table_block_with<F>(content: &str, extract: F) -> TableOutcome
where
    F: Fn(&str) -> Result<BTreeMap<FieldName, String>>,
{
    match process_lines(content, &extract) {
        Ok(units) => TableOutcome::Processed(units),
        Err(e) => {
            tracing::warn!("table extraction degraded, keeping block as plain text: {e}");
            TableOutcome::Degraded(DocumentUnit::new(content.to_string(), plain_metadata()))
        }
    }
}

fn process_lines<F>(content: &str, extract: &F) -> Result<Vec<DocumentUnit>>
where
    F: Fn(&str) -> Result<BTreeMap<FieldName, String>>,
{
    let mut units = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() || is_header_line(line) {
            continue;
        }

        let fields = extract(line)?;
        if fields.is_empty() {
            // No recognizer hit: the line is kept, just not as a record.
            units.push(DocumentUnit::new(normalize(line), plain_metadata()));
            continue;
        }

        units.push(DocumentUnit::new(
            render_fields(&fields),
            structured_metadata(&fields)?,
        ));
    }

    Ok(units)
}

/// Renders matched fields into the readable representation that gets
/// embedded and returned to callers.
fn render_fields(fields: &BTreeMap<FieldName, String>) -> String {
    let mut text = String::from("Data Source Information:\n");
    for field in FieldName::ALL {
        if let Some(value) = fields.get(&field) {
            text.push_str(field.label());
            text.push_str(": ");
            text.push_str(value);
            text.push('\n');
        }
    }
    text
}

fn structured_metadata(fields: &BTreeMap<FieldName, String>) -> Result<Metadata> {
    let fields_value: Value = serde_json::to_value(
        fields
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.clone()))
            .collect::<BTreeMap<String, String>>(),
    )
    .map_err(|e| RagError::ExtractionFailed(e.to_string()))?;

    let mut metadata = Metadata::new();
    metadata.insert("file_type".to_string(), json!("table"));
    metadata.insert("is_structured".to_string(), json!(true));
    metadata.insert("fields".to_string(), fields_value);
    Ok(metadata)
}

fn plain_metadata() -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("file_type".to_string(), json!("text"));
    metadata.insert("is_structured".to_string(), json!(false));
    metadata
}
