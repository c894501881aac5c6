//! Per-extension document loading.
//!
//! `load_raw` resolves a file's format from its extension alone — an
//! unrecognized extension fails with `UnsupportedFormat` before any I/O —
//! then extracts raw text plus loader-native metadata. Formats with an
//! inherent record boundary (csv rows, word-document paragraphs) come back
//! as multiple structured documents; everything else is one prose document.

use regex::Regex;
use serde_json::json;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{RagError, Result};
use crate::models::{Metadata, RawDocument};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Supported source formats, resolved from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Markdown,
    Pdf,
    Word,
    Html,
    Csv,
}

/// All extensions accepted by [`load_raw`], without the leading dot.
pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    ["txt", "pdf", "doc", "docx", "md", "html", "htm", "csv"];

/// Resolves the format from the path alone. This is the fail-fast gate:
/// no file I/O happens before it.
pub fn file_kind(path: &Path) -> Result<FileKind> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" => Ok(FileKind::Text),
        "md" => Ok(FileKind::Markdown),
        "pdf" => Ok(FileKind::Pdf),
        "doc" | "docx" => Ok(FileKind::Word),
        "html" | "htm" => Ok(FileKind::Html),
        "csv" => Ok(FileKind::Csv),
        "" => Err(RagError::UnsupportedFormat(format!(
            "{} has no extension (supported: {})",
            path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
        other => Err(RagError::UnsupportedFormat(format!(
            ".{other} (supported: {})",
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
    }
}

pub fn is_supported(path: &Path) -> bool {
    file_kind(path).is_ok()
}

/// Loads a file into raw documents: text plus loader-native metadata.
pub fn load_raw(path: &Path) -> Result<Vec<RawDocument>> {
    let kind = file_kind(path)?;
    let metadata = base_metadata(path, kind);

    match kind {
        FileKind::Text | FileKind::Markdown => {
            let text = std::fs::read_to_string(path)?;
            Ok(vec![RawDocument {
                text,
                metadata,
                structured: false,
            }])
        }
        FileKind::Html => {
            let html = std::fs::read_to_string(path)?;
            Ok(vec![RawDocument {
                text: strip_html(&html),
                metadata,
                structured: false,
            }])
        }
        FileKind::Pdf => {
            let bytes = std::fs::read(path)?;
            let text = pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| RagError::ExtractionFailed(format!("pdf: {e}")))?;
            Ok(vec![RawDocument {
                text,
                metadata,
                structured: false,
            }])
        }
        FileKind::Word => {
            let bytes = std::fs::read(path)?;
            let paragraphs = extract_docx_paragraphs(&bytes)?;
            Ok(paragraphs
                .into_iter()
                .enumerate()
                .map(|(i, text)| {
                    let mut meta = metadata.clone();
                    meta.insert("element_index".to_string(), json!(i));
                    meta.insert("category".to_string(), json!("paragraph"));
                    RawDocument {
                        text,
                        metadata: meta,
                        structured: true,
                    }
                })
                .collect())
        }
        FileKind::Csv => {
            let content = std::fs::read_to_string(path)?;
            Ok(csv_rows(&content, &metadata))
        }
    }
}

fn base_metadata(path: &Path, kind: FileKind) -> Metadata {
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!(path.display().to_string()));
    metadata.insert("file_type".to_string(), json!(ext));
    if matches!(kind, FileKind::Csv | FileKind::Word) {
        metadata.insert("is_structured".to_string(), json!(true));
    }
    metadata
}

// ============ CSV ============

/// One raw document per data row, rendered as `header: value` lines.
/// The first row is taken as the header.
fn csv_rows(content: &str, metadata: &Metadata) -> Vec<RawDocument> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let headers = parse_csv_line(header_line);

    lines
        .enumerate()
        .map(|(row, line)| {
            let values = parse_csv_line(line);
            let text = headers
                .iter()
                .zip(values.iter())
                .map(|(h, v)| format!("{h}: {v}"))
                .collect::<Vec<_>>()
                .join("\n");
            let mut meta = metadata.clone();
            meta.insert("row".to_string(), json!(row));
            RawDocument {
                text,
                metadata: meta,
                structured: true,
            }
        })
        .collect()
}

/// Minimal CSV field splitting: commas, double-quoted fields, `""` escapes.
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

// ============ HTML ============

static SCRIPT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)\b.*?</(script|style)>").unwrap());
static BLOCK_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</li>|</tr>|</h[1-6]>|</title>").unwrap()
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Reduces an HTML page to plain text: scripts and styles removed, block
/// closers become newlines, remaining tags dropped, common entities decoded.
fn strip_html(html: &str) -> String {
    let s = SCRIPT_STYLE.replace_all(html, "");
    let s = BLOCK_END.replace_all(&s, "\n");
    let s = ANY_TAG.replace_all(&s, " ");
    let s = s
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    let lines: Vec<String> = s
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    BLANK_RUNS
        .replace_all(lines.join("\n").trim(), "\n\n")
        .to_string()
}

// ============ Word (OOXML) ============

/// Extracts `w:t` runs from `word/document.xml`, grouped per `w:p`
/// paragraph, so each paragraph becomes its own element.
fn extract_docx_paragraphs(bytes: &[u8]) -> Result<Vec<String>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| RagError::ExtractionFailed(format!("docx: {e}")))?;

    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = std::mem::take(&mut current);
                    if !para.trim().is_empty() {
                        paragraphs.push(para);
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(RagError::ExtractionFailed(format!("docx xml: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| RagError::ExtractionFailed(format!("docx entry {name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| RagError::ExtractionFailed(format!("docx entry {name}: {e}")))?;
    if out.len() as u64 >= max_bytes {
        return Err(RagError::ExtractionFailed(format!(
            "docx entry {name} exceeds size limit ({max_bytes} bytes)"
        )));
    }
    Ok(out)
}
