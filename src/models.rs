//! Core data types that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata attached to a unit: provenance fields, structural flags,
/// chunk bookkeeping, extracted structured fields.
pub type Metadata = Map<String, Value>;

/// The atomic retrievable item: the text to embed plus its metadata.
///
/// Invariant: a stored unit's text is never empty — whitespace-only units
/// are dropped before embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentUnit {
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DocumentUnit {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Polymorphic document input accepted by [`crate::store::SpaceStore::add_documents`].
///
/// Resolved once at the boundary into a single internal [`DocumentUnit`]
/// shape; no duck-typing survives past this point.
#[derive(Debug, Clone)]
pub enum DocumentInput {
    PlainText(String),
    Annotated { text: String, metadata: Metadata },
    Unit(DocumentUnit),
}

impl DocumentInput {
    pub fn into_unit(self) -> DocumentUnit {
        match self {
            DocumentInput::PlainText(text) => DocumentUnit::plain(text),
            DocumentInput::Annotated { text, metadata } => DocumentUnit::new(text, metadata),
            DocumentInput::Unit(unit) => unit,
        }
    }
}

impl From<DocumentUnit> for DocumentInput {
    fn from(unit: DocumentUnit) -> Self {
        DocumentInput::Unit(unit)
    }
}

impl From<&str> for DocumentInput {
    fn from(text: &str) -> Self {
        DocumentInput::PlainText(text.to_string())
    }
}

/// Raw document produced by a loader before chunking.
///
/// A single file may yield several raw documents (csv rows, docx elements).
/// `structured` documents bypass the recursive splitter — the loader-native
/// unit boundary is authoritative for them.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub text: String,
    pub metadata: Metadata,
    pub structured: bool,
}

/// A unit returned from similarity search, with a normalized score.
///
/// `score` is in `[0, 1]`. The store's native metric is cosine similarity
/// `c` in `[-1, 1]`; the distance is `d = (1 - c) / 2` and the reported
/// score is `1 - d`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f64,
}

/// Builds a metadata map from string keys and JSON values.
pub fn metadata_from(pairs: &[(&str, Value)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_resolution_is_lossless() {
        let plain = DocumentInput::PlainText("hello".to_string()).into_unit();
        assert_eq!(plain.text, "hello");
        assert!(plain.metadata.is_empty());

        let meta = metadata_from(&[("source", json!("notes.txt"))]);
        let annotated = DocumentInput::Annotated {
            text: "hi".to_string(),
            metadata: meta.clone(),
        }
        .into_unit();
        assert_eq!(annotated.text, "hi");
        assert_eq!(annotated.metadata, meta);

        let unit = DocumentUnit::new("x", meta.clone());
        let resolved = DocumentInput::Unit(unit.clone()).into_unit();
        assert_eq!(resolved.text, unit.text);
    }
}
