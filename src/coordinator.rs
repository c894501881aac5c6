//! Query coordination across spaces.
//!
//! The coordinator tracks which spaces have been validated as ready and
//! runs the retrieve-then-generate path. A space binding is established
//! lazily on first query (or eagerly via [`QueryCoordinator::initialize`])
//! and refused while the space has nothing indexed. Retrieval and
//! generation failures stay distinct error kinds so callers can tell which
//! stage fell over.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::{RagError, Result};
use crate::llm::{build_rag_prompt, ChatModel};
use crate::models::{metadata_from, RetrievalResult};
use crate::store::SpaceStore;

pub struct QueryCoordinator {
    store: Arc<SpaceStore>,
    chat: Arc<dyn ChatModel>,
    k: usize,
    /// Spaces validated as ready since the last invalidation.
    bindings: Mutex<HashSet<String>>,
}

impl QueryCoordinator {
    pub fn new(store: Arc<SpaceStore>, chat: Arc<dyn ChatModel>, k: usize) -> Self {
        Self {
            store,
            chat,
            k: k.max(1),
            bindings: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<SpaceStore> {
        &self.store
    }

    /// Validates that a space is queryable and records the binding.
    ///
    /// A space with no indexed units is not ready; the binding is refused
    /// until content lands.
    pub async fn initialize(&self, space: &str) -> Result<()> {
        let units = self.store.count_units(space).await?;
        if units == 0 {
            return Err(RagError::SpaceNotReady(space.to_string()));
        }
        self.lock_bindings().insert(space.to_string());
        Ok(())
    }

    /// Drops the binding for a space. Called after the space is deleted or
    /// rewritten so the next query revalidates.
    pub fn invalidate(&self, space: &str) {
        self.lock_bindings().remove(space);
    }

    pub fn is_initialized(&self, space: &str) -> bool {
        self.lock_bindings().contains(space)
    }

    /// Top-k retrieval without answer synthesis.
    pub async fn retrieve(&self, space: &str, question: &str) -> Result<Vec<RetrievalResult>> {
        self.ensure_ready(space).await?;
        let question = valid_question(question)?;
        self.store.similarity_search(space, question, self.k).await
    }

    /// The full path: retrieve top-k context, synthesize an answer, and
    /// return the answer as the first result (metadata `generated: true`)
    /// followed by the supporting passages.
    pub async fn query(&self, space: &str, question: &str) -> Result<Vec<RetrievalResult>> {
        self.ensure_ready(space).await?;
        let question = valid_question(question)?;

        let passages = self.store.similarity_search(space, question, self.k).await?;
        if passages.is_empty() {
            // Nothing to ground an answer in; generation is skipped.
            return Ok(Vec::new());
        }

        let context: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let prompt = build_rag_prompt(&context, question);
        let answer = self.chat.generate(&prompt).await?;

        let mut results = Vec::with_capacity(passages.len() + 1);
        results.push(RetrievalResult {
            id: format!("answer:{space}"),
            text: answer,
            metadata: metadata_from(&[
                ("generated", serde_json::json!(true)),
                ("model", serde_json::json!(self.chat.model_name())),
            ]),
            score: 1.0,
        });
        results.extend(passages);
        Ok(results)
    }

    /// Lazy binding: an uninitialized space is validated on first use.
    async fn ensure_ready(&self, space: &str) -> Result<()> {
        if self.is_initialized(space) {
            return Ok(());
        }
        self.initialize(space).await
    }

    fn lock_bindings(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.bindings.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn valid_question(question: &str) -> Result<&str> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(RagError::InvalidInput("question must not be empty".to_string()));
    }
    Ok(trimmed)
}
