use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::BankError;

/// One question/answer entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

impl QaPair {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

#[derive(Deserialize)]
struct BankDocument {
    questions: Vec<QaPair>,
}

/// Immutable, ordered question bank. Cloning shares the same entries.
///
/// Entry order is load order and only matters when two questions score
/// the same against an utterance: the earlier one wins.
#[derive(Clone, Debug)]
pub struct QuestionBank {
    entries: Arc<[QaPair]>,
}

impl QuestionBank {
    pub fn new(entries: Vec<QaPair>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Parse a `{"questions": [{"question", "answer"}, ...]}` document.
    pub fn from_json(raw: &str) -> Result<Self, BankError> {
        let doc: BankDocument = serde_json::from_str(raw)?;
        Ok(Self::new(doc.questions))
    }

    pub fn load(path: &Path) -> Result<Self, BankError> {
        let raw = std::fs::read_to_string(path).map_err(|source| BankError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let bank = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), entries = bank.len(), "Question bank loaded");
        Ok(bank)
    }

    pub fn entries(&self) -> &[QaPair] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&QaPair> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
