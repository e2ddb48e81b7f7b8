//! Document abstraction handed over by the external ingestion collaborator.

use serde::{Deserialize, Serialize};

use crate::domain::digest::digest_bytes;
use crate::domain::error::{Result, TieredError};

/// One ordered slice of the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Raw text plus its ordered chunk list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub chunks: Vec<Chunk>,
}

impl Document {
    pub fn new(text: impl Into<String>, chunks: Vec<Chunk>) -> Self {
        Self {
            text: text.into(),
            chunks,
        }
    }

    /// Split `text` on blank lines, one chunk per paragraph.
    pub fn from_paragraphs(text: impl Into<String>) -> Self {
        let text = text.into();
        let chunks = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .enumerate()
            .map(|(index, p)| Chunk {
                index,
                text: p.to_string(),
                metadata: serde_json::Value::Null,
            })
            .collect();
        Self { text, chunks }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// SHA-256 of the raw text.
    pub fn digest(&self) -> String {
        digest_bytes(self.text.as_bytes())
    }

    /// Reject documents that cannot feed task execution.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(TieredError::ingestion("document text is empty"));
        }
        if self.chunks.is_empty() {
            return Err(TieredError::ingestion("document has zero chunks"));
        }
        for (expected, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != expected {
                return Err(TieredError::ingestion(format!(
                    "chunk order broken: position {expected} carries index {}",
                    chunk.index
                )));
            }
        }
        Ok(())
    }
}
