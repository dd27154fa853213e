//! Prompts, deduplicated by content hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A stored prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Store-assigned identifier
    pub id: i64,
    /// Hex SHA-256 of `body`
    pub content_hash: String,
    /// Optional label for reporting
    pub label: Option<String>,
    /// Prompt text sent as the user message
    pub body: String,
    /// When the prompt was first stored
    pub created_at: DateTime<Utc>,
}

/// A prompt not yet stored.
///
/// # Examples
///
/// ```
/// use audition_core::NewPrompt;
///
/// let a = NewPrompt::new("Write a haiku about rust.");
/// let b = NewPrompt::new("Write a haiku about rust.").with_label("haiku");
/// assert_eq!(a.content_hash(), b.content_hash());
/// assert_eq!(a.content_hash().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPrompt {
    /// Optional label
    #[serde(default)]
    pub label: Option<String>,
    /// Prompt text
    pub body: String,
}

impl NewPrompt {
    /// Create an unlabeled prompt.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            label: None,
            body: body.into(),
        }
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Hex SHA-256 of the body; the deduplication key.
    pub fn content_hash(&self) -> String {
        format!("{:x}", Sha256::digest(self.body.as_bytes()))
    }
}
