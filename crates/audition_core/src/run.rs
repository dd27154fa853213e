//! Generation runs.

use crate::CustomIdFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a generation run.
///
/// Minted ids look like `20260314T091500_3f9a0c1d`; they contain the
/// custom id separator, which is why custom ids are parsed from the right.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
#[display("{}", _0)]
pub struct RunId(String);

impl RunId {
    /// Wrap an existing run id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh, time-ordered run id.
    pub fn generate() -> Self {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", stamp, &suffix[..8]))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for RunId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One "condition × prompts × replicates" invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRun {
    /// Run identifier
    pub id: RunId,
    /// Condition under test
    pub condition_id: i64,
    /// Replicates per prompt
    pub replicate_count: u32,
    /// Custom id layout used for every attempt of this run
    pub id_format: CustomIdFormat,
    /// When the run was created
    pub created_at: DateTime<Utc>,
    /// Set once every attempt reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
    /// Run-level error, e.g. an unrecoverable reconciliation failure
    pub error_message: Option<String>,
}

/// A run not yet stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRun {
    /// Run identifier
    pub id: RunId,
    /// Condition under test
    pub condition_id: i64,
    /// Replicates per prompt
    pub replicate_count: u32,
    /// Custom id layout
    pub id_format: CustomIdFormat,
}
