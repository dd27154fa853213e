//! Input files for the `audition` binary.
//!
//! Prompts come as JSON Lines, one object per line:
//!
//! ```text
//! {"body": "Write a haiku about rust.", "label": "haiku"}
//! {"body": "Continue the story."}
//! ```
//!
//! Conditions come as TOML:
//!
//! ```toml
//! [[conditions]]
//! slug = "haiku-cold"
//! provider = "anthropic"
//! model = "claude-3-5-haiku-latest"
//! temperature = 0.0
//! max_tokens = 512
//! ```

use audition_core::{ConditionSpec, NewPrompt};
use audition_error::{AuditionResult, ConfigError};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ConditionFile {
    #[serde(default)]
    conditions: Vec<ConditionSpec>,
}

/// Parse JSON Lines prompts. Blank lines are skipped.
///
/// # Errors
///
/// Returns a configuration error naming the first malformed line or an
/// empty body.
pub fn parse_prompts(text: &str) -> AuditionResult<Vec<NewPrompt>> {
    let mut prompts = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let prompt: NewPrompt = serde_json::from_str(line).map_err(|e| {
            ConfigError::new(format!("Prompt line {}: {}", index + 1, e))
        })?;
        if prompt.body.trim().is_empty() {
            return Err(ConfigError::new(format!("Prompt line {}: empty body", index + 1)).into());
        }
        prompts.push(prompt);
    }
    Ok(prompts)
}

/// Read a JSON Lines prompt file.
pub fn read_prompts(path: impl AsRef<Path>) -> AuditionResult<Vec<NewPrompt>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::new(format!("Failed to read {}: {}", path.display(), e)))?;
    let prompts = parse_prompts(&text)?;
    debug!(path = %path.display(), count = prompts.len(), "Loaded prompts");
    Ok(prompts)
}

/// Parse a TOML file of `[[conditions]]` tables.
pub fn parse_conditions(text: &str) -> AuditionResult<Vec<ConditionSpec>> {
    let file: ConditionFile = toml::from_str(text)
        .map_err(|e| ConfigError::new(format!("Invalid conditions file: {}", e)))?;
    Ok(file.conditions)
}

/// Read a TOML conditions file.
pub fn read_conditions(path: impl AsRef<Path>) -> AuditionResult<Vec<ConditionSpec>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::new(format!("Failed to read {}: {}", path.display(), e)))?;
    let conditions = parse_conditions(&text)?;
    debug!(path = %path.display(), count = conditions.len(), "Loaded conditions");
    Ok(conditions)
}
