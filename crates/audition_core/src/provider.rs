//! Provider identity.

use serde::{Deserialize, Serialize};

/// The batch-capable providers Audition can drive.
///
/// Adding a provider means adding a variant here, a client in
/// `audition_providers`, and one arm in the registry's construction switch.
///
/// # Examples
///
/// ```
/// use audition_core::ProviderKind;
/// use std::str::FromStr;
///
/// assert_eq!(ProviderKind::from_str("OpenAI").unwrap(), ProviderKind::OpenAi);
/// assert_eq!(ProviderKind::Anthropic.to_string(), "anthropic");
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderKind {
    /// Anthropic Message Batches API
    Anthropic,
    /// OpenAI Batch API over `/v1/chat/completions`
    OpenAi,
}
