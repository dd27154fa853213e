//! The custom id codec: the only link between an attempt row and a provider
//! result.
//!
//! Layout, version 1:
//!
//! ```text
//! {run_id}_{condition_id}_{prompt_id}_{replicate_index}   WithCondition
//! {run_id}_{prompt_id}_{replicate_index}                  WithoutCondition
//! ```
//!
//! Run ids may themselves contain `_`, so ids are split from the right and
//! everything left of the fixed numeric tail is the run id.
//!
//! Changing the separator, segment order, or split direction orphans every
//! batch already submitted: reconciliation could no longer attribute their
//! results. Any such change needs a new version and a parser that still
//! accepts the old layout.

use crate::RunId;
use audition_error::{CustomIdError, CustomIdErrorKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Version of the layout described in this module.
pub const CUSTOM_ID_FORMAT_VERSION: u32 = 1;

/// Segment separator.
pub const CUSTOM_ID_SEPARATOR: char = '_';

/// Longest custom id every supported provider accepts.
pub const MAX_CUSTOM_ID_LEN: usize = 64;

static ALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Valid custom id regex"));

/// Which layout a run's custom ids use. Fixed per run.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CustomIdFormat {
    /// Four segments, condition id included
    #[default]
    WithCondition,
    /// Three segments; the condition is implied by the run
    WithoutCondition,
}

impl CustomIdFormat {
    /// Number of separator-delimited segments, counting the run id as one.
    pub fn segments(self) -> usize {
        match self {
            CustomIdFormat::WithCondition => 4,
            CustomIdFormat::WithoutCondition => 3,
        }
    }
}

/// Decoded custom id.
///
/// # Examples
///
/// ```
/// use audition_core::{CustomId, CustomIdFormat, RunId};
///
/// let id = CustomId::new(RunId::new("20260314T091500_3f9a0c1d"), Some(12), 345, 2);
/// let encoded = id.encode().unwrap();
/// assert_eq!(encoded, "20260314T091500_3f9a0c1d_12_345_2");
///
/// let parsed = CustomId::parse(&encoded, CustomIdFormat::WithCondition).unwrap();
/// assert_eq!(parsed, id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomId {
    /// Owning run
    pub run_id: RunId,
    /// Condition, present only in the four-segment layout
    pub condition_id: Option<i64>,
    /// Prompt
    pub prompt_id: i64,
    /// Zero-based replicate index
    pub replicate_index: u32,
}

impl CustomId {
    /// Assemble a custom id. `condition_id` selects the layout.
    pub fn new(
        run_id: RunId,
        condition_id: Option<i64>,
        prompt_id: i64,
        replicate_index: u32,
    ) -> Self {
        Self {
            run_id,
            condition_id,
            prompt_id,
            replicate_index,
        }
    }

    /// Assemble a custom id in the given layout.
    pub fn for_format(
        format: CustomIdFormat,
        run_id: RunId,
        condition_id: i64,
        prompt_id: i64,
        replicate_index: u32,
    ) -> Self {
        let condition_id = match format {
            CustomIdFormat::WithCondition => Some(condition_id),
            CustomIdFormat::WithoutCondition => None,
        };
        Self::new(run_id, condition_id, prompt_id, replicate_index)
    }

    /// Layout this id encodes to.
    pub fn format(&self) -> CustomIdFormat {
        if self.condition_id.is_some() {
            CustomIdFormat::WithCondition
        } else {
            CustomIdFormat::WithoutCondition
        }
    }

    /// Encode and check against provider constraints.
    pub fn encode(&self) -> Result<String, CustomIdError> {
        if self.run_id.as_str().is_empty() {
            return Err(CustomIdError::new(CustomIdErrorKind::EmptyRunId(
                self.to_string(),
            )));
        }
        let encoded = self.to_string();
        if !ALLOWED.is_match(&encoded) {
            return Err(CustomIdError::new(CustomIdErrorKind::InvalidCharacters(
                encoded,
            )));
        }
        if encoded.len() > MAX_CUSTOM_ID_LEN {
            let len = encoded.len();
            return Err(CustomIdError::new(CustomIdErrorKind::TooLong {
                value: encoded,
                len,
                max: MAX_CUSTOM_ID_LEN,
            }));
        }
        Ok(encoded)
    }

    /// Parse an id known to use `format`.
    pub fn parse(value: &str, format: CustomIdFormat) -> Result<Self, CustomIdError> {
        let expected = format.segments();
        let mut tail: Vec<&str> = value.rsplitn(expected, CUSTOM_ID_SEPARATOR).collect();
        if tail.len() < expected {
            return Err(CustomIdError::new(CustomIdErrorKind::TooFewSegments {
                value: value.to_string(),
                expected,
            }));
        }
        // rsplitn yields right to left
        tail.reverse();

        let run_id = tail[0];
        if run_id.is_empty() {
            return Err(CustomIdError::new(CustomIdErrorKind::EmptyRunId(
                value.to_string(),
            )));
        }

        let replicate_index = parse_segment::<u32>(value, tail[expected - 1], "replicate index")?;
        let prompt_id = parse_segment::<i64>(value, tail[expected - 2], "prompt id")?;
        let condition_id = match format {
            CustomIdFormat::WithCondition => {
                Some(parse_segment::<i64>(value, tail[1], "condition id")?)
            }
            CustomIdFormat::WithoutCondition => None,
        };

        Ok(Self {
            run_id: RunId::new(run_id),
            condition_id,
            prompt_id,
            replicate_index,
        })
    }

    /// Every reading of `value` under the known layouts, four-segment first.
    ///
    /// A run id ending in a number makes both readings valid; callers pick
    /// the one whose run id they recognize.
    pub fn candidates(value: &str) -> Vec<Self> {
        [CustomIdFormat::WithCondition, CustomIdFormat::WithoutCondition]
            .into_iter()
            .filter_map(|format| Self::parse(value, format).ok())
            .collect()
    }

    /// Parse `value`, accepting the first reading whose run id satisfies
    /// `is_known_run`.
    pub fn resolve(value: &str, is_known_run: impl Fn(&RunId) -> bool) -> Option<Self> {
        Self::candidates(value)
            .into_iter()
            .find(|candidate| is_known_run(&candidate.run_id))
    }
}

fn parse_segment<T: std::str::FromStr>(
    value: &str,
    segment: &str,
    field: &'static str,
) -> Result<T, CustomIdError> {
    segment.parse::<T>().map_err(|_| {
        CustomIdError::new(CustomIdErrorKind::InvalidSegment {
            value: value.to_string(),
            segment: segment.to_string(),
            field,
        })
    })
}

impl fmt::Display for CustomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.run_id)?;
        if let Some(condition_id) = self.condition_id {
            write!(f, "{}{}", CUSTOM_ID_SEPARATOR, condition_id)?;
        }
        write!(
            f,
            "{sep}{}{sep}{}",
            self.prompt_id,
            self.replicate_index,
            sep = CUSTOM_ID_SEPARATOR
        )
    }
}
