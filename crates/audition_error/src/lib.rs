//! Error types for the Audition workspace.
//!
//! This crate provides the foundation error types used throughout Audition.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All errors use `#[track_caller]` for automatic location capture
//!
//! The taxonomy maps onto how callers must react:
//! - [`AdmissionError`]: the batch breaks a size, count or token cap. Split and retry.
//! - [`ProviderError`]: transient or terminal provider failures, see [`RetryableError`].
//! - [`StoreError`]: the run/result store rejected or failed an operation.
//! - [`CustomIdError`]: a per-request identifier could not be encoded or parsed.
//!
//! # Examples
//!
//! ```
//! use audition_error::{AuditionResult, ConfigError};
//!
//! fn load() -> AuditionResult<String> {
//!     Err(ConfigError::new("missing [providers] table"))?
//! }
//!
//! assert!(load().is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod admission;
mod config;
mod custom_id;
mod error;
mod orchestrator;
mod provider;
mod store;

pub use admission::{AdmissionError, AdmissionErrorKind};
pub use config::ConfigError;
pub use custom_id::{CustomIdError, CustomIdErrorKind};
pub use error::{AuditionError, AuditionErrorKind, AuditionResult};
pub use orchestrator::{OrchestratorError, OrchestratorErrorKind};
pub use provider::{ProviderError, ProviderErrorKind, RetryableError};
pub use store::{StoreError, StoreErrorKind};
