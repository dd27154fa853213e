//! Top-level error wrapper types.

use crate::{
    AdmissionError, ConfigError, CustomIdError, OrchestratorError, ProviderError, RetryableError,
    StoreError,
};

/// Every error condition an Audition operation can surface.
///
/// # Examples
///
/// ```
/// use audition_error::{AuditionError, ConfigError};
///
/// let err: AuditionError = ConfigError::new("bad tier").into();
/// assert!(format!("{}", err).contains("Configuration Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum AuditionErrorKind {
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Batch refused before submission
    #[from(AdmissionError)]
    Admission(AdmissionError),
    /// Provider batch API error
    #[from(ProviderError)]
    Provider(ProviderError),
    /// Run/result store error
    #[from(StoreError)]
    Store(StoreError),
    /// Custom id encode/parse error
    #[from(CustomIdError)]
    CustomId(CustomIdError),
    /// Orchestration error
    #[from(OrchestratorError)]
    Orchestrator(OrchestratorError),
}

/// Audition error with kind discrimination.
///
/// # Examples
///
/// ```
/// use audition_error::{AuditionResult, StoreError, StoreErrorKind};
///
/// fn might_fail() -> AuditionResult<()> {
///     Err(StoreError::new(StoreErrorKind::NotFound("attempt 7".into())))?
/// }
///
/// assert!(might_fail().is_err());
/// ```
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Audition Error: {}", _0)]
pub struct AuditionError(Box<AuditionErrorKind>);

impl AuditionError {
    /// Create a new error from a kind.
    pub fn new(kind: AuditionErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &AuditionErrorKind {
        &self.0
    }

    /// True when the batch was refused at the admission gate.
    pub fn is_admission(&self) -> bool {
        matches!(self.kind(), AuditionErrorKind::Admission(_))
    }
}

// Generic From implementation for any type that converts to AuditionErrorKind
impl<T> From<T> for AuditionError
where
    T: Into<AuditionErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

impl RetryableError for AuditionError {
    fn is_retryable(&self) -> bool {
        match self.kind() {
            AuditionErrorKind::Provider(err) => err.is_retryable(),
            _ => false,
        }
    }

    fn retry_strategy_params(&self) -> (u64, usize, u64) {
        match self.kind() {
            AuditionErrorKind::Provider(err) => err.retry_strategy_params(),
            _ => (2000, 5, 60),
        }
    }
}

/// Result type for Audition operations.
pub type AuditionResult<T> = std::result::Result<T, AuditionError>;
