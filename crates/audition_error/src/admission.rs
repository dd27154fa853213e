//! Admission errors raised before any network call is made.

/// Reasons a batch is refused at the admission gate.
///
/// None of these are retryable as-is: the caller must split the batch and
/// resubmit the pieces. Items are never dropped to make a batch fit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum AdmissionErrorKind {
    /// More requests than the provider accepts in one batch
    #[display("Batch has {} requests, provider maximum is {}", count, max)]
    TooManyRequests {
        /// Requests in the batch
        count: usize,
        /// Provider cap
        max: usize,
    },
    /// Serialized batch exceeds the provider's payload cap
    #[display("Batch payload is {} bytes, provider maximum is {}", bytes, max)]
    PayloadTooLarge {
        /// Serialized size in bytes
        bytes: usize,
        /// Provider cap in bytes
        max: usize,
    },
    /// A single submission needs more tokens than the per-minute budget allows
    #[display("Submission needs {} tokens but the per-minute limit is {}", tokens, limit)]
    TokensExceedLimit {
        /// Estimated tokens
        tokens: u64,
        /// Tokens-per-minute ceiling
        limit: u64,
    },
    /// Nothing to submit
    #[display("Batch contains no requests")]
    EmptyBatch,
}

/// Admission error with source location tracking.
///
/// # Examples
///
/// ```
/// use audition_error::{AdmissionError, AdmissionErrorKind};
///
/// let err = AdmissionError::new(AdmissionErrorKind::TooManyRequests { count: 3, max: 2 });
/// assert!(format!("{}", err).contains("maximum is 2"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Admission Error: {} at line {} in {}", kind, line, file)]
pub struct AdmissionError {
    /// The kind of error that occurred
    pub kind: AdmissionErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl AdmissionError {
    /// Create a new AdmissionError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: AdmissionErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
