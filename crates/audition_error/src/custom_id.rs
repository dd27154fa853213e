//! Custom id codec errors.

/// Reasons a custom id fails to encode or parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CustomIdErrorKind {
    /// Fewer underscore-delimited segments than the format requires
    #[display("'{}' has fewer than {} segments", value, expected)]
    TooFewSegments {
        /// Offending custom id
        value: String,
        /// Segments the format requires
        expected: usize,
    },
    /// A trailing numeric segment did not parse
    #[display("Segment '{}' of '{}' is not a valid {}", segment, value, field)]
    InvalidSegment {
        /// Offending custom id
        value: String,
        /// Segment text
        segment: String,
        /// Field the segment encodes
        field: &'static str,
    },
    /// The run id portion is empty
    #[display("'{}' has an empty run id", _0)]
    EmptyRunId(String),
    /// Characters outside `[A-Za-z0-9_-]`
    #[display("'{}' contains characters outside [A-Za-z0-9_-]", _0)]
    InvalidCharacters(String),
    /// Longer than providers accept
    #[display("'{}' is {} characters, maximum is {}", value, len, max)]
    TooLong {
        /// Offending custom id
        value: String,
        /// Actual length
        len: usize,
        /// Maximum length
        max: usize,
    },
}

/// Custom id error with source location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Custom Id Error: {} at line {} in {}", kind, line, file)]
pub struct CustomIdError {
    /// The kind of error that occurred
    pub kind: CustomIdErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl CustomIdError {
    /// Create a new CustomIdError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: CustomIdErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
