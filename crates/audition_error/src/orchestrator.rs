//! Orchestration error types.

/// Orchestration error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum OrchestratorErrorKind {
    /// No batch client registered for the condition's provider
    #[display("No batch client configured for provider '{}'", _0)]
    ProviderNotConfigured(String),
    /// Run requested with no prompts or zero replicates
    #[display("Run has no work: {}", _0)]
    EmptyRun(String),
    /// Condition slug not found
    #[display("Unknown condition '{}'", _0)]
    UnknownCondition(String),
    /// Run id not found
    #[display("Run '{}' not found", _0)]
    RunNotFound(String),
}

/// Orchestration error with source location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Orchestrator Error: {} at line {} in {}", kind, line, file)]
pub struct OrchestratorError {
    /// The kind of error that occurred
    pub kind: OrchestratorErrorKind,
    /// Line number where error was created
    pub line: u32,
    /// File where error was created
    pub file: &'static str,
}

impl OrchestratorError {
    /// Create a new OrchestratorError with automatic location tracking.
    #[track_caller]
    pub fn new(kind: OrchestratorErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }
}
