use std::fmt;

use thiserror::Error;

/// LDAP result codes the core reacts to.
pub mod result_code {
    pub const SUCCESS: u32 = 0;
    pub const OPERATIONS_ERROR: u32 = 1;
    pub const CONSTRAINT_VIOLATION: u32 = 19;
    pub const NO_SUCH_OBJECT: u32 = 32;
    pub const INVALID_DN_SYNTAX: u32 = 34;
    pub const NAMING_VIOLATION: u32 = 64;
    pub const OBJECT_CLASS_VIOLATION: u32 = 65;
    pub const UNAVAILABLE: u32 = 52;
    pub const UNWILLING_TO_PERFORM: u32 = 53;
    pub const NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
    pub const ENTRY_ALREADY_EXISTS: u32 = 68;
    pub const OTHER: u32 = 80;
    /// Client-side: the connection went away.
    pub const SERVER_DOWN: u32 = 81;
}

/// Structured failure reported by a directory transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("directory error {code}: {message}")]
pub struct TransportError {
    pub code: u32,
    pub message: String,
}

impl TransportError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_such_object(dn: impl fmt::Display) -> Self {
        Self::new(result_code::NO_SUCH_OBJECT, format!("no such object: {}", dn))
    }

    pub fn already_exists(dn: impl fmt::Display) -> Self {
        Self::new(
            result_code::ENTRY_ALREADY_EXISTS,
            format!("entry already exists: {}", dn),
        )
    }

    pub fn server_down(message: impl Into<String>) -> Self {
        Self::new(result_code::SERVER_DOWN, message)
    }

    pub fn is_no_such_object(&self) -> bool {
        self.code == result_code::NO_SUCH_OBJECT
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// A batch that failed part-way through.
///
/// Carries the error that stopped the batch together with every error hit while
/// replaying the inverse actions, so a failed rollback never hides the cause.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Zero-based index of the action that failed.
    pub failed_step: usize,
    /// Human readable form of the failed action.
    pub failed_action: String,
    pub cause: TransportError,
    /// Number of previously applied actions that were undone successfully.
    pub rolled_back: usize,
    pub rollback_errors: Vec<TransportError>,
}

impl BatchFailure {
    /// True when every applied action was undone.
    pub fn rollback_complete(&self) -> bool {
        self.rollback_errors.is_empty()
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} ({}) failed: {}",
            self.failed_step, self.failed_action, self.cause
        )?;
        if !self.rollback_errors.is_empty() {
            write!(f, "; rollback incomplete:")?;
            for err in &self.rollback_errors {
                write!(f, " [{}]", err)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Planning error: {0}")]
    Planning(String),
    #[error("Integrity error: {0}")]
    Integrity(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Batch failed: {0}")]
    BatchFailed(Box<BatchFailure>),
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),
    #[error("{member} is already a member of {group}")]
    AlreadyMember { group: String, member: String },
    #[error("{member} is not a member of {group}")]
    NotAMember { group: String, member: String },
    #[error("Password error: {0}")]
    Password(String),
}

impl AppError {
    /// The transport error behind this failure, if there is one.
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            AppError::Transport(e) => Some(e),
            AppError::BatchFailed(failure) => Some(&failure.cause),
            _ => None,
        }
    }

    /// Validation and configuration errors must never be retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transport(_) | AppError::BatchFailed(_))
    }
}

impl From<BatchFailure> for AppError {
    fn from(failure: BatchFailure) -> Self {
        AppError::BatchFailed(Box::new(failure))
    }
}

pub type AppResult<T> = Result<T, AppError>;
