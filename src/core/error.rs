use thiserror::Error;

/// Message prefix used by storage engines when two transactions touched the
/// same row and the later one lost at commit time.
pub const WRITE_CONFLICT_MARKER: &str = "Write-write conflict detected";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Aggregate invariant violated or malformed input; never reaches the store.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Version mismatch or a lost optimistic-lock race.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Hard delete blocked by data retention policy: {0}")]
    RetentionPolicy(String),

    /// Writing the audit entry failed; the enclosing transaction is rolled back.
    #[error("Audit failure: {0}")]
    AuditFailure(String),

    #[error("Backing store error: {0}")]
    BackingStore(String),
}

/// Coarse classification of a [`LedgerError`] for callers that branch on the
/// failure category instead of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    RetentionPolicy,
    AuditFailure,
    BackingStore,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::RetentionPolicy => "retention_policy",
            Self::AuditFailure => "audit_failure",
            Self::BackingStore => "backing_store",
        };
        write!(f, "{label}")
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RetentionPolicy(_) => ErrorKind::RetentionPolicy,
            Self::AuditFailure(_) => ErrorKind::AuditFailure,
            Self::BackingStore(_) => ErrorKind::BackingStore,
        }
    }

    /// The message without the category prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(message)
            | Self::Conflict(message)
            | Self::NotFound(message)
            | Self::RetentionPolicy(message)
            | Self::AuditFailure(message)
            | Self::BackingStore(message) => message,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Builds the conflict raised when a commit loses a first-committer-wins race.
    pub fn write_conflict(collection: &str, key: &str) -> Self {
        Self::Conflict(format!(
            "{WRITE_CONFLICT_MARKER} on '{collection}:{key}'"
        ))
    }

    /// True for commit-time write-write conflicts, as opposed to version
    /// mismatches detected before any write.
    pub fn is_write_conflict(&self) -> bool {
        match self {
            Self::Conflict(message) => message.starts_with(WRITE_CONFLICT_MARKER),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::BackingStore(format!("row serialization failed: {err}"))
    }
}

impl<T> From<std::sync::PoisonError<T>> for LedgerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::BackingStore(format!("lock poisoned: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
