use thiserror::Error;

/// Deterministic conflict codes carried on the wire.
///
/// The code strings are part of the HTTP contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCode {
    Conflict,
    UniqueViolation,
    UploadSessionState,
    UploadVerificationFailed,
    PublishPreconditionsUnmet,
    PublishBlobMissing,
    PublishBlockedQuarantine,
    PublishDenied,
    DraftOnly,
    QuarantineResolved,
    ImmutableVersion,
}

impl ConflictCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCode::Conflict => "conflict",
            ConflictCode::UniqueViolation => "unique_violation",
            ConflictCode::UploadSessionState => "upload_session_state",
            ConflictCode::UploadVerificationFailed => "upload_verification_failed",
            ConflictCode::PublishPreconditionsUnmet => "publish_preconditions_unmet",
            ConflictCode::PublishBlobMissing => "publish_blob_missing",
            ConflictCode::PublishBlockedQuarantine => "publish_blocked_quarantine",
            ConflictCode::PublishDenied => "publish_denied",
            ConflictCode::DraftOnly => "draft_only",
            ConflictCode::QuarantineResolved => "quarantine_resolved",
            ConflictCode::ImmutableVersion => "immutable_version",
        }
    }
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{}: {message}", code.as_str())]
    Conflict { code: ConflictCode, message: String },

    #[error("quarantined blob: {0}")]
    QuarantinedBlob(String),

    #[error("policy evaluation timed out after {0}ms")]
    PolicyTimeout(u64),

    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    #[error("backend unavailable: {0}")]
    Backend(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

impl ArtifactError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(code: ConflictCode, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Stable wire code for the HTTP boundary.
    pub fn wire_code(&self) -> &'static str {
        match self {
            ArtifactError::Validation(_) => "validation_error",
            ArtifactError::NotFound(_) => "not_found",
            ArtifactError::Conflict { code, .. } => code.as_str(),
            ArtifactError::QuarantinedBlob(_) => "quarantined_blob",
            ArtifactError::PolicyTimeout(_) => "policy_timeout",
            ArtifactError::RangeNotSatisfiable(_) => "range_not_satisfiable",
            ArtifactError::Backend(_) => "service_unavailable",
            ArtifactError::Internal(_) => "internal_error",
        }
    }

    pub fn is_conflict(&self, expected: ConflictCode) -> bool {
        matches!(self, ArtifactError::Conflict { code, .. } if *code == expected)
    }
}
