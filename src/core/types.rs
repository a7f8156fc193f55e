use super::{ArtifactError, ConflictCode, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(TenantId);
uuid_id!(RepoId);
uuid_id!(PackageId);
uuid_id!(VersionId);
uuid_id!(UploadId);
uuid_id!(EntryId);
uuid_id!(AuditId);
uuid_id!(EventId);
uuid_id!(JobId);
uuid_id!(QuarantineId);
uuid_id!(EvaluationId);
uuid_id!(TombstoneId);
uuid_id!(GcRunId);

/// A sha256 content digest in its canonical text form: 64 lowercase hex chars.
///
/// Construction is only possible through [`Digest::parse`] or
/// [`Digest::of_bytes`], so a held `Digest` is always well formed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() != 64 || !raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(ArtifactError::validation(format!(
                "digest must be 64 lowercase hex characters, got '{raw}'"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Digest {
    type Error = ArtifactError;

    fn try_from(raw: String) -> Result<Self> {
        Digest::parse(&raw)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> String {
        digest.0
    }
}

/// Incremental sha256 over streamed chunks; finalizes into a [`Digest`].
#[derive(Default)]
pub struct DigestHasher {
    inner: Sha256,
    bytes_seen: u64,
}

impl DigestHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes_seen += chunk.len() as u64;
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn finalize(self) -> Digest {
        Digest(hex::encode(self.inner.finalize()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoType {
    Local,
    Remote,
    Virtual,
}

impl RepoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::Local => "local",
            RepoType::Remote => "remote",
            RepoType::Virtual => "virtual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Draft,
    Published,
    Tombstoned,
}

impl VersionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionState::Draft => "draft",
            VersionState::Published => "published",
            VersionState::Tombstoned => "tombstoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Initiated,
    PartsUploading,
    PendingCommit,
    Committed,
    Aborted,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Initiated => "initiated",
            UploadState::PartsUploading => "parts_uploading",
            UploadState::PendingCommit => "pending_commit",
            UploadState::Committed => "committed",
            UploadState::Aborted => "aborted",
        }
    }

    /// Terminal states accept no further commands.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Committed | UploadState::Aborted)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SearchJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchJobStatus::Pending => "pending",
            SearchJobStatus::Processing => "processing",
            SearchJobStatus::Completed => "completed",
            SearchJobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineStatus {
    Quarantined,
    Released,
    Rejected,
}

impl QuarantineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineStatus::Quarantined => "quarantined",
            QuarantineStatus::Released => "released",
            QuarantineStatus::Rejected => "rejected",
        }
    }

    /// Quarantined and rejected items block downloads; released ones do not.
    pub fn blocks_download(&self) -> bool {
        matches!(self, QuarantineStatus::Quarantined | QuarantineStatus::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcMode {
    DryRun,
    Execute,
}

impl GcMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GcMode::DryRun => "dry_run",
            GcMode::Execute => "execute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Publish,
    Promote,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Publish => "publish",
            PolicyAction::Promote => "promote",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    Quarantine,
}

impl PolicyDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::Deny => "deny",
            PolicyDecision::Quarantine => "quarantine",
        }
    }
}

/// Validates an expected content length supplied by a client.
pub fn validate_expected_length(length: i64) -> Result<u64> {
    if length <= 0 {
        return Err(ArtifactError::validation(format!(
            "expected_length must be positive, got {length}"
        )));
    }
    Ok(length as u64)
}

/// Maps a would-be duplicate key into the deterministic conflict kind.
pub fn unique_violation(what: impl Into<String>) -> ArtifactError {
    ArtifactError::conflict(ConflictCode::UniqueViolation, what)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_parse_accepts_canonical_form() {
        let raw = "a".repeat(64);
        let digest = Digest::parse(&raw).unwrap();
        assert_eq!(digest.as_str(), raw);
    }

    #[test]
    fn digest_parse_rejects_bad_input() {
        assert!(Digest::parse("abc").is_err());
        assert!(Digest::parse(&"A".repeat(64)).is_err());
        assert!(Digest::parse(&"g".repeat(64)).is_err());
        assert!(Digest::parse(&"a".repeat(63)).is_err());
    }

    #[test]
    fn digest_of_bytes_matches_streaming_hasher() {
        let payload = b"artifact bytes";
        let mut hasher = DigestHasher::new();
        hasher.update(&payload[..8]);
        hasher.update(&payload[8..]);
        assert_eq!(hasher.finalize(), Digest::of_bytes(payload));
    }

    #[test]
    fn expected_length_must_be_positive() {
        assert!(validate_expected_length(0).is_err());
        assert!(validate_expected_length(-5).is_err());
        assert_eq!(validate_expected_length(1024).unwrap(), 1024);
    }
}
