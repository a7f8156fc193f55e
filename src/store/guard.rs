//! Immutability guard for published package versions.
//!
//! The relational schema enforces this with the
//! `deny_published_version_mutation` trigger; here the same rule runs as a
//! store-level check on every version update. The guard name appears in the
//! conflict message because callers match on it.

use super::rows::PackageVersionRow;
use crate::core::{ArtifactError, ConflictCode, Result, VersionState};

pub const GUARD_NAME: &str = "deny_published_version_mutation";

/// Validates a proposed update of a version row against the current row.
///
/// Rules, strictest form:
/// - identity fields (version, package, repo, tenant, created_by,
///   created_at, published_at) never change once the row is `published`;
/// - the only transition out of `published` is to `tombstoned`;
/// - `tombstoned` is terminal;
/// - `published` requires `published_at`, `tombstoned` requires
///   `tombstoned_at`.
pub fn check_version_update(old: &PackageVersionRow, new: &PackageVersionRow) -> Result<()> {
    if new.state == VersionState::Published && new.published_at.is_none() {
        return Err(guard_violation("published state requires published_at"));
    }
    if new.state == VersionState::Tombstoned && new.tombstoned_at.is_none() {
        return Err(guard_violation("tombstoned state requires tombstoned_at"));
    }

    match old.state {
        VersionState::Draft => Ok(()),
        VersionState::Published => {
            let identity_intact = new.version == old.version
                && new.package_id == old.package_id
                && new.repo_id == old.repo_id
                && new.tenant_id == old.tenant_id
                && new.created_by == old.created_by
                && new.created_at == old.created_at
                && new.published_at == old.published_at;
            if !identity_intact {
                return Err(guard_violation(
                    "identity fields of a published version are immutable",
                ));
            }
            match new.state {
                VersionState::Tombstoned => Ok(()),
                VersionState::Published => {
                    // No mutation at all is legal while staying published.
                    if new.tombstoned_at != old.tombstoned_at
                        || new.tombstone_reason != old.tombstone_reason
                    {
                        Err(guard_violation("published version rows are immutable"))
                    } else {
                        Ok(())
                    }
                }
                VersionState::Draft => {
                    Err(guard_violation("published versions cannot revert to draft"))
                }
            }
        }
        VersionState::Tombstoned => {
            if new.state == VersionState::Tombstoned {
                Ok(())
            } else {
                Err(guard_violation("tombstoned is a terminal state"))
            }
        }
    }
}

fn guard_violation(detail: &str) -> ArtifactError {
    ArtifactError::conflict(
        ConflictCode::ImmutableVersion,
        format!("{GUARD_NAME}: {detail}"),
    )
}
