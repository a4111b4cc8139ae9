//! Stateful operations over stored periods, amendments and statements.
//!
//! Each service borrows a repository and is bound to one authenticated
//! owner. Every read and write is scoped to that owner.

pub mod amendments;
pub mod eops;
pub mod periods;
pub mod vat;

pub use amendments::AmendmentLedger;
pub use eops::EopsFiling;
pub use periods::PeriodStateMachine;
pub use vat::{VatFiling, VatReturn};

use crate::db::RepositoryError;
use crate::error::MtdError;

/// Resolves the caller's owner id, rejecting a missing or blank one.
pub(crate) fn require_owner(owner: Option<&str>) -> Result<String, MtdError> {
    match owner.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(MtdError::NotAuthenticated),
    }
}

/// Maps a storage miss to a domain `NotFound` naming what was looked up.
pub(crate) fn not_found(what: impl Into<String>) -> impl FnOnce(RepositoryError) -> MtdError {
    let what = what.into();
    move |err| match err {
        RepositoryError::NotFound => MtdError::NotFound(what),
        other => other.into(),
    }
}


#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn owner_is_trimmed() {
        assert_eq!(require_owner(Some("  abc ")), Ok("abc".to_string()));
    }

    #[test]
    fn missing_or_blank_owner_is_rejected() {
        assert_eq!(require_owner(None), Err(MtdError::NotAuthenticated));
        assert_eq!(require_owner(Some("   ")), Err(MtdError::NotAuthenticated));
    }

    #[test]
    fn not_found_names_the_lookup() {
        let map = not_found("period 9");

        assert_eq!(
            map(RepositoryError::NotFound),
            MtdError::NotFound("period 9".to_string())
        );
    }

    #[test]
    fn other_storage_errors_pass_through() {
        let map = not_found("period 9");

        assert_eq!(
            map(RepositoryError::Database("disk full".to_string())),
            MtdError::Repository(RepositoryError::Database("disk full".to_string()))
        );
    }
}
