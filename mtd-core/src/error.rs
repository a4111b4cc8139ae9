use thiserror::Error;

use crate::db::RepositoryError;
use crate::models::{Declaration, PeriodAction, PeriodStatus};

/// Errors surfaced by the period lifecycle and filing operations.
///
/// Every variant except [`MtdError::RepairNeeded`] is a local, recoverable
/// condition that should be shown to the user.
#[derive(Debug, Error, PartialEq)]
pub enum MtdError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cannot {action} period {period_id} while it is {from}")]
    InvalidTransition {
        period_id: i64,
        from: PeriodStatus,
        action: PeriodAction,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("no authenticated owner")]
    NotAuthenticated,

    #[error("missing declarations: {}", join_declarations(.0))]
    MissingDeclaration(Vec<Declaration>),

    /// Persisted state no longer matches the amendment audit trail.
    #[error("manual repair needed: {0}")]
    RepairNeeded(String),

    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

fn join_declarations(declarations: &[Declaration]) -> String {
    declarations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<RepositoryError> for MtdError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::PartialWrite(detail) => MtdError::RepairNeeded(detail),
            other => MtdError::Repository(other),
        }
    }
}
