use patrank_core::{Binding, BuildError, ValidationError};
use patrank_store::ExecError;
use thiserror::Error;

use crate::SearchState;

/// The single classified failure of a search cycle.
#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("invalid search conditions: {0}")]
    Validation(#[from] ValidationError),

    /// The builder produced an inconsistent plan. Always a defect.
    #[error("query construction failed: {0}")]
    Build(BuildError),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("query rejected by backend: {message}")]
    QuerySyntax {
        message: String,
        query: String,
        bindings: Vec<Binding>,
    },

    #[error("corpus temporarily unavailable: {0}")]
    Transient(String),

    #[error("corpus returned unexpected data: {0}")]
    Schema(String),

    #[error("search was superseded by a newer request")]
    Superseded,
}

impl SearchError {
    /// True only when retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// State the cycle was in when it failed.
    pub fn stage(&self) -> Option<SearchState> {
        match self {
            Self::Validation(_) => Some(SearchState::Validating),
            Self::Build(_) => Some(SearchState::BuildingQuery),
            Self::Authentication(_)
            | Self::QuerySyntax { .. }
            | Self::Transient(_)
            | Self::Schema(_) => Some(SearchState::Executing),
            Self::Superseded => None,
        }
    }
}

impl From<BuildError> for SearchError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Validation(v) => Self::Validation(v),
            other => Self::Build(other),
        }
    }
}

impl From<ExecError> for SearchError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Authentication(m) => Self::Authentication(m),
            ExecError::QuerySyntax {
                message,
                query,
                bindings,
            } => Self::QuerySyntax {
                message,
                query,
                bindings,
            },
            ExecError::Transient(m) => Self::Transient(m),
            ExecError::Schema(m) => Self::Schema(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_recoverable() {
        assert!(SearchError::from(ExecError::Transient("503".into())).is_recoverable());
        assert!(!SearchError::from(ExecError::Authentication("401".into())).is_recoverable());
        assert!(!SearchError::from(ExecError::Schema("bad".into())).is_recoverable());
        assert!(!SearchError::Validation(ValidationError::EmptyConditions).is_recoverable());
        assert!(!SearchError::Superseded.is_recoverable());
    }

    #[test]
    fn build_validation_is_flattened() {
        let err = SearchError::from(BuildError::Validation(ValidationError::EmptyConditions));
        assert!(matches!(err, SearchError::Validation(ValidationError::EmptyConditions)));
        assert_eq!(err.stage(), Some(SearchState::Validating));

        let err = SearchError::from(BuildError::Inconsistent("orphan".into()));
        assert!(matches!(err, SearchError::Build(_)));
    }

    #[test]
    fn execution_errors_report_executing_stage() {
        let err = SearchError::from(ExecError::QuerySyntax {
            message: "bad".into(),
            query: "SELECT".into(),
            bindings: vec![],
        });
        assert_eq!(err.stage(), Some(SearchState::Executing));
        assert!(err.to_string().contains("bad"));
    }
}
