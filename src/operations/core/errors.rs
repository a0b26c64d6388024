use uuid::Uuid;

use super::operation::OperationKey;
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Operation Errors
// ============================================================================
//
// Line-local errors (the caller asked for something the entity does not
// allow) are separated from fatal ones (broken registration, store down).
// The process engine relies on `is_line_local` to decide whether a failing
// line aborts the run.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Operation {operation} is not registered for {entity_type}")]
    NotRegistered {
        entity_type: &'static str,
        operation: OperationKey,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: &'static str, id: Uuid },

    #[error(transparent)]
    Domain(Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OperationError {
    pub fn domain(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        OperationError::Domain(Box::new(error))
    }

    /// Errors scoped to the entity being operated on. Everything else is
    /// fatal to a batch run.
    pub fn is_line_local(&self) -> bool {
        match self {
            OperationError::IllegalTransition(_)
            | OperationError::PreconditionFailed(_)
            | OperationError::InvalidArguments(_)
            | OperationError::NotFound { .. }
            | OperationError::Domain(_) => true,
            OperationError::NotRegistered { .. }
            | OperationError::Configuration(_)
            | OperationError::Store(_) => false,
        }
    }
}

impl IsTransient for OperationError {
    fn is_transient(&self) -> bool {
        match self {
            OperationError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}
