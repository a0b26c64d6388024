use uuid::Uuid;

use crate::operations::OperationError;
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Process Engine Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process {0} not found")]
    NotFound(Uuid),

    #[error("Process {0} is already running")]
    AlreadyRunning(Uuid),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Infrastructure(#[from] StoreError),
}

impl IsTransient for ProcessError {
    fn is_transient(&self) -> bool {
        match self {
            ProcessError::Operation(e) => e.is_transient(),
            ProcessError::Infrastructure(e) => e.is_transient(),
            _ => false,
        }
    }
}
