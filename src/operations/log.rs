use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{AnyLite, Entity};

// ============================================================================
// Operation Log - audit trail of executed operations
// ============================================================================
//
// One row per successful operation, written in the same transaction as the
// entity it describes, so a log entry exists iff the transition committed.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OperationLog {
    pub id: Option<Uuid>,
    pub operation: String,
    pub target: AnyLite,
    pub origin_state: String,
    pub end_state: String,
    pub user: Option<AnyLite>,
    pub correlation_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Entity for OperationLog {
    const TYPE_NAME: &'static str = "OperationLog";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        format!("{} on {}", self.operation, self.target)
    }
}
