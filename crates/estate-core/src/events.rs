use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SettlementEventKind {
    OwnershipReassigned,
    FranchiseRuleSaved,
    FranchiseRuleDeleted,
    ChargeRecorded,
    ChargeDeleted,
    ObligationsGenerated,
    PaymentValidated,
    ObligationCancelled,
    ObligationMarkedLate,
    SnapshotPersisted,
    SnapshotTransitioned,
}

/// A record of what changed. Carries no actor: callers audit who did it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub kind: SettlementEventKind,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl SettlementEvent {
    pub fn new(
        aggregate_id: Uuid,
        kind: SettlementEventKind,
        occurred_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id,
            kind,
            occurred_at,
            payload,
        }
    }
}
