//! Error taxonomy shared by every settlement component.
//!
//! Each variant carries the offending values so callers can render a precise
//! message without re-querying anything.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ChargeTarget, ChargeTargetKind, PayerKind, SnapshotStatus};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettlementError {
    #[error("ownership shares of unit {unit_id} sum to {total}, expected 1")]
    InvalidPartition { unit_id: Uuid, total: Decimal },

    #[error("invalid share {numerator}/{denominator} for owner {owner_id}")]
    InvalidShare {
        owner_id: Uuid,
        numerator: u32,
        denominator: u32,
    },

    #[error("owner {owner_id} appears more than once in the partition")]
    DuplicateOwner { owner_id: Uuid },

    #[error(
        "partition of unit {unit_id} cannot start on {effective_from}: latest partition starts on {latest}"
    )]
    RetroactivePartition {
        unit_id: Uuid,
        effective_from: NaiveDate,
        latest: NaiveDate,
    },

    #[error("no active ownership partition for unit {unit_id} on {date}")]
    NoActivePartition { unit_id: Uuid, date: NaiveDate },

    #[error("invalid date range: {end} is before {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error(
        "rule overlaps franchise {existing_rule_id} ({existing_start} to {existing_end}) on lease {lease_id}"
    )]
    OverlappingRule {
        lease_id: Uuid,
        existing_rule_id: Uuid,
        existing_start: NaiveDate,
        existing_end: NaiveDate,
    },

    #[error("discount {discount_pct}% is outside 0..=100")]
    InvalidDiscount { discount_pct: Decimal },

    #[error("invalid amount {amount}")]
    InvalidAmount { amount: Decimal },

    #[error("charge target of kind {kind} requires an identifier")]
    MissingTarget { kind: ChargeTargetKind },

    #[error("cannot resolve a single {payer_kind} payer for {target:?} ({candidates} candidates)")]
    AmbiguousPayer {
        target: ChargeTarget,
        payer_kind: PayerKind,
        candidates: usize,
    },

    #[error("{payer_kind} {payer_id} is not a payer {target:?} leads to")]
    PayerMismatch {
        target: ChargeTarget,
        payer_kind: PayerKind,
        payer_id: Uuid,
    },

    #[error("payment obligation {obligation_id} is already validated")]
    AlreadyValidated { obligation_id: Uuid },

    #[error("payment obligation {obligation_id} is cancelled")]
    ObligationCancelled { obligation_id: Uuid },

    #[error("lease {lease_id} already has an obligation for {month:02}/{year}")]
    DuplicateObligation { lease_id: Uuid, month: u32, year: i32 },

    #[error("no active mandate for owner {owner_id} on {date}")]
    NoActiveMandate { owner_id: Uuid, date: NaiveDate },

    #[error("charge {charge_id} is locked by liquidation snapshot {snapshot_id}")]
    ChargeLocked { charge_id: Uuid, snapshot_id: Uuid },

    #[error("owner {owner_id} already has snapshot {snapshot_id} for {month:02}/{year}")]
    SnapshotExists {
        owner_id: Uuid,
        month: u32,
        year: i32,
        snapshot_id: Uuid,
    },

    #[error("snapshot {snapshot_id} is {status} and cannot be recomputed")]
    SnapshotFrozen {
        snapshot_id: Uuid,
        status: SnapshotStatus,
    },

    #[error("snapshot {snapshot_id} cannot move from {from} to {to}")]
    InvalidTransition {
        snapshot_id: Uuid,
        from: SnapshotStatus,
        to: SnapshotStatus,
    },

    #[error("invalid period {month}/{year}")]
    InvalidPeriod { month: u32, year: i32 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("storage error: {0}")]
    Storage(String),
}

impl SettlementError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Infrastructure failure rather than a rejected request.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;
