//! Collaborator seams: the directory of reference data, the clock, and the
//! persistence traits.
//!
//! Each persistence method that combines a check with a write is atomic in the
//! implementation: the in-memory store holds one write lock for the whole call
//! and the Postgres store runs it in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::SettlementResult;
use crate::events::SettlementEvent;
use crate::models::{
    ChargeEntry, Complaint, FranchiseRule, Intervention, Lease, LiquidationSnapshot, Mandate,
    ObligationStatus, OwnershipShare, PayerKind, PaymentObligation, PaymentReceipt, SnapshotKey,
    SnapshotStatus, Unit,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_unit(&self, id: Uuid) -> SettlementResult<Unit>;
    async fn get_lease(&self, id: Uuid) -> SettlementResult<Lease>;
    async fn get_intervention(&self, id: Uuid) -> SettlementResult<Intervention>;
    async fn get_complaint(&self, id: Uuid) -> SettlementResult<Complaint>;
    /// The most recently started mandate of the owner active on `date`.
    async fn get_mandate(&self, owner_id: Uuid, date: NaiveDate)
    -> SettlementResult<Option<Mandate>>;
    /// Every mandate of the owner active on `date`, most recently started first.
    async fn get_mandates(&self, owner_id: Uuid, date: NaiveDate)
    -> SettlementResult<Vec<Mandate>>;
    async fn get_active_leases_for_unit(
        &self,
        unit_id: Uuid,
        date: NaiveDate,
    ) -> SettlementResult<Vec<Lease>>;
    async fn get_leases_for_unit(&self, unit_id: Uuid) -> SettlementResult<Vec<Lease>>;
    async fn owners_with_mandates(&self, date: NaiveDate) -> SettlementResult<Vec<Uuid>>;
}

#[async_trait]
pub trait ShareStore: Send + Sync {
    /// Closes the unit's open shares the day before `effective_from` and
    /// inserts `shares`. Fails with `RetroactivePartition` when a recorded
    /// partition already starts on or after `effective_from`.
    async fn replace_partition(
        &self,
        unit_id: Uuid,
        effective_from: NaiveDate,
        shares: Vec<OwnershipShare>,
    ) -> SettlementResult<Vec<OwnershipShare>>;

    async fn shares_for_unit(&self, unit_id: Uuid) -> SettlementResult<Vec<OwnershipShare>>;
}

#[async_trait]
pub trait FranchiseStore: Send + Sync {
    /// Fails with `OverlappingRule` when the lease already has a rule whose
    /// range intersects the new one.
    async fn insert_rule(&self, rule: FranchiseRule) -> SettlementResult<FranchiseRule>;
    /// Same overlap test as `insert_rule`, ignoring the rule being replaced.
    async fn update_rule(&self, rule: FranchiseRule) -> SettlementResult<FranchiseRule>;
    async fn delete_rule(&self, id: Uuid) -> SettlementResult<FranchiseRule>;
    async fn get_rule(&self, id: Uuid) -> SettlementResult<FranchiseRule>;
    async fn rules_for_lease(&self, lease_id: Uuid) -> SettlementResult<Vec<FranchiseRule>>;
}

#[async_trait]
pub trait ChargeStore: Send + Sync {
    async fn insert_charge(&self, charge: ChargeEntry) -> SettlementResult<ChargeEntry>;
    async fn get_charge(&self, id: Uuid) -> SettlementResult<ChargeEntry>;
    /// Fails with `ChargeLocked` when a non-draft snapshot references the charge.
    async fn delete_charge(&self, id: Uuid) -> SettlementResult<ChargeEntry>;
    async fn charges_for_payer(
        &self,
        payer_kind: PayerKind,
        payer_id: Option<Uuid>,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> SettlementResult<Vec<ChargeEntry>>;
    async fn apportioned_charges(
        &self,
        unit_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> SettlementResult<Vec<ChargeEntry>>;
}

#[async_trait]
pub trait ObligationStore: Send + Sync {
    /// Fails with `DuplicateObligation` if any row of the batch collides with a
    /// non-cancelled obligation for the same lease and month; nothing is written.
    async fn insert_obligations(
        &self,
        obligations: Vec<PaymentObligation>,
    ) -> SettlementResult<Vec<PaymentObligation>>;
    async fn get_obligation(&self, id: Uuid) -> SettlementResult<PaymentObligation>;
    async fn validate_payment(
        &self,
        id: Uuid,
        receipt: PaymentReceipt,
    ) -> SettlementResult<PaymentObligation>;
    async fn cancel_obligation(&self, id: Uuid) -> SettlementResult<PaymentObligation>;
    /// Pending rows due strictly before `as_of` -> late. Returns the moved rows.
    async fn mark_late(&self, as_of: NaiveDate) -> SettlementResult<Vec<PaymentObligation>>;
    async fn obligations_for_lease(&self, lease_id: Uuid)
    -> SettlementResult<Vec<PaymentObligation>>;
    async fn obligations_for_period(
        &self,
        lease_id: Uuid,
        month: u32,
        year: i32,
        status: Option<ObligationStatus>,
    ) -> SettlementResult<Vec<PaymentObligation>>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fails with `SnapshotExists` when inserting a non-draft snapshot for a
    /// key that already has one.
    async fn insert_snapshot(
        &self,
        snapshot: LiquidationSnapshot,
    ) -> SettlementResult<LiquidationSnapshot>;
    async fn get_snapshot(&self, id: Uuid) -> SettlementResult<LiquidationSnapshot>;
    async fn snapshots_for_key(&self, key: SnapshotKey)
    -> SettlementResult<Vec<LiquidationSnapshot>>;
    async fn snapshots_for_owner(&self, owner_id: Uuid)
    -> SettlementResult<Vec<LiquidationSnapshot>>;
    /// Compare-and-set on status. Moving into a frozen status is refused with
    /// `SnapshotExists` if another frozen snapshot holds the key.
    async fn transition(
        &self,
        id: Uuid,
        to: SnapshotStatus,
    ) -> SettlementResult<LiquidationSnapshot>;
    /// Overwrites a stored draft's figures. Frozen snapshots are refused with
    /// `SnapshotFrozen`.
    async fn replace_draft(
        &self,
        snapshot: LiquidationSnapshot,
    ) -> SettlementResult<LiquidationSnapshot>;
}

#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub sequence: i64,
    pub stream_id: Uuid,
    pub event: SettlementEvent,
    pub stored_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: SettlementEvent) -> SettlementResult<EventEnvelope>;
    async fn stream(&self, stream_id: Uuid) -> SettlementResult<Vec<EventEnvelope>>;

    /// Appends an event describing a write that has already been committed.
    /// A failed append is logged and dropped; the write stands.
    async fn record(&self, event: SettlementEvent) {
        let (kind, aggregate_id) = (event.kind, event.aggregate_id);
        if let Err(err) = self.append(event).await {
            warn!("{kind:?} event for {aggregate_id} not recorded: {err}");
        }
    }
}
