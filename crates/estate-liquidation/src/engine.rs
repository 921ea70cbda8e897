use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use estate_billing::{ChargeAllocator, PaymentScheduler};
use estate_core::{
    ChargeLine, Clock, Directory, EventStore, LiquidationBreakdown, LiquidationSnapshot,
    OwnershipShare, PayerKind, PersistMode, RentLine, SettlementError, SettlementEvent,
    SettlementEventKind, SettlementPolicy, SettlementResult, SnapshotKey, SnapshotStatus,
    SnapshotStore, period,
};
use estate_ownership::ShareLedger;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::draft::{DraftTotals, fee_line, portion};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquidationReview {
    pub frozen: Option<LiquidationSnapshot>,
    pub draft: LiquidationSnapshot,
}

impl LiquidationReview {
    pub fn has_drifted(&self) -> bool {
        self.frozen.as_ref().is_some_and(|frozen| {
            frozen.total_rent_base != self.draft.total_rent_base
                || frozen.total_charges != self.draft.total_charges
                || frozen.total_fees != self.draft.total_fees
                || frozen.net_amount != self.draft.net_amount
        })
    }
}

/// Computes and persists owner liquidations.
#[derive(Clone)]
pub struct LiquidationEngine {
    directory: Arc<dyn Directory>,
    shares: ShareLedger,
    payments: PaymentScheduler,
    charges: ChargeAllocator,
    snapshots: Arc<dyn SnapshotStore>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    policy: SettlementPolicy,
}

impl LiquidationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<dyn Directory>,
        shares: ShareLedger,
        payments: PaymentScheduler,
        charges: ChargeAllocator,
        snapshots: Arc<dyn SnapshotStore>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            directory,
            shares,
            payments,
            charges,
            snapshots,
            events,
            clock,
            policy,
        }
    }

    /// Settlement of `owner_id` for the month, computed from validated
    /// payments and charges. Nothing is written.
    pub async fn compute_draft(
        &self,
        owner_id: Uuid,
        month: u32,
        year: i32,
    ) -> SettlementResult<LiquidationSnapshot> {
        let reference = period::clamped_day(month, year, self.policy.reference_day)?;
        let mandates = self.directory.get_mandates(owner_id, reference).await?;
        let Some(latest) = mandates.first().map(|mandate| mandate.id) else {
            return Err(SettlementError::NoActiveMandate {
                owner_id,
                date: reference,
            });
        };

        let mut breakdown = LiquidationBreakdown::default();
        let mut settled_units = HashSet::new();
        for mandate in &mandates {
            let first_line = breakdown.rent_lines.len();
            for &unit_id in &mandate.unit_ids {
                if !settled_units.insert(unit_id) {
                    debug!("unit {unit_id} already settled under another mandate of {owner_id}");
                    continue;
                }
                self.settle_unit(&mut breakdown, owner_id, unit_id, reference, month, year)
                    .await?;
            }
            let rent_base = breakdown.rent_lines[first_line..]
                .iter()
                .map(|line| line.owner_portion)
                .sum();
            breakdown
                .fee_lines
                .push(fee_line(mandate.id, mandate.fee_rate_pct, rent_base));
        }

        for charge in self
            .charges
            .list_for_period(PayerKind::Owner, Some(owner_id), month, year)
            .await?
        {
            breakdown.charge_lines.push(ChargeLine {
                charge_id: charge.id,
                unit_id: None,
                amount: charge.amount,
                share_pct: Decimal::ONE_HUNDRED,
                owner_portion: charge.amount,
            });
        }

        let totals = DraftTotals::settle(&breakdown, &self.policy);
        debug!(
            "owner {owner_id} {month:02}/{year}: {} mandate(s), {} rent line(s), {} charge line(s), net {}",
            breakdown.fee_lines.len(),
            breakdown.rent_lines.len(),
            breakdown.charge_lines.len(),
            totals.net_amount
        );

        Ok(LiquidationSnapshot {
            id: Uuid::new_v4(),
            owner_id,
            mandate_id: Some(latest),
            month,
            year,
            total_rent_base: totals.total_rent_base,
            total_charges: totals.total_charges,
            total_fees: totals.total_fees,
            net_amount: totals.net_amount,
            status: SnapshotStatus::Draft,
            breakdown,
            created_by: None,
            created_at: self.clock.now(),
        })
    }

    /// Writes a computed draft, either as a saved draft or straight to
    /// validated. A second frozen snapshot for the same owner and month is
    /// refused with `SnapshotExists`.
    pub async fn persist(
        &self,
        draft: LiquidationSnapshot,
        mode: PersistMode,
        created_by: Option<String>,
    ) -> SettlementResult<LiquidationSnapshot> {
        if draft.status.is_frozen() {
            return Err(SettlementError::SnapshotFrozen {
                snapshot_id: draft.id,
                status: draft.status,
            });
        }
        let key = draft.key();
        let stored = self
            .snapshots
            .insert_snapshot(LiquidationSnapshot {
                status: mode.status(),
                created_by,
                created_at: self.clock.now(),
                ..draft
            })
            .await
            .inspect_err(|err| {
                warn!(
                    "liquidation of owner {} for {:02}/{} not saved: {err}",
                    key.owner_id, key.month, key.year
                )
            })?;

        self.record_saved(&stored).await;
        info!(
            "liquidation {} saved as {} for owner {} {:02}/{}: net {}",
            stored.id, stored.status, stored.owner_id, stored.month, stored.year, stored.net_amount
        );
        Ok(stored)
    }

    pub async fn generate(
        &self,
        owner_id: Uuid,
        month: u32,
        year: i32,
        mode: PersistMode,
        created_by: Option<String>,
    ) -> SettlementResult<LiquidationSnapshot> {
        let draft = self.compute_draft(owner_id, month, year).await?;
        self.persist(draft, mode, created_by).await
    }

    /// The frozen snapshot of the month, if any, and a fresh draft to compare
    /// it with. The frozen one is returned as stored.
    pub async fn review(
        &self,
        owner_id: Uuid,
        month: u32,
        year: i32,
    ) -> SettlementResult<LiquidationReview> {
        let frozen = self
            .snapshots
            .snapshots_for_key(SnapshotKey {
                owner_id,
                month,
                year,
            })
            .await?
            .into_iter()
            .find(|snapshot| snapshot.status.is_frozen());
        let draft = self.compute_draft(owner_id, month, year).await?;
        Ok(LiquidationReview { frozen, draft })
    }

    pub async fn validate(&self, snapshot_id: Uuid) -> SettlementResult<LiquidationSnapshot> {
        self.transition(snapshot_id, SnapshotStatus::Validated)
            .await
    }

    pub async fn mark_paid(&self, snapshot_id: Uuid) -> SettlementResult<LiquidationSnapshot> {
        self.transition(snapshot_id, SnapshotStatus::Paid).await
    }

    pub async fn refresh_draft(&self, snapshot_id: Uuid) -> SettlementResult<LiquidationSnapshot> {
        let stored = self.snapshots.get_snapshot(snapshot_id).await?;
        if stored.status.is_frozen() {
            return Err(SettlementError::SnapshotFrozen {
                snapshot_id,
                status: stored.status,
            });
        }
        let fresh = self
            .compute_draft(stored.owner_id, stored.month, stored.year)
            .await?;
        let refreshed = self
            .snapshots
            .replace_draft(LiquidationSnapshot {
                id: stored.id,
                created_by: stored.created_by,
                created_at: stored.created_at,
                ..fresh
            })
            .await?;

        self.record_saved(&refreshed).await;
        info!("draft liquidation {snapshot_id} refreshed: net {}", refreshed.net_amount);
        Ok(refreshed)
    }

    pub async fn get(&self, snapshot_id: Uuid) -> SettlementResult<LiquidationSnapshot> {
        self.snapshots.get_snapshot(snapshot_id).await
    }

    pub async fn list_for_owner(&self, owner_id: Uuid) -> SettlementResult<Vec<LiquidationSnapshot>> {
        self.snapshots.snapshots_for_owner(owner_id).await
    }

    /// Rent and jointly-owed charges of one unit, scaled by the owner's share
    /// on the reference date. A unit the owner holds nothing of adds nothing.
    async fn settle_unit(
        &self,
        breakdown: &mut LiquidationBreakdown,
        owner_id: Uuid,
        unit_id: Uuid,
        reference: NaiveDate,
        month: u32,
        year: i32,
    ) -> SettlementResult<()> {
        let share_pct: Decimal = self
            .shares
            .shares_at(unit_id, reference)
            .await?
            .iter()
            .filter(|share| share.owner_id == owner_id)
            .map(OwnershipShare::percentage)
            .sum();
        if share_pct.is_zero() {
            debug!("owner {owner_id} holds no share of unit {unit_id} on {reference}");
            return Ok(());
        }

        for lease in self.directory.get_leases_for_unit(unit_id).await? {
            for obligation in self
                .payments
                .validated_for_period(lease.id, month, year)
                .await?
            {
                breakdown.rent_lines.push(RentLine {
                    obligation_id: obligation.id,
                    lease_id: lease.id,
                    unit_id,
                    amount_paid: obligation.amount_paid,
                    share_pct,
                    owner_portion: portion(obligation.amount_paid, share_pct),
                });
            }
        }

        for charge in self
            .charges
            .list_apportioned_for_unit(unit_id, month, year)
            .await?
        {
            breakdown.charge_lines.push(ChargeLine {
                charge_id: charge.id,
                unit_id: Some(unit_id),
                amount: charge.amount,
                share_pct,
                owner_portion: portion(charge.amount, share_pct),
            });
        }
        Ok(())
    }

    async fn transition(
        &self,
        snapshot_id: Uuid,
        to: SnapshotStatus,
    ) -> SettlementResult<LiquidationSnapshot> {
        let moved = self
            .snapshots
            .transition(snapshot_id, to)
            .await
            .inspect_err(|err| warn!("liquidation {snapshot_id} not moved to {to}: {err}"))?;
        self.events
            .record(SettlementEvent::new(
                moved.id,
                SettlementEventKind::SnapshotTransitioned,
                self.clock.now(),
                json!({ "status": moved.status }),
            ))
            .await;
        info!("liquidation {snapshot_id} is now {to}");
        Ok(moved)
    }

    async fn record_saved(&self, snapshot: &LiquidationSnapshot) {
        self.events
            .record(SettlementEvent::new(
                snapshot.id,
                SettlementEventKind::SnapshotPersisted,
                self.clock.now(),
                json!({
                    "owner_id": snapshot.owner_id,
                    "month": snapshot.month,
                    "year": snapshot.year,
                    "status": snapshot.status,
                    "net_amount": snapshot.net_amount,
                }),
            ))
            .await;
    }
}
