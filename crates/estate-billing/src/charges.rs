use std::sync::Arc;

use chrono::NaiveDate;
use estate_core::{
    ChargeEntry, ChargePayer, ChargeStore, ChargeTarget, Clock, Directory, EventStore, NewCharge,
    PayerKind, SettlementError, SettlementEvent, SettlementEventKind, SettlementResult, period,
};
use estate_ownership::ShareLedger;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ChargeAllocator {
    store: Arc<dyn ChargeStore>,
    directory: Arc<dyn Directory>,
    shares: ShareLedger,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl ChargeAllocator {
    pub fn new(
        store: Arc<dyn ChargeStore>,
        directory: Arc<dyn Directory>,
        shares: ShareLedger,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            shares,
            events,
            clock,
        }
    }

    /// Records a charge with a single payer. A tenant or owner payer without
    /// an identifier is derived from the target; when the target does not
    /// lead to exactly one candidate the charge is refused.
    pub async fn record(&self, request: NewCharge) -> SettlementResult<ChargeEntry> {
        if request.amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount {
                amount: request.amount,
            });
        }
        let target = ChargeTarget::from_parts(request.target_kind, request.target_id)?;
        let payer = self
            .resolve_payer(target, request.payer_kind, request.payer_id)
            .await
            .inspect_err(|err| warn!("charge '{}' not recorded: {err}", request.label))?;

        self.store_charge(target, payer, request.amount, request.label, request.notes)
            .await
    }

    /// Records a charge owed jointly by every owner of the target's unit. Each
    /// owner's liquidation carries their share of it.
    pub async fn apportion(
        &self,
        target: ChargeTarget,
        amount: Decimal,
        label: impl Into<String>,
        notes: Option<String>,
    ) -> SettlementResult<ChargeEntry> {
        if amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount { amount });
        }
        let unit_id = self
            .unit_of(target)
            .await?
            .ok_or(SettlementError::AmbiguousPayer {
                target,
                payer_kind: PayerKind::Owner,
                candidates: 0,
            })?;
        self.shares.shares_at(unit_id, self.clock.today()).await?;

        self.store_charge(
            target,
            ChargePayer::OwnersOfUnit(unit_id),
            amount,
            label.into(),
            notes,
        )
        .await
    }

    pub async fn list_for_period(
        &self,
        payer_kind: PayerKind,
        payer_id: Option<Uuid>,
        month: u32,
        year: i32,
    ) -> SettlementResult<Vec<ChargeEntry>> {
        let (from, until) = period::month_window(month, year)?;
        self.store
            .charges_for_payer(payer_kind, payer_id, from, until)
            .await
    }

    pub async fn list_apportioned_for_unit(
        &self,
        unit_id: Uuid,
        month: u32,
        year: i32,
    ) -> SettlementResult<Vec<ChargeEntry>> {
        let (from, until) = period::month_window(month, year)?;
        self.store.apportioned_charges(unit_id, from, until).await
    }

    pub async fn get(&self, charge_id: Uuid) -> SettlementResult<ChargeEntry> {
        self.store.get_charge(charge_id).await
    }

    /// Refused with `ChargeLocked` once a validated or paid liquidation
    /// references the charge.
    pub async fn delete(&self, charge_id: Uuid) -> SettlementResult<ChargeEntry> {
        let removed = self
            .store
            .delete_charge(charge_id)
            .await
            .inspect_err(|err| warn!("charge {charge_id} not deleted: {err}"))?;
        self.events
            .record(SettlementEvent::new(
                charge_id,
                SettlementEventKind::ChargeDeleted,
                self.clock.now(),
                json!({ "amount": removed.amount, "label": removed.label }),
            ))
            .await;
        info!("charge {charge_id} deleted");
        Ok(removed)
    }

    async fn store_charge(
        &self,
        target: ChargeTarget,
        payer: ChargePayer,
        amount: Decimal,
        label: String,
        notes: Option<String>,
    ) -> SettlementResult<ChargeEntry> {
        let entry = self
            .store
            .insert_charge(ChargeEntry {
                id: Uuid::new_v4(),
                target,
                payer,
                amount,
                label,
                notes,
                created_at: self.clock.now(),
            })
            .await?;

        self.events
            .record(SettlementEvent::new(
                entry.id,
                SettlementEventKind::ChargeRecorded,
                entry.created_at,
                json!({
                    "target": entry.target,
                    "payer": entry.payer,
                    "amount": entry.amount,
                }),
            ))
            .await;
        info!(
            "charge {} of {} recorded against {:?}, payable by {:?}",
            entry.id, entry.amount, entry.target, entry.payer
        );
        Ok(entry)
    }

    /// An explicit payer must be one the target leads to, whenever the target
    /// leads to any; a missing one must be the only candidate.
    async fn resolve_payer(
        &self,
        target: ChargeTarget,
        payer_kind: PayerKind,
        payer_id: Option<Uuid>,
    ) -> SettlementResult<ChargePayer> {
        let today = self.clock.today();
        match payer_kind {
            PayerKind::Company => Ok(ChargePayer::Company),
            PayerKind::Tenant => {
                let candidates = self.tenant_candidates(target, today).await?;
                pick_payer(target, payer_kind, payer_id, &candidates).map(ChargePayer::Tenant)
            }
            PayerKind::Owner => {
                let candidates = match self.owner_candidates(target, today).await {
                    Err(SettlementError::NoActivePartition { .. }) if payer_id.is_some() => {
                        Vec::new()
                    }
                    other => other?,
                };
                pick_payer(target, payer_kind, payer_id, &candidates).map(ChargePayer::Owner)
            }
        }
    }

    async fn tenant_candidates(
        &self,
        target: ChargeTarget,
        date: NaiveDate,
    ) -> SettlementResult<Vec<Uuid>> {
        Ok(match target {
            ChargeTarget::Tenant(tenant_id) => vec![tenant_id],
            ChargeTarget::Lease(lease_id) => vec![self.directory.get_lease(lease_id).await?.tenant_id],
            ChargeTarget::Complaint(complaint_id) => {
                let complaint = self.directory.get_complaint(complaint_id).await?;
                vec![self.directory.get_lease(complaint.lease_id).await?.tenant_id]
            }
            ChargeTarget::Unit(_) | ChargeTarget::Intervention(_) => match self.unit_of(target).await? {
                Some(unit_id) => self
                    .directory
                    .get_active_leases_for_unit(unit_id, date)
                    .await?
                    .iter()
                    .map(|lease| lease.tenant_id)
                    .collect(),
                None => Vec::new(),
            },
            ChargeTarget::Owner(_) | ChargeTarget::FreeStanding => Vec::new(),
        })
    }

    async fn owner_candidates(
        &self,
        target: ChargeTarget,
        date: NaiveDate,
    ) -> SettlementResult<Vec<Uuid>> {
        if let ChargeTarget::Owner(owner_id) = target {
            return Ok(vec![owner_id]);
        }
        Ok(match self.unit_of(target).await? {
            Some(unit_id) => self
                .shares
                .shares_at(unit_id, date)
                .await?
                .iter()
                .map(|share| share.owner_id)
                .collect(),
            None => Vec::new(),
        })
    }

    async fn unit_of(&self, target: ChargeTarget) -> SettlementResult<Option<Uuid>> {
        Ok(match target {
            ChargeTarget::Unit(unit_id) => Some(self.directory.get_unit(unit_id).await?.id),
            ChargeTarget::Lease(lease_id) => Some(self.directory.get_lease(lease_id).await?.unit_id),
            ChargeTarget::Intervention(intervention_id) => Some(
                self.directory
                    .get_intervention(intervention_id)
                    .await?
                    .unit_id,
            ),
            ChargeTarget::Complaint(complaint_id) => {
                let complaint = self.directory.get_complaint(complaint_id).await?;
                Some(self.directory.get_lease(complaint.lease_id).await?.unit_id)
            }
            ChargeTarget::Tenant(_) | ChargeTarget::Owner(_) | ChargeTarget::FreeStanding => None,
        })
    }
}

fn pick_payer(
    target: ChargeTarget,
    payer_kind: PayerKind,
    payer_id: Option<Uuid>,
    candidates: &[Uuid],
) -> SettlementResult<Uuid> {
    match (payer_id, candidates) {
        (Some(payer_id), []) => Ok(payer_id),
        (Some(payer_id), _) if candidates.contains(&payer_id) => Ok(payer_id),
        (Some(payer_id), _) => Err(SettlementError::PayerMismatch {
            target,
            payer_kind,
            payer_id,
        }),
        (None, [only]) => Ok(*only),
        (None, others) => Err(SettlementError::AmbiguousPayer {
            target,
            payer_kind,
            candidates: others.len(),
        }),
    }
}
