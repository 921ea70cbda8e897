use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use estate_core::{
    ChargeEntry, ChargePayer, ChargeStore, EventEnvelope, EventStore, FranchiseRule,
    FranchiseStore, LiquidationSnapshot, ObligationStatus, ObligationStore, OwnershipShare,
    PayerKind, PaymentObligation, PaymentReceipt, SettlementError, SettlementEvent,
    SettlementResult, ShareStore, SnapshotKey, SnapshotStatus, SnapshotStore,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    shares: Vec<OwnershipShare>,
    rules: HashMap<Uuid, FranchiseRule>,
    charges: HashMap<Uuid, ChargeEntry>,
    obligations: HashMap<Uuid, PaymentObligation>,
    snapshots: HashMap<Uuid, LiquidationSnapshot>,
}

impl Tables {
    fn overlapping_rule(&self, candidate: &FranchiseRule) -> Option<&FranchiseRule> {
        self.rules.values().find(|existing| {
            existing.id != candidate.id
                && existing.lease_id == candidate.lease_id
                && existing.overlaps(candidate.start_date, candidate.end_date)
        })
    }

    fn frozen_for_key(&self, key: SnapshotKey, except: Option<Uuid>) -> Option<&LiquidationSnapshot> {
        self.snapshots.values().find(|snapshot| {
            Some(snapshot.id) != except && snapshot.status.is_frozen() && snapshot.key() == key
        })
    }

    fn locking_snapshot(&self, charge_id: Uuid) -> Option<Uuid> {
        self.snapshots
            .values()
            .find(|snapshot| {
                snapshot.status.is_frozen() && snapshot.breakdown.references_charge(charge_id)
            })
            .map(|snapshot| snapshot.id)
    }
}

/// Every store trait over one set of in-process tables.
///
/// A single write lock spans each check-then-write call, which gives the same
/// all-or-nothing behaviour the Postgres store gets from a transaction.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    streams: RwLock<HashMap<Uuid, Vec<EventEnvelope>>>,
    sequence: RwLock<i64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_charges(mut charges: Vec<ChargeEntry>) -> Vec<ChargeEntry> {
    charges.sort_by_key(|charge| (charge.created_at, charge.id));
    charges
}

fn sorted_obligations(mut obligations: Vec<PaymentObligation>) -> Vec<PaymentObligation> {
    obligations.sort_by_key(|obligation| (obligation.due_date, obligation.id));
    obligations
}

fn sorted_snapshots(mut snapshots: Vec<LiquidationSnapshot>) -> Vec<LiquidationSnapshot> {
    snapshots.sort_by_key(|snapshot| (snapshot.year, snapshot.month, snapshot.created_at));
    snapshots
}

#[async_trait]
impl ShareStore for InMemoryStore {
    async fn replace_partition(
        &self,
        unit_id: Uuid,
        effective_from: NaiveDate,
        shares: Vec<OwnershipShare>,
    ) -> SettlementResult<Vec<OwnershipShare>> {
        let mut tables = self.tables.write().await;

        let latest = tables
            .shares
            .iter()
            .filter(|share| share.unit_id == unit_id)
            .map(|share| share.effective_from)
            .max();
        if let Some(latest) = latest.filter(|latest| *latest >= effective_from) {
            return Err(SettlementError::RetroactivePartition {
                unit_id,
                effective_from,
                latest,
            });
        }

        let closed_on = effective_from
            .checked_sub_days(Days::new(1))
            .ok_or(SettlementError::InvalidRange {
                start: effective_from,
                end: effective_from,
            })?;
        for share in tables
            .shares
            .iter_mut()
            .filter(|share| share.unit_id == unit_id && share.is_open())
        {
            share.effective_to = Some(closed_on);
        }

        tables.shares.extend(shares.iter().cloned());
        Ok(shares)
    }

    async fn shares_for_unit(&self, unit_id: Uuid) -> SettlementResult<Vec<OwnershipShare>> {
        let tables = self.tables.read().await;
        let mut shares: Vec<OwnershipShare> = tables
            .shares
            .iter()
            .filter(|share| share.unit_id == unit_id)
            .cloned()
            .collect();
        shares.sort_by_key(|share| (share.effective_from, share.owner_id));
        Ok(shares)
    }
}

#[async_trait]
impl FranchiseStore for InMemoryStore {
    async fn insert_rule(&self, rule: FranchiseRule) -> SettlementResult<FranchiseRule> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.overlapping_rule(&rule) {
            return Err(SettlementError::OverlappingRule {
                lease_id: rule.lease_id,
                existing_rule_id: existing.id,
                existing_start: existing.start_date,
                existing_end: existing.end_date,
            });
        }
        tables.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, rule: FranchiseRule) -> SettlementResult<FranchiseRule> {
        let mut tables = self.tables.write().await;
        if !tables.rules.contains_key(&rule.id) {
            return Err(SettlementError::not_found("franchise rule", rule.id));
        }
        if let Some(existing) = tables.overlapping_rule(&rule) {
            return Err(SettlementError::OverlappingRule {
                lease_id: rule.lease_id,
                existing_rule_id: existing.id,
                existing_start: existing.start_date,
                existing_end: existing.end_date,
            });
        }
        tables.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete_rule(&self, id: Uuid) -> SettlementResult<FranchiseRule> {
        let mut tables = self.tables.write().await;
        tables
            .rules
            .remove(&id)
            .ok_or_else(|| SettlementError::not_found("franchise rule", id))
    }

    async fn get_rule(&self, id: Uuid) -> SettlementResult<FranchiseRule> {
        let tables = self.tables.read().await;
        tables
            .rules
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::not_found("franchise rule", id))
    }

    async fn rules_for_lease(&self, lease_id: Uuid) -> SettlementResult<Vec<FranchiseRule>> {
        let tables = self.tables.read().await;
        let mut rules: Vec<FranchiseRule> = tables
            .rules
            .values()
            .filter(|rule| rule.lease_id == lease_id)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.start_date);
        Ok(rules)
    }
}

#[async_trait]
impl ChargeStore for InMemoryStore {
    async fn insert_charge(&self, charge: ChargeEntry) -> SettlementResult<ChargeEntry> {
        let mut tables = self.tables.write().await;
        tables.charges.insert(charge.id, charge.clone());
        Ok(charge)
    }

    async fn get_charge(&self, id: Uuid) -> SettlementResult<ChargeEntry> {
        let tables = self.tables.read().await;
        tables
            .charges
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::not_found("charge", id))
    }

    async fn delete_charge(&self, id: Uuid) -> SettlementResult<ChargeEntry> {
        let mut tables = self.tables.write().await;
        if !tables.charges.contains_key(&id) {
            return Err(SettlementError::not_found("charge", id));
        }
        if let Some(snapshot_id) = tables.locking_snapshot(id) {
            return Err(SettlementError::ChargeLocked {
                charge_id: id,
                snapshot_id,
            });
        }
        tables
            .charges
            .remove(&id)
            .ok_or_else(|| SettlementError::not_found("charge", id))
    }

    async fn charges_for_payer(
        &self,
        payer_kind: PayerKind,
        payer_id: Option<Uuid>,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> SettlementResult<Vec<ChargeEntry>> {
        let tables = self.tables.read().await;
        let charges = tables
            .charges
            .values()
            .filter(|charge| {
                !matches!(charge.payer, ChargePayer::OwnersOfUnit(_))
                    && charge.payer.kind() == payer_kind
                    && charge.payer.payer_id() == payer_id
                    && from <= charge.created_at
                    && charge.created_at < until
            })
            .cloned()
            .collect();
        Ok(sorted_charges(charges))
    }

    async fn apportioned_charges(
        &self,
        unit_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> SettlementResult<Vec<ChargeEntry>> {
        let tables = self.tables.read().await;
        let charges = tables
            .charges
            .values()
            .filter(|charge| {
                charge.payer == ChargePayer::OwnersOfUnit(unit_id)
                    && from <= charge.created_at
                    && charge.created_at < until
            })
            .cloned()
            .collect();
        Ok(sorted_charges(charges))
    }
}

#[async_trait]
impl ObligationStore for InMemoryStore {
    async fn insert_obligations(
        &self,
        obligations: Vec<PaymentObligation>,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        let mut tables = self.tables.write().await;
        for (index, candidate) in obligations.iter().enumerate() {
            let collides = |other: &PaymentObligation| {
                other.status != ObligationStatus::Cancelled
                    && other.lease_id == candidate.lease_id
                    && other.is_for(candidate.month, candidate.year)
            };
            let in_store = tables.obligations.values().any(collides);
            let in_batch = obligations[..index].iter().any(collides);
            if candidate.status != ObligationStatus::Cancelled && (in_store || in_batch) {
                return Err(SettlementError::DuplicateObligation {
                    lease_id: candidate.lease_id,
                    month: candidate.month,
                    year: candidate.year,
                });
            }
        }
        for obligation in &obligations {
            tables.obligations.insert(obligation.id, obligation.clone());
        }
        Ok(obligations)
    }

    async fn get_obligation(&self, id: Uuid) -> SettlementResult<PaymentObligation> {
        let tables = self.tables.read().await;
        tables
            .obligations
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::not_found("payment obligation", id))
    }

    async fn validate_payment(
        &self,
        id: Uuid,
        receipt: PaymentReceipt,
    ) -> SettlementResult<PaymentObligation> {
        let mut tables = self.tables.write().await;
        let obligation = tables
            .obligations
            .get_mut(&id)
            .ok_or_else(|| SettlementError::not_found("payment obligation", id))?;
        match obligation.status {
            ObligationStatus::Validated => {
                return Err(SettlementError::AlreadyValidated { obligation_id: id });
            }
            ObligationStatus::Cancelled => {
                return Err(SettlementError::ObligationCancelled { obligation_id: id });
            }
            ObligationStatus::Pending | ObligationStatus::Late => {}
        }
        obligation.status = ObligationStatus::Validated;
        obligation.amount_paid = receipt.amount_paid;
        obligation.payment_method = Some(receipt.method);
        obligation.reference = receipt.reference;
        obligation.paid_at = Some(receipt.paid_at);
        Ok(obligation.clone())
    }

    async fn cancel_obligation(&self, id: Uuid) -> SettlementResult<PaymentObligation> {
        let mut tables = self.tables.write().await;
        let obligation = tables
            .obligations
            .get_mut(&id)
            .ok_or_else(|| SettlementError::not_found("payment obligation", id))?;
        match obligation.status {
            ObligationStatus::Validated => {
                return Err(SettlementError::AlreadyValidated { obligation_id: id });
            }
            ObligationStatus::Cancelled => {
                return Err(SettlementError::ObligationCancelled { obligation_id: id });
            }
            ObligationStatus::Pending | ObligationStatus::Late => {}
        }
        obligation.status = ObligationStatus::Cancelled;
        Ok(obligation.clone())
    }

    async fn mark_late(&self, as_of: NaiveDate) -> SettlementResult<Vec<PaymentObligation>> {
        let mut tables = self.tables.write().await;
        let mut moved = Vec::new();
        for obligation in tables.obligations.values_mut().filter(|obligation| {
            obligation.status == ObligationStatus::Pending && obligation.due_date < as_of
        }) {
            obligation.status = ObligationStatus::Late;
            moved.push(obligation.clone());
        }
        Ok(sorted_obligations(moved))
    }

    async fn obligations_for_lease(
        &self,
        lease_id: Uuid,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        let tables = self.tables.read().await;
        let obligations = tables
            .obligations
            .values()
            .filter(|obligation| obligation.lease_id == lease_id)
            .cloned()
            .collect();
        Ok(sorted_obligations(obligations))
    }

    async fn obligations_for_period(
        &self,
        lease_id: Uuid,
        month: u32,
        year: i32,
        status: Option<ObligationStatus>,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        let tables = self.tables.read().await;
        let obligations = tables
            .obligations
            .values()
            .filter(|obligation| {
                obligation.lease_id == lease_id
                    && obligation.is_for(month, year)
                    && status.is_none_or(|status| obligation.status == status)
            })
            .cloned()
            .collect();
        Ok(sorted_obligations(obligations))
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn insert_snapshot(
        &self,
        snapshot: LiquidationSnapshot,
    ) -> SettlementResult<LiquidationSnapshot> {
        let mut tables = self.tables.write().await;
        if snapshot.status.is_frozen() {
            if let Some(existing) = tables.frozen_for_key(snapshot.key(), None) {
                return Err(SettlementError::SnapshotExists {
                    owner_id: snapshot.owner_id,
                    month: snapshot.month,
                    year: snapshot.year,
                    snapshot_id: existing.id,
                });
            }
        }
        tables.snapshots.insert(snapshot.id, snapshot.clone());
        Ok(snapshot)
    }

    async fn get_snapshot(&self, id: Uuid) -> SettlementResult<LiquidationSnapshot> {
        let tables = self.tables.read().await;
        tables
            .snapshots
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::not_found("liquidation snapshot", id))
    }

    async fn snapshots_for_key(
        &self,
        key: SnapshotKey,
    ) -> SettlementResult<Vec<LiquidationSnapshot>> {
        let tables = self.tables.read().await;
        let snapshots = tables
            .snapshots
            .values()
            .filter(|snapshot| snapshot.key() == key)
            .cloned()
            .collect();
        Ok(sorted_snapshots(snapshots))
    }

    async fn snapshots_for_owner(
        &self,
        owner_id: Uuid,
    ) -> SettlementResult<Vec<LiquidationSnapshot>> {
        let tables = self.tables.read().await;
        let snapshots = tables
            .snapshots
            .values()
            .filter(|snapshot| snapshot.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(sorted_snapshots(snapshots))
    }

    async fn transition(
        &self,
        id: Uuid,
        to: SnapshotStatus,
    ) -> SettlementResult<LiquidationSnapshot> {
        let mut tables = self.tables.write().await;
        let current = tables
            .snapshots
            .get(&id)
            .ok_or_else(|| SettlementError::not_found("liquidation snapshot", id))?;
        if !current.status.can_move_to(to) {
            return Err(SettlementError::InvalidTransition {
                snapshot_id: id,
                from: current.status,
                to,
            });
        }
        let key = current.key();
        if let Some(existing) = tables.frozen_for_key(key, Some(id)) {
            return Err(SettlementError::SnapshotExists {
                owner_id: key.owner_id,
                month: key.month,
                year: key.year,
                snapshot_id: existing.id,
            });
        }
        let snapshot = tables
            .snapshots
            .get_mut(&id)
            .ok_or_else(|| SettlementError::not_found("liquidation snapshot", id))?;
        snapshot.status = to;
        Ok(snapshot.clone())
    }

    async fn replace_draft(
        &self,
        snapshot: LiquidationSnapshot,
    ) -> SettlementResult<LiquidationSnapshot> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .snapshots
            .get_mut(&snapshot.id)
            .ok_or_else(|| SettlementError::not_found("liquidation snapshot", snapshot.id))?;
        if stored.status.is_frozen() {
            return Err(SettlementError::SnapshotFrozen {
                snapshot_id: stored.id,
                status: stored.status,
            });
        }
        *stored = LiquidationSnapshot {
            status: SnapshotStatus::Draft,
            ..snapshot
        };
        Ok(stored.clone())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn append(&self, event: SettlementEvent) -> SettlementResult<EventEnvelope> {
        let mut sequence_guard = self.sequence.write().await;
        *sequence_guard += 1;

        let envelope = EventEnvelope {
            sequence: *sequence_guard,
            stream_id: event.aggregate_id,
            event,
            stored_at: Utc::now(),
        };

        let mut streams = self.streams.write().await;
        streams
            .entry(envelope.stream_id)
            .or_default()
            .push(envelope.clone());

        Ok(envelope)
    }

    async fn stream(&self, stream_id: Uuid) -> SettlementResult<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams.get(&stream_id).cloned().unwrap_or_default())
    }
}
