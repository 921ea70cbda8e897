use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use estate_core::{
    Clock, EventStore, OwnershipShare, SettlementError, SettlementEvent, SettlementEventKind,
    SettlementPolicy, SettlementResult, ShareInput, ShareStore,
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// Time-bounded fractional ownership of units.
///
/// A unit's shares active on any day always partition it: their fractions sum
/// to one within the policy epsilon. The check runs on the numerator and
/// denominator, never on a stored percentage.
#[derive(Clone)]
pub struct ShareLedger {
    store: Arc<dyn ShareStore>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    policy: SettlementPolicy,
}

impl ShareLedger {
    pub fn new(
        store: Arc<dyn ShareStore>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            policy,
        }
    }

    /// Replaces the unit's partition from `effective_from` onwards. Previous
    /// open shares are closed the day before, not deleted.
    pub async fn set_ownership(
        &self,
        unit_id: Uuid,
        effective_from: NaiveDate,
        shares: &[ShareInput],
    ) -> SettlementResult<Vec<OwnershipShare>> {
        if let Err(err) = self.check_partition(unit_id, shares) {
            warn!("rejected partition for unit {unit_id}: {err}");
            return Err(err);
        }

        let records: Vec<OwnershipShare> = shares
            .iter()
            .map(|input| OwnershipShare {
                id: Uuid::new_v4(),
                unit_id,
                owner_id: input.owner_id,
                numerator: input.numerator,
                denominator: input.denominator,
                effective_from,
                effective_to: None,
            })
            .collect();

        let stored = self
            .store
            .replace_partition(unit_id, effective_from, records)
            .await?;

        self.events
            .record(SettlementEvent::new(
                unit_id,
                SettlementEventKind::OwnershipReassigned,
                self.clock.now(),
                json!({
                    "effective_from": effective_from,
                    "shares": stored
                        .iter()
                        .map(|share| json!({
                            "owner_id": share.owner_id,
                            "numerator": share.numerator,
                            "denominator": share.denominator,
                        }))
                        .collect::<Vec<_>>(),
                }),
            ))
            .await;

        info!(
            "unit {unit_id} reassigned to {} owner(s) from {effective_from}",
            stored.len()
        );
        Ok(stored)
    }

    /// [`ShareLedger::set_ownership`] effective from the clock's today.
    pub async fn set_ownership_today(
        &self,
        unit_id: Uuid,
        shares: &[ShareInput],
    ) -> SettlementResult<Vec<OwnershipShare>> {
        self.set_ownership(unit_id, self.clock.today(), shares)
            .await
    }

    /// Shares covering `date`. An empty result is a data integrity error.
    pub async fn shares_at(
        &self,
        unit_id: Uuid,
        date: NaiveDate,
    ) -> SettlementResult<Vec<OwnershipShare>> {
        let active: Vec<OwnershipShare> = self
            .store
            .shares_for_unit(unit_id)
            .await?
            .into_iter()
            .filter(|share| share.covers(date))
            .collect();
        if active.is_empty() {
            return Err(SettlementError::NoActivePartition { unit_id, date });
        }
        Ok(active)
    }

    /// The owner's percentage of the unit on `date`, zero when they hold no
    /// active share.
    pub async fn percentage_of(
        &self,
        owner_id: Uuid,
        unit_id: Uuid,
        date: NaiveDate,
    ) -> SettlementResult<Decimal> {
        Ok(self
            .store
            .shares_for_unit(unit_id)
            .await?
            .iter()
            .filter(|share| share.owner_id == owner_id && share.covers(date))
            .map(OwnershipShare::percentage)
            .sum())
    }

    pub async fn history(&self, unit_id: Uuid) -> SettlementResult<Vec<OwnershipShare>> {
        self.store.shares_for_unit(unit_id).await
    }

    fn check_partition(&self, unit_id: Uuid, shares: &[ShareInput]) -> SettlementResult<()> {
        let mut seen = HashSet::with_capacity(shares.len());
        for input in shares {
            if !input.is_well_formed() {
                return Err(SettlementError::InvalidShare {
                    owner_id: input.owner_id,
                    numerator: input.numerator,
                    denominator: input.denominator,
                });
            }
            if !seen.insert(input.owner_id) {
                return Err(SettlementError::DuplicateOwner {
                    owner_id: input.owner_id,
                });
            }
        }

        let total: Decimal = shares.iter().map(ShareInput::fraction).sum();
        if !self.policy.is_whole(total) {
            return Err(SettlementError::InvalidPartition { unit_id, total });
        }
        Ok(())
    }
}
