use std::sync::Arc;

use chrono::NaiveDate;
use estate_core::{
    Clock, EventStore, FranchiseRule, FranchiseStore, SettlementError, SettlementEvent,
    SettlementEventKind, SettlementResult,
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

/// Date-ranged rent discounts ("franchises") per lease.
///
/// Rules of one lease never overlap, so at most one rule covers a given day.
#[derive(Clone)]
pub struct FranchiseEngine {
    store: Arc<dyn FranchiseStore>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl FranchiseEngine {
    pub fn new(
        store: Arc<dyn FranchiseStore>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    pub async fn add_rule(
        &self,
        lease_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        discount_pct: Decimal,
        reason: impl Into<String>,
    ) -> SettlementResult<FranchiseRule> {
        validate_rule(start, end, discount_pct)?;

        let rule = FranchiseRule {
            id: Uuid::new_v4(),
            lease_id,
            start_date: start,
            end_date: end,
            discount_pct,
            reason: reason.into(),
            created_at: self.clock.now(),
        };
        let stored = self.store.insert_rule(rule).await.inspect_err(|err| {
            warn!("franchise for lease {lease_id} rejected: {err}");
        })?;

        self.log_rule(&stored, SettlementEventKind::FranchiseRuleSaved)
            .await;
        info!(
            "franchise {} added on lease {lease_id}: {}% from {start} to {end}",
            stored.id, stored.discount_pct
        );
        Ok(stored)
    }

    pub async fn update_rule(
        &self,
        rule_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        discount_pct: Decimal,
        reason: impl Into<String>,
    ) -> SettlementResult<FranchiseRule> {
        validate_rule(start, end, discount_pct)?;

        let current = self.store.get_rule(rule_id).await?;
        let stored = self
            .store
            .update_rule(FranchiseRule {
                start_date: start,
                end_date: end,
                discount_pct,
                reason: reason.into(),
                ..current
            })
            .await?;

        self.log_rule(&stored, SettlementEventKind::FranchiseRuleSaved)
            .await;
        info!("franchise {rule_id} updated");
        Ok(stored)
    }

    pub async fn delete_rule(&self, rule_id: Uuid) -> SettlementResult<FranchiseRule> {
        let removed = self.store.delete_rule(rule_id).await?;
        self.log_rule(&removed, SettlementEventKind::FranchiseRuleDeleted)
            .await;
        info!("franchise {rule_id} deleted from lease {}", removed.lease_id);
        Ok(removed)
    }

    /// The rule covering `date`, if any.
    pub async fn list_active_on(
        &self,
        lease_id: Uuid,
        date: NaiveDate,
    ) -> SettlementResult<Option<FranchiseRule>> {
        Ok(self
            .store
            .rules_for_lease(lease_id)
            .await?
            .into_iter()
            .find(|rule| rule.covers(date)))
    }

    pub async fn list_for_lease(&self, lease_id: Uuid) -> SettlementResult<Vec<FranchiseRule>> {
        self.store.rules_for_lease(lease_id).await
    }

    /// `base_rent` reduced by the discount of the rule covering `date`.
    /// Not rounded.
    pub async fn effective_rent(
        &self,
        lease_id: Uuid,
        base_rent: Decimal,
        date: NaiveDate,
    ) -> SettlementResult<Decimal> {
        Ok(match self.list_active_on(lease_id, date).await? {
            Some(rule) => discounted(base_rent, rule.discount_pct),
            None => base_rent,
        })
    }

    async fn log_rule(&self, rule: &FranchiseRule, kind: SettlementEventKind) {
        self.events
            .record(SettlementEvent::new(
                rule.lease_id,
                kind,
                self.clock.now(),
                json!({
                    "rule_id": rule.id,
                    "start_date": rule.start_date,
                    "end_date": rule.end_date,
                    "discount_pct": rule.discount_pct,
                }),
            ))
            .await;
    }
}

fn validate_rule(start: NaiveDate, end: NaiveDate, discount_pct: Decimal) -> SettlementResult<()> {
    if end < start {
        return Err(SettlementError::InvalidRange { start, end });
    }
    if discount_pct < Decimal::ZERO || discount_pct > Decimal::ONE_HUNDRED {
        return Err(SettlementError::InvalidDiscount { discount_pct });
    }
    Ok(())
}

fn discounted(base_rent: Decimal, discount_pct: Decimal) -> Decimal {
    base_rent * (Decimal::ONE - discount_pct / Decimal::ONE_HUNDRED)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn discount_applies_to_base() {
        assert_eq!(discounted(dec!(1000), dec!(15)), dec!(850));
        assert_eq!(discounted(dec!(1000), dec!(0)), dec!(1000));
        assert_eq!(discounted(dec!(1000), dec!(100)), dec!(0));
        assert_eq!(discounted(dec!(733.33), dec!(12.5)), dec!(641.66375));
    }

    #[test]
    fn validation_rejects_inverted_range_and_bad_discount() {
        let jan = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let feb = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        assert_eq!(
            validate_rule(feb, jan, dec!(10)),
            Err(SettlementError::InvalidRange {
                start: feb,
                end: jan
            })
        );
        assert_eq!(
            validate_rule(jan, feb, dec!(100.01)),
            Err(SettlementError::InvalidDiscount {
                discount_pct: dec!(100.01)
            })
        );
        assert_eq!(
            validate_rule(jan, feb, dec!(-1)),
            Err(SettlementError::InvalidDiscount {
                discount_pct: dec!(-1)
            })
        );
        assert!(validate_rule(jan, jan, dec!(100)).is_ok());
    }
}
