use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use estate_core::{
    Clock, EventStore, ObligationStatus, ObligationStore, PaymentObligation, PaymentReceipt,
    SettlementError, SettlementEvent, SettlementEventKind, SettlementResult, period,
};
use estate_ownership::FranchiseEngine;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One rent obligation per lease and calendar month, and its payment state.
#[derive(Clone)]
pub struct PaymentScheduler {
    store: Arc<dyn ObligationStore>,
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
}

impl PaymentScheduler {
    pub fn new(
        store: Arc<dyn ObligationStore>,
        events: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            events,
            clock,
        }
    }

    /// One pending obligation per calendar month touched by `[start, end]`,
    /// due on `start`'s day of month (clamped to shorter months).
    pub async fn generate_for_lease(
        &self,
        lease_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        monthly_amount: Decimal,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        if monthly_amount <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount {
                amount: monthly_amount,
            });
        }
        let schedule = schedule(start, end)?;
        let obligations = schedule
            .into_iter()
            .map(|(month, year, due_date)| pending(lease_id, month, year, due_date, monthly_amount))
            .collect();
        self.insert(lease_id, obligations).await
    }

    /// Like [`PaymentScheduler::generate_for_lease`], with each month's amount
    /// reduced by the franchise covering its due date.
    pub async fn generate_discounted(
        &self,
        lease_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        base_rent: Decimal,
        franchises: &FranchiseEngine,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        if base_rent <= Decimal::ZERO {
            return Err(SettlementError::InvalidAmount { amount: base_rent });
        }
        let mut obligations = Vec::new();
        for (month, year, due_date) in schedule(start, end)? {
            let amount = franchises
                .effective_rent(lease_id, base_rent, due_date)
                .await?;
            obligations.push(pending(lease_id, month, year, due_date, amount));
        }
        self.insert(lease_id, obligations).await
    }

    /// Validates the obligation at `amount_paid`. A short payment is accepted
    /// as is; no make-up obligation is created for the difference.
    pub async fn record_payment(
        &self,
        obligation_id: Uuid,
        amount_paid: Decimal,
        method: impl Into<String>,
        reference: Option<String>,
        paid_at: DateTime<Utc>,
    ) -> SettlementResult<PaymentObligation> {
        let current = self.store.get_obligation(obligation_id).await?;
        match current.status {
            ObligationStatus::Validated => {
                return Err(SettlementError::AlreadyValidated { obligation_id });
            }
            ObligationStatus::Cancelled => {
                return Err(SettlementError::ObligationCancelled { obligation_id });
            }
            ObligationStatus::Pending | ObligationStatus::Late => {}
        }
        if amount_paid <= Decimal::ZERO || amount_paid > current.amount_due {
            warn!(
                "payment of {amount_paid} refused on obligation {obligation_id} (due {})",
                current.amount_due
            );
            return Err(SettlementError::InvalidAmount {
                amount: amount_paid,
            });
        }

        let validated = self
            .store
            .validate_payment(
                obligation_id,
                PaymentReceipt {
                    amount_paid,
                    method: method.into(),
                    reference,
                    paid_at,
                },
            )
            .await?;

        self.events
            .record(SettlementEvent::new(
                validated.lease_id,
                SettlementEventKind::PaymentValidated,
                self.clock.now(),
                json!({
                    "obligation_id": validated.id,
                    "amount_due": validated.amount_due,
                    "amount_paid": validated.amount_paid,
                }),
            ))
            .await;
        if validated.amount_paid < validated.amount_due {
            info!(
                "obligation {obligation_id} validated short: {} of {}",
                validated.amount_paid, validated.amount_due
            );
        } else {
            info!("obligation {obligation_id} validated");
        }
        Ok(validated)
    }

    /// Pending obligations due before `as_of` become late. Running it twice
    /// moves nothing the second time.
    pub async fn mark_late(&self, as_of: NaiveDate) -> SettlementResult<Vec<PaymentObligation>> {
        let moved = self.store.mark_late(as_of).await?;
        for obligation in &moved {
            self.events
                .record(SettlementEvent::new(
                    obligation.lease_id,
                    SettlementEventKind::ObligationMarkedLate,
                    self.clock.now(),
                    json!({ "obligation_id": obligation.id, "due_date": obligation.due_date }),
                ))
                .await;
        }
        if moved.is_empty() {
            debug!("no pending obligation due before {as_of}");
        } else {
            info!("{} obligation(s) due before {as_of} marked late", moved.len());
        }
        Ok(moved)
    }

    pub async fn mark_late_today(&self) -> SettlementResult<Vec<PaymentObligation>> {
        self.mark_late(self.clock.today()).await
    }

    pub async fn cancel(&self, obligation_id: Uuid) -> SettlementResult<PaymentObligation> {
        let cancelled = self.store.cancel_obligation(obligation_id).await?;
        self.events
            .record(SettlementEvent::new(
                cancelled.lease_id,
                SettlementEventKind::ObligationCancelled,
                self.clock.now(),
                json!({ "obligation_id": cancelled.id }),
            ))
            .await;
        info!("obligation {obligation_id} cancelled");
        Ok(cancelled)
    }

    pub async fn get(&self, obligation_id: Uuid) -> SettlementResult<PaymentObligation> {
        self.store.get_obligation(obligation_id).await
    }

    pub async fn list_for_lease(&self, lease_id: Uuid) -> SettlementResult<Vec<PaymentObligation>> {
        self.store.obligations_for_lease(lease_id).await
    }

    pub async fn validated_for_period(
        &self,
        lease_id: Uuid,
        month: u32,
        year: i32,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        self.store
            .obligations_for_period(lease_id, month, year, Some(ObligationStatus::Validated))
            .await
    }

    async fn insert(
        &self,
        lease_id: Uuid,
        obligations: Vec<PaymentObligation>,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        let stored = self.store.insert_obligations(obligations).await?;
        self.events
            .record(SettlementEvent::new(
                lease_id,
                SettlementEventKind::ObligationsGenerated,
                self.clock.now(),
                json!({ "count": stored.len() }),
            ))
            .await;
        info!("{} obligation(s) generated for lease {lease_id}", stored.len());
        Ok(stored)
    }
}

/// (month, year, due date) for every month of the term.
fn schedule(start: NaiveDate, end: NaiveDate) -> SettlementResult<Vec<(u32, i32, NaiveDate)>> {
    if end < start {
        return Err(SettlementError::InvalidRange { start, end });
    }
    period::months_between(start, end)
        .into_iter()
        .map(|(month, year)| {
            period::clamped_day(month, year, start.day()).map(|due| (month, year, due))
        })
        .collect()
}

fn pending(
    lease_id: Uuid,
    month: u32,
    year: i32,
    due_date: NaiveDate,
    amount_due: Decimal,
) -> PaymentObligation {
    PaymentObligation {
        id: Uuid::new_v4(),
        lease_id,
        month,
        year,
        due_date,
        amount_due,
        amount_paid: Decimal::ZERO,
        status: ObligationStatus::Pending,
        paid_at: None,
        payment_method: None,
        reference: None,
    }
}
