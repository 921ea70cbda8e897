use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use estate_core::{
    ChargeEntry, ChargeStore, EventEnvelope, EventStore, FranchiseRule, FranchiseStore,
    LiquidationSnapshot, ObligationStatus, ObligationStore, OwnershipShare, PayerKind,
    PaymentObligation, PaymentReceipt, SettlementError, SettlementEvent, SettlementResult,
    ShareStore, SnapshotKey, SnapshotStatus, SnapshotStore,
};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::codec::{self, month_column, payer_columns, storage};

/// Serializes every freeze of a liquidation against charge deletion.
const FREEZE_LOCK: &str = "liquidation-freeze";

/// Every store trait over Postgres.
///
/// Each check-then-write runs in one transaction behind a transaction-scoped
/// advisory lock on the key it protects; the unique and exclusion constraints
/// of the schema back the same rules up.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> SettlementResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(storage)
    }
}

async fn advisory_lock(tx: &mut Transaction<'_, Postgres>, key: &str) -> SettlementResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(key)
        .execute(&mut **tx)
        .await
        .map_err(storage)?;
    Ok(())
}

fn snapshot_lock(key: SnapshotKey) -> String {
    format!("liquidation:{}:{}:{}", key.owner_id, key.year, key.month)
}

async fn commit(tx: Transaction<'_, Postgres>) -> SettlementResult<()> {
    tx.commit().await.map_err(storage)
}

async fn overlapping_rule(
    tx: &mut Transaction<'_, Postgres>,
    rule: &FranchiseRule,
) -> SettlementResult<Option<FranchiseRule>> {
    sqlx::query(
        r#"
        SELECT * FROM franchise_rules
        WHERE lease_id = $1 AND id <> $2 AND start_date <= $4 AND end_date >= $3
        ORDER BY start_date
        LIMIT 1
        "#,
    )
    .bind(rule.lease_id)
    .bind(rule.id)
    .bind(rule.start_date)
    .bind(rule.end_date)
    .fetch_optional(&mut **tx)
    .await
    .map_err(storage)?
    .as_ref()
    .map(codec::rule)
    .transpose()
}

fn overlap_error(rule: &FranchiseRule, existing: FranchiseRule) -> SettlementError {
    SettlementError::OverlappingRule {
        lease_id: rule.lease_id,
        existing_rule_id: existing.id,
        existing_start: existing.start_date,
        existing_end: existing.end_date,
    }
}

async fn frozen_for_key(
    tx: &mut Transaction<'_, Postgres>,
    key: SnapshotKey,
    except: Option<Uuid>,
) -> SettlementResult<Option<Uuid>> {
    let row = sqlx::query(
        r#"
        SELECT id FROM liquidation_snapshots
        WHERE owner_id = $1 AND year = $2 AND month = $3 AND status <> 'draft'
          AND ($4::uuid IS NULL OR id <> $4)
        LIMIT 1
        "#,
    )
    .bind(key.owner_id)
    .bind(key.year)
    .bind(month_column(key.month, key.year)?)
    .bind(except)
    .fetch_optional(&mut **tx)
    .await
    .map_err(storage)?;
    row.map(|row| row.try_get("id").map_err(storage))
        .transpose()
}

async fn locked_obligation(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> SettlementResult<PaymentObligation> {
    let row = sqlx::query("SELECT * FROM payment_obligations WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?
        .ok_or_else(|| SettlementError::not_found("payment obligation", id))?;
    codec::obligation(&row)
}

fn ensure_open(obligation: &PaymentObligation) -> SettlementResult<()> {
    match obligation.status {
        ObligationStatus::Validated => Err(SettlementError::AlreadyValidated {
            obligation_id: obligation.id,
        }),
        ObligationStatus::Cancelled => Err(SettlementError::ObligationCancelled {
            obligation_id: obligation.id,
        }),
        ObligationStatus::Pending | ObligationStatus::Late => Ok(()),
    }
}

async fn locked_snapshot(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> SettlementResult<LiquidationSnapshot> {
    let row = sqlx::query("SELECT * FROM liquidation_snapshots WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?
        .ok_or_else(|| SettlementError::not_found("liquidation snapshot", id))?;
    codec::snapshot(&row)
}

#[async_trait]
impl ShareStore for PgStore {
    async fn replace_partition(
        &self,
        unit_id: Uuid,
        effective_from: NaiveDate,
        shares: Vec<OwnershipShare>,
    ) -> SettlementResult<Vec<OwnershipShare>> {
        let mut tx = self.begin().await?;
        advisory_lock(&mut tx, &format!("ownership:{unit_id}")).await?;

        let latest: Option<NaiveDate> =
            sqlx::query("SELECT MAX(effective_from) AS latest FROM ownership_shares WHERE unit_id = $1")
                .bind(unit_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage)?
                .try_get("latest")
                .map_err(storage)?;
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
        sqlx::query(
            "UPDATE ownership_shares SET effective_to = $2 WHERE unit_id = $1 AND effective_to IS NULL",
        )
        .bind(unit_id)
        .bind(closed_on)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        for share in &shares {
            sqlx::query(
                r#"
                INSERT INTO ownership_shares (
                    id, unit_id, owner_id, numerator, denominator, effective_from, effective_to
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(share.id)
            .bind(share.unit_id)
            .bind(share.owner_id)
            .bind(i64::from(share.numerator))
            .bind(i64::from(share.denominator))
            .bind(share.effective_from)
            .bind(share.effective_to)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        commit(tx).await?;
        Ok(shares)
    }

    async fn shares_for_unit(&self, unit_id: Uuid) -> SettlementResult<Vec<OwnershipShare>> {
        let rows = sqlx::query(
            "SELECT * FROM ownership_shares WHERE unit_id = $1 ORDER BY effective_from, owner_id",
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(codec::share).collect()
    }
}

#[async_trait]
impl FranchiseStore for PgStore {
    async fn insert_rule(&self, rule: FranchiseRule) -> SettlementResult<FranchiseRule> {
        let mut tx = self.begin().await?;
        advisory_lock(&mut tx, &format!("franchise:{}", rule.lease_id)).await?;
        if let Some(existing) = overlapping_rule(&mut tx, &rule).await? {
            return Err(overlap_error(&rule, existing));
        }

        sqlx::query(
            r#"
            INSERT INTO franchise_rules (
                id, lease_id, start_date, end_date, discount_pct, reason, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(rule.id)
        .bind(rule.lease_id)
        .bind(rule.start_date)
        .bind(rule.end_date)
        .bind(rule.discount_pct)
        .bind(&rule.reason)
        .bind(rule.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        commit(tx).await?;
        Ok(rule)
    }

    async fn update_rule(&self, rule: FranchiseRule) -> SettlementResult<FranchiseRule> {
        let mut tx = self.begin().await?;
        advisory_lock(&mut tx, &format!("franchise:{}", rule.lease_id)).await?;
        if let Some(existing) = overlapping_rule(&mut tx, &rule).await? {
            return Err(overlap_error(&rule, existing));
        }

        let updated = sqlx::query(
            r#"
            UPDATE franchise_rules
            SET start_date = $2, end_date = $3, discount_pct = $4, reason = $5
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(rule.start_date)
        .bind(rule.end_date)
        .bind(rule.discount_pct)
        .bind(&rule.reason)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        if updated.rows_affected() == 0 {
            return Err(SettlementError::not_found("franchise rule", rule.id));
        }

        commit(tx).await?;
        Ok(rule)
    }

    async fn delete_rule(&self, id: Uuid) -> SettlementResult<FranchiseRule> {
        let row = sqlx::query("DELETE FROM franchise_rules WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("franchise rule", id))?;
        codec::rule(&row)
    }

    async fn get_rule(&self, id: Uuid) -> SettlementResult<FranchiseRule> {
        let row = sqlx::query("SELECT * FROM franchise_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("franchise rule", id))?;
        codec::rule(&row)
    }

    async fn rules_for_lease(&self, lease_id: Uuid) -> SettlementResult<Vec<FranchiseRule>> {
        let rows =
            sqlx::query("SELECT * FROM franchise_rules WHERE lease_id = $1 ORDER BY start_date")
                .bind(lease_id)
                .fetch_all(&self.pool)
                .await
                .map_err(storage)?;
        rows.iter().map(codec::rule).collect()
    }
}

#[async_trait]
impl ChargeStore for PgStore {
    async fn insert_charge(&self, charge: ChargeEntry) -> SettlementResult<ChargeEntry> {
        let (payer_kind, payer_id) = payer_columns(charge.payer);
        sqlx::query(
            r#"
            INSERT INTO charge_entries (
                id, target_kind, target_id, payer_kind, payer_id, amount, label, notes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(charge.id)
        .bind(charge.target.kind().as_str())
        .bind(charge.target.id())
        .bind(payer_kind)
        .bind(payer_id)
        .bind(charge.amount)
        .bind(&charge.label)
        .bind(&charge.notes)
        .bind(charge.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(charge)
    }

    async fn get_charge(&self, id: Uuid) -> SettlementResult<ChargeEntry> {
        let row = sqlx::query("SELECT * FROM charge_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("charge", id))?;
        codec::charge(&row)
    }

    async fn delete_charge(&self, id: Uuid) -> SettlementResult<ChargeEntry> {
        let mut tx = self.begin().await?;
        advisory_lock(&mut tx, FREEZE_LOCK).await?;

        let locking = sqlx::query(
            r#"
            SELECT id FROM liquidation_snapshots
            WHERE status <> 'draft'
              AND breakdown -> 'charge_lines' @> jsonb_build_array(jsonb_build_object('charge_id', $1::text))
            LIMIT 1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;
        if let Some(row) = locking {
            return Err(SettlementError::ChargeLocked {
                charge_id: id,
                snapshot_id: row.try_get("id").map_err(storage)?,
            });
        }

        let row = sqlx::query("DELETE FROM charge_entries WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("charge", id))?;
        let removed = codec::charge(&row)?;
        commit(tx).await?;
        Ok(removed)
    }

    async fn charges_for_payer(
        &self,
        payer_kind: PayerKind,
        payer_id: Option<Uuid>,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> SettlementResult<Vec<ChargeEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM charge_entries
            WHERE payer_kind = $1 AND payer_id IS NOT DISTINCT FROM $2
              AND created_at >= $3 AND created_at < $4
            ORDER BY created_at, id
            "#,
        )
        .bind(payer_kind.as_str())
        .bind(payer_id)
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(codec::charge).collect()
    }

    async fn apportioned_charges(
        &self,
        unit_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> SettlementResult<Vec<ChargeEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM charge_entries
            WHERE payer_kind = 'owners_of_unit' AND payer_id = $1
              AND created_at >= $2 AND created_at < $3
            ORDER BY created_at, id
            "#,
        )
        .bind(unit_id)
        .bind(from)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(codec::charge).collect()
    }
}

#[async_trait]
impl ObligationStore for PgStore {
    async fn insert_obligations(
        &self,
        obligations: Vec<PaymentObligation>,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        let mut tx = self.begin().await?;
        let leases: BTreeSet<Uuid> = obligations.iter().map(|o| o.lease_id).collect();
        for lease_id in &leases {
            advisory_lock(&mut tx, &format!("obligations:{lease_id}")).await?;
        }

        let mut claimed = BTreeSet::new();
        for obligation in &obligations {
            if obligation.status == ObligationStatus::Cancelled {
                continue;
            }
            let duplicate = SettlementError::DuplicateObligation {
                lease_id: obligation.lease_id,
                month: obligation.month,
                year: obligation.year,
            };
            if !claimed.insert((obligation.lease_id, obligation.year, obligation.month)) {
                return Err(duplicate);
            }
            let existing = sqlx::query(
                r#"
                SELECT 1 FROM payment_obligations
                WHERE lease_id = $1 AND year = $2 AND month = $3 AND status <> 'cancelled'
                "#,
            )
            .bind(obligation.lease_id)
            .bind(obligation.year)
            .bind(month_column(obligation.month, obligation.year)?)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
            if existing.is_some() {
                return Err(duplicate);
            }
        }

        for obligation in &obligations {
            sqlx::query(
                r#"
                INSERT INTO payment_obligations (
                    id, lease_id, month, year, due_date, amount_due, amount_paid, status,
                    paid_at, payment_method, reference
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(obligation.id)
            .bind(obligation.lease_id)
            .bind(month_column(obligation.month, obligation.year)?)
            .bind(obligation.year)
            .bind(obligation.due_date)
            .bind(obligation.amount_due)
            .bind(obligation.amount_paid)
            .bind(obligation.status.as_str())
            .bind(obligation.paid_at)
            .bind(&obligation.payment_method)
            .bind(&obligation.reference)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        commit(tx).await?;
        Ok(obligations)
    }

    async fn get_obligation(&self, id: Uuid) -> SettlementResult<PaymentObligation> {
        let row = sqlx::query("SELECT * FROM payment_obligations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("payment obligation", id))?;
        codec::obligation(&row)
    }

    async fn validate_payment(
        &self,
        id: Uuid,
        receipt: PaymentReceipt,
    ) -> SettlementResult<PaymentObligation> {
        let mut tx = self.begin().await?;
        ensure_open(&locked_obligation(&mut tx, id).await?)?;

        let row = sqlx::query(
            r#"
            UPDATE payment_obligations
            SET status = 'validated', amount_paid = $2, payment_method = $3, reference = $4,
                paid_at = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(receipt.amount_paid)
        .bind(&receipt.method)
        .bind(&receipt.reference)
        .bind(receipt.paid_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;
        let validated = codec::obligation(&row)?;
        commit(tx).await?;
        Ok(validated)
    }

    async fn cancel_obligation(&self, id: Uuid) -> SettlementResult<PaymentObligation> {
        let mut tx = self.begin().await?;
        ensure_open(&locked_obligation(&mut tx, id).await?)?;

        let row = sqlx::query(
            "UPDATE payment_obligations SET status = 'cancelled' WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;
        let cancelled = codec::obligation(&row)?;
        commit(tx).await?;
        Ok(cancelled)
    }

    async fn mark_late(&self, as_of: NaiveDate) -> SettlementResult<Vec<PaymentObligation>> {
        let rows = sqlx::query(
            r#"
            UPDATE payment_obligations SET status = 'late'
            WHERE status = 'pending' AND due_date < $1
            RETURNING *
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        let mut moved = rows
            .iter()
            .map(codec::obligation)
            .collect::<SettlementResult<Vec<_>>>()?;
        moved.sort_by_key(|obligation| (obligation.due_date, obligation.id));
        debug!("{} row(s) moved to late", moved.len());
        Ok(moved)
    }

    async fn obligations_for_lease(
        &self,
        lease_id: Uuid,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        let rows = sqlx::query(
            "SELECT * FROM payment_obligations WHERE lease_id = $1 ORDER BY due_date, id",
        )
        .bind(lease_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(codec::obligation).collect()
    }

    async fn obligations_for_period(
        &self,
        lease_id: Uuid,
        month: u32,
        year: i32,
        status: Option<ObligationStatus>,
    ) -> SettlementResult<Vec<PaymentObligation>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM payment_obligations
            WHERE lease_id = $1 AND month = $2 AND year = $3
              AND ($4::text IS NULL OR status = $4)
            ORDER BY due_date, id
            "#,
        )
        .bind(lease_id)
        .bind(month_column(month, year)?)
        .bind(year)
        .bind(status.map(ObligationStatus::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(codec::obligation).collect()
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn insert_snapshot(
        &self,
        snapshot: LiquidationSnapshot,
    ) -> SettlementResult<LiquidationSnapshot> {
        let key = snapshot.key();
        let mut tx = self.begin().await?;
        if snapshot.status.is_frozen() {
            advisory_lock(&mut tx, FREEZE_LOCK).await?;
            advisory_lock(&mut tx, &snapshot_lock(key)).await?;
            if let Some(existing) = frozen_for_key(&mut tx, key, None).await? {
                return Err(SettlementError::SnapshotExists {
                    owner_id: key.owner_id,
                    month: key.month,
                    year: key.year,
                    snapshot_id: existing,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO liquidation_snapshots (
                id, owner_id, mandate_id, month, year, total_rent_base, total_charges,
                total_fees, net_amount, status, breakdown, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.owner_id)
        .bind(snapshot.mandate_id)
        .bind(month_column(snapshot.month, snapshot.year)?)
        .bind(snapshot.year)
        .bind(snapshot.total_rent_base)
        .bind(snapshot.total_charges)
        .bind(snapshot.total_fees)
        .bind(snapshot.net_amount)
        .bind(snapshot.status.as_str())
        .bind(Json(&snapshot.breakdown))
        .bind(&snapshot.created_by)
        .bind(snapshot.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        commit(tx).await?;
        Ok(snapshot)
    }

    async fn get_snapshot(&self, id: Uuid) -> SettlementResult<LiquidationSnapshot> {
        let row = sqlx::query("SELECT * FROM liquidation_snapshots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .ok_or_else(|| SettlementError::not_found("liquidation snapshot", id))?;
        codec::snapshot(&row)
    }

    async fn snapshots_for_key(
        &self,
        key: SnapshotKey,
    ) -> SettlementResult<Vec<LiquidationSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM liquidation_snapshots
            WHERE owner_id = $1 AND year = $2 AND month = $3
            ORDER BY created_at, id
            "#,
        )
        .bind(key.owner_id)
        .bind(key.year)
        .bind(month_column(key.month, key.year)?)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(codec::snapshot).collect()
    }

    async fn snapshots_for_owner(
        &self,
        owner_id: Uuid,
    ) -> SettlementResult<Vec<LiquidationSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM liquidation_snapshots
            WHERE owner_id = $1
            ORDER BY year, month, created_at
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(codec::snapshot).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        to: SnapshotStatus,
    ) -> SettlementResult<LiquidationSnapshot> {
        let mut tx = self.begin().await?;
        advisory_lock(&mut tx, FREEZE_LOCK).await?;
        let current = locked_snapshot(&mut tx, id).await?;
        if !current.status.can_move_to(to) {
            return Err(SettlementError::InvalidTransition {
                snapshot_id: id,
                from: current.status,
                to,
            });
        }
        let key = current.key();
        advisory_lock(&mut tx, &snapshot_lock(key)).await?;
        if let Some(existing) = frozen_for_key(&mut tx, key, Some(id)).await? {
            return Err(SettlementError::SnapshotExists {
                owner_id: key.owner_id,
                month: key.month,
                year: key.year,
                snapshot_id: existing,
            });
        }

        sqlx::query("UPDATE liquidation_snapshots SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(to.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        commit(tx).await?;
        Ok(LiquidationSnapshot {
            status: to,
            ..current
        })
    }

    async fn replace_draft(
        &self,
        snapshot: LiquidationSnapshot,
    ) -> SettlementResult<LiquidationSnapshot> {
        let mut tx = self.begin().await?;
        let stored = locked_snapshot(&mut tx, snapshot.id).await?;
        if stored.status.is_frozen() {
            return Err(SettlementError::SnapshotFrozen {
                snapshot_id: stored.id,
                status: stored.status,
            });
        }

        let replaced = LiquidationSnapshot {
            status: SnapshotStatus::Draft,
            ..snapshot
        };
        sqlx::query(
            r#"
            UPDATE liquidation_snapshots
            SET mandate_id = $2, total_rent_base = $3, total_charges = $4, total_fees = $5,
                net_amount = $6, breakdown = $7, created_by = $8, created_at = $9
            WHERE id = $1
            "#,
        )
        .bind(replaced.id)
        .bind(replaced.mandate_id)
        .bind(replaced.total_rent_base)
        .bind(replaced.total_charges)
        .bind(replaced.total_fees)
        .bind(replaced.net_amount)
        .bind(Json(&replaced.breakdown))
        .bind(&replaced.created_by)
        .bind(replaced.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        commit(tx).await?;
        Ok(replaced)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn append(&self, event: SettlementEvent) -> SettlementResult<EventEnvelope> {
        let row = sqlx::query(
            r#"
            INSERT INTO settlement_events (id, stream_id, kind, occurred_at, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING sequence, stored_at
            "#,
        )
        .bind(event.id)
        .bind(event.aggregate_id)
        .bind(codec::event_kind_text(event.kind)?)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(EventEnvelope {
            sequence: row.try_get("sequence").map_err(storage)?,
            stream_id: event.aggregate_id,
            stored_at: row.try_get("stored_at").map_err(storage)?,
            event,
        })
    }

    async fn stream(&self, stream_id: Uuid) -> SettlementResult<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            "SELECT * FROM settlement_events WHERE stream_id = $1 ORDER BY sequence",
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(codec::envelope).collect()
    }
}
