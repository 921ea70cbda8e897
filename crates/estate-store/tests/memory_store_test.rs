use chrono::{NaiveDate, TimeZone, Utc};
use estate_core::{
    ChargeEntry, ChargeLine, ChargePayer, ChargeStore, ChargeTarget, FranchiseRule,
    FranchiseStore, LiquidationBreakdown, LiquidationSnapshot, ObligationStatus, ObligationStore,
    OwnershipShare, PaymentObligation, SettlementError, ShareStore, SnapshotStatus,
    SnapshotStore,
};
use estate_store::InMemoryStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn share(unit_id: Uuid, owner_id: Uuid, from: NaiveDate) -> OwnershipShare {
    OwnershipShare {
        id: Uuid::new_v4(),
        unit_id,
        owner_id,
        numerator: 1,
        denominator: 1,
        effective_from: from,
        effective_to: None,
    }
}

fn rule(lease_id: Uuid, start: NaiveDate, end: NaiveDate) -> FranchiseRule {
    FranchiseRule {
        id: Uuid::new_v4(),
        lease_id,
        start_date: start,
        end_date: end,
        discount_pct: dec!(10),
        reason: "works".into(),
        created_at: Utc::now(),
    }
}

fn obligation(lease_id: Uuid, month: u32, year: i32) -> PaymentObligation {
    PaymentObligation {
        id: Uuid::new_v4(),
        lease_id,
        month,
        year,
        due_date: date(year, month, 1),
        amount_due: dec!(800),
        amount_paid: Decimal::ZERO,
        status: ObligationStatus::Pending,
        paid_at: None,
        payment_method: None,
        reference: None,
    }
}

fn snapshot(owner_id: Uuid, status: SnapshotStatus) -> LiquidationSnapshot {
    LiquidationSnapshot {
        id: Uuid::new_v4(),
        owner_id,
        mandate_id: None,
        month: 3,
        year: 2025,
        total_rent_base: Decimal::ZERO,
        total_charges: Decimal::ZERO,
        total_fees: Decimal::ZERO,
        net_amount: Decimal::ZERO,
        status,
        breakdown: LiquidationBreakdown::default(),
        created_by: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn replace_partition_closes_open_shares_the_day_before() {
    let store = InMemoryStore::new();
    let unit_id = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    store
        .replace_partition(unit_id, date(2024, 1, 1), vec![share(unit_id, a, date(2024, 1, 1))])
        .await
        .unwrap();
    store
        .replace_partition(unit_id, date(2025, 3, 1), vec![share(unit_id, b, date(2025, 3, 1))])
        .await
        .unwrap();

    let history = store.shares_for_unit(unit_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].owner_id, a);
    assert_eq!(history[0].effective_to, Some(date(2025, 2, 28)));
    assert_eq!(history[1].owner_id, b);
    assert!(history[1].is_open());
}

#[tokio::test]
async fn replace_partition_refuses_to_rewrite_the_past() {
    let store = InMemoryStore::new();
    let unit_id = Uuid::new_v4();
    let owner = Uuid::new_v4();
    store
        .replace_partition(unit_id, date(2024, 6, 1), vec![share(unit_id, owner, date(2024, 6, 1))])
        .await
        .unwrap();

    let err = store
        .replace_partition(unit_id, date(2024, 6, 1), vec![share(unit_id, owner, date(2024, 6, 1))])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SettlementError::RetroactivePartition {
            unit_id,
            effective_from: date(2024, 6, 1),
            latest: date(2024, 6, 1),
        }
    );

    // Nothing was closed by the failed call.
    let history = store.shares_for_unit(unit_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_open());
}

#[tokio::test]
async fn overlapping_rule_is_rejected_inside_the_write() {
    let store = InMemoryStore::new();
    let lease_id = Uuid::new_v4();
    let first = store
        .insert_rule(rule(lease_id, date(2025, 1, 1), date(2025, 3, 31)))
        .await
        .unwrap();

    let err = store
        .insert_rule(rule(lease_id, date(2025, 3, 31), date(2025, 4, 30)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::OverlappingRule { existing_rule_id, .. } if existing_rule_id == first.id
    ));

    // Other leases are unaffected.
    store
        .insert_rule(rule(Uuid::new_v4(), date(2025, 1, 1), date(2025, 3, 31)))
        .await
        .unwrap();
}

#[tokio::test]
async fn updating_a_rule_ignores_its_own_range() {
    let store = InMemoryStore::new();
    let lease_id = Uuid::new_v4();
    let mut stored = store
        .insert_rule(rule(lease_id, date(2025, 1, 1), date(2025, 1, 31)))
        .await
        .unwrap();

    stored.end_date = date(2025, 2, 15);
    let updated = store.update_rule(stored.clone()).await.unwrap();
    assert_eq!(updated.end_date, date(2025, 2, 15));
}

#[tokio::test]
async fn duplicate_obligation_aborts_the_whole_batch() {
    let store = InMemoryStore::new();
    let lease_id = Uuid::new_v4();
    store
        .insert_obligations(vec![obligation(lease_id, 2, 2025)])
        .await
        .unwrap();

    let err = store
        .insert_obligations(vec![obligation(lease_id, 1, 2025), obligation(lease_id, 2, 2025)])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SettlementError::DuplicateObligation {
            lease_id,
            month: 2,
            year: 2025
        }
    );
    assert_eq!(store.obligations_for_lease(lease_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_obligation_frees_its_month() {
    let store = InMemoryStore::new();
    let lease_id = Uuid::new_v4();
    let first = store
        .insert_obligations(vec![obligation(lease_id, 5, 2025)])
        .await
        .unwrap()
        .remove(0);
    store.cancel_obligation(first.id).await.unwrap();

    store
        .insert_obligations(vec![obligation(lease_id, 5, 2025)])
        .await
        .unwrap();
    let pending = store
        .obligations_for_period(lease_id, 5, 2025, Some(ObligationStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn second_frozen_snapshot_for_a_key_is_refused() {
    let store = InMemoryStore::new();
    let owner = Uuid::new_v4();
    let first = store
        .insert_snapshot(snapshot(owner, SnapshotStatus::Validated))
        .await
        .unwrap();

    // Drafts may pile up next to it.
    let draft = store
        .insert_snapshot(snapshot(owner, SnapshotStatus::Draft))
        .await
        .unwrap();

    let err = store
        .insert_snapshot(snapshot(owner, SnapshotStatus::Validated))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::SnapshotExists { snapshot_id, .. } if snapshot_id == first.id));

    let err = store
        .transition(draft.id, SnapshotStatus::Validated)
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::SnapshotExists { .. }));

    let paid = store.transition(first.id, SnapshotStatus::Paid).await.unwrap();
    assert_eq!(paid.status, SnapshotStatus::Paid);
}

#[tokio::test]
async fn charge_in_frozen_snapshot_cannot_be_deleted() {
    let store = InMemoryStore::new();
    let owner = Uuid::new_v4();
    let charge = store
        .insert_charge(ChargeEntry {
            id: Uuid::new_v4(),
            target: ChargeTarget::Owner(owner),
            payer: ChargePayer::Owner(owner),
            amount: dec!(45.50),
            label: "bank fees".into(),
            notes: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
        })
        .await
        .unwrap();

    let mut frozen = snapshot(owner, SnapshotStatus::Validated);
    frozen.breakdown.charge_lines.push(ChargeLine {
        charge_id: charge.id,
        unit_id: None,
        amount: charge.amount,
        share_pct: dec!(100),
        owner_portion: charge.amount,
    });
    let frozen = store.insert_snapshot(frozen).await.unwrap();

    let err = store.delete_charge(charge.id).await.unwrap_err();
    assert_eq!(
        err,
        SettlementError::ChargeLocked {
            charge_id: charge.id,
            snapshot_id: frozen.id
        }
    );
}

#[tokio::test]
async fn frozen_snapshot_cannot_be_replaced() {
    let store = InMemoryStore::new();
    let stored = store
        .insert_snapshot(snapshot(Uuid::new_v4(), SnapshotStatus::Validated))
        .await
        .unwrap();

    let err = store.replace_draft(stored.clone()).await.unwrap_err();
    assert_eq!(
        err,
        SettlementError::SnapshotFrozen {
            snapshot_id: stored.id,
            status: SnapshotStatus::Validated
        }
    );
}
