use chrono::{NaiveDate, TimeZone, Utc};
use estate_core::{
    ChargeEntry, ChargeLine, ChargePayer, ChargeStore, ChargeTarget, EventStore, FranchiseRule,
    FranchiseStore, LiquidationBreakdown, LiquidationSnapshot, ObligationStatus, ObligationStore,
    OwnershipShare, PaymentObligation, PaymentReceipt, SettlementError, SettlementEvent,
    SettlementEventKind, ShareStore, SnapshotStatus, SnapshotStore,
};
use estate_platform::{PgStore, connect_database, run_migrations};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn store() -> Option<PgStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let pool = connect_database(&url, 2).await.unwrap();
    run_migrations(&pool).await.unwrap();
    Some(PgStore::new(pool))
}

fn share(unit_id: Uuid, owner_id: Uuid, n: u32, d: u32, from: NaiveDate) -> OwnershipShare {
    OwnershipShare {
        id: Uuid::new_v4(),
        unit_id,
        owner_id,
        numerator: n,
        denominator: d,
        effective_from: from,
        effective_to: None,
    }
}

fn obligation(lease_id: Uuid, month: u32, due: NaiveDate) -> PaymentObligation {
    PaymentObligation {
        id: Uuid::new_v4(),
        lease_id,
        month,
        year: 2025,
        due_date: due,
        amount_due: dec!(900),
        amount_paid: dec!(0),
        status: ObligationStatus::Pending,
        paid_at: None,
        payment_method: None,
        reference: None,
    }
}

fn snapshot(owner_id: Uuid, status: SnapshotStatus, charge_id: Uuid) -> LiquidationSnapshot {
    LiquidationSnapshot {
        id: Uuid::new_v4(),
        owner_id,
        mandate_id: None,
        month: 3,
        year: 2025,
        total_rent_base: dec!(0),
        total_charges: dec!(40),
        total_fees: dec!(0),
        net_amount: dec!(-40),
        status,
        breakdown: LiquidationBreakdown {
            rent_lines: Vec::new(),
            charge_lines: vec![ChargeLine {
                charge_id,
                unit_id: None,
                amount: dec!(40),
                share_pct: dec!(100),
                owner_portion: dec!(40),
            }],
            fee_lines: Vec::new(),
        },
        created_by: Some("test".to_string()),
        created_at: Utc.with_ymd_and_hms(2025, 3, 31, 9, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn partition_history_closes_previous_shares() {
    let Some(store) = store().await else { return };
    let unit = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    store
        .replace_partition(unit, date(2024, 1, 1), vec![share(unit, a, 1, 1, date(2024, 1, 1))])
        .await
        .unwrap();
    store
        .replace_partition(
            unit,
            date(2025, 1, 1),
            vec![
                share(unit, a, 1, 2, date(2025, 1, 1)),
                share(unit, b, 1, 2, date(2025, 1, 1)),
            ],
        )
        .await
        .unwrap();

    let history = store.shares_for_unit(unit).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].effective_to, Some(date(2024, 12, 31)));
    assert!(history[1..].iter().all(|s| s.effective_to.is_none()));

    let err = store
        .replace_partition(unit, date(2025, 1, 1), vec![share(unit, a, 1, 1, date(2025, 1, 1))])
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::RetroactivePartition { .. }));
}

#[tokio::test]
async fn overlapping_franchise_is_refused() {
    let Some(store) = store().await else { return };
    let lease = Uuid::new_v4();
    let rule = |start, end| FranchiseRule {
        id: Uuid::new_v4(),
        lease_id: lease,
        start_date: start,
        end_date: end,
        discount_pct: dec!(25),
        reason: "works".to_string(),
        created_at: Utc::now(),
    };

    let first = store.insert_rule(rule(date(2025, 2, 1), date(2025, 2, 28))).await.unwrap();
    let err = store
        .insert_rule(rule(date(2025, 2, 28), date(2025, 3, 31)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SettlementError::OverlappingRule { existing_rule_id, .. } if existing_rule_id == first.id
    ));

    let widened = FranchiseRule {
        end_date: date(2025, 3, 15),
        ..first.clone()
    };
    store.update_rule(widened).await.unwrap();
    assert_eq!(
        store.get_rule(first.id).await.unwrap().end_date,
        date(2025, 3, 15)
    );
    store.delete_rule(first.id).await.unwrap();
    assert!(store.rules_for_lease(lease).await.unwrap().is_empty());
}

#[tokio::test]
async fn obligations_are_unique_per_month_until_cancelled() {
    let Some(store) = store().await else { return };
    let lease = Uuid::new_v4();
    let march = obligation(lease, 3, date(2025, 3, 5));

    store.insert_obligations(vec![march.clone()]).await.unwrap();
    let err = store
        .insert_obligations(vec![obligation(lease, 4, date(2025, 4, 5)), obligation(lease, 3, date(2025, 3, 5))])
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::DuplicateObligation { month: 3, .. }));
    assert_eq!(store.obligations_for_lease(lease).await.unwrap().len(), 1);

    let moved = store.mark_late(date(2025, 3, 6)).await.unwrap();
    assert!(moved.iter().any(|o| o.id == march.id));

    let receipt = PaymentReceipt {
        amount_paid: dec!(900),
        method: "transfer".to_string(),
        reference: Some("VIR-3".to_string()),
        paid_at: Utc::now(),
    };
    let paid = store.validate_payment(march.id, receipt.clone()).await.unwrap();
    assert_eq!(paid.status, ObligationStatus::Validated);
    assert!(matches!(
        store.validate_payment(march.id, receipt).await.unwrap_err(),
        SettlementError::AlreadyValidated { .. }
    ));

    let validated = store
        .obligations_for_period(lease, 3, 2025, Some(ObligationStatus::Validated))
        .await
        .unwrap();
    assert_eq!(validated.len(), 1);
}

#[tokio::test]
async fn frozen_snapshot_locks_its_charges() {
    let Some(store) = store().await else { return };
    let owner = Uuid::new_v4();
    let charge = store
        .insert_charge(ChargeEntry {
            id: Uuid::new_v4(),
            target: ChargeTarget::Owner(owner),
            payer: ChargePayer::Owner(owner),
            amount: dec!(40),
            label: "keys".to_string(),
            notes: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap(),
        })
        .await
        .unwrap();

    let draft = store
        .insert_snapshot(snapshot(owner, SnapshotStatus::Draft, charge.id))
        .await
        .unwrap();
    store
        .insert_snapshot(snapshot(owner, SnapshotStatus::Draft, charge.id))
        .await
        .unwrap();

    let frozen = store.transition(draft.id, SnapshotStatus::Validated).await.unwrap();
    assert_eq!(frozen.breakdown.charge_lines[0].charge_id, charge.id);
    assert!(matches!(
        store
            .insert_snapshot(snapshot(owner, SnapshotStatus::Validated, charge.id))
            .await
            .unwrap_err(),
        SettlementError::SnapshotExists { snapshot_id, .. } if snapshot_id == draft.id
    ));
    assert!(matches!(
        store.delete_charge(charge.id).await.unwrap_err(),
        SettlementError::ChargeLocked { snapshot_id, .. } if snapshot_id == draft.id
    ));
    assert!(matches!(
        store.replace_draft(frozen).await.unwrap_err(),
        SettlementError::SnapshotFrozen { .. }
    ));
    assert_eq!(store.snapshots_for_owner(owner).await.unwrap().len(), 2);
}

#[tokio::test]
async fn events_stream_in_append_order() {
    let Some(store) = store().await else { return };
    let lease = Uuid::new_v4();
    let at = Utc::now();

    let first = store
        .append(SettlementEvent::new(
            lease,
            SettlementEventKind::ObligationsGenerated,
            at,
            json!({ "count": 12 }),
        ))
        .await
        .unwrap();
    let second = store
        .append(SettlementEvent::new(
            lease,
            SettlementEventKind::PaymentValidated,
            at,
            json!({ "amount": "900" }),
        ))
        .await
        .unwrap();
    assert!(second.sequence > first.sequence);

    let stream = store.stream(lease).await.unwrap();
    let kinds: Vec<_> = stream.iter().map(|e| e.event.kind).collect();
    assert_eq!(
        kinds,
        vec![
            SettlementEventKind::ObligationsGenerated,
            SettlementEventKind::PaymentValidated
        ]
    );
    assert_eq!(stream[0].event.payload["count"], 12);
}
