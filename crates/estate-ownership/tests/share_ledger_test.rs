use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use estate_core::{
    EventEnvelope, EventStore, SettlementError, SettlementEvent, SettlementEventKind,
    SettlementPolicy, SettlementResult, ShareInput,
};
use estate_ownership::ShareLedger;
use estate_store::{FixedClock, InMemoryStore};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn setup() -> (ShareLedger, Arc<InMemoryStore>, Arc<FixedClock>) {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(FixedClock::on(date(2025, 1, 15)));
    let ledger = ShareLedger::new(
        store.clone(),
        store.clone(),
        clock.clone(),
        SettlementPolicy::default(),
    );
    (ledger, store, clock)
}

#[tokio::test]
async fn halves_give_each_owner_fifty_percent() {
    let (ledger, _, _) = setup();
    let unit = Uuid::new_v4();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    ledger
        .set_ownership(
            unit,
            date(2024, 1, 1),
            &[ShareInput::new(a, 1, 2), ShareInput::new(b, 1, 2)],
        )
        .await
        .unwrap();

    assert_eq!(
        ledger.percentage_of(a, unit, date(2025, 1, 15)).await.unwrap(),
        dec!(50)
    );
    assert_eq!(
        ledger.percentage_of(b, unit, date(2025, 1, 15)).await.unwrap(),
        dec!(50)
    );
}

#[tokio::test]
async fn shares_at_returns_exactly_the_partition() {
    let (ledger, _, _) = setup();
    let unit = Uuid::new_v4();
    let owners = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let inputs: Vec<ShareInput> = owners.iter().map(|o| ShareInput::new(*o, 1, 3)).collect();

    ledger
        .set_ownership(unit, date(2024, 1, 1), &inputs)
        .await
        .unwrap();

    for day in [date(2024, 1, 1), date(2024, 7, 14), date(2031, 12, 31)] {
        let mut active: Vec<(Uuid, u32, u32)> = ledger
            .shares_at(unit, day)
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.owner_id, s.numerator, s.denominator))
            .collect();
        active.sort();
        let mut expected: Vec<(Uuid, u32, u32)> =
            inputs.iter().map(|i| (i.owner_id, i.numerator, i.denominator)).collect();
        expected.sort();
        assert_eq!(active, expected);
    }
}

#[tokio::test]
async fn sums_off_by_more_than_epsilon_are_rejected() {
    let (ledger, store, _) = setup();
    let unit = Uuid::new_v4();

    let err = ledger
        .set_ownership(
            unit,
            date(2024, 1, 1),
            &[
                ShareInput::new(Uuid::new_v4(), 1, 2),
                ShareInput::new(Uuid::new_v4(), 1, 3),
            ],
        )
        .await
        .unwrap_err();
    match err {
        SettlementError::InvalidPartition { unit_id, total } => {
            assert_eq!(unit_id, unit);
            assert!((total - dec!(0.8333)).abs() < dec!(0.0001));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = ledger
        .set_ownership(
            unit,
            date(2024, 1, 1),
            &[
                ShareInput::new(Uuid::new_v4(), 3, 4),
                ShareInput::new(Uuid::new_v4(), 1, 2),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::InvalidPartition { .. }));

    // Nothing was written by either attempt.
    assert!(ledger.history(unit).await.unwrap().is_empty());
    assert!(store.stream(unit).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_partition_is_invalid() {
    let (ledger, _, _) = setup();
    let unit = Uuid::new_v4();
    let err = ledger
        .set_ownership(unit, date(2024, 1, 1), &[])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SettlementError::InvalidPartition {
            unit_id: unit,
            total: Decimal::ZERO
        }
    );
}

#[tokio::test]
async fn malformed_and_duplicate_shares_are_rejected() {
    let (ledger, _, _) = setup();
    let unit = Uuid::new_v4();
    let owner = Uuid::new_v4();

    let err = ledger
        .set_ownership(unit, date(2024, 1, 1), &[ShareInput::new(owner, 2, 1)])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SettlementError::InvalidShare {
            owner_id: owner,
            numerator: 2,
            denominator: 1
        }
    );

    let err = ledger
        .set_ownership(unit, date(2024, 1, 1), &[ShareInput::new(owner, 0, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::InvalidShare { .. }));

    let err = ledger
        .set_ownership(
            unit,
            date(2024, 1, 1),
            &[ShareInput::new(owner, 1, 2), ShareInput::new(owner, 1, 2)],
        )
        .await
        .unwrap_err();
    assert_eq!(err, SettlementError::DuplicateOwner { owner_id: owner });
}

#[tokio::test]
async fn reassignment_closes_history_instead_of_deleting_it() {
    let (ledger, store, _) = setup();
    let unit = Uuid::new_v4();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    ledger
        .set_ownership(
            unit,
            date(2024, 1, 1),
            &[ShareInput::new(a, 1, 2), ShareInput::new(b, 1, 2)],
        )
        .await
        .unwrap();
    ledger
        .set_ownership(
            unit,
            date(2025, 7, 1),
            &[ShareInput::new(a, 1, 4), ShareInput::new(c, 3, 4)],
        )
        .await
        .unwrap();

    assert_eq!(ledger.history(unit).await.unwrap().len(), 4);
    assert_eq!(
        ledger.percentage_of(b, unit, date(2025, 6, 30)).await.unwrap(),
        dec!(50)
    );
    assert_eq!(
        ledger.percentage_of(b, unit, date(2025, 7, 1)).await.unwrap(),
        Decimal::ZERO
    );
    assert_eq!(
        ledger.percentage_of(a, unit, date(2025, 7, 1)).await.unwrap(),
        dec!(25)
    );
    assert_eq!(ledger.shares_at(unit, date(2025, 6, 30)).await.unwrap().len(), 2);

    let events = store.stream(unit).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| e.event.kind == SettlementEventKind::OwnershipReassigned));
}

#[tokio::test]
async fn no_partition_before_first_assignment_is_a_hard_error() {
    let (ledger, _, _) = setup();
    let unit = Uuid::new_v4();
    let owner = Uuid::new_v4();
    ledger
        .set_ownership(unit, date(2024, 1, 1), &[ShareInput::new(owner, 1, 1)])
        .await
        .unwrap();

    let err = ledger.shares_at(unit, date(2023, 12, 31)).await.unwrap_err();
    assert_eq!(
        err,
        SettlementError::NoActivePartition {
            unit_id: unit,
            date: date(2023, 12, 31)
        }
    );
    // The convenience lookup reports zero instead.
    assert_eq!(
        ledger.percentage_of(owner, unit, date(2023, 12, 31)).await.unwrap(),
        Decimal::ZERO
    );
}

#[tokio::test]
async fn default_effective_date_comes_from_the_clock() {
    let (ledger, _, clock) = setup();
    let unit = Uuid::new_v4();
    let owner = Uuid::new_v4();
    clock.set_date(date(2025, 4, 2));

    let stored = ledger
        .set_ownership_today(unit, &[ShareInput::new(owner, 1, 1)])
        .await
        .unwrap();
    assert_eq!(stored[0].effective_from, date(2025, 4, 2));
}

struct UnreachableEventLog;

#[async_trait]
impl EventStore for UnreachableEventLog {
    async fn append(&self, _event: SettlementEvent) -> SettlementResult<EventEnvelope> {
        Err(SettlementError::Storage("event log down".into()))
    }

    async fn stream(&self, _stream_id: Uuid) -> SettlementResult<Vec<EventEnvelope>> {
        Err(SettlementError::Storage("event log down".into()))
    }
}

#[tokio::test]
async fn partition_stands_when_the_event_log_is_down() {
    let store = Arc::new(InMemoryStore::new());
    let ledger = ShareLedger::new(
        store.clone(),
        Arc::new(UnreachableEventLog),
        Arc::new(FixedClock::on(date(2025, 1, 15))),
        SettlementPolicy::default(),
    );
    let unit = Uuid::new_v4();
    let owner = Uuid::new_v4();

    let stored = ledger
        .set_ownership(unit, date(2024, 1, 1), &[ShareInput::new(owner, 1, 1)])
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(ledger.history(unit).await.unwrap(), stored);
    assert_eq!(
        ledger.percentage_of(owner, unit, date(2024, 6, 1)).await.unwrap(),
        dec!(100)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_reassignments_leave_one_open_partition() {
    let (ledger, _, _) = setup();
    let unit = Uuid::new_v4();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let halves = [ShareInput::new(a, 1, 2), ShareInput::new(b, 1, 2)];
    let whole = [ShareInput::new(c, 1, 1)];

    let (first, second) = tokio::join!(
        ledger.set_ownership(unit, date(2025, 2, 1), &halves),
        ledger.set_ownership(unit, date(2025, 2, 1), &whole),
    );

    let (winner, loser) = match (first, second) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("expected one success and one refusal, got {other:?}"),
    };
    assert!(matches!(loser, SettlementError::RetroactivePartition { .. }));

    let mut open: Vec<Uuid> = ledger
        .history(unit)
        .await
        .unwrap()
        .iter()
        .filter(|share| share.effective_to.is_none())
        .map(|share| share.owner_id)
        .collect();
    let mut expected: Vec<Uuid> = winner.iter().map(|share| share.owner_id).collect();
    open.sort();
    expected.sort();
    assert_eq!(open, expected);
}
