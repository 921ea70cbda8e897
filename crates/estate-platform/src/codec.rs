//! Row decoding and the text forms of the settlement enums.

use estate_core::{
    ChargeEntry, ChargePayer, ChargeTarget, ChargeTargetKind, EventEnvelope, FranchiseRule,
    LiquidationBreakdown, LiquidationSnapshot, ObligationStatus, OwnershipShare,
    PaymentObligation, SettlementError, SettlementEvent, SettlementEventKind, SettlementResult,
    SnapshotStatus,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use uuid::Uuid;

pub(crate) fn storage(err: sqlx::Error) -> SettlementError {
    SettlementError::Storage(err.to_string())
}

fn corrupt(what: &str, value: impl std::fmt::Display) -> SettlementError {
    SettlementError::Storage(format!("unexpected {what} in storage: {value}"))
}

pub(crate) fn month_column(month: u32, year: i32) -> SettlementResult<i32> {
    i32::try_from(month).map_err(|_| SettlementError::InvalidPeriod { month, year })
}

fn month_value(raw: i32) -> SettlementResult<u32> {
    u32::try_from(raw).map_err(|_| corrupt("month", raw))
}

fn share_term(raw: i64) -> SettlementResult<u32> {
    u32::try_from(raw).map_err(|_| corrupt("share term", raw))
}

pub(crate) fn target_kind(raw: &str) -> SettlementResult<ChargeTargetKind> {
    Ok(match raw {
        "lease" => ChargeTargetKind::Lease,
        "unit" => ChargeTargetKind::Unit,
        "intervention" => ChargeTargetKind::Intervention,
        "complaint" => ChargeTargetKind::Complaint,
        "tenant" => ChargeTargetKind::Tenant,
        "owner" => ChargeTargetKind::Owner,
        "free_standing" => ChargeTargetKind::FreeStanding,
        other => return Err(corrupt("charge target kind", other)),
    })
}

/// `(payer_kind, payer_id)` columns of a payer.
pub(crate) fn payer_columns(payer: ChargePayer) -> (&'static str, Option<Uuid>) {
    match payer {
        ChargePayer::Tenant(id) => ("tenant", Some(id)),
        ChargePayer::Owner(id) => ("owner", Some(id)),
        ChargePayer::OwnersOfUnit(unit_id) => ("owners_of_unit", Some(unit_id)),
        ChargePayer::Company => ("company", None),
    }
}

fn payer(kind: &str, id: Option<Uuid>) -> SettlementResult<ChargePayer> {
    match (kind, id) {
        ("tenant", Some(id)) => Ok(ChargePayer::Tenant(id)),
        ("owner", Some(id)) => Ok(ChargePayer::Owner(id)),
        ("owners_of_unit", Some(unit_id)) => Ok(ChargePayer::OwnersOfUnit(unit_id)),
        ("company", _) => Ok(ChargePayer::Company),
        (other, _) => Err(corrupt("charge payer", other)),
    }
}

pub(crate) fn obligation_status(raw: &str) -> SettlementResult<ObligationStatus> {
    Ok(match raw {
        "pending" => ObligationStatus::Pending,
        "validated" => ObligationStatus::Validated,
        "late" => ObligationStatus::Late,
        "cancelled" => ObligationStatus::Cancelled,
        other => return Err(corrupt("obligation status", other)),
    })
}

pub(crate) fn snapshot_status(raw: &str) -> SettlementResult<SnapshotStatus> {
    Ok(match raw {
        "draft" => SnapshotStatus::Draft,
        "validated" => SnapshotStatus::Validated,
        "paid" => SnapshotStatus::Paid,
        other => return Err(corrupt("snapshot status", other)),
    })
}

pub(crate) fn event_kind_text(kind: SettlementEventKind) -> SettlementResult<String> {
    match serde_json::to_value(kind) {
        Ok(serde_json::Value::String(text)) => Ok(text),
        Ok(other) => Err(corrupt("event kind", other)),
        Err(err) => Err(SettlementError::Storage(err.to_string())),
    }
}

fn event_kind(raw: String) -> SettlementResult<SettlementEventKind> {
    serde_json::from_value(serde_json::Value::String(raw.clone()))
        .map_err(|_| corrupt("event kind", raw))
}

pub(crate) fn share(row: &PgRow) -> SettlementResult<OwnershipShare> {
    Ok(OwnershipShare {
        id: row.try_get("id").map_err(storage)?,
        unit_id: row.try_get("unit_id").map_err(storage)?,
        owner_id: row.try_get("owner_id").map_err(storage)?,
        numerator: share_term(row.try_get("numerator").map_err(storage)?)?,
        denominator: share_term(row.try_get("denominator").map_err(storage)?)?,
        effective_from: row.try_get("effective_from").map_err(storage)?,
        effective_to: row.try_get("effective_to").map_err(storage)?,
    })
}

pub(crate) fn rule(row: &PgRow) -> SettlementResult<FranchiseRule> {
    Ok(FranchiseRule {
        id: row.try_get("id").map_err(storage)?,
        lease_id: row.try_get("lease_id").map_err(storage)?,
        start_date: row.try_get("start_date").map_err(storage)?,
        end_date: row.try_get("end_date").map_err(storage)?,
        discount_pct: row.try_get("discount_pct").map_err(storage)?,
        reason: row.try_get("reason").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

pub(crate) fn charge(row: &PgRow) -> SettlementResult<ChargeEntry> {
    let kind: String = row.try_get("target_kind").map_err(storage)?;
    let target_id: Option<Uuid> = row.try_get("target_id").map_err(storage)?;
    let payer_kind: String = row.try_get("payer_kind").map_err(storage)?;
    let payer_id: Option<Uuid> = row.try_get("payer_id").map_err(storage)?;
    Ok(ChargeEntry {
        id: row.try_get("id").map_err(storage)?,
        target: ChargeTarget::from_parts(target_kind(&kind)?, target_id)?,
        payer: payer(&payer_kind, payer_id)?,
        amount: row.try_get("amount").map_err(storage)?,
        label: row.try_get("label").map_err(storage)?,
        notes: row.try_get("notes").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

pub(crate) fn obligation(row: &PgRow) -> SettlementResult<PaymentObligation> {
    let status: String = row.try_get("status").map_err(storage)?;
    Ok(PaymentObligation {
        id: row.try_get("id").map_err(storage)?,
        lease_id: row.try_get("lease_id").map_err(storage)?,
        month: month_value(row.try_get("month").map_err(storage)?)?,
        year: row.try_get("year").map_err(storage)?,
        due_date: row.try_get("due_date").map_err(storage)?,
        amount_due: row.try_get("amount_due").map_err(storage)?,
        amount_paid: row.try_get("amount_paid").map_err(storage)?,
        status: obligation_status(&status)?,
        paid_at: row.try_get("paid_at").map_err(storage)?,
        payment_method: row.try_get("payment_method").map_err(storage)?,
        reference: row.try_get("reference").map_err(storage)?,
    })
}

pub(crate) fn snapshot(row: &PgRow) -> SettlementResult<LiquidationSnapshot> {
    let status: String = row.try_get("status").map_err(storage)?;
    let Json(breakdown): Json<LiquidationBreakdown> =
        row.try_get("breakdown").map_err(storage)?;
    Ok(LiquidationSnapshot {
        id: row.try_get("id").map_err(storage)?,
        owner_id: row.try_get("owner_id").map_err(storage)?,
        mandate_id: row.try_get("mandate_id").map_err(storage)?,
        month: month_value(row.try_get("month").map_err(storage)?)?,
        year: row.try_get("year").map_err(storage)?,
        total_rent_base: row.try_get("total_rent_base").map_err(storage)?,
        total_charges: row.try_get("total_charges").map_err(storage)?,
        total_fees: row.try_get("total_fees").map_err(storage)?,
        net_amount: row.try_get("net_amount").map_err(storage)?,
        status: snapshot_status(&status)?,
        breakdown,
        created_by: row.try_get("created_by").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

pub(crate) fn envelope(row: &PgRow) -> SettlementResult<EventEnvelope> {
    let stream_id: Uuid = row.try_get("stream_id").map_err(storage)?;
    Ok(EventEnvelope {
        sequence: row.try_get("sequence").map_err(storage)?,
        stream_id,
        event: SettlementEvent {
            id: row.try_get("id").map_err(storage)?,
            aggregate_id: stream_id,
            kind: event_kind(row.try_get("kind").map_err(storage)?)?,
            occurred_at: row.try_get("occurred_at").map_err(storage)?,
            payload: row.try_get("payload").map_err(storage)?,
        },
        stored_at: row.try_get("stored_at").map_err(storage)?,
    })
}
