use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SettlementError, SettlementResult};
use crate::period;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unit {
    pub id: Uuid,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub tenant_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub monthly_rent: Decimal,
}

impl Lease {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        period::covers(self.start_date, self.end_date, date)
    }
}

/// A management mandate: the units an owner entrusts to the agency and the
/// commission taken on collected rent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mandate {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub unit_ids: Vec<Uuid>,
    pub fee_rate_pct: Decimal,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl Mandate {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        period::covers(self.start_date, self.end_date, date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Intervention {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Complaint {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub subject: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShareInput {
    pub owner_id: Uuid,
    pub numerator: u32,
    pub denominator: u32,
}

impl ShareInput {
    pub fn new(owner_id: Uuid, numerator: u32, denominator: u32) -> Self {
        Self {
            owner_id,
            numerator,
            denominator,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.numerator > 0 && self.denominator >= self.numerator
    }

    /// Caller must check [`ShareInput::is_well_formed`] first.
    pub fn fraction(&self) -> Decimal {
        Decimal::from(self.numerator) / Decimal::from(self.denominator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnershipShare {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub owner_id: Uuid,
    pub numerator: u32,
    pub denominator: u32,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl OwnershipShare {
    pub fn fraction(&self) -> Decimal {
        Decimal::from(self.numerator) / Decimal::from(self.denominator)
    }

    pub fn percentage(&self) -> Decimal {
        self.fraction() * Decimal::ONE_HUNDRED
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        period::covers(self.effective_from, self.effective_to, date)
    }

    pub fn is_open(&self) -> bool {
        self.effective_to.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FranchiseRule {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub discount_pct: Decimal,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl FranchiseRule {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        period::ranges_overlap(self.start_date, self.end_date, start, end)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChargeTargetKind {
    Lease,
    Unit,
    Intervention,
    Complaint,
    Tenant,
    Owner,
    FreeStanding,
}

impl ChargeTargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lease => "lease",
            Self::Unit => "unit",
            Self::Intervention => "intervention",
            Self::Complaint => "complaint",
            Self::Tenant => "tenant",
            Self::Owner => "owner",
            Self::FreeStanding => "free_standing",
        }
    }
}

impl fmt::Display for ChargeTargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ChargeTarget {
    Lease(Uuid),
    Unit(Uuid),
    Intervention(Uuid),
    Complaint(Uuid),
    Tenant(Uuid),
    Owner(Uuid),
    FreeStanding,
}

impl ChargeTarget {
    pub fn from_parts(kind: ChargeTargetKind, id: Option<Uuid>) -> SettlementResult<Self> {
        let required = || id.ok_or(SettlementError::MissingTarget { kind });
        Ok(match kind {
            ChargeTargetKind::Lease => Self::Lease(required()?),
            ChargeTargetKind::Unit => Self::Unit(required()?),
            ChargeTargetKind::Intervention => Self::Intervention(required()?),
            ChargeTargetKind::Complaint => Self::Complaint(required()?),
            ChargeTargetKind::Tenant => Self::Tenant(required()?),
            ChargeTargetKind::Owner => Self::Owner(required()?),
            ChargeTargetKind::FreeStanding => Self::FreeStanding,
        })
    }

    pub fn kind(&self) -> ChargeTargetKind {
        match self {
            Self::Lease(_) => ChargeTargetKind::Lease,
            Self::Unit(_) => ChargeTargetKind::Unit,
            Self::Intervention(_) => ChargeTargetKind::Intervention,
            Self::Complaint(_) => ChargeTargetKind::Complaint,
            Self::Tenant(_) => ChargeTargetKind::Tenant,
            Self::Owner(_) => ChargeTargetKind::Owner,
            Self::FreeStanding => ChargeTargetKind::FreeStanding,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        match *self {
            Self::Lease(id)
            | Self::Unit(id)
            | Self::Intervention(id)
            | Self::Complaint(id)
            | Self::Tenant(id)
            | Self::Owner(id) => Some(id),
            Self::FreeStanding => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PayerKind {
    Tenant,
    Owner,
    Company,
}

impl PayerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Owner => "owner",
            Self::Company => "company",
        }
    }
}

impl fmt::Display for PayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who settles a charge once it has been resolved.
///
/// `OwnersOfUnit` is the joint case: every owner of the unit pays their share
/// of the amount, as of the owner's partition at liquidation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ChargePayer {
    Tenant(Uuid),
    Owner(Uuid),
    OwnersOfUnit(Uuid),
    Company,
}

impl ChargePayer {
    pub fn kind(&self) -> PayerKind {
        match self {
            Self::Tenant(_) => PayerKind::Tenant,
            Self::Owner(_) | Self::OwnersOfUnit(_) => PayerKind::Owner,
            Self::Company => PayerKind::Company,
        }
    }

    pub fn payer_id(&self) -> Option<Uuid> {
        match *self {
            Self::Tenant(id) | Self::Owner(id) => Some(id),
            Self::OwnersOfUnit(_) | Self::Company => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChargeEntry {
    pub id: Uuid,
    pub target: ChargeTarget,
    pub payer: ChargePayer,
    pub amount: Decimal,
    pub label: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCharge {
    pub target_kind: ChargeTargetKind,
    pub target_id: Option<Uuid>,
    pub payer_kind: PayerKind,
    pub payer_id: Option<Uuid>,
    pub amount: Decimal,
    pub label: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Pending,
    Validated,
    Late,
    Cancelled,
}

impl ObligationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Late => "late",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ObligationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentObligation {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub month: u32,
    pub year: i32,
    pub due_date: NaiveDate,
    pub amount_due: Decimal,
    pub amount_paid: Decimal,
    pub status: ObligationStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub reference: Option<String>,
}

impl PaymentObligation {
    pub fn is_for(&self, month: u32, year: i32) -> bool {
        self.month == month && self.year == year
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub amount_paid: Decimal,
    pub method: String,
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Draft,
    Validated,
    Paid,
}

impl SnapshotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Validated => "validated",
            Self::Paid => "paid",
        }
    }

    pub fn is_frozen(self) -> bool {
        !matches!(self, Self::Draft)
    }

    /// Only forward moves are allowed: draft -> validated -> paid.
    pub fn can_move_to(self, next: SnapshotStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Validated) | (Self::Validated, Self::Paid)
        )
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    Draft,
    Validated,
}

impl PersistMode {
    pub fn status(self) -> SnapshotStatus {
        match self {
            Self::Draft => SnapshotStatus::Draft,
            Self::Validated => SnapshotStatus::Validated,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub owner_id: Uuid,
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RentLine {
    pub obligation_id: Uuid,
    pub lease_id: Uuid,
    pub unit_id: Uuid,
    pub amount_paid: Decimal,
    pub share_pct: Decimal,
    pub owner_portion: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChargeLine {
    pub charge_id: Uuid,
    pub unit_id: Option<Uuid>,
    pub amount: Decimal,
    pub share_pct: Decimal,
    pub owner_portion: Decimal,
}

/// Management fee owed under one mandate, on the rent of that mandate's units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeLine {
    pub mandate_id: Uuid,
    pub fee_rate_pct: Decimal,
    pub rent_base: Decimal,
    pub fee: Decimal,
}

/// Every obligation and charge that fed a snapshot, with the portion credited
/// or debited to the owner, and the fee of each mandate involved. Enough to
/// audit the totals without recomputing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquidationBreakdown {
    pub rent_lines: Vec<RentLine>,
    pub charge_lines: Vec<ChargeLine>,
    #[serde(default)]
    pub fee_lines: Vec<FeeLine>,
}

impl LiquidationBreakdown {
    pub fn obligation_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.rent_lines.iter().map(|line| line.obligation_id)
    }

    pub fn charge_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.charge_lines.iter().map(|line| line.charge_id)
    }

    pub fn references_charge(&self, charge_id: Uuid) -> bool {
        self.charge_ids().any(|id| id == charge_id)
    }

    pub fn rent_total(&self) -> Decimal {
        self.rent_lines.iter().map(|line| line.owner_portion).sum()
    }

    pub fn charge_total(&self) -> Decimal {
        self.charge_lines.iter().map(|line| line.owner_portion).sum()
    }

    pub fn fee_total(&self) -> Decimal {
        self.fee_lines.iter().map(|line| line.fee).sum()
    }

    pub fn mandate_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.fee_lines.iter().map(|line| line.mandate_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquidationSnapshot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub mandate_id: Option<Uuid>,
    pub month: u32,
    pub year: i32,
    pub total_rent_base: Decimal,
    pub total_charges: Decimal,
    pub total_fees: Decimal,
    pub net_amount: Decimal,
    pub status: SnapshotStatus,
    pub breakdown: LiquidationBreakdown,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LiquidationSnapshot {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            owner_id: self.owner_id,
            month: self.month,
            year: self.year,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_without_id_is_missing_unless_free_standing() {
        assert_eq!(
            ChargeTarget::from_parts(ChargeTargetKind::Unit, None),
            Err(SettlementError::MissingTarget {
                kind: ChargeTargetKind::Unit
            })
        );
        assert_eq!(
            ChargeTarget::from_parts(ChargeTargetKind::FreeStanding, None),
            Ok(ChargeTarget::FreeStanding)
        );

        let lease_id = Uuid::new_v4();
        let target = ChargeTarget::from_parts(ChargeTargetKind::Lease, Some(lease_id)).unwrap();
        assert_eq!(target, ChargeTarget::Lease(lease_id));
        assert_eq!(target.kind(), ChargeTargetKind::Lease);
        assert_eq!(target.id(), Some(lease_id));
    }

    #[test]
    fn joint_owner_payer_reports_owner_kind_without_id() {
        let payer = ChargePayer::OwnersOfUnit(Uuid::new_v4());
        assert_eq!(payer.kind(), PayerKind::Owner);
        assert_eq!(payer.payer_id(), None);
    }

    #[test]
    fn snapshot_moves_only_forward() {
        assert!(SnapshotStatus::Draft.can_move_to(SnapshotStatus::Validated));
        assert!(SnapshotStatus::Validated.can_move_to(SnapshotStatus::Paid));
        assert!(!SnapshotStatus::Draft.can_move_to(SnapshotStatus::Paid));
        assert!(!SnapshotStatus::Paid.can_move_to(SnapshotStatus::Validated));
        assert!(!SnapshotStatus::Validated.can_move_to(SnapshotStatus::Draft));
        assert!(SnapshotStatus::Paid.is_frozen());
        assert!(!SnapshotStatus::Draft.is_frozen());
    }

    #[test]
    fn share_percentage_is_derived_from_the_fraction() {
        let share = OwnershipShare {
            id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            numerator: 3,
            denominator: 10,
            effective_from: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            effective_to: None,
        };
        assert_eq!(share.percentage(), Decimal::from(30));
        assert!(share.is_open());
    }
}
