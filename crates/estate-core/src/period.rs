//! Calendar arithmetic shared by the ledgers.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};

use crate::error::{SettlementError, SettlementResult};

/// Closed-closed intersection test: `[a_start, a_end]` and `[b_start, b_end]`.
pub fn ranges_overlap(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Whether `date` falls in `[from, to]`, an absent `to` meaning open-ended.
pub fn covers(from: NaiveDate, to: Option<NaiveDate>, date: NaiveDate) -> bool {
    from <= date && to.is_none_or(|end| date <= end)
}

pub fn first_day(month: u32, year: i32) -> SettlementResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or(SettlementError::InvalidPeriod { month, year })
}

pub fn days_in_month(month: u32, year: i32) -> SettlementResult<u32> {
    let first = first_day(month, year)?;
    let next = first
        .checked_add_months(chrono::Months::new(1))
        .ok_or(SettlementError::InvalidPeriod { month, year })?;
    Ok((next - first).num_days() as u32)
}

/// Inclusive bounds of a calendar month.
pub fn month_bounds(month: u32, year: i32) -> SettlementResult<(NaiveDate, NaiveDate)> {
    let first = first_day(month, year)?;
    let last = first
        .checked_add_days(Days::new(u64::from(days_in_month(month, year)? - 1)))
        .ok_or(SettlementError::InvalidPeriod { month, year })?;
    Ok((first, last))
}

/// Half-open `[start, end)` instants of a calendar month, in UTC.
pub fn month_window(month: u32, year: i32) -> SettlementResult<(DateTime<Utc>, DateTime<Utc>)> {
    let (first, last) = month_bounds(month, year)?;
    let next = last
        .checked_add_days(Days::new(1))
        .ok_or(SettlementError::InvalidPeriod { month, year })?;
    Ok((
        first.and_time(chrono::NaiveTime::MIN).and_utc(),
        next.and_time(chrono::NaiveTime::MIN).and_utc(),
    ))
}

/// `day` of the given month, pulled back to the month's last day when the
/// month is shorter (the 31st in February lands on the 28th or 29th).
pub fn clamped_day(month: u32, year: i32, day: u32) -> SettlementResult<NaiveDate> {
    let last = days_in_month(month, year)?;
    NaiveDate::from_ymd_opt(year, month, day.clamp(1, last))
        .ok_or(SettlementError::InvalidPeriod { month, year })
}

/// Every (month, year) touched by `[start, end]`, in order.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<(u32, i32)> {
    let mut months = Vec::new();
    let (mut month, mut year) = (start.month(), start.year());
    while (year, month) <= (end.year(), end.month()) {
        months.push((month, year));
        if month == 12 {
            month = 1;
            year += 1;
        } else {
            month += 1;
        }
    }
    months
}
