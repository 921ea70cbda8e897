use estate_core::{FeeLine, LiquidationBreakdown, SettlementPolicy};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rounded figures of a liquidation, derived from its breakdown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftTotals {
    pub total_rent_base: Decimal,
    pub total_charges: Decimal,
    pub total_fees: Decimal,
    pub net_amount: Decimal,
}

impl DraftTotals {
    /// Sums stay at full precision until here. The fees of all mandates are
    /// rounded once, then the net is rounded from the unrounded base and
    /// charges.
    pub fn settle(breakdown: &LiquidationBreakdown, policy: &SettlementPolicy) -> Self {
        let base = breakdown.rent_total();
        let charges = breakdown.charge_total();
        let fees = policy.round_money(breakdown.fee_total());
        Self {
            total_rent_base: policy.round_money(base),
            total_charges: policy.round_money(charges),
            total_fees: fees,
            net_amount: policy.round_money(base - charges - fees),
        }
    }
}

/// `amount × pct / 100`, unrounded.
pub(crate) fn portion(amount: Decimal, pct: Decimal) -> Decimal {
    amount * pct / Decimal::ONE_HUNDRED
}

pub(crate) fn fee_line(mandate_id: Uuid, fee_rate_pct: Decimal, rent_base: Decimal) -> FeeLine {
    FeeLine {
        mandate_id,
        fee_rate_pct,
        rent_base,
        fee: portion(rent_base, fee_rate_pct),
    }
}

#[cfg(test)]
mod tests {
    use estate_core::{ChargeLine, RentLine};
    use rust_decimal_macros::dec;

    use super::*;

    fn rent(amount_paid: Decimal, share_pct: Decimal) -> RentLine {
        RentLine {
            obligation_id: Uuid::new_v4(),
            lease_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            amount_paid,
            share_pct,
            owner_portion: portion(amount_paid, share_pct),
        }
    }

    fn charge(amount: Decimal, share_pct: Decimal) -> ChargeLine {
        ChargeLine {
            charge_id: Uuid::new_v4(),
            unit_id: None,
            amount,
            share_pct,
            owner_portion: portion(amount, share_pct),
        }
    }

    fn with_fee(mut breakdown: LiquidationBreakdown, fee_rate_pct: Decimal) -> LiquidationBreakdown {
        let base = breakdown.rent_total();
        breakdown.fee_lines = vec![fee_line(Uuid::new_v4(), fee_rate_pct, base)];
        breakdown
    }

    #[test]
    fn fees_come_off_the_owner_portion() {
        let breakdown = LiquidationBreakdown {
            rent_lines: vec![rent(dec!(1000), dec!(50)), rent(dec!(1000), dec!(30))],
            charge_lines: vec![],
            fee_lines: vec![],
        };
        let totals = DraftTotals::settle(&with_fee(breakdown, dec!(10)), &SettlementPolicy::default());
        assert_eq!(totals.total_rent_base, dec!(800));
        assert_eq!(totals.total_fees, dec!(80));
        assert_eq!(totals.net_amount, dec!(720));
        assert_eq!(totals.total_charges, Decimal::ZERO);
    }

    #[test]
    fn thirds_are_rounded_only_on_totals() {
        let third = Decimal::ONE_HUNDRED / dec!(3);
        let breakdown = LiquidationBreakdown {
            rent_lines: vec![rent(dec!(1000), third), rent(dec!(1000), third)],
            charge_lines: vec![charge(dec!(100), third)],
            fee_lines: vec![],
        };
        let totals = DraftTotals::settle(&with_fee(breakdown, dec!(7)), &SettlementPolicy::default());
        // 666.666.. base, 33.333.. charges, 46.67 fees.
        assert_eq!(totals.total_rent_base, dec!(666.67));
        assert_eq!(totals.total_charges, dec!(33.33));
        assert_eq!(totals.total_fees, dec!(46.67));
        assert_eq!(totals.net_amount, dec!(586.66));
    }

    #[test]
    fn net_may_be_negative() {
        let breakdown = LiquidationBreakdown {
            rent_lines: vec![rent(dec!(200), dec!(100))],
            charge_lines: vec![charge(dec!(1500), dec!(100))],
            fee_lines: vec![],
        };
        let totals = DraftTotals::settle(&with_fee(breakdown, dec!(8)), &SettlementPolicy::default());
        assert_eq!(totals.total_fees, dec!(16));
        assert_eq!(totals.net_amount, dec!(-1316));
    }

    #[test]
    fn each_mandate_applies_its_own_rate() {
        let breakdown = LiquidationBreakdown {
            rent_lines: vec![rent(dec!(1000), dec!(100)), rent(dec!(333.33), dec!(100))],
            charge_lines: vec![],
            fee_lines: vec![
                fee_line(Uuid::new_v4(), dec!(5), dec!(1000)),
                fee_line(Uuid::new_v4(), dec!(7.5), dec!(333.33)),
            ],
        };
        let totals = DraftTotals::settle(&breakdown, &SettlementPolicy::default());
        // 50 + 24.99975, rounded once.
        assert_eq!(totals.total_fees, dec!(75.00));
        assert_eq!(totals.net_amount, dec!(1258.33));
    }
}
