use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Numeric knobs of the settlement engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementPolicy {
    /// Tolerance on the sum of share fractions (1 means 100%).
    pub partition_epsilon: Decimal,
    /// Fractional digits kept on settled amounts.
    pub money_scale: u32,
    /// Day of month used as the liquidation reference date.
    pub reference_day: u32,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            partition_epsilon: Decimal::new(1, 4),
            money_scale: 2,
            reference_day: 15,
        }
    }
}

impl SettlementPolicy {
    /// Round half-up on magnitude. Only applied at the settlement boundary.
    pub fn round_money(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.money_scale, RoundingStrategy::MidpointAwayFromZero)
    }

    pub fn is_whole(&self, total: Decimal) -> bool {
        (total - Decimal::ONE).abs() <= self.partition_epsilon
    }
}
