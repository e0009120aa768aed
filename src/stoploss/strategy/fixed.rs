// =============================================================================
// Fixed-percentage exit
// =============================================================================
//
// stop = price × (1 − pct), take = price × (1 + pct)
//
// Both levels are rebased on every `calculate_*` call from the price passed
// in. Callers that want a level anchored at entry call `calculate_*` once and
// then only `should_trigger_*`.
// =============================================================================

use std::time::Duration;

use rust_decimal::Decimal;

use super::band::{BandStop, Bands, DebouncedStop};
use super::{ensure_fraction, ensure_price};
use crate::error::StrategyError;
use crate::types::{StrategyKind, TriggerCallback};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PercentBands {
    percentage: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
}

impl PercentBands {
    pub fn new(entry_price: Decimal, percentage: Decimal) -> Result<Self, StrategyError> {
        ensure_price(entry_price)?;
        ensure_fraction(percentage)?;
        let mut bands = Self {
            percentage,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
        };
        bands.reset(entry_price);
        Ok(bands)
    }

    pub fn percentage(&self) -> Decimal {
        self.percentage
    }
}

impl Bands for PercentBands {
    const KIND: StrategyKind = StrategyKind::FixedPercent;

    fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    fn take_profit(&self) -> Decimal {
        self.take_profit
    }

    fn rebase_stop_loss(&mut self, price: Decimal) -> Decimal {
        self.stop_loss = price * (Decimal::ONE - self.percentage);
        self.stop_loss
    }

    fn rebase_take_profit(&mut self, price: Decimal) -> Decimal {
        self.take_profit = price * (Decimal::ONE + self.percentage);
        self.take_profit
    }

    fn reset(&mut self, price: Decimal) {
        self.rebase_stop_loss(price);
        self.rebase_take_profit(price);
    }
}

pub type FixedPercentStop = BandStop<PercentBands>;
pub type DebouncedFixedStop = DebouncedStop<PercentBands>;

impl FixedPercentStop {
    pub fn new(
        entry_price: Decimal,
        percentage: Decimal,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        Ok(Self::from_bands(PercentBands::new(entry_price, percentage)?, callback))
    }
}

impl DebouncedFixedStop {
    pub fn new(
        entry_price: Decimal,
        percentage: Decimal,
        time_threshold: Duration,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        Self::from_bands(
            PercentBands::new(entry_price, percentage)?,
            time_threshold,
            callback,
        )
    }
}
