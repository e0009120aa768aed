// =============================================================================
// Trailing exit: ratcheting percentage bands
// =============================================================================
//
// Candidates are the same as the fixed family, but committed levels only move
// in the position's favour:
//
//   stop_loss   = max(stop_loss,   price × (1 − pct))
//   take_profit = min(take_profit, price × (1 + pct))
//
// `reset` re-seeds both levels unconditionally.
// =============================================================================

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use super::band::{BandStop, Bands, DebouncedStop};
use super::{ensure_fraction, ensure_price};
use crate::error::StrategyError;
use crate::types::{StrategyKind, TriggerCallback};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailingBands {
    percentage: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
}

impl TrailingBands {
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

impl Bands for TrailingBands {
    const KIND: StrategyKind = StrategyKind::Trailing;

    fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    fn take_profit(&self) -> Decimal {
        self.take_profit
    }

    fn rebase_stop_loss(&mut self, price: Decimal) -> Decimal {
        let candidate = price * (Decimal::ONE - self.percentage);
        if candidate > self.stop_loss {
            debug!(from = %self.stop_loss, to = %candidate, "trailing stop raised");
            self.stop_loss = candidate;
        }
        self.stop_loss
    }

    fn rebase_take_profit(&mut self, price: Decimal) -> Decimal {
        let candidate = price * (Decimal::ONE + self.percentage);
        if candidate < self.take_profit {
            debug!(from = %self.take_profit, to = %candidate, "trailing take-profit lowered");
            self.take_profit = candidate;
        }
        self.take_profit
    }

    fn reset(&mut self, price: Decimal) {
        self.stop_loss = price * (Decimal::ONE - self.percentage);
        self.take_profit = price * (Decimal::ONE + self.percentage);
    }
}

pub type TrailingStop = BandStop<TrailingBands>;
pub type DebouncedTrailingStop = DebouncedStop<TrailingBands>;

impl TrailingStop {
    pub fn new(
        entry_price: Decimal,
        percentage: Decimal,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        Ok(Self::from_bands(TrailingBands::new(entry_price, percentage)?, callback))
    }
}

impl DebouncedTrailingStop {
    pub fn new(
        entry_price: Decimal,
        percentage: Decimal,
        time_threshold: Duration,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        Self::from_bands(
            TrailingBands::new(entry_price, percentage)?,
            time_threshold,
            callback,
        )
    }
}
