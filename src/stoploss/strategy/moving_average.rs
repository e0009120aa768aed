// =============================================================================
// Moving-average exit
// =============================================================================
//
// stop = MA × (1 − offset), take = MA × (1 + offset)
//
// The MA is supplied externally through `set_ma` and is applied on the next
// `calculate_*` call. The price passed to `calculate_*` does not move the
// levels; `reset(price)` seeds the MA with that price.
// =============================================================================

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use super::band::{BandStop, Bands, DebouncedStop};
use super::ensure_fraction;
use crate::error::StrategyError;
use crate::types::{IndicatorUpdate, StrategyKind, TriggerCallback};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovingAverageBands {
    ma: Decimal,
    offset: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
}

impl MovingAverageBands {
    pub fn new(initial_ma: Decimal, offset: Decimal) -> Result<Self, StrategyError> {
        ensure_ma(initial_ma)?;
        ensure_fraction(offset)?;
        let mut bands = Self {
            ma: initial_ma,
            offset,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
        };
        bands.reset(initial_ma);
        Ok(bands)
    }

    pub fn ma(&self) -> Decimal {
        self.ma
    }

    pub fn offset(&self) -> Decimal {
        self.offset
    }

    pub fn set_ma(&mut self, ma: Decimal) -> Result<(), StrategyError> {
        ensure_ma(ma)?;
        self.ma = ma;
        Ok(())
    }
}

fn ensure_ma(ma: Decimal) -> Result<(), StrategyError> {
    if ma > Decimal::ZERO {
        Ok(())
    } else {
        Err(StrategyError::InvalidMovingAverage { value: ma })
    }
}

impl Bands for MovingAverageBands {
    const KIND: StrategyKind = StrategyKind::MovingAverage;

    fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    fn take_profit(&self) -> Decimal {
        self.take_profit
    }

    fn rebase_stop_loss(&mut self, _price: Decimal) -> Decimal {
        self.stop_loss = self.ma * (Decimal::ONE - self.offset);
        self.stop_loss
    }

    fn rebase_take_profit(&mut self, _price: Decimal) -> Decimal {
        self.take_profit = self.ma * (Decimal::ONE + self.offset);
        self.take_profit
    }

    fn reset(&mut self, price: Decimal) {
        self.ma = price;
        self.rebase_stop_loss(price);
        self.rebase_take_profit(price);
    }

    fn apply(&mut self, update: IndicatorUpdate) -> Result<(), StrategyError> {
        match update {
            IndicatorUpdate::MovingAverage(ma) => {
                self.set_ma(ma)?;
                debug!(ma = %ma, "moving average updated");
                Ok(())
            }
            IndicatorUpdate::Atr(_) => Err(StrategyError::UnsupportedUpdate { kind: Self::KIND }),
        }
    }
}

pub type MovingAverageStop = BandStop<MovingAverageBands>;
pub type DebouncedMovingAverageStop = DebouncedStop<MovingAverageBands>;

impl MovingAverageStop {
    pub fn new(
        initial_ma: Decimal,
        offset: Decimal,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        Ok(Self::from_bands(MovingAverageBands::new(initial_ma, offset)?, callback))
    }

    pub fn set_ma(&mut self, ma: Decimal) -> Result<(), StrategyError> {
        self.active_bands_mut()?.set_ma(ma)
    }
}

impl DebouncedMovingAverageStop {
    pub fn new(
        initial_ma: Decimal,
        offset: Decimal,
        time_threshold: Duration,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        Self::from_bands(
            MovingAverageBands::new(initial_ma, offset)?,
            time_threshold,
            callback,
        )
    }

    pub fn set_ma(&mut self, ma: Decimal) -> Result<(), StrategyError> {
        self.active_bands_mut()?.set_ma(ma)
    }
}
