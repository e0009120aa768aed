// =============================================================================
// Exit Strategies
// =============================================================================
//
// Single-sided families (fixed, trailing, ATR, moving average) share the
// `BandStop` / `DebouncedStop` wrappers and differ only in their `Bands`
// implementation. Hybrid strategies (risk/reward, structure swing) compute
// both levels in one call and carry their own state.
//
// Every strategy implements `Strategy`, the object-safe surface used by the
// manager and the composite aggregator.

pub mod band;
pub mod fixed;
pub mod moving_average;
pub mod risk_reward;
pub mod structure;
pub mod trailing;
pub mod volatility;

use rust_decimal::Decimal;

use crate::error::StrategyError;
use crate::stoploss::resolver::PendingTrigger;
use crate::types::{IndicatorUpdate, PricePoint, StrategyKind};

pub use band::{BandStop, Bands, DebouncedStop};
pub use fixed::{DebouncedFixedStop, FixedPercentStop, PercentBands};
pub use moving_average::{DebouncedMovingAverageStop, MovingAverageBands, MovingAverageStop};
pub use risk_reward::RiskRewardStop;
pub use structure::StructureSwingStop;
pub use trailing::{DebouncedTrailingStop, TrailingBands, TrailingStop};
pub use volatility::{AtrBands, AtrStop, DebouncedAtrStop};

/// Object-safe capability set shared by every exit strategy.
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    fn is_active(&self) -> bool;

    /// Recompute thresholds from `price`.
    fn recalculate(&mut self, price: Decimal) -> Result<(), StrategyError>;

    /// Check the trigger condition against the committed thresholds without
    /// recomputing them. Time-gated strategies use `point.observed_at`.
    fn check(&mut self, point: &PricePoint) -> Result<bool, StrategyError>;

    /// Recompute from `point.price`, then check. This is what the manager
    /// runs for every delivered price.
    fn evaluate(&mut self, point: &PricePoint) -> Result<bool, StrategyError> {
        self.recalculate(point.price)?;
        self.check(point)
    }

    /// Primary protective level (the stop-loss for single-sided strategies).
    fn threshold(&self) -> Result<Decimal, StrategyError>;

    /// Re-activate and recompute every threshold from `price`.
    fn reset(&mut self, price: Decimal) -> Result<(), StrategyError>;

    fn deactivate(&mut self);

    /// Push an externally computed indicator value.
    fn apply_indicator(&mut self, _update: IndicatorUpdate) -> Result<(), StrategyError> {
        Err(StrategyError::UnsupportedUpdate { kind: self.kind() })
    }

    /// Queue trigger callbacks instead of running them inside `check`.
    /// Strategies without a callback of their own may ignore this.
    fn defer_callbacks(&mut self, _deferred: bool) {}

    /// Move triggers queued since the last drain into `out`.
    fn drain_triggers(&mut self, _out: &mut Vec<PendingTrigger>) {}
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn kind(&self) -> StrategyKind {
        (**self).kind()
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }

    fn recalculate(&mut self, price: Decimal) -> Result<(), StrategyError> {
        (**self).recalculate(price)
    }

    fn check(&mut self, point: &PricePoint) -> Result<bool, StrategyError> {
        (**self).check(point)
    }

    fn evaluate(&mut self, point: &PricePoint) -> Result<bool, StrategyError> {
        (**self).evaluate(point)
    }

    fn threshold(&self) -> Result<Decimal, StrategyError> {
        (**self).threshold()
    }

    fn reset(&mut self, price: Decimal) -> Result<(), StrategyError> {
        (**self).reset(price)
    }

    fn deactivate(&mut self) {
        (**self).deactivate()
    }

    fn apply_indicator(&mut self, update: IndicatorUpdate) -> Result<(), StrategyError> {
        (**self).apply_indicator(update)
    }

    fn defer_callbacks(&mut self, deferred: bool) {
        (**self).defer_callbacks(deferred)
    }

    fn drain_triggers(&mut self, out: &mut Vec<PendingTrigger>) {
        (**self).drain_triggers(out)
    }
}

/// Reject non-positive prices.
pub(crate) fn ensure_price(price: Decimal) -> Result<(), StrategyError> {
    if price > Decimal::ZERO {
        Ok(())
    } else {
        Err(StrategyError::InvalidPrice { value: price })
    }
}

/// Reject percentages outside `[0, 1]`.
pub(crate) fn ensure_fraction(value: Decimal) -> Result<(), StrategyError> {
    if (Decimal::ZERO..=Decimal::ONE).contains(&value) {
        Ok(())
    } else {
        Err(StrategyError::InvalidPercentage { value })
    }
}
