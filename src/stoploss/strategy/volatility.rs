// =============================================================================
// ATR-volatility exit
// =============================================================================
//
// stop = reference − ATR × k, take = reference + ATR × k
//
// `k` is fixed at construction. The ATR is pushed in from outside (see
// `indicators::atr`) and takes effect on the next `calculate_*` call, which
// also moves the reference to the price passed in.
// =============================================================================

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::debug;

use super::band::{BandStop, Bands, DebouncedStop};
use super::ensure_price;
use crate::error::StrategyError;
use crate::types::{IndicatorUpdate, StrategyKind, TriggerCallback};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtrBands {
    atr: Decimal,
    multiplier: Decimal,
    reference: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
}

impl AtrBands {
    pub fn new(entry_price: Decimal, atr: Decimal, multiplier: Decimal) -> Result<Self, StrategyError> {
        ensure_price(entry_price)?;
        ensure_atr(atr)?;
        if multiplier <= Decimal::ZERO {
            return Err(StrategyError::InvalidMultiplier { value: multiplier });
        }
        let mut bands = Self {
            atr,
            multiplier,
            reference: entry_price,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
        };
        bands.reset(entry_price);
        Ok(bands)
    }

    pub fn atr(&self) -> Decimal {
        self.atr
    }

    pub fn multiplier(&self) -> Decimal {
        self.multiplier
    }

    pub fn reference(&self) -> Decimal {
        self.reference
    }

    /// Replace the ATR. Committed levels are untouched until the next
    /// calculation.
    pub fn update_atr(&mut self, atr: Decimal) -> Result<(), StrategyError> {
        ensure_atr(atr)?;
        debug!(from = %self.atr, to = %atr, "ATR updated");
        self.atr = atr;
        Ok(())
    }

    fn distance(&self) -> Decimal {
        self.atr * self.multiplier
    }
}

fn ensure_atr(atr: Decimal) -> Result<(), StrategyError> {
    if atr > Decimal::ZERO {
        Ok(())
    } else {
        Err(StrategyError::InvalidAtr { value: atr })
    }
}

impl Bands for AtrBands {
    const KIND: StrategyKind = StrategyKind::AtrVolatility;

    fn stop_loss(&self) -> Decimal {
        self.stop_loss
    }

    fn take_profit(&self) -> Decimal {
        self.take_profit
    }

    fn rebase_stop_loss(&mut self, price: Decimal) -> Decimal {
        self.reference = price;
        self.stop_loss = price - self.distance();
        self.stop_loss
    }

    fn rebase_take_profit(&mut self, price: Decimal) -> Decimal {
        self.reference = price;
        self.take_profit = price + self.distance();
        self.take_profit
    }

    fn reset(&mut self, price: Decimal) {
        self.rebase_stop_loss(price);
        self.rebase_take_profit(price);
    }

    fn apply(&mut self, update: IndicatorUpdate) -> Result<(), StrategyError> {
        match update {
            IndicatorUpdate::Atr(atr) => self.update_atr(atr),
            IndicatorUpdate::MovingAverage(_) => Err(StrategyError::UnsupportedUpdate { kind: Self::KIND }),
        }
    }
}

pub type AtrStop = BandStop<AtrBands>;
pub type DebouncedAtrStop = DebouncedStop<AtrBands>;

impl AtrStop {
    pub fn new(
        entry_price: Decimal,
        atr: Decimal,
        multiplier: Decimal,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        Ok(Self::from_bands(AtrBands::new(entry_price, atr, multiplier)?, callback))
    }

    pub fn update_atr(&mut self, atr: Decimal) -> Result<(), StrategyError> {
        self.active_bands_mut()?.update_atr(atr)
    }

    pub fn current_atr(&self) -> Result<Decimal, StrategyError> {
        Ok(self.active_bands()?.atr())
    }
}

impl DebouncedAtrStop {
    pub fn new(
        entry_price: Decimal,
        atr: Decimal,
        multiplier: Decimal,
        time_threshold: Duration,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        Self::from_bands(
            AtrBands::new(entry_price, atr, multiplier)?,
            time_threshold,
            callback,
        )
    }

    pub fn update_atr(&mut self, atr: Decimal) -> Result<(), StrategyError> {
        self.active_bands_mut()?.update_atr(atr)
    }

    pub fn current_atr(&self) -> Result<Decimal, StrategyError> {
        Ok(self.active_bands()?.atr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stoploss::strategy::Strategy;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn levels_widen_with_updated_atr() {
        let mut s = AtrStop::new(dec!(100), dec!(2), dec!(2), None).unwrap();
        assert_eq!(s.stop_loss().unwrap(), dec!(96));
        assert_eq!(s.take_profit().unwrap(), dec!(104));

        s.update_atr(dec!(3)).unwrap();
        // Committed level only moves on the next calculation.
        assert_eq!(s.stop_loss().unwrap(), dec!(96));
        assert_eq!(s.calculate_stop_loss(dec!(100)).unwrap(), dec!(94));
        assert_eq!(s.calculate_take_profit(dec!(100)).unwrap(), dec!(106));
        assert_eq!(s.current_atr().unwrap(), dec!(3));
    }

    #[test]
    fn calculation_moves_reference() {
        let mut s = AtrStop::new(dec!(100), dec!(1.5), dec!(2), None).unwrap();
        assert_eq!(s.calculate_stop_loss(dec!(110)).unwrap(), dec!(107));
        assert_eq!(s.bands().reference(), dec!(110));
        assert!(s.should_trigger_stop_loss(dec!(107)).unwrap());
    }

    #[test]
    fn indicator_update_goes_through_strategy_trait() {
        let mut s = AtrStop::new(dec!(100), dec!(2), dec!(1), None).unwrap();
        s.apply_indicator(IndicatorUpdate::Atr(dec!(5))).unwrap();
        assert_eq!(s.current_atr().unwrap(), dec!(5));
        assert_eq!(
            s.apply_indicator(IndicatorUpdate::MovingAverage(dec!(99))),
            Err(StrategyError::UnsupportedUpdate {
                kind: StrategyKind::AtrVolatility
            })
        );
    }

    #[test]
    fn rejects_non_positive_inputs() {
        assert_eq!(
            AtrStop::new(dec!(100), dec!(0), dec!(2), None).unwrap_err(),
            StrategyError::InvalidAtr { value: dec!(0) }
        );
        assert_eq!(
            AtrStop::new(dec!(100), dec!(2), dec!(-1), None).unwrap_err(),
            StrategyError::InvalidMultiplier { value: dec!(-1) }
        );
        let mut s = AtrStop::new(dec!(100), dec!(2), dec!(2), None).unwrap();
        assert_eq!(
            s.update_atr(dec!(0)),
            Err(StrategyError::InvalidAtr { value: dec!(0) })
        );
        assert_eq!(s.current_atr().unwrap(), dec!(2));
    }

    #[test]
    fn inactive_rejects_updates() {
        let mut s = AtrStop::new(dec!(100), dec!(2), dec!(2), None).unwrap();
        Strategy::deactivate(&mut s);
        assert_eq!(s.update_atr(dec!(3)), Err(StrategyError::StatusInvalid));
        assert_eq!(s.current_atr(), Err(StrategyError::StatusInvalid));
        assert_eq!(s.threshold(), Err(StrategyError::StatusInvalid));
    }

    #[test]
    fn debounced_atr_confirms_breach() {
        let at = |secs: i64| Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        let mut s =
            DebouncedAtrStop::new(dec!(100), dec!(2), dec!(2), Duration::from_secs(60), None).unwrap();
        s.update_atr(dec!(1)).unwrap();
        assert_eq!(s.calculate_stop_loss(dec!(100)).unwrap(), dec!(98));
        assert!(!s.should_trigger_stop_loss(dec!(97), at(0)).unwrap());
        assert!(s.should_trigger_stop_loss(dec!(97), at(60)).unwrap());
    }
}
