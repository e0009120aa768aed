// =============================================================================
// Structure-swing exit: levels anchored on recent swing highs and lows
// =============================================================================
//
// A rolling history of at most `2 × lookback` prices is kept. Each
// `calculate(price)` appends the price, scans the newest `lookback` entries
// for max/min, and replaces a stored swing level only when the candidate
// differs from it by more than `level × swing_distance` (hysteresis).
//
//   Long:  stop = ratchet_up(swing_low × 0.99),   take = swing_high × 1.01
//   Short: stop = ratchet_down(swing_high × 1.01), take = swing_low × 0.99
//
// Triggers mirror the direction: a long stop fires at `price <= stop`, a short
// stop at `price >= stop`, and vice versa for the take-profit.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::{ensure_price, Strategy};
use crate::error::StrategyError;
use crate::stoploss::resolver::{merge_outcomes, PendingTrigger, ResolverState};
use crate::types::{Direction, ExitKind, PricePoint, StrategyKind, TriggerCallback, TriggerEvent};

/// Largest accepted lookback window.
pub const MAX_LOOKBACK: usize = 10_000;

/// Buffer placed beyond a swing level.
const BELOW_SWING: Decimal = dec!(0.99);
const ABOVE_SWING: Decimal = dec!(1.01);

#[derive(Debug, Clone)]
pub struct StructureSwingStop {
    direction: Direction,
    lookback: usize,
    swing_distance: Decimal,
    history: VecDeque<Decimal>,
    swing_high: Decimal,
    swing_low: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    last_price: Option<Decimal>,
    state: ResolverState,
}

impl StructureSwingStop {
    pub fn new(
        entry_price: Decimal,
        direction: Direction,
        lookback: usize,
        swing_distance: Decimal,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        ensure_price(entry_price)?;
        if lookback == 0 || lookback > MAX_LOOKBACK {
            return Err(StrategyError::InvalidLookback { value: lookback });
        }
        if swing_distance <= Decimal::ZERO || swing_distance > Decimal::ONE {
            return Err(StrategyError::InvalidSwingDistance {
                value: swing_distance,
            });
        }
        let mut s = Self {
            direction,
            lookback,
            swing_distance,
            history: VecDeque::new(),
            swing_high: entry_price,
            swing_low: entry_price,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            last_price: None,
            state: ResolverState::new(callback),
        };
        s.seed(entry_price);
        Ok(s)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn swing_high(&self) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        Ok(self.swing_high)
    }

    pub fn swing_low(&self) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        Ok(self.swing_low)
    }

    /// Raw inspection, readable while inactive.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Raw inspection, readable while inactive.
    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn set_callback(&mut self, callback: Option<TriggerCallback>) {
        self.state.set_callback(callback);
    }

    /// Fold `price` into the swing structure and return
    /// `(stop_loss, take_profit)`.
    pub fn calculate(&mut self, price: Decimal) -> Result<(Decimal, Decimal), StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);

        self.history.push_back(price);
        while self.history.len() > self.history_cap() {
            self.history.pop_front();
        }

        let mut window = self.history.iter().rev().take(self.lookback).copied();
        let first = window.next().unwrap_or(price);
        let (high, low) = window.fold((first, first), |(hi, lo), p| (hi.max(p), lo.min(p)));

        if self.moved_beyond(self.swing_high, high) {
            debug!(from = %self.swing_high, to = %high, "swing high replaced");
            self.swing_high = high;
        }
        if self.moved_beyond(self.swing_low, low) {
            debug!(from = %self.swing_low, to = %low, "swing low replaced");
            self.swing_low = low;
        }

        match self.direction {
            Direction::Long => {
                let candidate = self.swing_low * BELOW_SWING;
                if candidate > self.stop_loss {
                    self.stop_loss = candidate;
                }
                self.take_profit = self.swing_high * ABOVE_SWING;
            }
            Direction::Short => {
                let candidate = self.swing_high * ABOVE_SWING;
                if candidate < self.stop_loss {
                    self.stop_loss = candidate;
                }
                self.take_profit = self.swing_low * BELOW_SWING;
            }
        }

        Ok((self.stop_loss, self.take_profit))
    }

    pub fn stop_loss(&self) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        Ok(self.stop_loss)
    }

    pub fn take_profit(&self) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        Ok(self.take_profit)
    }

    pub fn should_trigger_stop_loss(&mut self, price: Decimal) -> Result<bool, StrategyError> {
        self.trigger_at(ExitKind::StopLoss, price, Utc::now())
    }

    pub fn should_trigger_take_profit(&mut self, price: Decimal) -> Result<bool, StrategyError> {
        self.trigger_at(ExitKind::TakeProfit, price, Utc::now())
    }

    /// Clear the history and rebuild every level around `price`.
    pub fn reset(&mut self, price: Decimal) -> Result<(), StrategyError> {
        ensure_price(price)?;
        self.seed(price);
        self.last_price = Some(price);
        self.state.activate();
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.state.deactivate();
    }

    fn seed(&mut self, price: Decimal) {
        self.history.clear();
        self.history.push_back(price);
        self.swing_high = price;
        self.swing_low = price;
        match self.direction {
            Direction::Long => {
                self.stop_loss = price * BELOW_SWING;
                self.take_profit = price * ABOVE_SWING;
            }
            Direction::Short => {
                self.stop_loss = price * ABOVE_SWING;
                self.take_profit = price * BELOW_SWING;
            }
        }
    }

    fn history_cap(&self) -> usize {
        self.lookback * 2
    }

    fn moved_beyond(&self, level: Decimal, candidate: Decimal) -> bool {
        (candidate - level).abs() > level * self.swing_distance
    }

    fn trigger_at(
        &mut self,
        exit: ExitKind,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        let threshold = match exit {
            ExitKind::StopLoss => self.stop_loss,
            ExitKind::TakeProfit => self.take_profit,
        };
        let hit = match (self.direction, exit) {
            (Direction::Long, ExitKind::StopLoss) | (Direction::Short, ExitKind::TakeProfit) => {
                price <= threshold
            }
            (Direction::Long, ExitKind::TakeProfit) | (Direction::Short, ExitKind::StopLoss) => {
                price >= threshold
            }
        };
        self.state.settle(exit, hit, || TriggerEvent {
            kind: StrategyKind::StructureSwing,
            exit,
            debounced: false,
            price,
            threshold,
            observed_at: at,
        })
    }
}

impl Strategy for StructureSwingStop {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StructureSwing
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn recalculate(&mut self, price: Decimal) -> Result<(), StrategyError> {
        self.calculate(price).map(|_| ())
    }

    fn check(&mut self, point: &PricePoint) -> Result<bool, StrategyError> {
        let stop = self.trigger_at(ExitKind::StopLoss, point.price, point.observed_at);
        let take = self.trigger_at(ExitKind::TakeProfit, point.price, point.observed_at);
        merge_outcomes(stop, take)
    }

    fn threshold(&self) -> Result<Decimal, StrategyError> {
        self.stop_loss()
    }

    fn reset(&mut self, price: Decimal) -> Result<(), StrategyError> {
        StructureSwingStop::reset(self, price)
    }

    fn deactivate(&mut self) {
        StructureSwingStop::deactivate(self)
    }

    fn defer_callbacks(&mut self, deferred: bool) {
        self.state.set_deferred(deferred);
    }

    fn drain_triggers(&mut self, out: &mut Vec<PendingTrigger>) {
        self.state.drain_into(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(lookback: usize, distance: Decimal) -> StructureSwingStop {
        StructureSwingStop::new(dec!(100), Direction::Long, lookback, distance, None).unwrap()
    }

    #[test]
    fn seeds_levels_around_entry() {
        let s = long(5, dec!(0.01));
        assert_eq!(s.stop_loss().unwrap(), dec!(99));
        assert_eq!(s.take_profit().unwrap(), dec!(101));

        let s = StructureSwingStop::new(dec!(100), Direction::Short, 5, dec!(0.01), None).unwrap();
        assert_eq!(s.stop_loss().unwrap(), dec!(101));
        assert_eq!(s.take_profit().unwrap(), dec!(99));
    }

    #[test]
    fn history_is_bounded() {
        let mut s = long(3, dec!(0.01));
        for i in 0..20 {
            s.calculate(dec!(100) + Decimal::from(i)).unwrap();
        }
        assert_eq!(s.history_len(), 6);
    }

    #[test]
    fn hysteresis_ignores_small_moves() {
        let mut s = long(5, dec!(0.05));
        // 3% above the stored high: inside the 5% band, not replaced.
        s.calculate(dec!(103)).unwrap();
        assert_eq!(s.swing_high().unwrap(), dec!(100));
        // 10% above: replaced.
        s.calculate(dec!(110)).unwrap();
        assert_eq!(s.swing_high().unwrap(), dec!(110));
        assert_eq!(s.take_profit().unwrap(), dec!(111.1));
    }

    #[test]
    fn long_stop_only_ratchets_up() {
        let mut s = long(2, dec!(0.01));
        // Rally pushes the window low up to 110.
        s.calculate(dec!(110)).unwrap();
        s.calculate(dec!(120)).unwrap();
        assert_eq!(s.swing_low().unwrap(), dec!(110));
        assert_eq!(s.stop_loss().unwrap(), dec!(108.9));

        // Sell-off drops the swing low again; the stop must hold.
        s.calculate(dec!(90)).unwrap();
        s.calculate(dec!(85)).unwrap();
        assert_eq!(s.swing_low().unwrap(), dec!(85));
        assert_eq!(s.stop_loss().unwrap(), dec!(108.9));
        assert!(s.should_trigger_stop_loss(dec!(85)).unwrap());
    }

    #[test]
    fn short_stop_only_ratchets_down() {
        let mut s = StructureSwingStop::new(dec!(100), Direction::Short, 2, dec!(0.01), None).unwrap();
        s.calculate(dec!(90)).unwrap();
        s.calculate(dec!(80)).unwrap();
        assert_eq!(s.swing_high().unwrap(), dec!(90));
        assert_eq!(s.stop_loss().unwrap(), dec!(90.9));
        s.calculate(dec!(120)).unwrap();
        assert_eq!(s.stop_loss().unwrap(), dec!(90.9));

        assert!(s.should_trigger_stop_loss(dec!(91)).unwrap());
        assert!(!s.should_trigger_take_profit(dec!(91)).unwrap());
    }

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(
            StructureSwingStop::new(dec!(100), Direction::Long, 0, dec!(0.1), None).unwrap_err(),
            StrategyError::InvalidLookback { value: 0 }
        );
        assert_eq!(
            StructureSwingStop::new(dec!(100), Direction::Long, 5, dec!(0), None).unwrap_err(),
            StrategyError::InvalidSwingDistance { value: dec!(0) }
        );
        assert!(matches!(
            StructureSwingStop::new(dec!(100), Direction::Long, 5, dec!(1.5), None),
            Err(StrategyError::InvalidSwingDistance { .. })
        ));
        assert!(StructureSwingStop::new(dec!(100), Direction::Long, 5, dec!(1), None).is_ok());
    }

    #[test]
    fn oversized_lookback_is_rejected() {
        assert_eq!(
            StructureSwingStop::new(dec!(100), Direction::Long, usize::MAX, dec!(0.1), None).unwrap_err(),
            StrategyError::InvalidLookback { value: usize::MAX }
        );
        assert_eq!(
            StructureSwingStop::new(dec!(100), Direction::Long, MAX_LOOKBACK + 1, dec!(0.1), None)
                .unwrap_err(),
            StrategyError::InvalidLookback {
                value: MAX_LOOKBACK + 1
            }
        );
        let mut s = long(MAX_LOOKBACK, dec!(0.1));
        s.calculate(dec!(101)).unwrap();
        assert_eq!(s.history_len(), 2);
    }

    #[test]
    fn reset_clears_history() {
        let mut s = long(3, dec!(0.01));
        for p in [dec!(110), dec!(120), dec!(130)] {
            s.calculate(p).unwrap();
        }
        s.deactivate();
        assert_eq!(s.calculate(dec!(1)), Err(StrategyError::StatusInvalid));
        assert_eq!(s.swing_high(), Err(StrategyError::StatusInvalid));
        assert_eq!(s.swing_low(), Err(StrategyError::StatusInvalid));
        s.reset(dec!(50)).unwrap();
        assert_eq!(s.history_len(), 1);
        assert_eq!(s.swing_high().unwrap(), dec!(50));
        assert_eq!(s.stop_loss().unwrap(), dec!(49.5));
    }
}
