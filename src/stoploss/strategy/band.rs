// =============================================================================
// Band strategies: shared trigger logic for single-sided families
// =============================================================================
//
// A `Bands` implementation owns the threshold math of one family: how the
// stop-loss and take-profit levels move when a new price is folded in.
// Two wrappers turn that math into a strategy:
//
//   - `BandStop<B>`      fires as soon as the price crosses a level.
//   - `DebouncedStop<B>` fires only after the price has stayed beyond the
//                        level for a full `time_threshold`.
//
// Both describe a long position: the stop fires at `price <= stop_loss`,
// the take-profit at `price >= take_profit`.
// =============================================================================

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use super::{ensure_price, Strategy};
use crate::error::StrategyError;
use crate::stoploss::resolver::{merge_outcomes, BreachTimer, PendingTrigger, ResolverState};
use crate::types::{ExitKind, IndicatorUpdate, PricePoint, StrategyKind, TriggerCallback, TriggerEvent};

/// Threshold math of a single-sided strategy family.
pub trait Bands: std::fmt::Debug + Send + 'static {
    const KIND: StrategyKind;

    fn stop_loss(&self) -> Decimal;

    fn take_profit(&self) -> Decimal;

    /// Fold `price` into the stop-loss level and return the committed level.
    fn rebase_stop_loss(&mut self, price: Decimal) -> Decimal;

    /// Fold `price` into the take-profit level and return the committed level.
    fn rebase_take_profit(&mut self, price: Decimal) -> Decimal;

    /// Recompute both levels from scratch around `price`.
    fn reset(&mut self, price: Decimal);

    fn apply(&mut self, _update: IndicatorUpdate) -> Result<(), StrategyError> {
        Err(StrategyError::UnsupportedUpdate { kind: Self::KIND })
    }
}

fn breached(exit: ExitKind, price: Decimal, threshold: Decimal) -> bool {
    match exit {
        ExitKind::StopLoss => price <= threshold,
        ExitKind::TakeProfit => price >= threshold,
    }
}

fn level<B: Bands>(bands: &B, exit: ExitKind) -> Decimal {
    match exit {
        ExitKind::StopLoss => bands.stop_loss(),
        ExitKind::TakeProfit => bands.take_profit(),
    }
}

// =============================================================================
// BandStop: immediate trigger
// =============================================================================

#[derive(Debug, Clone)]
pub struct BandStop<B> {
    bands: B,
    state: ResolverState,
    last_price: Option<Decimal>,
}

impl<B: Bands> BandStop<B> {
    pub fn from_bands(bands: B, callback: Option<TriggerCallback>) -> Self {
        Self {
            bands,
            state: ResolverState::new(callback),
            last_price: None,
        }
    }

    /// Raw inspection of the family parameters, readable while inactive.
    pub fn bands(&self) -> &B {
        &self.bands
    }

    pub(crate) fn active_bands(&self) -> Result<&B, StrategyError> {
        self.state.ensure_active()?;
        Ok(&self.bands)
    }

    /// Mutable access to the family parameters, rejected while inactive.
    pub(crate) fn active_bands_mut(&mut self) -> Result<&mut B, StrategyError> {
        self.state.ensure_active()?;
        Ok(&mut self.bands)
    }

    /// Last price seen, readable while inactive.
    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn set_callback(&mut self, callback: Option<TriggerCallback>) {
        self.state.set_callback(callback);
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn calculate_stop_loss(&mut self, price: Decimal) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        Ok(self.bands.rebase_stop_loss(price))
    }

    pub fn calculate_take_profit(&mut self, price: Decimal) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        Ok(self.bands.rebase_take_profit(price))
    }

    pub fn should_trigger_stop_loss(&mut self, price: Decimal) -> Result<bool, StrategyError> {
        self.trigger_at(ExitKind::StopLoss, price, Utc::now())
    }

    pub fn should_trigger_take_profit(&mut self, price: Decimal) -> Result<bool, StrategyError> {
        self.trigger_at(ExitKind::TakeProfit, price, Utc::now())
    }

    pub fn stop_loss(&self) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        Ok(self.bands.stop_loss())
    }

    pub fn take_profit(&self) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        Ok(self.bands.take_profit())
    }

    pub fn reset(&mut self, price: Decimal) -> Result<(), StrategyError> {
        ensure_price(price)?;
        self.bands.reset(price);
        self.state.activate();
        self.last_price = Some(price);
        debug!(
            kind = %B::KIND,
            price = %price,
            sl = %self.bands.stop_loss(),
            tp = %self.bands.take_profit(),
            "strategy reset"
        );
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.state.deactivate();
    }

    fn trigger_at(
        &mut self,
        exit: ExitKind,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        let threshold = level(&self.bands, exit);
        let hit = breached(exit, price, threshold);
        self.state.settle(exit, hit, || TriggerEvent {
            kind: B::KIND,
            exit,
            debounced: false,
            price,
            threshold,
            observed_at: at,
        })
    }
}

impl<B: Bands> Strategy for BandStop<B> {
    fn kind(&self) -> StrategyKind {
        B::KIND
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn recalculate(&mut self, price: Decimal) -> Result<(), StrategyError> {
        self.calculate_stop_loss(price)?;
        self.calculate_take_profit(price)?;
        Ok(())
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
        BandStop::reset(self, price)
    }

    fn deactivate(&mut self) {
        BandStop::deactivate(self)
    }

    fn apply_indicator(&mut self, update: IndicatorUpdate) -> Result<(), StrategyError> {
        self.active_bands_mut()?.apply(update)
    }

    fn defer_callbacks(&mut self, deferred: bool) {
        self.state.set_deferred(deferred);
    }

    fn drain_triggers(&mut self, out: &mut Vec<PendingTrigger>) {
        self.state.drain_into(out);
    }
}

// =============================================================================
// DebouncedStop: trigger after a continuous breach
// =============================================================================

#[derive(Debug, Clone)]
pub struct DebouncedStop<B> {
    bands: B,
    state: ResolverState,
    timers: [BreachTimer; 2],
    last_price: Option<Decimal>,
}

impl<B: Bands> DebouncedStop<B> {
    pub fn from_bands(
        bands: B,
        time_threshold: Duration,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        let timer = BreachTimer::new(time_threshold)?;
        Ok(Self {
            bands,
            state: ResolverState::new(callback),
            timers: [timer.clone(), timer],
            last_price: None,
        })
    }

    /// Raw inspection of the family parameters, readable while inactive.
    pub fn bands(&self) -> &B {
        &self.bands
    }

    pub(crate) fn active_bands(&self) -> Result<&B, StrategyError> {
        self.state.ensure_active()?;
        Ok(&self.bands)
    }

    pub(crate) fn active_bands_mut(&mut self) -> Result<&mut B, StrategyError> {
        self.state.ensure_active()?;
        Ok(&mut self.bands)
    }

    pub fn time_threshold(&self) -> TimeDelta {
        self.timers[0].window()
    }

    /// When the ongoing breach of `exit` started, if one is in progress.
    pub fn breach_started(&self, exit: ExitKind) -> Option<DateTime<Utc>> {
        self.timers[exit.index()].started_at()
    }

    /// Last price seen, readable while inactive.
    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn set_callback(&mut self, callback: Option<TriggerCallback>) {
        self.state.set_callback(callback);
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn calculate_stop_loss(&mut self, price: Decimal) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        Ok(self.bands.rebase_stop_loss(price))
    }

    pub fn calculate_take_profit(&mut self, price: Decimal) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        Ok(self.bands.rebase_take_profit(price))
    }

    pub fn should_trigger_stop_loss(
        &mut self,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        self.trigger_at(ExitKind::StopLoss, price, at)
    }

    pub fn should_trigger_take_profit(
        &mut self,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        self.trigger_at(ExitKind::TakeProfit, price, at)
    }

    pub fn stop_loss(&self) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        Ok(self.bands.stop_loss())
    }

    pub fn take_profit(&self) -> Result<Decimal, StrategyError> {
        self.state.ensure_active()?;
        Ok(self.bands.take_profit())
    }

    pub fn reset(&mut self, price: Decimal) -> Result<(), StrategyError> {
        ensure_price(price)?;
        self.bands.reset(price);
        for timer in &mut self.timers {
            timer.clear();
        }
        self.state.activate();
        self.last_price = Some(price);
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.state.deactivate();
    }

    fn trigger_at(
        &mut self,
        exit: ExitKind,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        let threshold = level(&self.bands, exit);
        let timer = &mut self.timers[exit.index()];
        let hit = timer.observe(breached(exit, price, threshold), at);

        if !hit {
            if let Some(start) = timer.started_at() {
                debug!(
                    kind = %B::KIND,
                    exit = %exit,
                    price = %price,
                    threshold = %threshold,
                    breach_secs = at.signed_duration_since(start).num_seconds(),
                    "breach pending confirmation"
                );
            }
        }

        self.state.settle(exit, hit, || TriggerEvent {
            kind: B::KIND,
            exit,
            debounced: true,
            price,
            threshold,
            observed_at: at,
        })
    }
}

impl<B: Bands> Strategy for DebouncedStop<B> {
    fn kind(&self) -> StrategyKind {
        B::KIND
    }

    fn is_active(&self) -> bool {
        self.state.is_active()
    }

    fn recalculate(&mut self, price: Decimal) -> Result<(), StrategyError> {
        self.calculate_stop_loss(price)?;
        self.calculate_take_profit(price)?;
        Ok(())
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
        DebouncedStop::reset(self, price)
    }

    fn deactivate(&mut self) {
        DebouncedStop::deactivate(self)
    }

    fn apply_indicator(&mut self, update: IndicatorUpdate) -> Result<(), StrategyError> {
        self.active_bands_mut()?.apply(update)
    }

    fn defer_callbacks(&mut self, deferred: bool) {
        self.state.set_deferred(deferred);
    }

    fn drain_triggers(&mut self, out: &mut Vec<PendingTrigger>) {
        self.state.drain_into(out);
    }
}
