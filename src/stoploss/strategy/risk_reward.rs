// =============================================================================
// Risk/reward exit: paired stop-loss and take-profit
// =============================================================================
//
//   stop = price × (1 − risk)      risk   ∈ [0, 1]
//   take = price × (1 + reward)    reward ∈ [0, 10]
//
// Long positions only. Both levels are computed together by `calculate` and
// each side keeps its own edge latch.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{ensure_price, Strategy};
use crate::error::StrategyError;
use crate::stoploss::resolver::{merge_outcomes, PendingTrigger, ResolverState};
use crate::types::{ExitKind, PricePoint, StrategyKind, TriggerCallback, TriggerEvent};

/// Upper bound for the reward ratio.
const MAX_REWARD_RATIO: Decimal = Decimal::TEN;

#[derive(Debug, Clone)]
pub struct RiskRewardStop {
    risk_ratio: Decimal,
    reward_ratio: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    last_price: Option<Decimal>,
    state: ResolverState,
}

impl RiskRewardStop {
    pub fn new(
        entry_price: Decimal,
        risk_ratio: Decimal,
        reward_ratio: Decimal,
        callback: Option<TriggerCallback>,
    ) -> Result<Self, StrategyError> {
        ensure_price(entry_price)?;
        if !(Decimal::ZERO..=Decimal::ONE).contains(&risk_ratio) {
            return Err(StrategyError::InvalidRiskRatio { value: risk_ratio });
        }
        if !(Decimal::ZERO..=MAX_REWARD_RATIO).contains(&reward_ratio) {
            return Err(StrategyError::InvalidRewardRatio { value: reward_ratio });
        }
        let mut s = Self {
            risk_ratio,
            reward_ratio,
            stop_loss: Decimal::ZERO,
            take_profit: Decimal::ZERO,
            last_price: None,
            state: ResolverState::new(callback),
        };
        s.levels_from(entry_price);
        Ok(s)
    }

    pub fn risk_ratio(&self) -> Decimal {
        self.risk_ratio
    }

    pub fn reward_ratio(&self) -> Decimal {
        self.reward_ratio
    }

    /// Reward per unit of risk, `None` when the risk ratio is zero.
    pub fn risk_reward_ratio(&self) -> Option<Decimal> {
        self.reward_ratio.checked_div(self.risk_ratio)
    }

    /// Last price seen, readable while inactive.
    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn set_callback(&mut self, callback: Option<TriggerCallback>) {
        self.state.set_callback(callback);
    }

    /// Recompute both levels from `price`, returning `(stop_loss, take_profit)`.
    pub fn calculate(&mut self, price: Decimal) -> Result<(Decimal, Decimal), StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        Ok(self.levels_from(price))
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

    /// Either side hit.
    pub fn should_trigger(&mut self, price: Decimal) -> Result<bool, StrategyError> {
        let now = Utc::now();
        let stop = self.trigger_at(ExitKind::StopLoss, price, now);
        let take = self.trigger_at(ExitKind::TakeProfit, price, now);
        merge_outcomes(stop, take)
    }

    pub fn reset(&mut self, price: Decimal) -> Result<(), StrategyError> {
        ensure_price(price)?;
        self.levels_from(price);
        self.last_price = Some(price);
        self.state.activate();
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.state.deactivate();
    }

    fn levels_from(&mut self, price: Decimal) -> (Decimal, Decimal) {
        self.stop_loss = price * (Decimal::ONE - self.risk_ratio);
        self.take_profit = price * (Decimal::ONE + self.reward_ratio);
        (self.stop_loss, self.take_profit)
    }

    fn trigger_at(
        &mut self,
        exit: ExitKind,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        self.state.ensure_active()?;
        self.last_price = Some(price);
        let (threshold, hit) = match exit {
            ExitKind::StopLoss => (self.stop_loss, price <= self.stop_loss),
            ExitKind::TakeProfit => (self.take_profit, price >= self.take_profit),
        };
        self.state.settle(exit, hit, || TriggerEvent {
            kind: StrategyKind::RiskReward,
            exit,
            debounced: false,
            price,
            threshold,
            observed_at: at,
        })
    }
}

impl Strategy for RiskRewardStop {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RiskReward
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
        RiskRewardStop::reset(self, price)
    }

    fn deactivate(&mut self) {
        RiskRewardStop::deactivate(self)
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
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn calculate_returns_both_levels() {
        let mut s = RiskRewardStop::new(dec!(100), dec!(0.02), dec!(0.06), None).unwrap();
        assert_eq!(s.calculate(dec!(100)).unwrap(), (dec!(98), dec!(106)));
        assert_eq!(s.calculate(dec!(50)).unwrap(), (dec!(49), dec!(53)));
        assert_eq!(s.risk_reward_ratio(), Some(dec!(3)));
    }

    #[test]
    fn each_side_triggers_independently() {
        let mut s = RiskRewardStop::new(dec!(100), dec!(0.02), dec!(0.06), None).unwrap();
        assert!(!s.should_trigger_stop_loss(dec!(98.5)).unwrap());
        assert!(s.should_trigger_stop_loss(dec!(98)).unwrap());
        assert!(!s.should_trigger_take_profit(dec!(105)).unwrap());
        assert!(s.should_trigger_take_profit(dec!(106)).unwrap());
        assert!(s.should_trigger(dec!(110)).unwrap());
        assert!(!s.should_trigger(dec!(100)).unwrap());
    }

    #[test]
    fn callback_fires_once_per_side() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let mut s = RiskRewardStop::new(
            dec!(100),
            dec!(0.1),
            dec!(0.1),
            Some(Arc::new(move |_e: &TriggerEvent| -> anyhow::Result<()> {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        )
        .unwrap();
        s.should_trigger(dec!(85)).unwrap();
        s.should_trigger(dec!(80)).unwrap();
        s.should_trigger(dec!(115)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_callback_is_reported_as_triggered() {
        let mut s = RiskRewardStop::new(
            dec!(100),
            dec!(0.1),
            dec!(0.1),
            Some(Arc::new(|_e: &TriggerEvent| -> anyhow::Result<()> {
                anyhow::bail!("webhook 503")
            })),
        )
        .unwrap();
        let err = s.should_trigger(dec!(80)).unwrap_err();
        assert!(err.is_triggered());
    }

    #[test]
    fn validates_ratios() {
        assert_eq!(
            RiskRewardStop::new(dec!(100), dec!(1.2), dec!(1), None).unwrap_err(),
            StrategyError::InvalidRiskRatio { value: dec!(1.2) }
        );
        assert_eq!(
            RiskRewardStop::new(dec!(100), dec!(0.1), dec!(11), None).unwrap_err(),
            StrategyError::InvalidRewardRatio { value: dec!(11) }
        );
        assert!(RiskRewardStop::new(dec!(100), dec!(0), dec!(10), None).is_ok());
        let s = RiskRewardStop::new(dec!(100), dec!(0), dec!(1), None).unwrap();
        assert_eq!(s.risk_reward_ratio(), None);
    }

    #[test]
    fn reset_reactivates() {
        let mut s = RiskRewardStop::new(dec!(100), dec!(0.1), dec!(0.2), None).unwrap();
        s.deactivate();
        assert_eq!(s.calculate(dec!(100)), Err(StrategyError::StatusInvalid));
        assert_eq!(s.should_trigger(dec!(100)), Err(StrategyError::StatusInvalid));
        s.reset(dec!(200)).unwrap();
        assert_eq!(s.stop_loss().unwrap(), dec!(180));
        assert_eq!(s.take_profit().unwrap(), dec!(240));
        assert_eq!(Strategy::threshold(&s).unwrap(), dec!(180));
    }
}
