// =============================================================================
// Composite condition: ANY / ALL over heterogeneous strategies
// =============================================================================
//
// Conditions are checked in insertion order through `Strategy::check`, so
// plain and time-gated strategies mix freely; the observation timestamp is
// what drives the debounced ones.
//
//   Any  short-circuits `true` on the first triggered condition.
//   All  short-circuits `false` on the first non-triggered condition.
//
// An empty composite never triggers. A condition that fired but whose
// callback failed still counts as triggered.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::resolver::PendingTrigger;
use super::strategy::Strategy;
use crate::error::StrategyError;
use crate::types::{IndicatorUpdate, PricePoint, StrategyKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    #[default]
    Any,
    All,
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "ANY"),
            Self::All => write!(f, "ALL"),
        }
    }
}

pub struct CompositeCondition {
    mode: TriggerMode,
    conditions: Vec<Box<dyn Strategy>>,
    deferred: bool,
}

impl std::fmt::Debug for CompositeCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<StrategyKind> = self.conditions.iter().map(|c| c.kind()).collect();
        f.debug_struct("CompositeCondition")
            .field("mode", &self.mode)
            .field("conditions", &kinds)
            .finish()
    }
}

impl CompositeCondition {
    pub fn new(mode: TriggerMode) -> Self {
        Self {
            mode,
            conditions: Vec::new(),
            deferred: false,
        }
    }

    pub fn mode(&self) -> TriggerMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn add<S: Strategy + 'static>(&mut self, condition: S) {
        let mut condition: Box<dyn Strategy> = Box::new(condition);
        if self.deferred {
            condition.defer_callbacks(true);
        }
        self.conditions.push(condition);
    }

    /// Builder-style `add`.
    pub fn with<S: Strategy + 'static>(mut self, condition: S) -> Self {
        self.add(condition);
        self
    }

    pub fn should_trigger(&mut self, price: Decimal, at: DateTime<Utc>) -> Result<bool, StrategyError> {
        self.check_point(&PricePoint::new(price, at))
    }

    fn check_point(&mut self, point: &PricePoint) -> Result<bool, StrategyError> {
        if self.conditions.is_empty() {
            return Ok(false);
        }

        for (index, condition) in self.conditions.iter_mut().enumerate() {
            let hit = match condition.check(point) {
                Ok(hit) => hit,
                Err(e) if e.is_triggered() => true,
                Err(e) => {
                    debug!(index, kind = %condition.kind(), error = %e, "composite member failed");
                    return Err(e);
                }
            };
            match (self.mode, hit) {
                (TriggerMode::Any, true) => return Ok(true),
                (TriggerMode::All, false) => return Ok(false),
                _ => {}
            }
        }

        Ok(self.mode == TriggerMode::All)
    }

    /// Tightest threshold across the readable conditions.
    pub fn min_threshold(&self) -> Result<Decimal, StrategyError> {
        self.readable_thresholds()
            .min()
            .ok_or(StrategyError::StatusInvalid)
    }

    /// Loosest threshold across the readable conditions.
    pub fn max_threshold(&self) -> Result<Decimal, StrategyError> {
        self.readable_thresholds()
            .max()
            .ok_or(StrategyError::StatusInvalid)
    }

    fn readable_thresholds(&self) -> impl Iterator<Item = Decimal> + '_ {
        self.conditions.iter().filter_map(|c| c.threshold().ok())
    }

    /// Reset every condition. Individual failures are logged and skipped.
    pub fn reset(&mut self, price: Decimal) {
        for (index, condition) in self.conditions.iter_mut().enumerate() {
            if let Err(e) = condition.reset(price) {
                warn!(index, kind = %condition.kind(), error = %e, "composite member reset failed");
            }
        }
    }
}

impl Strategy for CompositeCondition {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Composite
    }

    fn is_active(&self) -> bool {
        self.conditions.iter().any(|c| c.is_active())
    }

    fn recalculate(&mut self, price: Decimal) -> Result<(), StrategyError> {
        for condition in &mut self.conditions {
            condition.recalculate(price)?;
        }
        Ok(())
    }

    fn check(&mut self, point: &PricePoint) -> Result<bool, StrategyError> {
        self.check_point(point)
    }

    fn threshold(&self) -> Result<Decimal, StrategyError> {
        self.max_threshold()
    }

    fn reset(&mut self, price: Decimal) -> Result<(), StrategyError> {
        CompositeCondition::reset(self, price);
        Ok(())
    }

    fn deactivate(&mut self) {
        for condition in &mut self.conditions {
            condition.deactivate();
        }
    }

    /// Forwarded to every member; succeeds when at least one accepted it.
    fn apply_indicator(&mut self, update: IndicatorUpdate) -> Result<(), StrategyError> {
        let mut last_err = StrategyError::UnsupportedUpdate {
            kind: StrategyKind::Composite,
        };
        let mut accepted = false;
        for condition in &mut self.conditions {
            match condition.apply_indicator(update) {
                Ok(()) => accepted = true,
                Err(e) => last_err = e,
            }
        }
        if accepted {
            Ok(())
        } else {
            Err(last_err)
        }
    }

    fn defer_callbacks(&mut self, deferred: bool) {
        self.deferred = deferred;
        for condition in &mut self.conditions {
            condition.defer_callbacks(deferred);
        }
    }

    fn drain_triggers(&mut self, out: &mut Vec<PendingTrigger>) {
        for condition in &mut self.conditions {
            condition.drain_triggers(out);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stoploss::strategy::{AtrStop, DebouncedFixedStop, FixedPercentStop, TrailingStop};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fixed-outcome condition that counts how often it was checked.
    struct Scripted {
        outcome: Result<bool, StrategyError>,
        threshold: Result<Decimal, StrategyError>,
        checks: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(outcome: bool) -> (Self, Arc<AtomicUsize>) {
            Self::with(Ok(outcome), Ok(dec!(1)))
        }

        fn with(
            outcome: Result<bool, StrategyError>,
            threshold: Result<Decimal, StrategyError>,
        ) -> (Self, Arc<AtomicUsize>) {
            let checks = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    outcome,
                    threshold,
                    checks: checks.clone(),
                },
                checks,
            )
        }
    }

    impl Strategy for Scripted {
        fn kind(&self) -> StrategyKind {
            StrategyKind::FixedPercent
        }
        fn is_active(&self) -> bool {
            true
        }
        fn recalculate(&mut self, _price: Decimal) -> Result<(), StrategyError> {
            Ok(())
        }
        fn check(&mut self, _point: &PricePoint) -> Result<bool, StrategyError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
        fn threshold(&self) -> Result<Decimal, StrategyError> {
            self.threshold.clone()
        }
        fn reset(&mut self, _price: Decimal) -> Result<(), StrategyError> {
            Err(StrategyError::InvalidPrice { value: dec!(0) })
        }
        fn deactivate(&mut self) {}
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn composite(mode: TriggerMode, outcomes: [bool; 3]) -> CompositeCondition {
        let mut c = CompositeCondition::new(mode);
        for o in outcomes {
            c.add(Scripted::new(o).0);
        }
        c
    }

    #[test]
    fn any_and_all_over_three_conditions() {
        let cases = [
            ([true, false, false], true, false),
            ([true, true, false], true, false),
            ([true, true, true], true, true),
        ];
        for (outcomes, any, all) in cases {
            assert_eq!(
                composite(TriggerMode::Any, outcomes).should_trigger(dec!(100), ts(0)),
                Ok(any),
                "ANY {outcomes:?}"
            );
            assert_eq!(
                composite(TriggerMode::All, outcomes).should_trigger(dec!(100), ts(0)),
                Ok(all),
                "ALL {outcomes:?}"
            );
        }
    }

    #[test]
    fn empty_never_triggers() {
        assert_eq!(
            CompositeCondition::new(TriggerMode::All).should_trigger(dec!(1), ts(0)),
            Ok(false)
        );
        assert_eq!(
            CompositeCondition::new(TriggerMode::Any).should_trigger(dec!(1), ts(0)),
            Ok(false)
        );
    }

    #[test]
    fn short_circuits_in_order() {
        let (first, first_checks) = Scripted::new(true);
        let (second, second_checks) = Scripted::new(false);
        let mut any = CompositeCondition::new(TriggerMode::Any).with(first).with(second);
        assert_eq!(any.should_trigger(dec!(1), ts(0)), Ok(true));
        assert_eq!(first_checks.load(Ordering::SeqCst), 1);
        assert_eq!(second_checks.load(Ordering::SeqCst), 0);

        let (first, first_checks) = Scripted::new(false);
        let (second, second_checks) = Scripted::new(true);
        let mut all = CompositeCondition::new(TriggerMode::All).with(first).with(second);
        assert_eq!(all.should_trigger(dec!(1), ts(0)), Ok(false));
        assert_eq!(first_checks.load(Ordering::SeqCst), 1);
        assert_eq!(second_checks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_failure_counts_as_triggered() {
        let failed = StrategyError::CallbackFailed {
            message: "down".into(),
        };
        let mut c = CompositeCondition::new(TriggerMode::All)
            .with(Scripted::with(Err(failed), Ok(dec!(1))).0)
            .with(Scripted::new(true).0);
        assert_eq!(c.should_trigger(dec!(1), ts(0)), Ok(true));
    }

    #[test]
    fn hard_errors_propagate() {
        let mut c = CompositeCondition::new(TriggerMode::Any)
            .with(Scripted::new(false).0)
            .with(Scripted::with(Err(StrategyError::StatusInvalid), Ok(dec!(1))).0);
        assert_eq!(c.should_trigger(dec!(1), ts(0)), Err(StrategyError::StatusInvalid));
    }

    #[test]
    fn threshold_scan_skips_unreadable_members() {
        let c = CompositeCondition::new(TriggerMode::Any)
            .with(Scripted::with(Ok(false), Ok(dec!(95))).0)
            .with(Scripted::with(Ok(false), Err(StrategyError::StatusInvalid)).0)
            .with(Scripted::with(Ok(false), Ok(dec!(98))).0);
        assert_eq!(c.min_threshold(), Ok(dec!(95)));
        assert_eq!(c.max_threshold(), Ok(dec!(98)));
        assert_eq!(Strategy::threshold(&c), Ok(dec!(98)));

        let dead = CompositeCondition::new(TriggerMode::Any)
            .with(Scripted::with(Ok(false), Err(StrategyError::StatusInvalid)).0);
        assert_eq!(dead.min_threshold(), Err(StrategyError::StatusInvalid));
        assert_eq!(
            CompositeCondition::new(TriggerMode::All).max_threshold(),
            Err(StrategyError::StatusInvalid)
        );
    }

    #[test]
    fn mixes_plain_and_time_gated_members() {
        let plain = FixedPercentStop::new(dec!(100), dec!(0.05), None).unwrap();
        let gated =
            DebouncedFixedStop::new(dec!(100), dec!(0.02), Duration::from_secs(10), None).unwrap();
        let mut c = CompositeCondition::new(TriggerMode::All).with(plain).with(gated);

        // Both breached, but the gated member needs the full window.
        assert_eq!(c.should_trigger(dec!(94), ts(0)), Ok(false));
        assert_eq!(c.should_trigger(dec!(94), ts(5)), Ok(false));
        assert_eq!(c.should_trigger(dec!(94), ts(10)), Ok(true));
        assert_eq!(c.min_threshold(), Ok(dec!(95)));
        assert_eq!(c.max_threshold(), Ok(dec!(98)));
    }

    #[test]
    fn reset_is_best_effort() {
        let mut trailing = TrailingStop::new(dec!(100), dec!(0.1), None).unwrap();
        trailing.deactivate();
        let mut c = CompositeCondition::new(TriggerMode::Any)
            .with(Scripted::new(false).0)
            .with(trailing);
        assert_eq!(c.max_threshold(), Ok(dec!(1)));
        c.reset(dec!(200));
        assert!(Strategy::is_active(&c));
        assert_eq!(c.max_threshold(), Ok(dec!(180)));
    }

    #[test]
    fn indicator_updates_reach_members_that_accept_them() {
        let mut c = CompositeCondition::new(TriggerMode::Any)
            .with(TrailingStop::new(dec!(100), dec!(0.1), None).unwrap());
        assert!(matches!(
            c.apply_indicator(IndicatorUpdate::Atr(dec!(2))),
            Err(StrategyError::UnsupportedUpdate { .. })
        ));
        c.add(AtrStop::new(dec!(100), dec!(1), dec!(1), None).unwrap());
        assert!(c.apply_indicator(IndicatorUpdate::Atr(dec!(2))).is_ok());
    }

    #[test]
    fn deferred_members_queue_their_triggers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let callback: crate::types::TriggerCallback =
            Arc::new(move |_e: &crate::types::TriggerEvent| -> anyhow::Result<()> {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        let mut composite = CompositeCondition::new(TriggerMode::All).with(
            FixedPercentStop::new(dec!(100), dec!(0.05), Some(callback.clone())).unwrap(),
        );
        composite.defer_callbacks(true);
        // Members added later inherit the mode.
        composite.add(FixedPercentStop::new(dec!(100), dec!(0.02), Some(callback)).unwrap());

        assert_eq!(composite.should_trigger(dec!(94), ts(0)), Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut pending = Vec::new();
        composite.drain_triggers(&mut pending);
        assert_eq!(pending.len(), 2);
        for trigger in pending {
            trigger.dispatch().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
