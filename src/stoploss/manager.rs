// =============================================================================
// Engine Manager: fan-out of price points to supervised strategy workers
// =============================================================================
//
// Every registered strategy gets:
//
//   - a bounded input channel of `buffer_size` points,
//   - one worker under `Supervisor::safe_go` that drains the channel,
//     recomputes thresholds, checks the trigger and ticks a health check
//     every `check_interval`.
//
// Registered strategies run with deferred callbacks: the worker drains the
// queued triggers under the strategy lock and runs the callbacks after
// releasing it, so a callback may call back into the manager.
//
// `collect` never blocks: a full channel drops the point for that strategy
// only and reports the strategy name to the caller. Points collected before
// `start` queue up until the workers come online.
//
// Lifecycle: Created → Started → Stopped. Registration is only possible
// while Created; nothing can be collected once Stopped.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::strategy::Strategy;
use crate::config::EngineConfig;
use crate::error::{EngineError, StrategyError};
use crate::supervisor::{PanicHook, Supervisor};
use crate::types::{IndicatorUpdate, PricePoint, StrategyKind};

/// Strategy shared between its worker and manager queries.
pub type SharedStrategy = Arc<Mutex<Box<dyn Strategy>>>;

/// Called with `(strategy name, panic message)` each time a worker restarts.
pub type RestartHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    Created,
    Started,
    Stopped,
}

#[derive(Debug, Default)]
struct Counters {
    evaluated: AtomicU64,
    triggered: AtomicU64,
    dropped: AtomicU64,
    restarts: AtomicU64,
    errors: AtomicU64,
    health_checks: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Slot {
    strategy: SharedStrategy,
    tx: mpsc::Sender<PricePoint>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PricePoint>>>,
    counters: Arc<Counters>,
}

/// Point-in-time view of one registered strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyStats {
    pub name: String,
    pub kind: StrategyKind,
    pub active: bool,
    pub threshold: Option<Decimal>,
    /// Points queued and not yet evaluated.
    pub pending: usize,
    pub evaluated: u64,
    pub triggered: u64,
    pub dropped: u64,
    pub restarts: u64,
    pub errors: u64,
    pub health_checks: u64,
}

pub struct Manager {
    config: EngineConfig,
    supervisor: Supervisor,
    lifecycle: Mutex<Lifecycle>,
    registry: RwLock<HashMap<String, Slot>>,
    restart_hook: Arc<RwLock<Option<RestartHook>>>,
}

impl Manager {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let supervisor = Supervisor::new(config.retry_interval(), config.check_interval());
        Ok(Self {
            config,
            supervisor,
            lifecycle: Mutex::new(Lifecycle::Created),
            registry: RwLock::new(HashMap::new()),
            restart_hook: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    /// Observe worker restarts, in addition to the built-in warning log.
    pub fn set_restart_hook(&self, hook: RestartHook) {
        *self.restart_hook.write() = Some(hook);
    }

    pub fn register_strategy<S>(&self, name: impl Into<String>, strategy: S) -> Result<(), EngineError>
    where
        S: Strategy + 'static,
    {
        let name = name.into();
        let lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started => return Err(EngineError::AlreadyStarted),
            Lifecycle::Stopped => return Err(EngineError::Stopped),
        }

        let mut registry = self.registry.write();
        if registry.contains_key(&name) {
            return Err(EngineError::DuplicateStrategy { name });
        }

        let kind = strategy.kind();
        let mut strategy: Box<dyn Strategy> = Box::new(strategy);
        strategy.defer_callbacks(true);
        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        registry.insert(
            name.clone(),
            Slot {
                strategy: Arc::new(Mutex::new(strategy)),
                tx,
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
                counters: Arc::new(Counters::default()),
            },
        );
        info!(strategy = %name, kind = %kind, "strategy registered");
        Ok(())
    }

    /// Spawn one supervised worker per registered strategy.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Started => return Err(EngineError::AlreadyStarted),
            Lifecycle::Stopped => return Err(EngineError::Stopped),
        }

        let registry = self.registry.read();
        for (name, slot) in registry.iter() {
            let worker = Worker {
                name: Arc::from(name.as_str()),
                strategy: slot.strategy.clone(),
                rx: slot.rx.clone(),
                counters: slot.counters.clone(),
                check_interval: self.config.check_interval(),
            };
            let on_restart = restart_hook_for(
                worker.name.clone(),
                worker.counters.clone(),
                self.restart_hook.clone(),
            );
            self.supervisor.safe_go(
                move |token| {
                    let worker = worker.clone();
                    async move { worker.run(token).await }
                },
                Some(on_restart),
            )?;
        }

        *lifecycle = Lifecycle::Started;
        info!(
            strategies = registry.len(),
            buffer_size = self.config.buffer_size,
            check_interval_ms = self.config.check_interval_ms,
            "engine started"
        );
        Ok(())
    }

    /// Offer `point` to every strategy without blocking.
    ///
    /// `on_full` is called once for each strategy whose channel was full; the
    /// point is dropped for that strategy only.
    pub fn collect<F>(&self, point: PricePoint, mut on_full: F) -> Result<(), EngineError>
    where
        F: FnMut(&str),
    {
        if self.lifecycle() == Lifecycle::Stopped {
            return Err(EngineError::Stopped);
        }

        let mut full = Vec::new();
        {
            let registry = self.registry.read();
            for (name, slot) in registry.iter() {
                match slot.tx.try_send(point) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        Counters::bump(&slot.counters.dropped);
                        warn!(
                            strategy = %name,
                            price = %point.price,
                            capacity = slot.tx.max_capacity(),
                            "input channel full — price dropped"
                        );
                        full.push(name.clone());
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(strategy = %name, "input channel closed — price dropped");
                    }
                }
            }
        }

        for name in &full {
            on_full(name);
        }
        Ok(())
    }

    /// Cancel every worker and wait for in-flight evaluations to finish.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }
        self.supervisor.stop().await;
        info!("engine stopped");
    }

    // ── Strategy access ─────────────────────────────────────────────────

    pub fn strategy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn threshold(&self, name: &str) -> Result<Decimal, EngineError> {
        self.with_strategy(name, |s| s.threshold())
    }

    pub fn update_indicator(&self, name: &str, update: IndicatorUpdate) -> Result<(), EngineError> {
        self.with_strategy(name, |s| s.apply_indicator(update))
    }

    /// Push `update` to every strategy that consumes it; returns how many
    /// accepted it.
    pub fn broadcast_indicator(&self, update: IndicatorUpdate) -> usize {
        let registry = self.registry.read();
        let mut accepted = 0;
        for (name, slot) in registry.iter() {
            match slot.strategy.lock().apply_indicator(update) {
                Ok(()) => accepted += 1,
                Err(StrategyError::UnsupportedUpdate { .. }) => {}
                Err(e) => debug!(strategy = %name, update = %update, error = %e, "indicator update rejected"),
            }
        }
        accepted
    }

    pub fn reset_strategy(&self, name: &str, price: Decimal) -> Result<(), EngineError> {
        self.with_strategy(name, |s| s.reset(price))?;
        info!(strategy = %name, price = %price, "strategy reset");
        Ok(())
    }

    pub fn deactivate_strategy(&self, name: &str) -> Result<(), EngineError> {
        self.with_strategy(name, |s| {
            s.deactivate();
            Ok(())
        })?;
        info!(strategy = %name, "strategy deactivated");
        Ok(())
    }

    pub fn stats(&self) -> Vec<StrategyStats> {
        let registry = self.registry.read();
        let mut stats: Vec<StrategyStats> = registry
            .iter()
            .map(|(name, slot)| {
                let (kind, active, threshold) = {
                    let strategy = slot.strategy.lock();
                    (strategy.kind(), strategy.is_active(), strategy.threshold().ok())
                };
                let c = &slot.counters;
                StrategyStats {
                    name: name.clone(),
                    kind,
                    active,
                    threshold,
                    pending: slot.tx.max_capacity() - slot.tx.capacity(),
                    evaluated: c.evaluated.load(Ordering::Relaxed),
                    triggered: c.triggered.load(Ordering::Relaxed),
                    dropped: c.dropped.load(Ordering::Relaxed),
                    restarts: c.restarts.load(Ordering::Relaxed),
                    errors: c.errors.load(Ordering::Relaxed),
                    health_checks: c.health_checks.load(Ordering::Relaxed),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    fn with_strategy<T>(
        &self,
        name: &str,
        op: impl FnOnce(&mut Box<dyn Strategy>) -> Result<T, StrategyError>,
    ) -> Result<T, EngineError> {
        let registry = self.registry.read();
        let slot = registry.get(name).ok_or_else(|| EngineError::UnknownStrategy {
            name: name.to_string(),
        })?;
        let mut strategy = slot.strategy.lock();
        Ok(op(&mut *strategy)?)
    }
}

fn restart_hook_for(
    name: Arc<str>,
    counters: Arc<Counters>,
    user_hook: Arc<RwLock<Option<RestartHook>>>,
) -> PanicHook {
    Arc::new(move |message: &str| {
        Counters::bump(&counters.restarts);
        warn!(strategy = %name, panic = %message, "strategy worker panicked — restarting");
        if let Some(hook) = user_hook.read().as_ref() {
            hook(&*name, message);
        }
    })
}

// =============================================================================
// Worker
// =============================================================================

#[derive(Clone)]
struct Worker {
    name: Arc<str>,
    strategy: SharedStrategy,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PricePoint>>>,
    counters: Arc<Counters>,
    check_interval: Duration,
}

impl Worker {
    async fn run(self, token: CancellationToken) {
        let mut rx = self.rx.lock().await;
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        debug!(strategy = %self.name, "strategy worker running");

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!(strategy = %self.name, "strategy worker cancelled");
                    return;
                }

                point = rx.recv() => match point {
                    Some(point) => self.evaluate(&point),
                    None => {
                        debug!(strategy = %self.name, "input channel closed — worker exiting");
                        return;
                    }
                },

                _ = ticker.tick() => self.health_check(rx.len()),
            }
        }
    }

    fn evaluate(&self, point: &PricePoint) {
        Counters::bump(&self.counters.evaluated);
        let (outcome, pending) = {
            let mut strategy = self.strategy.lock();
            let outcome = strategy.evaluate(point);
            let mut pending = Vec::new();
            strategy.drain_triggers(&mut pending);
            (outcome, pending)
        };

        for trigger in pending {
            if let Err(e) = trigger.dispatch() {
                Counters::bump(&self.counters.errors);
                warn!(strategy = %self.name, price = %point.price, error = %e, "triggered but notification failed");
            }
        }

        match outcome {
            Ok(true) => {
                Counters::bump(&self.counters.triggered);
                debug!(strategy = %self.name, price = %point.price, "exit condition holds");
            }
            Ok(false) => {}
            Err(e) if e.is_triggered() => {
                Counters::bump(&self.counters.triggered);
                Counters::bump(&self.counters.errors);
                warn!(strategy = %self.name, price = %point.price, error = %e, "triggered but notification failed");
            }
            Err(StrategyError::StatusInvalid) => {
                Counters::bump(&self.counters.errors);
                debug!(strategy = %self.name, price = %point.price, "strategy inactive — price skipped");
            }
            Err(e) => {
                Counters::bump(&self.counters.errors);
                warn!(strategy = %self.name, price = %point.price, error = %e, "evaluation failed");
            }
        }
    }

    fn health_check(&self, pending: usize) {
        Counters::bump(&self.counters.health_checks);
        let (active, threshold) = {
            let strategy = self.strategy.lock();
            (strategy.is_active(), strategy.threshold().ok())
        };
        debug!(
            strategy = %self.name,
            active,
            threshold = ?threshold,
            pending,
            evaluated = self.counters.evaluated.load(Ordering::Relaxed),
            "strategy health check"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stoploss::strategy::{AtrStop, FixedPercentStop, TrailingStop};
    use crate::types::TriggerEvent;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicBool;
    use std::sync::OnceLock;

    fn config(buffer_size: usize) -> EngineConfig {
        EngineConfig {
            buffer_size,
            read_timeout_ms: 100,
            check_interval_ms: 20,
            retry_interval_ms: 10,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Panics on the first evaluation, behaves afterwards.
    struct FlakyOnce {
        panicked: Arc<AtomicBool>,
        seen: Arc<Mutex<Vec<Decimal>>>,
    }

    impl Strategy for FlakyOnce {
        fn kind(&self) -> StrategyKind {
            StrategyKind::FixedPercent
        }
        fn is_active(&self) -> bool {
            true
        }
        fn recalculate(&mut self, _price: Decimal) -> Result<(), StrategyError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("corrupted feed");
            }
            Ok(())
        }
        fn check(&mut self, point: &PricePoint) -> Result<bool, StrategyError> {
            self.seen.lock().push(point.price);
            Ok(false)
        }
        fn threshold(&self) -> Result<Decimal, StrategyError> {
            Ok(Decimal::ZERO)
        }
        fn reset(&mut self, _price: Decimal) -> Result<(), StrategyError> {
            Ok(())
        }
        fn deactivate(&mut self) {}
    }

    #[test]
    fn new_rejects_invalid_config() {
        assert!(matches!(
            Manager::new(config(0)),
            Err(EngineError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn backpressure_reports_full_channel_without_blocking() {
        let manager = Manager::new(config(1)).unwrap();
        manager
            .register_strategy("trail", TrailingStop::new(dec!(100), dec!(0.05), None).unwrap())
            .unwrap();

        let mut full = Vec::new();
        manager
            .collect(PricePoint::now(dec!(100)), |name| full.push(name.to_string()))
            .unwrap();
        assert!(full.is_empty());

        manager
            .collect(PricePoint::now(dec!(101)), |name| full.push(name.to_string()))
            .unwrap();
        assert_eq!(full, vec!["trail".to_string()]);

        let stats = manager.stats();
        assert_eq!(stats[0].dropped, 1);
        assert_eq!(stats[0].pending, 1);
        assert_eq!(stats[0].evaluated, 0);
    }

    #[tokio::test]
    async fn lifecycle_rules() {
        let manager = Manager::new(config(4)).unwrap();
        manager
            .register_strategy("a", FixedPercentStop::new(dec!(100), dec!(0.05), None).unwrap())
            .unwrap();
        assert!(matches!(
            manager.register_strategy("a", FixedPercentStop::new(dec!(100), dec!(0.05), None).unwrap()),
            Err(EngineError::DuplicateStrategy { .. })
        ));

        manager.start().unwrap();
        assert_eq!(manager.lifecycle(), Lifecycle::Started);
        assert!(matches!(manager.start(), Err(EngineError::AlreadyStarted)));
        assert!(matches!(
            manager.register_strategy("b", FixedPercentStop::new(dec!(100), dec!(0.05), None).unwrap()),
            Err(EngineError::AlreadyStarted)
        ));

        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.lifecycle(), Lifecycle::Stopped);
        assert!(matches!(
            manager.collect(PricePoint::now(dec!(100)), |_| {}),
            Err(EngineError::Stopped)
        ));
        assert!(matches!(manager.start(), Err(EngineError::Stopped)));
    }

    #[tokio::test]
    async fn trailing_trigger_reaches_callback() {
        let events = Arc::new(Mutex::new(Vec::<TriggerEvent>::new()));
        let sink = events.clone();
        let callback = Arc::new(move |e: &TriggerEvent| -> anyhow::Result<()> {
            sink.lock().push(e.clone());
            Ok(())
        });

        let manager = Manager::new(config(16)).unwrap();
        manager
            .register_strategy("trail", TrailingStop::new(dec!(100), dec!(0.05), Some(callback)).unwrap())
            .unwrap();
        manager.start().unwrap();

        for p in [dec!(100), dec!(104), dec!(98)] {
            manager.collect(PricePoint::now(p), |_| {}).unwrap();
        }

        wait_until(|| !events.lock().is_empty()).await;
        manager.stop().await;

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, StrategyKind::Trailing);
        assert_eq!(events[0].price, dec!(98));
        assert_eq!(events[0].threshold, dec!(98.8));

        let stats = manager.stats();
        assert_eq!(stats[0].evaluated, 3);
        assert_eq!(stats[0].triggered, 1);
    }

    #[tokio::test]
    async fn panicking_worker_is_restarted() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let restarts = Arc::new(Mutex::new(Vec::<String>::new()));

        let manager = Manager::new(config(16)).unwrap();
        manager
            .register_strategy(
                "flaky",
                FlakyOnce {
                    panicked: Arc::new(AtomicBool::new(false)),
                    seen: seen.clone(),
                },
            )
            .unwrap();
        let hook_log = restarts.clone();
        manager.set_restart_hook(Arc::new(move |name: &str, _msg: &str| {
            hook_log.lock().push(name.to_string());
        }));
        manager.start().unwrap();

        manager.collect(PricePoint::now(dec!(1)), |_| {}).unwrap();
        manager.collect(PricePoint::now(dec!(2)), |_| {}).unwrap();

        wait_until(|| seen.lock().len() == 1).await;
        manager.stop().await;

        // The first point died with the panic; the second was evaluated by
        // the restarted worker.
        assert_eq!(*seen.lock(), vec![dec!(2)]);
        assert_eq!(*restarts.lock(), vec!["flaky".to_string()]);
        assert_eq!(manager.stats()[0].restarts, 1);
    }

    #[tokio::test]
    async fn health_checks_tick() {
        let manager = Manager::new(config(4)).unwrap();
        manager
            .register_strategy("fixed", FixedPercentStop::new(dec!(100), dec!(0.05), None).unwrap())
            .unwrap();
        manager.start().unwrap();
        wait_until(|| manager.stats()[0].health_checks >= 2).await;
        manager.stop().await;
    }

    #[tokio::test]
    async fn strategy_access_goes_through_registry() {
        let manager = Manager::new(config(4)).unwrap();
        manager
            .register_strategy("atr", AtrStop::new(dec!(100), dec!(2), dec!(2), None).unwrap())
            .unwrap();
        manager
            .register_strategy("trail", TrailingStop::new(dec!(100), dec!(0.1), None).unwrap())
            .unwrap();

        assert_eq!(manager.strategy_names(), vec!["atr".to_string(), "trail".to_string()]);
        assert_eq!(manager.threshold("atr").unwrap(), dec!(96));

        assert_eq!(manager.broadcast_indicator(IndicatorUpdate::Atr(dec!(3))), 1);
        manager.reset_strategy("atr", dec!(100)).unwrap();
        assert_eq!(manager.threshold("atr").unwrap(), dec!(94));

        assert!(matches!(
            manager.update_indicator("trail", IndicatorUpdate::Atr(dec!(1))),
            Err(EngineError::Strategy(StrategyError::UnsupportedUpdate { .. }))
        ));

        manager.deactivate_strategy("trail").unwrap();
        assert!(matches!(
            manager.threshold("trail"),
            Err(EngineError::Strategy(StrategyError::StatusInvalid))
        ));
        let stats = manager.stats();
        assert!(!stats[1].active);
        assert_eq!(stats[1].threshold, None);

        assert!(matches!(
            manager.threshold("missing"),
            Err(EngineError::UnknownStrategy { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn callback_may_call_back_into_manager() {
        let handle: Arc<OnceLock<Arc<Manager>>> = Arc::new(OnceLock::new());
        let fired = Arc::new(AtomicBool::new(false));

        let h = handle.clone();
        let f = fired.clone();
        let callback = Arc::new(move |_e: &TriggerEvent| -> anyhow::Result<()> {
            if let Some(manager) = h.get() {
                manager.deactivate_strategy("trail")?;
                let _ = manager.threshold("trail");
                let _ = manager.stats();
            }
            f.store(true, Ordering::SeqCst);
            Ok(())
        });

        let manager = Arc::new(Manager::new(config(16)).unwrap());
        manager
            .register_strategy("trail", TrailingStop::new(dec!(100), dec!(0.05), Some(callback)).unwrap())
            .unwrap();
        assert!(handle.set(manager.clone()).is_ok());
        manager.start().unwrap();

        manager.collect(PricePoint::now(dec!(100)), |_| {}).unwrap();
        manager.collect(PricePoint::now(dec!(90)), |_| {}).unwrap();

        wait_until(|| fired.load(Ordering::SeqCst)).await;
        tokio::time::timeout(Duration::from_secs(2), manager.stop())
            .await
            .expect("stop did not return");

        let stats = manager.stats();
        assert!(!stats[0].active);
        assert_eq!(stats[0].triggered, 1);
        assert_eq!(stats[0].errors, 0);
    }

    #[tokio::test]
    async fn failing_callback_is_counted_after_dispatch() {
        let manager = Manager::new(config(16)).unwrap();
        let callback = Arc::new(|_e: &TriggerEvent| -> anyhow::Result<()> { anyhow::bail!("sink closed") });
        manager
            .register_strategy("trail", TrailingStop::new(dec!(100), dec!(0.05), Some(callback)).unwrap())
            .unwrap();
        manager.start().unwrap();

        manager.collect(PricePoint::now(dec!(100)), |_| {}).unwrap();
        manager.collect(PricePoint::now(dec!(90)), |_| {}).unwrap();

        wait_until(|| manager.stats()[0].errors == 1).await;
        manager.stop().await;
        assert_eq!(manager.stats()[0].triggered, 1);
    }
}
