// =============================================================================
// Resolver base: lifecycle, edge-triggered dispatch, breach timers
// =============================================================================
//
// Every strategy composes a `ResolverState`:
//
//   - `active` gates every operation except reset.
//   - One latch per exit side turns the level condition ("price is beyond
//     the threshold") into an edge: the callback fires on false -> true only,
//     and the latch re-arms once the condition goes false again.
//   - In deferred mode a rising edge is queued as a `PendingTrigger` instead
//     of calling the callback, so the owner can release its lock first.
//
// Debounced strategies additionally own a `BreachTimer` per exit side.
// =============================================================================

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::error::StrategyError;
use crate::types::{ExitKind, TriggerCallback, TriggerEvent};

/// A rising edge whose callback has not run yet.
#[derive(Clone)]
pub struct PendingTrigger {
    pub event: TriggerEvent,
    callback: TriggerCallback,
}

impl std::fmt::Debug for PendingTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTrigger").field("event", &self.event).finish()
    }
}

impl PendingTrigger {
    /// Run the callback. `Err(CallbackFailed)` when it rejects the event.
    pub fn dispatch(self) -> Result<(), StrategyError> {
        notify(&self.callback, &self.event)
    }
}

fn notify(callback: &TriggerCallback, event: &TriggerEvent) -> Result<(), StrategyError> {
    callback(event).map_err(|e| {
        warn!(
            kind = %event.kind,
            exit = %event.exit,
            error = %e,
            "trigger callback failed"
        );
        StrategyError::CallbackFailed {
            message: format!("{e:#}"),
        }
    })
}

/// Active flag, trigger callback, per-side edge latches and the queue of
/// deferred triggers.
#[derive(Clone)]
pub struct ResolverState {
    active: bool,
    callback: Option<TriggerCallback>,
    latched: [bool; 2],
    deferred: bool,
    outbox: Vec<PendingTrigger>,
}

impl std::fmt::Debug for ResolverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverState")
            .field("active", &self.active)
            .field("has_callback", &self.callback.is_some())
            .field("latched", &self.latched)
            .field("deferred", &self.deferred)
            .field("queued", &self.outbox.len())
            .finish()
    }
}

impl ResolverState {
    pub fn new(callback: Option<TriggerCallback>) -> Self {
        Self {
            active: true,
            callback,
            latched: [false; 2],
            deferred: false,
            outbox: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Fail with `StatusInvalid` once deactivated.
    pub fn ensure_active(&self) -> Result<(), StrategyError> {
        if self.active {
            Ok(())
        } else {
            Err(StrategyError::StatusInvalid)
        }
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Re-activate and re-arm both latches.
    pub fn activate(&mut self) {
        self.active = true;
        self.latched = [false; 2];
    }

    pub fn set_callback(&mut self, callback: Option<TriggerCallback>) {
        self.callback = callback;
    }

    /// Queue rising edges instead of calling the callback inline.
    pub fn set_deferred(&mut self, deferred: bool) {
        self.deferred = deferred;
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Move every queued trigger into `out`, oldest first.
    pub fn drain_into(&mut self, out: &mut Vec<PendingTrigger>) {
        out.append(&mut self.outbox);
    }

    pub fn is_latched(&self, exit: ExitKind) -> bool {
        self.latched[exit.index()]
    }

    /// Record the current level of `exit` and fire the callback on a rising
    /// edge.
    ///
    /// Returns `Ok(hit)`, or `Err(CallbackFailed)` when the callback rejected
    /// a rising edge (the condition is still considered triggered). In
    /// deferred mode the edge is queued and the result is always `Ok(hit)`.
    pub fn settle<E>(&mut self, exit: ExitKind, hit: bool, event: E) -> Result<bool, StrategyError>
    where
        E: FnOnce() -> TriggerEvent,
    {
        let slot = &mut self.latched[exit.index()];
        if !hit {
            *slot = false;
            return Ok(false);
        }
        if *slot {
            return Ok(true);
        }
        *slot = true;

        let event = event();
        info!(
            kind = %event.kind,
            exit = %event.exit,
            debounced = event.debounced,
            price = %event.price,
            threshold = %event.threshold,
            "exit condition triggered"
        );

        let Some(callback) = &self.callback else {
            return Ok(true);
        };
        if self.deferred {
            self.outbox.push(PendingTrigger {
                event,
                callback: callback.clone(),
            });
            return Ok(true);
        }
        notify(callback, &event)?;
        Ok(true)
    }
}

/// Combine the outcomes of the stop-loss and take-profit checks of one
/// evaluation.
///
/// Hard errors win over callback failures, which win over plain results.
pub fn merge_outcomes(
    stop: Result<bool, StrategyError>,
    take: Result<bool, StrategyError>,
) -> Result<bool, StrategyError> {
    match (stop, take) {
        (Err(e), _) if !e.is_triggered() => Err(e),
        (_, Err(e)) if !e.is_triggered() => Err(e),
        (Err(e), _) | (_, Err(e)) => Err(e),
        (Ok(a), Ok(b)) => Ok(a || b),
    }
}

// =============================================================================
// BreachTimer: continuous-breach debounce
// =============================================================================

/// Tracks how long a threshold has been continuously breached.
///
/// The first breaching observation starts the timer. The condition holds
/// once `now - start >= window`. Any non-breaching observation clears the
/// timer completely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreachTimer {
    window: TimeDelta,
    started_at: Option<DateTime<Utc>>,
}

impl BreachTimer {
    pub fn new(window: std::time::Duration) -> Result<Self, StrategyError> {
        let window = TimeDelta::from_std(window).map_err(|e| StrategyError::InvalidTimeThreshold {
            message: e.to_string(),
        })?;
        Ok(Self {
            window,
            started_at: None,
        })
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Feed one observation; returns whether the breach has lasted the full
    /// window.
    pub fn observe(&mut self, breached: bool, at: DateTime<Utc>) -> bool {
        if !breached {
            if self.started_at.take().is_some() {
                debug!(at = %at, "breach recovered — timer cleared");
            }
            return false;
        }
        let start = *self.started_at.get_or_insert(at);
        at.signed_duration_since(start) >= self.window
    }

    pub fn clear(&mut self) {
        self.started_at = None;
    }
}

// =============================================================================
// Tests
// =============================================================================
