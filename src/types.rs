// =============================================================================
// Shared types used across the stop-loss engine
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single observed price. Produced by the external feed and broadcast to
/// every active strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl PricePoint {
    pub fn new(price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self { price, observed_at }
    }

    /// A point stamped with the current wall-clock time.
    pub fn now(price: Decimal) -> Self {
        Self::new(price, Utc::now())
    }
}

/// High / low / close triple used by the ATR indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Bar {
    pub fn new(high: Decimal, low: Decimal, close: Decimal) -> Self {
        Self { high, low, close }
    }

    /// A degenerate bar where every field is the same tick.
    pub fn from_tick(price: Decimal) -> Self {
        Self::new(price, price, price)
    }
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Which side of the position an exit condition protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitKind {
    StopLoss,
    TakeProfit,
}

impl ExitKind {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::StopLoss => 0,
            Self::TakeProfit => 1,
        }
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "SL"),
            Self::TakeProfit => write!(f, "TP"),
        }
    }
}

/// Strategy family identifier, carried on every trigger event and error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    FixedPercent,
    Trailing,
    AtrVolatility,
    MovingAverage,
    RiskReward,
    StructureSwing,
    Composite,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FixedPercent => write!(f, "FixedPercent"),
            Self::Trailing => write!(f, "Trailing"),
            Self::AtrVolatility => write!(f, "AtrVolatility"),
            Self::MovingAverage => write!(f, "MovingAverage"),
            Self::RiskReward => write!(f, "RiskReward"),
            Self::StructureSwing => write!(f, "StructureSwing"),
            Self::Composite => write!(f, "Composite"),
        }
    }
}

/// Externally computed indicator value pushed into a running strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorUpdate {
    Atr(Decimal),
    MovingAverage(Decimal),
}

impl std::fmt::Display for IndicatorUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atr(v) => write!(f, "ATR={v}"),
            Self::MovingAverage(v) => write!(f, "MA={v}"),
        }
    }
}

/// Payload handed to the trigger callback on a false -> true transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerEvent {
    pub kind: StrategyKind,
    pub exit: ExitKind,
    /// Whether the trigger went through a debounce window.
    pub debounced: bool,
    pub price: Decimal,
    pub threshold: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// User-supplied trigger notification. An `Err` is reported back to the
/// caller as `StrategyError::CallbackFailed`; the trigger itself stands.
pub type TriggerCallback = Arc<dyn Fn(&TriggerEvent) -> anyhow::Result<()> + Send + Sync>;
