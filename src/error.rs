//! Engine and strategy errors.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::StrategyKind;

/// Errors returned by strategy constructors and per-call operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// Percentage or offset outside `[0, 1]`.
    #[error("percentage must be within [0, 1], got {value}")]
    InvalidPercentage {
        /// Rejected value.
        value: Decimal,
    },

    /// Risk ratio outside `[0, 1]`.
    #[error("risk ratio must be within [0, 1], got {value}")]
    InvalidRiskRatio {
        /// Rejected value.
        value: Decimal,
    },

    /// Reward ratio outside `[0, 10]`.
    #[error("reward ratio must be within [0, 10], got {value}")]
    InvalidRewardRatio {
        /// Rejected value.
        value: Decimal,
    },

    /// Non-positive ATR.
    #[error("ATR must be positive, got {value}")]
    InvalidAtr {
        /// Rejected value.
        value: Decimal,
    },

    /// Non-positive ATR multiplier.
    #[error("ATR multiplier must be positive, got {value}")]
    InvalidMultiplier {
        /// Rejected value.
        value: Decimal,
    },

    /// Zero or oversized lookback window.
    #[error("lookback must be between 1 and 10000, got {value}")]
    InvalidLookback {
        /// Rejected value.
        value: usize,
    },

    /// Swing distance outside `(0, 1]`.
    #[error("swing distance must be within (0, 1], got {value}")]
    InvalidSwingDistance {
        /// Rejected value.
        value: Decimal,
    },

    /// Non-positive entry or reset price.
    #[error("price must be positive, got {value}")]
    InvalidPrice {
        /// Rejected value.
        value: Decimal,
    },

    /// Non-positive moving average.
    #[error("moving average must be positive, got {value}")]
    InvalidMovingAverage {
        /// Rejected value.
        value: Decimal,
    },

    /// Debounce window that cannot be represented.
    #[error("time threshold out of range: {message}")]
    InvalidTimeThreshold {
        /// Error details.
        message: String,
    },

    /// Operation attempted on a deactivated strategy.
    #[error("strategy is inactive; reset it before use")]
    StatusInvalid,

    /// The condition fired but the trigger callback returned an error.
    #[error("trigger callback failed: {message}")]
    CallbackFailed {
        /// Callback error rendered with its cause chain.
        message: String,
    },

    /// The strategy does not consume this indicator.
    #[error("{kind} strategy does not accept this indicator update")]
    UnsupportedUpdate {
        /// Strategy family that rejected the update.
        kind: StrategyKind,
    },
}

impl StrategyError {
    /// `true` when the error still implies the exit condition fired.
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::CallbackFailed { .. })
    }
}

/// Errors returned by the supervisor and the engine manager.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start` called twice, or registration attempted after `start`.
    #[error("engine already started")]
    AlreadyStarted,

    /// Operation attempted after `stop`.
    #[error("engine stopped")]
    Stopped,

    /// A strategy with this name is already registered.
    #[error("strategy already registered: {name}")]
    DuplicateStrategy {
        /// Conflicting name.
        name: String,
    },

    /// No strategy with this name.
    #[error("strategy not found: {name}")]
    UnknownStrategy {
        /// Missing name.
        name: String,
    },

    /// Engine configuration rejected at construction.
    #[error("invalid engine config: {message}")]
    InvalidConfig {
        /// Error details.
        message: String,
    },

    /// Error raised by a strategy while serving a manager request.
    #[error(transparent)]
    Strategy(#[from] StrategyError),
}
