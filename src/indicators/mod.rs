// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Decimal implementations of the indicators that feed the ATR and
// moving-average exit strategies. Batch functions return `Option<T>` so
// callers handle insufficient data explicitly; the trackers fold one value
// at a time for streaming use.

pub mod atr;
pub mod moving_average;

pub use atr::{calculate_atr, AtrTracker};
pub use moving_average::{calculate_ema, calculate_sma, SmaTracker};
