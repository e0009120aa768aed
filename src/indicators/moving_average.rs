// =============================================================================
// Moving averages: SMA and EMA
// =============================================================================
//
// SMA: arithmetic mean of the last `period` values.
//
// EMA:
//   multiplier = 2 / (period + 1)
//   EMA_t      = value_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first EMA value is seeded with the SMA of the first `period` values.
// =============================================================================

use std::collections::VecDeque;

use rust_decimal::Decimal;

/// Mean of the newest `period` values, `None` when there are not enough.
pub fn calculate_sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<Decimal>() / Decimal::from(period))
}

/// EMA series for `values`; element `i` corresponds to input index
/// `period - 1 + i`. Empty when `period` is zero or the input is too short.
pub fn calculate_ema(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = Decimal::TWO / Decimal::from(period + 1);
    let seed = values[..period].iter().sum::<Decimal>() / Decimal::from(period);

    let mut result = Vec::with_capacity(values.len() - period + 1);
    result.push(seed);

    let mut prev = seed;
    for &value in &values[period..] {
        prev = value * multiplier + prev * (Decimal::ONE - multiplier);
        result.push(prev);
    }
    result
}

/// Rolling SMA over a fixed window.
#[derive(Debug, Clone)]
pub struct SmaTracker {
    period: usize,
    window: VecDeque<Decimal>,
    sum: Decimal,
}

impl SmaTracker {
    /// `None` when `period` is zero.
    pub fn new(period: usize) -> Option<Self> {
        (period > 0).then(|| Self {
            period,
            window: VecDeque::with_capacity(period),
            sum: Decimal::ZERO,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn value(&self) -> Option<Decimal> {
        (self.window.len() == self.period).then(|| self.sum / Decimal::from(self.period))
    }

    /// Fold one value in and return the SMA once the window is full.
    pub fn push(&mut self, value: Decimal) -> Option<Decimal> {
        self.window.push_back(value);
        self.sum += value;
        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.value()
    }
}
