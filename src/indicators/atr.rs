// =============================================================================
// Average True Range (ATR): Wilder's Smoothing Method
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is the Wilder-smoothed average of TR:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// Default period: 14
// =============================================================================

use rust_decimal::Decimal;

use crate::types::Bar;

/// Standard look-back for ATR.
pub const DEFAULT_ATR_PERIOD: usize = 14;

/// True range of `bar` against the previous close.
pub fn true_range(bar: &Bar, prev_close: Decimal) -> Decimal {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Most recent ATR over `bars` (oldest first).
///
/// Returns `None` when `period` is zero or there are fewer than `period + 1`
/// bars (each TR needs a previous close).
pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let tr_values: Vec<Decimal> = bars
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .collect();

    let period_d = Decimal::from(period);
    let seed = tr_values[..period].iter().sum::<Decimal>() / period_d;

    let atr = tr_values[period..]
        .iter()
        .fold(seed, |atr, &tr| (atr * (period_d - Decimal::ONE) + tr) / period_d);

    Some(atr)
}

// =============================================================================
// Streaming tracker
// =============================================================================

/// Incremental Wilder ATR. Produces a value once `period` true ranges have
/// been observed.
#[derive(Debug, Clone)]
pub struct AtrTracker {
    period: usize,
    prev_close: Option<Decimal>,
    seed: Vec<Decimal>,
    atr: Option<Decimal>,
}

impl AtrTracker {
    /// `None` when `period` is zero.
    pub fn new(period: usize) -> Option<Self> {
        if period == 0 {
            return None;
        }
        Some(Self {
            period,
            prev_close: None,
            seed: Vec::with_capacity(period),
            atr: None,
        })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn value(&self) -> Option<Decimal> {
        self.atr
    }

    /// Fold one bar in and return the current ATR, if warmed up.
    pub fn push(&mut self, bar: Bar) -> Option<Decimal> {
        let Some(prev_close) = self.prev_close.replace(bar.close) else {
            return None;
        };
        let tr = true_range(&bar, prev_close);
        let period_d = Decimal::from(self.period);

        self.atr = match self.atr {
            Some(atr) => Some((atr * (period_d - Decimal::ONE) + tr) / period_d),
            None => {
                self.seed.push(tr);
                if self.seed.len() == self.period {
                    let seed = self.seed.iter().sum::<Decimal>() / period_d;
                    self.seed.clear();
                    Some(seed)
                } else {
                    None
                }
            }
        };
        self.atr
    }
}
