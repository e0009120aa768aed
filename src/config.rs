// =============================================================================
// Configuration: engine tuning and strategy definitions with atomic save
// =============================================================================
//
// `EngineConfig` tunes the manager (channel depth, worker intervals).
// `AppConfig` wraps it together with the strategy list and indicator periods
// read by the driver binary.
//
// Persistence uses an atomic tmp + rename pattern. Every field carries a
// serde default so older files keep loading as fields are added.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, StrategyError};
use crate::indicators::atr::DEFAULT_ATR_PERIOD;
use crate::stoploss::composite::{CompositeCondition, TriggerMode};
use crate::stoploss::strategy::{
    AtrStop, DebouncedAtrStop, DebouncedFixedStop, DebouncedMovingAverageStop,
    DebouncedTrailingStop, FixedPercentStop, MovingAverageStop, RiskRewardStop, Strategy,
    StructureSwingStop, TrailingStop,
};
use crate::types::{Direction, TriggerCallback};

/// Environment variable naming the config file read by the driver.
pub const CONFIG_PATH_ENV: &str = "STOPLOSS_CONFIG";

/// Config file used when `STOPLOSS_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "stoploss.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_buffer_size() -> usize {
    64
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_check_interval_ms() -> u64 {
    30_000
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

fn default_atr_period() -> usize {
    DEFAULT_ATR_PERIOD
}

fn default_ma_period() -> usize {
    20
}

// =============================================================================
// EngineConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of each strategy's input channel.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Read timeout for price sources feeding the manager.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Worker health-check period.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Pause before a panicked worker is restarted.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            read_timeout_ms: default_read_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |message: &str| {
            Err(EngineError::InvalidConfig {
                message: message.to_string(),
            })
        };
        if self.buffer_size == 0 {
            return invalid("buffer_size must be at least 1");
        }
        if self.check_interval_ms == 0 {
            return invalid("check_interval_ms must be positive");
        }
        if self.retry_interval_ms == 0 {
            return invalid("retry_interval_ms must be positive");
        }
        if self.read_timeout_ms == 0 {
            return invalid("read_timeout_ms must be positive");
        }
        Ok(())
    }
}

// =============================================================================
// Strategy definitions
// =============================================================================

/// One named strategy in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(flatten)]
    pub spec: StrategySpec,
}

/// Strategy parameters, tagged by `type`. Single-sided families become
/// time-gated when `debounce_ms` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategySpec {
    FixedPercent {
        entry_price: Decimal,
        percentage: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
    },
    Trailing {
        entry_price: Decimal,
        percentage: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
    },
    Atr {
        entry_price: Decimal,
        atr: Decimal,
        multiplier: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
    },
    MovingAverage {
        initial_ma: Decimal,
        offset: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        debounce_ms: Option<u64>,
    },
    RiskReward {
        entry_price: Decimal,
        risk_ratio: Decimal,
        reward_ratio: Decimal,
    },
    StructureSwing {
        entry_price: Decimal,
        #[serde(default)]
        direction: Direction,
        lookback: usize,
        swing_distance: Decimal,
    },
    Composite {
        #[serde(default)]
        mode: TriggerMode,
        conditions: Vec<StrategySpec>,
    },
}

impl StrategySpec {
    /// Construct the strategy. Composite members share `callback`.
    pub fn build(&self, callback: Option<TriggerCallback>) -> Result<Box<dyn Strategy>, StrategyError> {
        let strategy: Box<dyn Strategy> = match self {
            Self::FixedPercent {
                entry_price,
                percentage,
                debounce_ms,
            } => match debounce_ms {
                Some(ms) => Box::new(DebouncedFixedStop::new(
                    *entry_price,
                    *percentage,
                    Duration::from_millis(*ms),
                    callback,
                )?),
                None => Box::new(FixedPercentStop::new(*entry_price, *percentage, callback)?),
            },
            Self::Trailing {
                entry_price,
                percentage,
                debounce_ms,
            } => match debounce_ms {
                Some(ms) => Box::new(DebouncedTrailingStop::new(
                    *entry_price,
                    *percentage,
                    Duration::from_millis(*ms),
                    callback,
                )?),
                None => Box::new(TrailingStop::new(*entry_price, *percentage, callback)?),
            },
            Self::Atr {
                entry_price,
                atr,
                multiplier,
                debounce_ms,
            } => match debounce_ms {
                Some(ms) => Box::new(DebouncedAtrStop::new(
                    *entry_price,
                    *atr,
                    *multiplier,
                    Duration::from_millis(*ms),
                    callback,
                )?),
                None => Box::new(AtrStop::new(*entry_price, *atr, *multiplier, callback)?),
            },
            Self::MovingAverage {
                initial_ma,
                offset,
                debounce_ms,
            } => match debounce_ms {
                Some(ms) => Box::new(DebouncedMovingAverageStop::new(
                    *initial_ma,
                    *offset,
                    Duration::from_millis(*ms),
                    callback,
                )?),
                None => Box::new(MovingAverageStop::new(*initial_ma, *offset, callback)?),
            },
            Self::RiskReward {
                entry_price,
                risk_ratio,
                reward_ratio,
            } => Box::new(RiskRewardStop::new(
                *entry_price,
                *risk_ratio,
                *reward_ratio,
                callback,
            )?),
            Self::StructureSwing {
                entry_price,
                direction,
                lookback,
                swing_distance,
            } => Box::new(StructureSwingStop::new(
                *entry_price,
                *direction,
                *lookback,
                *swing_distance,
                callback,
            )?),
            Self::Composite { mode, conditions } => {
                let mut composite = CompositeCondition::new(*mode);
                for condition in conditions {
                    composite.add(condition.build(callback.clone())?);
                }
                Box::new(composite)
            }
        };
        Ok(strategy)
    }
}

// =============================================================================
// Indicator periods
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    #[serde(default = "default_ma_period")]
    pub ma_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            atr_period: default_atr_period(),
            ma_period: default_ma_period(),
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,

    #[serde(default)]
    pub indicators: IndicatorConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error so the caller can fall back to defaults
    /// with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            strategies = config.strategies.len(),
            buffer_size = config.engine.buffer_size,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist to `path` with an atomic write (write `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }
}
