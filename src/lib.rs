//! Concurrent stop-loss / take-profit evaluation engine.
//!
//! Price points are fanned out to independently configured exit strategies,
//! each running in its own supervised worker. A strategy invokes its trigger
//! callback exactly when its condition goes from false to true.

pub mod config;
pub mod error;
pub mod indicators;
pub mod stoploss;
pub mod supervisor;
pub mod types;

pub use config::{AppConfig, EngineConfig, StrategyConfig, StrategySpec};
pub use error::{EngineError, StrategyError};
pub use stoploss::{CompositeCondition, Manager, Strategy, TriggerMode};
pub use supervisor::Supervisor;
pub use types::{Direction, ExitKind, PricePoint, StrategyKind, TriggerCallback, TriggerEvent};
