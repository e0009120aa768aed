//! Exit-condition evaluation: strategies, the composite aggregator and the
//! engine manager that drives them.

pub mod composite;
pub mod manager;
pub mod resolver;
pub mod strategy;

pub use composite::{CompositeCondition, TriggerMode};
pub use manager::{Lifecycle, Manager, RestartHook, StrategyStats};
pub use resolver::PendingTrigger;
pub use strategy::Strategy;
