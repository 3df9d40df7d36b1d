//! Strategy selection and execution.
//!
//! [`StrategyRegistry`] maps a (source, target) pair to the best available
//! adapter, falling back to [`ChainPlanner`] for multi-hop conversions
//! through hub formats. [`StrategyRunner`] executes one attempt of the
//! resulting [`ConversionStrategy`].

mod planner;
mod registry;
mod runner;
mod types;

pub use planner::ChainPlanner;
pub use registry::StrategyRegistry;
pub use runner::StrategyRunner;
pub use types::{ConversionStrategy, Hop};
