//! Aggregate conversion statistics.
//!
//! A single collector task owns the aggregate; everything else talks to it
//! through a [`StatsCollector`] handle.

mod collector;
mod record;

pub use collector::{StatsCollector, StatsError};
pub use record::{PairStats, StatsRecord};
