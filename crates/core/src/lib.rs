pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod lock;
pub mod metrics;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod stats;
pub mod strategy;
pub mod testing;

pub use adapter::{build_catalog, CommandAdapter, ConversionOptions, ToolAdapter};
pub use cache::{CacheKey, CacheManager};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError,
};
pub use error::{ConversionError, ErrorKind};
pub use events::{create_event_system, ConversionEvent, EventHandle, SqliteEventStore};
pub use format::{FormatDetector, FormatId, FormatPair};
pub use lock::{LockGuard, LockManager};
pub use processor::{ConversionProcessor, ConversionRequest, ConversionResult, ConversionStatus};
pub use retry::RetryExecutor;
pub use scheduler::{JobHandle, Scheduler, SchedulerError, SchedulerStatus};
pub use stats::{StatsCollector, StatsRecord};
pub use strategy::{ConversionStrategy, StrategyRegistry};
