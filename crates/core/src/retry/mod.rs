//! Retry of transient conversion failures.

mod executor;

pub use executor::{RetryExecutor, RetryOutcome};
