use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionEvent {
    // Run lifecycle
    RunStarted {
        version: String,
        inputs: usize,
        max_concurrency: usize,
    },
    RunFinished {
        succeeded: usize,
        failed: usize,
        duration_ms: u64,
    },

    /// A probed adapter is not installed on this host.
    AdapterUnavailable {
        adapter: String,
        critical: bool,
    },

    // Per-job events
    ConversionStarted {
        job_id: String,
        input: String,
        target: String,
    },
    ConversionSucceeded {
        job_id: String,
        input: String,
        output: String,
        strategy: String,
        attempts: u32,
        cache_hit: bool,
        duration_ms: u64,
    },
    ConversionFailed {
        job_id: String,
        input: String,
        target: String,
        /// `ErrorKind` tag, e.g. "timeout"
        error_kind: String,
        error: String,
        attempts: u32,
    },
    CacheHit {
        job_id: String,
        key: String,
    },
    LockContended {
        job_id: String,
        input: String,
    },
    /// A lease left behind by a dead owner was taken over.
    LeaseReclaimed {
        job_id: String,
        input: String,
    },
}

impl ConversionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunFinished { .. } => "run_finished",
            Self::AdapterUnavailable { .. } => "adapter_unavailable",
            Self::ConversionStarted { .. } => "conversion_started",
            Self::ConversionSucceeded { .. } => "conversion_succeeded",
            Self::ConversionFailed { .. } => "conversion_failed",
            Self::CacheHit { .. } => "cache_hit",
            Self::LockContended { .. } => "lock_contended",
            Self::LeaseReclaimed { .. } => "lease_reclaimed",
        }
    }

    pub fn level(&self) -> EventLevel {
        match self {
            Self::ConversionFailed { .. } => EventLevel::Error,
            Self::AdapterUnavailable { critical: true, .. } => EventLevel::Error,
            Self::RunFinished { failed, .. } if *failed > 0 => EventLevel::Warn,
            Self::AdapterUnavailable { .. }
            | Self::LockContended { .. }
            | Self::LeaseReclaimed { .. } => EventLevel::Warn,
            _ => EventLevel::Info,
        }
    }

    /// Job this event belongs to, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::ConversionStarted { job_id, .. }
            | Self::ConversionSucceeded { job_id, .. }
            | Self::ConversionFailed { job_id, .. }
            | Self::CacheHit { job_id, .. }
            | Self::LockContended { job_id, .. }
            | Self::LeaseReclaimed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// One-line human readable description.
    pub fn message(&self) -> String {
        match self {
            Self::RunStarted {
                inputs,
                max_concurrency,
                ..
            } => format!("Run started: {} inputs, {} workers", inputs, max_concurrency),
            Self::RunFinished {
                succeeded,
                failed,
                duration_ms,
            } => format!(
                "Run finished: {} succeeded, {} failed in {} ms",
                succeeded, failed, duration_ms
            ),
            Self::AdapterUnavailable { adapter, critical } => {
                if *critical {
                    format!("Critical adapter {} is not available", adapter)
                } else {
                    format!("Adapter {} is not available", adapter)
                }
            }
            Self::ConversionStarted { input, target, .. } => {
                format!("Converting {} to {}", input, target)
            }
            Self::ConversionSucceeded {
                input,
                output,
                strategy,
                cache_hit,
                ..
            } => {
                if *cache_hit {
                    format!("{} -> {} (cached)", input, output)
                } else {
                    format!("{} -> {} via {}", input, output, strategy)
                }
            }
            Self::ConversionFailed {
                input,
                target,
                error,
                attempts,
                ..
            } => format!(
                "Failed to convert {} to {} after {} attempt(s): {}",
                input, target, attempts, error
            ),
            Self::CacheHit { key, .. } => format!("Cache hit {}", key),
            Self::LockContended { input, .. } => format!("{} is locked by another job", input),
            Self::LeaseReclaimed { input, .. } => format!("Reclaimed stale lease on {}", input),
        }
    }
}

/// A stored event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub event_type: String,
    pub message: String,
    pub data: ConversionEvent,
}

impl EventRecord {
    pub fn from_event(timestamp: DateTime<Utc>, event: ConversionEvent) -> Self {
        Self {
            id: 0,
            timestamp,
            level: event.level(),
            event_type: event.event_type().to_string(),
            message: event.message(),
            data: event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> ConversionEvent {
        ConversionEvent::ConversionFailed {
            job_id: "job-1".to_string(),
            input: "/docs/a.svg".to_string(),
            target: "docx".to_string(),
            error_kind: "chain_planning_failure".to_string(),
            error: "no chain".to_string(),
            attempts: 1,
        }
    }

    #[test]
    fn test_event_type_and_level() {
        let event = failed();
        assert_eq!(event.event_type(), "conversion_failed");
        assert_eq!(event.level(), EventLevel::Error);
        assert_eq!(event.job_id(), Some("job-1"));
    }

    #[test]
    fn test_adapter_unavailable_level_depends_on_criticality() {
        let optional = ConversionEvent::AdapterUnavailable {
            adapter: "pdf2docx".to_string(),
            critical: false,
        };
        let critical = ConversionEvent::AdapterUnavailable {
            adapter: "pandoc".to_string(),
            critical: true,
        };
        assert_eq!(optional.level(), EventLevel::Warn);
        assert_eq!(critical.level(), EventLevel::Error);
        assert!(critical.message().starts_with("Critical"));
        assert_eq!(critical.job_id(), None);
    }

    #[test]
    fn test_run_finished_level() {
        let clean = ConversionEvent::RunFinished {
            succeeded: 3,
            failed: 0,
            duration_ms: 10,
        };
        let dirty = ConversionEvent::RunFinished {
            succeeded: 2,
            failed: 1,
            duration_ms: 10,
        };
        assert_eq!(clean.level(), EventLevel::Info);
        assert_eq!(dirty.level(), EventLevel::Warn);
    }

    #[test]
    fn test_serialize_tagged() {
        let json = serde_json::to_string(&failed()).unwrap();
        assert!(json.contains("\"type\":\"conversion_failed\""));
        assert!(json.contains("\"error_kind\":\"chain_planning_failure\""));

        let back: ConversionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "conversion_failed");
    }

    #[test]
    fn test_record_from_event() {
        let record = EventRecord::from_event(Utc::now(), failed());
        assert_eq!(record.level, EventLevel::Error);
        assert_eq!(record.event_type, "conversion_failed");
        assert!(record.message.contains("after 1 attempt(s)"));
    }

    #[test]
    fn test_level_parse() {
        for level in [EventLevel::Info, EventLevel::Warn, EventLevel::Error] {
            assert_eq!(EventLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(EventLevel::parse("debug"), None);
    }
}
