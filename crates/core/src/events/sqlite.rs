use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{ConversionEvent, EventError, EventFilter, EventLevel, EventRecord, EventStore};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL,
        event_type TEXT NOT NULL,
        message TEXT NOT NULL,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_events_event_type ON events(event_type);
    CREATE INDEX IF NOT EXISTS idx_events_level ON events(level);
"#;

/// SQLite-backed event store
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, EventError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EventError::Database(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| EventError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// In-memory store (useful for testing)
    pub fn in_memory() -> Result<Self, EventError> {
        let conn = Connection::open_in_memory().map_err(|e| EventError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, EventError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| EventError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, EventError> {
        self.conn
            .lock()
            .map_err(|_| EventError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &EventFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        if let Some(level) = filter.level {
            conditions.push("level = ?");
            params.push(Box::new(level.as_str()));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(from.to_rfc3339()));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(to.to_rfc3339()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl EventStore for SqliteEventStore {
    fn insert(&self, record: &EventRecord) -> Result<i64, EventError> {
        let conn = self.lock()?;

        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| EventError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO events (timestamp, level, event_type, message, data) VALUES (?, ?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.level.as_str(),
                record.event_type,
                record.message,
                data_json,
            ],
        )
        .map_err(|e| EventError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT id, timestamp, level, event_type, message, data FROM events {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EventError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| EventError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            let (id, timestamp_str, level_str, event_type, message, data_json) =
                row_result.map_err(|e| EventError::Database(e.to_string()))?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|e| EventError::Database(format!("Invalid timestamp: {}", e)))?
                .into();
            let level = EventLevel::parse(&level_str)
                .ok_or_else(|| EventError::Database(format!("Invalid level: {}", level_str)))?;
            let data: ConversionEvent = serde_json::from_str(&data_json)
                .map_err(|e| EventError::Serialization(e.to_string()))?;

            records.push(EventRecord {
                id,
                timestamp,
                level,
                event_type,
                message,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &EventFilter) -> Result<i64, EventError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM events {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| EventError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_store() -> SqliteEventStore {
        SqliteEventStore::in_memory().unwrap()
    }

    fn started_record() -> EventRecord {
        EventRecord::from_event(
            Utc::now(),
            ConversionEvent::ConversionStarted {
                job_id: "job-1".to_string(),
                input: "/in/a.md".to_string(),
                target: "txt".to_string(),
            },
        )
    }

    fn failed_record(job_id: &str) -> EventRecord {
        EventRecord::from_event(
            Utc::now(),
            ConversionEvent::ConversionFailed {
                job_id: job_id.to_string(),
                input: "/in/a.svg".to_string(),
                target: "docx".to_string(),
                error_kind: "chain_planning_failure".to_string(),
                error: "no chain".to_string(),
                attempts: 1,
            },
        )
    }

    #[test]
    fn test_insert_and_query() {
        let store = create_test_store();
        let id = store.insert(&started_record()).unwrap();
        assert!(id > 0);

        let results = store.query(&EventFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert_eq!(results[0].event_type, "conversion_started");
        assert_eq!(results[0].level, EventLevel::Info);
        assert_eq!(results[0].message, "Converting /in/a.md to txt");
    }

    #[test]
    fn test_query_by_type_and_level() {
        let store = create_test_store();
        store.insert(&started_record()).unwrap();
        store.insert(&failed_record("job-1")).unwrap();
        store.insert(&failed_record("job-2")).unwrap();

        let failures = store
            .query(&EventFilter::new().with_event_type("conversion_failed"))
            .unwrap();
        assert_eq!(failures.len(), 2);

        let errors = store
            .count(&EventFilter::new().with_level(EventLevel::Error))
            .unwrap();
        assert_eq!(errors, 2);
        assert_eq!(store.count(&EventFilter::new()).unwrap(), 3);
    }

    #[test]
    fn test_query_with_time_range() {
        let store = create_test_store();
        let now = Utc::now();

        let mut old = started_record();
        old.timestamp = now - Duration::hours(2);
        store.insert(&old).unwrap();
        store.insert(&started_record()).unwrap();

        let filter = EventFilter::new().with_time_range(Some(now - Duration::hours(1)), None);
        assert_eq!(store.query(&filter).unwrap().len(), 1);
    }

    #[test]
    fn test_pagination() {
        let store = create_test_store();
        for i in 0..5 {
            store.insert(&failed_record(&format!("job-{}", i))).unwrap();
        }

        let page = |offset| {
            store
                .query(&EventFilter::new().with_limit(2).with_offset(offset))
                .unwrap()
                .len()
        };
        assert_eq!(page(0), 2);
        assert_eq!(page(2), 2);
        assert_eq!(page(4), 1);
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("events.db");

        {
            let store = SqliteEventStore::new(&db_path).unwrap();
            store.insert(&started_record()).unwrap();
        }
        assert!(db_path.exists());

        let reopened = SqliteEventStore::new(&db_path).unwrap();
        assert_eq!(reopened.count(&EventFilter::new()).unwrap(), 1);
    }
}
