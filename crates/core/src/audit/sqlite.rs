use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::Database;

use super::{AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore};

fn initialize_schema(conn: &Connection) -> Result<(), AuditError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS audit_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            subject_id TEXT,
            user_id TEXT,
            data TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_audit_events_subject_id ON audit_events(subject_id);
        CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
        CREATE INDEX IF NOT EXISTS idx_audit_events_user_id ON audit_events(user_id);
        "#,
    )?;
    Ok(())
}

/// SQLite-backed audit store
pub struct SqliteAuditStore {
    db: Database,
}

impl SqliteAuditStore {
    pub fn new(db: Database) -> Result<Self, AuditError> {
        initialize_schema(&db.lock())?;
        Ok(Self { db })
    }

    /// Create an in-memory SQLite audit store (useful for testing)
    pub fn in_memory() -> Result<Self, AuditError> {
        Self::new(Database::in_memory()?)
    }

    fn build_where_clause(filter: &AuditFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref subject_id) = filter.subject_id {
            conditions.push("subject_id = ?");
            params.push(Box::new(subject_id.clone()));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(from.to_rfc3339()));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(to.to_rfc3339()));
        }

        (crate::db::where_clause(&conditions), params)
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, subject_id, user_id, data) VALUES (?, ?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.event_type,
                record.subject_id,
                record.user_id,
                data_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.db.lock();
        let (where_clause, mut params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT id, timestamp, event_type, subject_id, user_id, data FROM audit_events {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );

        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, timestamp, event_type, subject_id, user_id, data_json) = row?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| AuditError::Database(format!("Invalid timestamp: {}", e)))?
                .into();
            let data: AuditEvent = serde_json::from_str(&data_json)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;

            records.push(AuditRecord {
                id,
                timestamp,
                event_type,
                subject_id,
                user_id,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.db.lock();
        let (where_clause, params) = Self::build_where_clause(filter);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        Ok(conn.query_row(
            &format!("SELECT COUNT(*) FROM audit_events {}", where_clause),
            param_refs.as_slice(),
            |row| row.get(0),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(event: AuditEvent, timestamp: DateTime<Utc>) -> AuditRecord {
        AuditRecord {
            id: 0,
            timestamp,
            event_type: event.event_type().to_string(),
            subject_id: event.subject_id().map(String::from),
            user_id: event.user_id().map(String::from),
            data: event,
        }
    }

    fn status_changed(run_id: &str, by: &str) -> AuditEvent {
        AuditEvent::ImportRunStatusChanged {
            run_id: run_id.to_string(),
            from_status: "running".to_string(),
            to_status: "pause_requested".to_string(),
            requested_by: by.to_string(),
        }
    }

    #[test]
    fn test_insert_and_query() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let id = store
            .insert(&record(status_changed("run-1", "ops"), Utc::now()))
            .unwrap();
        assert!(id > 0);

        let results = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, "import_run_status_changed");
        assert_eq!(results[0].subject_id.as_deref(), Some("run-1"));
        assert_eq!(results[0].data, status_changed("run-1", "ops"));
    }

    #[test]
    fn test_filters() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .insert(&record(status_changed("run-1", "ops"), now - Duration::hours(2)))
            .unwrap();
        store
            .insert(&record(status_changed("run-2", "alice"), now))
            .unwrap();
        store
            .insert(&record(
                AuditEvent::ServiceStopped {
                    reason: "test".to_string(),
                },
                now,
            ))
            .unwrap();

        let by_subject = store
            .query(&AuditFilter::new().with_subject_id("run-1"))
            .unwrap();
        assert_eq!(by_subject.len(), 1);

        let by_user = store.query(&AuditFilter::new().with_user_id("alice")).unwrap();
        assert_eq!(by_user[0].subject_id.as_deref(), Some("run-2"));

        let by_type = AuditFilter::new().with_event_type("import_run_status_changed");
        assert_eq!(store.count(&by_type).unwrap(), 2);

        let recent = AuditFilter::new().with_time_range(Some(now - Duration::hours(1)), None);
        assert_eq!(store.count(&recent).unwrap(), 2);
    }

    #[test]
    fn test_pagination_newest_first() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let base = Utc::now();
        for i in 0..5 {
            store
                .insert(&record(
                    status_changed(&format!("run-{}", i), "ops"),
                    base + Duration::seconds(i),
                ))
                .unwrap();
        }

        let page = store
            .query(&AuditFilter::new().with_limit(2).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].subject_id.as_deref(), Some("run-3"));
        assert_eq!(page[1].subject_id.as_deref(), Some("run-2"));
    }
}
