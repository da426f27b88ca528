use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{NotificationEvent, NotificationFilter, NotificationRecord, NotificationStore, NotifyError};

/// SQLite-backed notification log
pub struct SqliteNotificationStore {
    conn: Mutex<Connection>,
}

impl SqliteNotificationStore {
    /// Open (or create) the database file and tables
    pub fn new(path: &Path) -> Result<Self, NotifyError> {
        let conn = Connection::open(path).map_err(|e| NotifyError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| NotifyError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing)
    pub fn in_memory() -> Result<Self, NotifyError> {
        let conn =
            Connection::open_in_memory().map_err(|e| NotifyError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), NotifyError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                orchestration_id TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_timestamp ON notifications(timestamp);
            CREATE INDEX IF NOT EXISTS idx_notifications_orchestration ON notifications(orchestration_id);
            CREATE INDEX IF NOT EXISTS idx_notifications_kind ON notifications(kind);
            "#,
        )
        .map_err(|e| NotifyError::Database(e.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, NotifyError> {
        self.conn
            .lock()
            .map_err(|e| NotifyError::Database(format!("connection lock poisoned: {}", e)))
    }

    fn build_where_clause(filter: &NotificationFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref id) = filter.orchestration_id {
            conditions.push("orchestration_id = ?");
            params.push(Box::new(id.clone()));
        }

        if let Some(ref kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.clone()));
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

impl NotificationStore for SqliteNotificationStore {
    fn insert(&self, record: &NotificationRecord) -> Result<i64, NotifyError> {
        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| NotifyError::Serialization(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notifications (timestamp, kind, orchestration_id, data) VALUES (?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.kind,
                record.orchestration_id,
                data_json,
            ],
        )
        .map_err(|e| NotifyError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &NotificationFilter) -> Result<Vec<NotificationRecord>, NotifyError> {
        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT id, timestamp, kind, orchestration_id, data FROM notifications {} ORDER BY id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| NotifyError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| NotifyError::Database(e.to_string()))?;

        let mut records = Vec::new();
        for row_result in rows {
            let (id, timestamp_str, kind, orchestration_id, data_json) =
                row_result.map_err(|e| NotifyError::Database(e.to_string()))?;

            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp_str)
                .map_err(|e| NotifyError::Database(format!("Invalid timestamp: {}", e)))?
                .into();

            let data: NotificationEvent = serde_json::from_str(&data_json)
                .map_err(|e| NotifyError::Serialization(e.to_string()))?;

            records.push(NotificationRecord {
                id,
                timestamp,
                kind,
                orchestration_id,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &NotificationFilter) -> Result<i64, NotifyError> {
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM notifications {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let conn = self.lock()?;
        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| NotifyError::Database(e.to_string()))
    }
}
