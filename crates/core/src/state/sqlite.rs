//! SQLite-backed state store implementation.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use super::{ItemFilter, ItemState, OrchestrationState, StateStore, StoreError};
use crate::key::OrchestrationKey;

/// SQLite-backed state store.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the database file and tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // the notification store writes to the same file
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS orchestrations (
                id TEXT PRIMARY KEY,
                running INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS items (
                orchestration_id TEXT NOT NULL,
                id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                state TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                PRIMARY KEY (orchestration_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_orchestrations_last_updated ON orchestrations(last_updated DESC);
            CREATE INDEX IF NOT EXISTS idx_items_phase ON items(orchestration_id, phase);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("connection lock poisoned: {}", e)))
    }

    fn decode<T: serde::de::DeserializeOwned>(id: &str, json: &str) -> Result<T, StoreError> {
        serde_json::from_str(json).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            message: e.to_string(),
        })
    }

    fn encode<T: serde::Serialize>(id: &str, value: &T) -> Result<String, StoreError> {
        serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            message: e.to_string(),
        })
    }

    fn build_item_where_clause(
        key: &OrchestrationKey,
        filter: &ItemFilter,
    ) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = vec!["orchestration_id = ?"];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(key.to_string())];

        if let Some(ref phase) = filter.phase {
            conditions.push("phase = ?");
            params.push(Box::new(phase.clone()));
        }

        if let Some(run_id) = filter.run_id {
            conditions.push("run_id = ?");
            params.push(Box::new(run_id.to_string()));
        }

        (format!("WHERE {}", conditions.join(" AND ")), params)
    }
}

impl StateStore for SqliteStateStore {
    fn load_orchestration(
        &self,
        key: &OrchestrationKey,
    ) -> Result<Option<OrchestrationState>, StoreError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state FROM orchestrations WHERE id = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| Self::decode(key.as_str(), &j)).transpose()
    }

    fn save_orchestration(&self, state: &OrchestrationState) -> Result<(), StoreError> {
        let json = Self::encode(state.id.as_str(), state)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO orchestrations (id, running, state, last_updated)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                running = excluded.running,
                state = excluded.state,
                last_updated = excluded.last_updated
            "#,
            params![
                state.id.as_str(),
                state.running,
                json,
                state.last_updated.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn list_orchestrations(&self) -> Result<Vec<OrchestrationState>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, state FROM orchestrations ORDER BY last_updated DESC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(id, json)| Self::decode(id, json))
            .collect()
    }

    fn load_item(
        &self,
        key: &OrchestrationKey,
        item_id: &str,
    ) -> Result<Option<ItemState>, StoreError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state FROM items WHERE orchestration_id = ?1 AND id = ?2",
                params![key.as_str(), item_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| Self::decode(item_id, &j)).transpose()
    }

    fn save_item(&self, item: &ItemState) -> Result<(), StoreError> {
        let json = Self::encode(&item.id, item)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO items (orchestration_id, id, run_id, phase, state, last_activity)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(orchestration_id, id) DO UPDATE SET
                run_id = excluded.run_id,
                phase = excluded.phase,
                state = excluded.state,
                last_activity = excluded.last_activity
            "#,
            params![
                item.orchestration_id.as_str(),
                item.id,
                item.run_id.to_string(),
                item.phase.name(),
                json,
                item.last_activity.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn list_items(
        &self,
        key: &OrchestrationKey,
        filter: &ItemFilter,
    ) -> Result<Vec<ItemState>, StoreError> {
        let (where_clause, mut params) = Self::build_item_where_clause(key, filter);
        let sql = format!(
            "SELECT id, state FROM items {} ORDER BY id ASC LIMIT ? OFFSET ?",
            where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(id, json)| Self::decode(id, json))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ItemPhase, SourceDescriptor};
    use chrono::Utc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn create_test_store() -> SqliteStateStore {
        SqliteStateStore::in_memory().unwrap()
    }

    fn test_item(key: &OrchestrationKey, id: &str, phase: ItemPhase) -> ItemState {
        ItemState {
            id: id.to_string(),
            orchestration_id: key.clone(),
            run_id: Uuid::new_v4(),
            item_ref: format!("/src/{}", id),
            source_id: "docs".to_string(),
            content_hash: "abc".to_string(),
            phase,
            attempts: 1,
            last_error: None,
            last_activity: Utc::now(),
        }
    }

    #[test]
    fn test_load_missing_orchestration() {
        let store = create_test_store();
        let key = OrchestrationKey::derive("blobs", "x");
        assert!(store.load_orchestration(&key).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_orchestration() {
        let store = create_test_store();
        let key = OrchestrationKey::derive("blobs", "x");
        let mut state = OrchestrationState::new(key.clone());
        state.descriptor = Some(SourceDescriptor::new("blobs", "x"));
        state.running = true;
        state.total = Some(3);
        state.processed = 1;
        state.source_mut("docs").total = 3;
        state.record_error("a.txt", "boom");

        store.save_orchestration(&state).unwrap();
        let loaded = store.load_orchestration(&key).unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_save_orchestration_overwrites() {
        let store = create_test_store();
        let key = OrchestrationKey::derive("blobs", "x");
        let mut state = OrchestrationState::new(key.clone());
        store.save_orchestration(&state).unwrap();

        state.processed = 7;
        store.save_orchestration(&state).unwrap();

        assert_eq!(store.load_orchestration(&key).unwrap().unwrap().processed, 7);
        assert_eq!(store.list_orchestrations().unwrap().len(), 1);
    }

    #[test]
    fn test_list_orchestrations_newest_first() {
        let store = create_test_store();
        let mut older = OrchestrationState::new(OrchestrationKey::derive("blobs", "old"));
        older.last_updated = Utc::now() - chrono::Duration::hours(1);
        let newer = OrchestrationState::new(OrchestrationKey::derive("blobs", "new"));
        store.save_orchestration(&older).unwrap();
        store.save_orchestration(&newer).unwrap();

        let listed = store.list_orchestrations().unwrap();
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[test]
    fn test_save_and_load_item() {
        let store = create_test_store();
        let key = OrchestrationKey::derive("blobs", "x");
        let item = test_item(&key, "a.txt", ItemPhase::Processing);
        store.save_item(&item).unwrap();

        let loaded = store.load_item(&key, "a.txt").unwrap().unwrap();
        assert_eq!(loaded, item);

        let other = OrchestrationKey::derive("blobs", "y");
        assert!(store.load_item(&other, "a.txt").unwrap().is_none());
    }

    #[test]
    fn test_list_items_with_phase_filter() {
        let store = create_test_store();
        let key = OrchestrationKey::derive("blobs", "x");
        store
            .save_item(&test_item(&key, "a", ItemPhase::Complete))
            .unwrap();
        store
            .save_item(&test_item(
                &key,
                "b",
                ItemPhase::Failed {
                    reason: "bad".into(),
                },
            ))
            .unwrap();
        store
            .save_item(&test_item(&key, "c", ItemPhase::Complete))
            .unwrap();

        let all = store.list_items(&key, &ItemFilter::new()).unwrap();
        assert_eq!(all.len(), 3);

        let failed = store
            .list_items(&key, &ItemFilter::new().with_phase("failed"))
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "b");

        let page = store
            .list_items(&key, &ItemFilter::new().with_limit(1).with_offset(1))
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "b");
    }

    #[test]
    fn test_file_based_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("state.db");
        let key = OrchestrationKey::derive("blobs", "x");

        {
            let store = SqliteStateStore::new(&db_path).unwrap();
            let mut state = OrchestrationState::new(key.clone());
            state.running = true;
            store.save_orchestration(&state).unwrap();
        }

        let store = SqliteStateStore::new(&db_path).unwrap();
        let loaded = store.load_orchestration(&key).unwrap().unwrap();
        assert!(loaded.running);
    }
}
