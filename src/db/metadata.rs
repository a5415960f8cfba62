// ABOUTME: Project-local SQLite store holding the raw snapshot, overlay, and credentials
// ABOUTME: Owns schema bootstrap and hands out the per-concern store views

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use super::credentials::CredentialStore;
use super::overlay::OverlayStore;
use super::raw::RawStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Metadata store lock poisoned")]
    LockPoisoned,
    #[error("No raw {kind} with id {id}")]
    MissingRaw { kind: &'static str, id: i64 },
    #[error("No raw field '{name}' in table {table_id}")]
    MissingRawField { table_id: i64, name: String },
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::LockPoisoned)
}

pub struct MetadataStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl MetadataStore {
    /// Open or create the store file inside a project directory
    pub fn open(project_dir: &Path, file_name: &str) -> Result<Self, StoreError> {
        std::fs::create_dir_all(project_dir)?;
        let path = project_dir.join(file_name);
        log::info!("[MetadataStore] opening {}", path.display());

        let conn = Connection::open(&path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn raw(&self) -> RawStore<'_> {
        RawStore::new(&self.conn)
    }

    pub fn overlay(&self) -> OverlayStore<'_> {
        OverlayStore::new(&self.conn)
    }

    pub fn credentials(&self) -> CredentialStore<'_> {
        CredentialStore::new(&self.conn)
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;

        // journal_mode returns a row, so it cannot go through execute_batch
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS _metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Registered servers
            CREATE TABLE IF NOT EXISTS credentials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                engine TEXT NOT NULL,
                label TEXT NOT NULL DEFAULT '',
                username TEXT NOT NULL DEFAULT '',
                password TEXT NOT NULL DEFAULT '',
                host TEXT NOT NULL DEFAULT '',
                port INTEGER NOT NULL DEFAULT 0,
                database_name TEXT NOT NULL DEFAULT '',
                instance TEXT NOT NULL DEFAULT '',
                options TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            -- Raw snapshot, written only by introspection
            CREATE TABLE IF NOT EXISTS raw_database_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                credential_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                UNIQUE (credential_id, name)
            );

            CREATE TABLE IF NOT EXISTS raw_schema_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                database_id INTEGER NOT NULL REFERENCES raw_database_info(id),
                name TEXT NOT NULL,
                UNIQUE (database_id, name)
            );

            CREATE TABLE IF NOT EXISTS raw_table_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                database_id INTEGER NOT NULL REFERENCES raw_database_info(id),
                schema_id INTEGER REFERENCES raw_schema_info(id),
                name TEXT NOT NULL,
                comment TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS raw_field_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                table_id INTEGER NOT NULL REFERENCES raw_table_info(id),
                name TEXT NOT NULL,
                field_type TEXT NOT NULL DEFAULT '',
                nullable INTEGER NOT NULL DEFAULT 0,
                key_kind TEXT NOT NULL DEFAULT '',
                comment TEXT NOT NULL DEFAULT '',
                default_value TEXT,
                position INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS raw_view_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                database_id INTEGER NOT NULL REFERENCES raw_database_info(id),
                schema_id INTEGER REFERENCES raw_schema_info(id),
                name TEXT NOT NULL,
                definition TEXT NOT NULL DEFAULT ''
            );

            -- Overlay rows share the id of the raw row they annotate
            CREATE TABLE IF NOT EXISTS vo_database_info (
                id INTEGER PRIMARY KEY,
                credential_id INTEGER NOT NULL,
                alias TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS vo_schema_info (
                id INTEGER PRIMARY KEY,
                database_id INTEGER NOT NULL,
                alias TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS vo_table_info (
                id INTEGER PRIMARY KEY,
                database_id INTEGER NOT NULL,
                schema_id INTEGER,
                alias TEXT NOT NULL DEFAULT '',
                color TEXT NOT NULL DEFAULT '',
                remark TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS vo_field_info (
                id INTEGER PRIMARY KEY,
                table_id INTEGER NOT NULL,
                alias TEXT NOT NULL DEFAULT '',
                display INTEGER NOT NULL DEFAULT 1,
                remark TEXT NOT NULL DEFAULT '',
                font_color TEXT NOT NULL DEFAULT '',
                bg_color TEXT NOT NULL DEFAULT '',
                sort INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS vo_view_info (
                id INTEGER PRIMARY KEY,
                database_id INTEGER NOT NULL,
                schema_id INTEGER,
                alias TEXT NOT NULL DEFAULT '',
                color TEXT NOT NULL DEFAULT '',
                remark TEXT NOT NULL DEFAULT '',
                sort INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS vo_display (
                credential_id INTEGER PRIMARY KEY,
                db_cnt INTEGER NOT NULL DEFAULT 0,
                style TEXT NOT NULL DEFAULT '{}'
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_raw_schema_database ON raw_schema_info(database_id);
            CREATE INDEX IF NOT EXISTS idx_raw_table_scope ON raw_table_info(database_id, schema_id, name);
            CREATE INDEX IF NOT EXISTS idx_raw_field_table ON raw_field_info(table_id);
            CREATE INDEX IF NOT EXISTS idx_raw_view_scope ON raw_view_info(database_id, schema_id, name);
            CREATE INDEX IF NOT EXISTS idx_vo_table_database ON vo_table_info(database_id);
            CREATE INDEX IF NOT EXISTS idx_vo_field_table ON vo_field_info(table_id);
            CREATE INDEX IF NOT EXISTS idx_vo_view_database ON vo_view_info(database_id);
            "#,
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO _metadata (key, value) VALUES ('last_version_seen', '0.0.0')",
            [],
        )?;
        conn.execute(
            "UPDATE _metadata SET value = ? WHERE key = 'last_version_seen'",
            params![env!("CARGO_PKG_VERSION")],
        )?;

        Ok(())
    }

    /// Get the last application version that opened this store
    pub fn last_version_seen(&self) -> Result<String, StoreError> {
        let conn = lock(&self.conn)?;
        match conn.query_row(
            "SELECT value FROM _metadata WHERE key = 'last_version_seen'",
            [],
            |row| row.get::<_, String>(0),
        ) {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok("0.0.0".to_string()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path(), "relation.db").unwrap();
        assert!(dir.path().join("relation.db").exists());
        assert_eq!(store.path(), Some(dir.path().join("relation.db").as_path()));
        assert_eq!(store.last_version_seen().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = MetadataStore::open(dir.path(), "relation.db").unwrap();
            store
                .raw()
                .save_database(1, &crate::connect::DatabaseInfo::named("shop"))
                .unwrap();
        }
        let store = MetadataStore::open(dir.path(), "relation.db").unwrap();
        assert_eq!(store.raw().databases(1).unwrap().len(), 1);
    }
}
