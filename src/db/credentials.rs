// ABOUTME: Credential persistence for registered database servers
// ABOUTME: CRUD keyed by integer id; the id doubles as the connection-pool key

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Mutex;

use super::metadata::{lock, StoreError};
use crate::connect::Credential;

const COLUMNS: &str =
    "id, engine, label, username, password, host, port, database_name, instance, options, created_at";

fn credential_from_row(row: &Row<'_>) -> rusqlite::Result<Credential> {
    Ok(Credential {
        id: row.get(0)?,
        engine: row.get(1)?,
        label: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        host: row.get(5)?,
        port: row.get(6)?,
        database: row.get(7)?,
        instance: row.get(8)?,
        options: row.get(9)?,
        created_at: row.get::<_, String>(10)?.parse().ok(),
    })
}

pub struct CredentialStore<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> CredentialStore<'a> {
    pub(crate) fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    /// Insert a new credential; the stored id and creation time are returned on the copy
    pub fn insert(&self, credential: &Credential) -> Result<Credential, StoreError> {
        let created_at = credential.created_at.unwrap_or_else(Utc::now);
        let conn = lock(self.conn)?;
        conn.execute(
            "INSERT INTO credentials (engine, label, username, password, host, port, database_name, instance, options, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                credential.engine,
                credential.label,
                credential.username,
                credential.password,
                credential.host,
                credential.port,
                credential.database,
                credential.instance,
                credential.options,
                created_at.to_rfc3339(),
            ],
        )?;

        Ok(Credential {
            id: conn.last_insert_rowid(),
            created_at: Some(created_at),
            ..credential.clone()
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Credential>, StoreError> {
        let conn = lock(self.conn)?;
        let credential = conn
            .query_row(
                &format!("SELECT {} FROM credentials WHERE id = ?", COLUMNS),
                params![id],
                credential_from_row,
            )
            .optional()?;
        Ok(credential)
    }

    pub fn list(&self) -> Result<Vec<Credential>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM credentials ORDER BY id", COLUMNS))?;
        let credentials = stmt
            .query_map([], credential_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(credentials)
    }

    /// Returns false when no credential has this id
    pub fn update(&self, credential: &Credential) -> Result<bool, StoreError> {
        let conn = lock(self.conn)?;
        let updated = conn.execute(
            "UPDATE credentials SET engine = ?, label = ?, username = ?, password = ?, host = ?, port = ?,
                database_name = ?, instance = ?, options = ?
             WHERE id = ?",
            params![
                credential.engine,
                credential.label,
                credential.username,
                credential.password,
                credential.host,
                credential.port,
                credential.database,
                credential.instance,
                credential.options,
                credential.id,
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let conn = lock(self.conn)?;
        let deleted = conn.execute("DELETE FROM credentials WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::connect::Credential;
    use crate::db::MetadataStore;

    fn mysql() -> Credential {
        Credential {
            engine: "mysql".to_string(),
            label: "Shop".to_string(),
            username: "root".to_string(),
            password: "secret".to_string(),
            host: "db".to_string(),
            port: 3306,
            database: "shop".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_credential_crud() {
        let store = MetadataStore::open_in_memory().unwrap();
        let credentials = store.credentials();

        let saved = credentials.insert(&mysql()).unwrap();
        assert!(saved.id > 0);
        assert!(saved.created_at.is_some());

        let loaded = credentials.get(saved.id).unwrap().unwrap();
        assert_eq!(loaded.host, "db");
        assert_eq!(loaded.port, 3306);
        assert_eq!(loaded.engine, "mysql");

        let mut changed = loaded.clone();
        changed.host = "db2".to_string();
        assert!(credentials.update(&changed).unwrap());
        assert_eq!(credentials.get(saved.id).unwrap().unwrap().host, "db2");

        let second = credentials.insert(&mysql()).unwrap();
        let ids: Vec<i64> = credentials.list().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![saved.id, second.id]);

        assert!(credentials.delete(saved.id).unwrap());
        assert!(!credentials.delete(saved.id).unwrap());
        assert!(credentials.get(saved.id).unwrap().is_none());
    }
}
