// ABOUTME: Raw snapshot of introspected catalog structure, keyed by natural key
// ABOUTME: Upserts databases/schemas/tables/views, replaces field sets, and resolves lineage

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::metadata::{lock, StoreError};
use crate::connect::{DatabaseInfo, FieldInfo, KeyKind, SchemaInfo, TableInfo, ViewInfo};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawDatabase {
    pub id: i64,
    pub credential_id: i64,
    pub name: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSchema {
    pub id: i64,
    pub database_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawTable {
    pub id: i64,
    pub database_id: i64,
    pub schema_id: Option<i64>,
    pub name: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawField {
    pub id: i64,
    pub table_id: i64,
    pub name: String,
    pub field_type: String,
    pub nullable: bool,
    pub key: KeyKind,
    pub comment: String,
    pub default_value: Option<String>,
}

impl RawField {
    pub fn to_info(&self) -> FieldInfo {
        FieldInfo {
            name: self.name.clone(),
            field_type: self.field_type.clone(),
            nullable: self.nullable,
            key: self.key,
            comment: self.comment.clone(),
            default_value: self.default_value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawView {
    pub id: i64,
    pub database_id: i64,
    pub schema_id: Option<i64>,
    pub name: String,
    pub definition: String,
}

/// Owning credential and names behind a raw table id
#[derive(Debug, Clone, PartialEq)]
pub struct TableContext {
    pub credential_id: i64,
    pub database_id: i64,
    pub database_name: String,
    pub schema_id: Option<i64>,
    pub schema_name: Option<String>,
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaContext {
    pub credential_id: i64,
    pub database_id: i64,
    pub database_name: String,
    pub schema_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseContext {
    pub credential_id: i64,
    pub database_id: i64,
    pub database_name: String,
}

const FIELD_COLUMNS: &str =
    "id, table_id, name, field_type, nullable, key_kind, comment, default_value";

fn field_from_row(row: &Row<'_>) -> rusqlite::Result<RawField> {
    Ok(RawField {
        id: row.get(0)?,
        table_id: row.get(1)?,
        name: row.get(2)?,
        field_type: row.get(3)?,
        nullable: row.get::<_, i32>(4)? == 1,
        key: KeyKind::from_code(&row.get::<_, String>(5)?),
        comment: row.get(6)?,
        default_value: row.get(7)?,
    })
}

fn table_from_row(row: &Row<'_>) -> rusqlite::Result<RawTable> {
    Ok(RawTable {
        id: row.get(0)?,
        database_id: row.get(1)?,
        schema_id: row.get(2)?,
        name: row.get(3)?,
        comment: row.get(4)?,
    })
}

fn view_from_row(row: &Row<'_>) -> rusqlite::Result<RawView> {
    Ok(RawView {
        id: row.get(0)?,
        database_id: row.get(1)?,
        schema_id: row.get(2)?,
        name: row.get(3)?,
        definition: row.get(4)?,
    })
}

pub struct RawStore<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> RawStore<'a> {
    pub(crate) fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    // ===== Snapshot writes =====

    /// Persist one introspected database in a single transaction.
    ///
    /// Rows are upserted by natural key so surrogate ids survive re-syncs.
    /// Each table's field set is replaced wholesale; a field whose name existed
    /// before keeps its id. Tables, views and schemas that no longer appear in
    /// `database` are removed along with their fields.
    pub fn save_database(
        &self,
        credential_id: i64,
        database: &DatabaseInfo,
    ) -> Result<i64, StoreError> {
        let mut conn = lock(self.conn)?;
        let tx = conn.transaction()?;
        let database_id = write_database(&tx, credential_id, database)?;
        tx.commit()?;
        Ok(database_id)
    }

    /// Persist a whole fetched snapshot; nothing is written unless every database saves
    pub fn save_databases(
        &self,
        credential_id: i64,
        databases: &[DatabaseInfo],
    ) -> Result<Vec<i64>, StoreError> {
        let mut conn = lock(self.conn)?;
        let tx = conn.transaction()?;
        let ids = databases
            .iter()
            .map(|database| write_database(&tx, credential_id, database))
            .collect::<Result<Vec<_>, _>>()?;
        tx.commit()?;
        Ok(ids)
    }

    // ===== Snapshot reads =====

    /// Rebuild the introspected tree for a credential
    pub fn get_by_credential(&self, credential_id: i64) -> Result<Vec<DatabaseInfo>, StoreError> {
        let mut result = Vec::new();
        for database in self.databases(credential_id)? {
            let mut info = DatabaseInfo {
                name: database.name.clone(),
                comment: database.comment.clone(),
                ..Default::default()
            };
            for schema in self.schemas(database.id)? {
                info.schemas.push(SchemaInfo {
                    name: schema.name.clone(),
                    tables: self.table_infos(database.id, Some(schema.id))?,
                    views: self.view_infos(database.id, Some(schema.id))?,
                });
            }
            info.tables = self.table_infos(database.id, None)?;
            info.views = self.view_infos(database.id, None)?;
            result.push(info);
        }
        Ok(result)
    }

    fn table_infos(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<TableInfo>, StoreError> {
        self.tables(database_id, schema_id)?
            .into_iter()
            .map(|table| {
                let fields = self.fields(table.id)?.iter().map(RawField::to_info).collect();
                Ok(TableInfo {
                    name: table.name,
                    comment: table.comment,
                    fields,
                })
            })
            .collect()
    }

    fn view_infos(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<ViewInfo>, StoreError> {
        Ok(self
            .views(database_id, schema_id)?
            .into_iter()
            .map(|view| ViewInfo {
                name: view.name,
                definition: view.definition,
            })
            .collect())
    }

    pub fn databases(&self, credential_id: i64) -> Result<Vec<RawDatabase>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, credential_id, name, comment FROM raw_database_info
             WHERE credential_id = ? ORDER BY id",
        )?;
        let databases = stmt
            .query_map(params![credential_id], |row| {
                Ok(RawDatabase {
                    id: row.get(0)?,
                    credential_id: row.get(1)?,
                    name: row.get(2)?,
                    comment: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(databases)
    }

    pub fn schemas(&self, database_id: i64) -> Result<Vec<RawSchema>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, database_id, name FROM raw_schema_info WHERE database_id = ? ORDER BY id",
        )?;
        let schemas = stmt
            .query_map(params![database_id], |row| {
                Ok(RawSchema {
                    id: row.get(0)?,
                    database_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(schemas)
    }

    /// Tables directly under a database (`schema_id` None) or under one schema
    pub fn tables(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<RawTable>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, database_id, schema_id, name, comment FROM raw_table_info
             WHERE database_id = ? AND schema_id IS ? ORDER BY id",
        )?;
        let tables = stmt
            .query_map(params![database_id, schema_id], table_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    pub fn table(&self, table_id: i64) -> Result<Option<RawTable>, StoreError> {
        let conn = lock(self.conn)?;
        let table = conn
            .query_row(
                "SELECT id, database_id, schema_id, name, comment FROM raw_table_info WHERE id = ?",
                params![table_id],
                table_from_row,
            )
            .optional()?;
        Ok(table)
    }

    /// Fields of a table in introspection order
    pub fn fields(&self, table_id: i64) -> Result<Vec<RawField>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM raw_field_info WHERE table_id = ? ORDER BY position, id",
            FIELD_COLUMNS
        ))?;
        let fields = stmt
            .query_map(params![table_id], field_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fields)
    }

    pub fn field_by_name(&self, table_id: i64, name: &str) -> Result<Option<RawField>, StoreError> {
        let conn = lock(self.conn)?;
        let field = conn
            .query_row(
                &format!(
                    "SELECT {} FROM raw_field_info WHERE table_id = ? AND name = ?",
                    FIELD_COLUMNS
                ),
                params![table_id, name],
                field_from_row,
            )
            .optional()?;
        Ok(field)
    }

    pub fn views(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<RawView>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, database_id, schema_id, name, definition FROM raw_view_info
             WHERE database_id = ? AND schema_id IS ? ORDER BY id",
        )?;
        let views = stmt
            .query_map(params![database_id, schema_id], view_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    // ===== Lineage =====

    pub fn resolve_table_context(&self, table_id: i64) -> Result<Option<TableContext>, StoreError> {
        let conn = lock(self.conn)?;
        let context = conn
            .query_row(
                "SELECT d.credential_id, d.id, d.name, t.schema_id, s.name, t.name
                 FROM raw_table_info t
                 JOIN raw_database_info d ON d.id = t.database_id
                 LEFT JOIN raw_schema_info s ON s.id = t.schema_id
                 WHERE t.id = ?",
                params![table_id],
                |row| {
                    Ok(TableContext {
                        credential_id: row.get(0)?,
                        database_id: row.get(1)?,
                        database_name: row.get(2)?,
                        schema_id: row.get(3)?,
                        schema_name: row.get(4)?,
                        table_name: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(context)
    }

    pub fn resolve_schema_context(
        &self,
        schema_id: i64,
    ) -> Result<Option<SchemaContext>, StoreError> {
        let conn = lock(self.conn)?;
        let context = conn
            .query_row(
                "SELECT d.credential_id, d.id, d.name, s.name
                 FROM raw_schema_info s
                 JOIN raw_database_info d ON d.id = s.database_id
                 WHERE s.id = ?",
                params![schema_id],
                |row| {
                    Ok(SchemaContext {
                        credential_id: row.get(0)?,
                        database_id: row.get(1)?,
                        database_name: row.get(2)?,
                        schema_name: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(context)
    }

    pub fn resolve_database_context(
        &self,
        database_id: i64,
    ) -> Result<Option<DatabaseContext>, StoreError> {
        let conn = lock(self.conn)?;
        let context = conn
            .query_row(
                "SELECT credential_id, id, name FROM raw_database_info WHERE id = ?",
                params![database_id],
                |row| {
                    Ok(DatabaseContext {
                        credential_id: row.get(0)?,
                        database_id: row.get(1)?,
                        database_name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(context)
    }

    // ===== Deletion =====

    /// Remove every raw row under a credential; returns the database count removed
    pub fn delete_by_credential(&self, credential_id: i64) -> Result<usize, StoreError> {
        let mut conn = lock(self.conn)?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM raw_field_info WHERE table_id IN (
                SELECT t.id FROM raw_table_info t
                JOIN raw_database_info d ON d.id = t.database_id
                WHERE d.credential_id = ?)",
            params![credential_id],
        )?;
        tx.execute(
            "DELETE FROM raw_table_info WHERE database_id IN (
                SELECT id FROM raw_database_info WHERE credential_id = ?)",
            params![credential_id],
        )?;
        tx.execute(
            "DELETE FROM raw_view_info WHERE database_id IN (
                SELECT id FROM raw_database_info WHERE credential_id = ?)",
            params![credential_id],
        )?;
        tx.execute(
            "DELETE FROM raw_schema_info WHERE database_id IN (
                SELECT id FROM raw_database_info WHERE credential_id = ?)",
            params![credential_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM raw_database_info WHERE credential_id = ?",
            params![credential_id],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

// ===== Write helpers (run inside the save transaction) =====

fn write_database(
    conn: &Connection,
    credential_id: i64,
    database: &DatabaseInfo,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO raw_database_info (credential_id, name, comment) VALUES (?, ?, ?)
         ON CONFLICT (credential_id, name) DO UPDATE SET comment = excluded.comment",
        params![credential_id, database.name, database.comment],
    )?;
    let database_id: i64 = conn.query_row(
        "SELECT id FROM raw_database_info WHERE credential_id = ? AND name = ?",
        params![credential_id, database.name],
        |row| row.get(0),
    )?;

    let mut kept_schemas = HashSet::new();
    let mut kept_tables = HashSet::new();
    let mut kept_views = HashSet::new();

    for schema in &database.schemas {
        let schema_id = upsert_schema(conn, database_id, schema)?;
        kept_schemas.insert(schema_id);
        save_children(
            conn,
            database_id,
            Some(schema_id),
            &schema.tables,
            &schema.views,
            &mut kept_tables,
            &mut kept_views,
        )?;
    }
    save_children(
        conn,
        database_id,
        None,
        &database.tables,
        &database.views,
        &mut kept_tables,
        &mut kept_views,
    )?;

    prune_database(conn, database_id, &kept_schemas, &kept_tables, &kept_views)?;
    Ok(database_id)
}

fn upsert_schema(conn: &Connection, database_id: i64, schema: &SchemaInfo) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO raw_schema_info (database_id, name) VALUES (?, ?)",
        params![database_id, schema.name],
    )?;
    let id = conn.query_row(
        "SELECT id FROM raw_schema_info WHERE database_id = ? AND name = ?",
        params![database_id, schema.name],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn save_children(
    conn: &Connection,
    database_id: i64,
    schema_id: Option<i64>,
    tables: &[TableInfo],
    views: &[ViewInfo],
    kept_tables: &mut HashSet<i64>,
    kept_views: &mut HashSet<i64>,
) -> Result<(), StoreError> {
    for table in tables {
        let table_id = upsert_table(conn, database_id, schema_id, table)?;
        replace_fields(conn, table_id, &table.fields)?;
        kept_tables.insert(table_id);
    }
    for view in views {
        kept_views.insert(upsert_view(conn, database_id, schema_id, view)?);
    }
    Ok(())
}

fn upsert_table(
    conn: &Connection,
    database_id: i64,
    schema_id: Option<i64>,
    table: &TableInfo,
) -> Result<i64, StoreError> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM raw_table_info WHERE database_id = ? AND schema_id IS ? AND name = ?",
            params![database_id, schema_id, table.name],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE raw_table_info SET comment = ? WHERE id = ?",
                params![table.comment, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO raw_table_info (database_id, schema_id, name, comment) VALUES (?, ?, ?, ?)",
                params![database_id, schema_id, table.name, table.comment],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

fn upsert_view(
    conn: &Connection,
    database_id: i64,
    schema_id: Option<i64>,
    view: &ViewInfo,
) -> Result<i64, StoreError> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM raw_view_info WHERE database_id = ? AND schema_id IS ? AND name = ?",
            params![database_id, schema_id, view.name],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE raw_view_info SET definition = ? WHERE id = ?",
                params![view.definition, id],
            )?;
            Ok(id)
        }
        None => {
            conn.execute(
                "INSERT INTO raw_view_info (database_id, schema_id, name, definition) VALUES (?, ?, ?, ?)",
                params![database_id, schema_id, view.name, view.definition],
            )?;
            Ok(conn.last_insert_rowid())
        }
    }
}

/// Delete-then-reinsert the fields of one table, reusing ids by column name
fn replace_fields(conn: &Connection, table_id: i64, fields: &[FieldInfo]) -> Result<(), StoreError> {
    let mut previous: HashMap<String, i64> = {
        let mut stmt = conn.prepare("SELECT name, id FROM raw_field_info WHERE table_id = ?")?;
        let rows = stmt
            .query_map(params![table_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        rows
    };

    conn.execute("DELETE FROM raw_field_info WHERE table_id = ?", params![table_id])?;

    let mut stmt = conn.prepare(
        "INSERT INTO raw_field_info
            (id, table_id, name, field_type, nullable, key_kind, comment, default_value, position)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (position, field) in fields.iter().enumerate() {
        stmt.execute(params![
            previous.remove(&field.name),
            table_id,
            field.name,
            field.field_type,
            if field.nullable { 1 } else { 0 },
            field.key.code(),
            field.comment,
            field.default_value,
            position as i64,
        ])?;
    }
    Ok(())
}

fn prune_database(
    conn: &Connection,
    database_id: i64,
    kept_schemas: &HashSet<i64>,
    kept_tables: &HashSet<i64>,
    kept_views: &HashSet<i64>,
) -> Result<(), StoreError> {
    let stale_tables = ids_not_in(
        conn,
        "SELECT id FROM raw_table_info WHERE database_id = ?",
        database_id,
        kept_tables,
    )?;
    for id in stale_tables {
        conn.execute("DELETE FROM raw_field_info WHERE table_id = ?", params![id])?;
        conn.execute("DELETE FROM raw_table_info WHERE id = ?", params![id])?;
    }

    let stale_views = ids_not_in(
        conn,
        "SELECT id FROM raw_view_info WHERE database_id = ?",
        database_id,
        kept_views,
    )?;
    for id in stale_views {
        conn.execute("DELETE FROM raw_view_info WHERE id = ?", params![id])?;
    }

    let stale_schemas = ids_not_in(
        conn,
        "SELECT id FROM raw_schema_info WHERE database_id = ?",
        database_id,
        kept_schemas,
    )?;
    for id in stale_schemas {
        conn.execute("DELETE FROM raw_schema_info WHERE id = ?", params![id])?;
    }
    Ok(())
}

fn ids_not_in(
    conn: &Connection,
    sql: &str,
    database_id: i64,
    kept: &HashSet<i64>,
) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params![database_id], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().filter(|id| !kept.contains(id)).collect())
}
