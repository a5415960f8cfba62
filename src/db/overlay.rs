// ABOUTME: User annotation overlay bound to raw rows by shared surrogate id
// ABOUTME: Lazily creates VO rows on first write and serves raw-joined projections

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::sync::Mutex;

use super::metadata::{lock, StoreError};
use crate::connect::KeyKind;
use crate::models::{DatabaseVo, Display, FieldVo, SchemaVo, TableVo, ViewVo};

/// How an overlay save treats user-authored columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayWrite {
    /// Create the row if missing and refresh structural keys only
    StructureOnly,
    /// Also write alias, color, remark, display, colors and sort from the payload
    Annotations,
}

/// VO rows whose raw counterpart no longer exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanCounts {
    pub databases: i64,
    pub schemas: i64,
    pub tables: i64,
    pub views: i64,
    pub fields: i64,
}

impl OrphanCounts {
    pub fn total(&self) -> i64 {
        self.databases + self.schemas + self.tables + self.views + self.fields
    }
}

/// Databases owned by a credential, whether or not their raw row still exists
const CREDENTIAL_DATABASES: &str = "SELECT id FROM vo_database_info WHERE credential_id = ?1
     UNION SELECT id FROM raw_database_info WHERE credential_id = ?1";

fn field_from_row(row: &Row<'_>) -> rusqlite::Result<FieldVo> {
    Ok(FieldVo {
        id: row.get(0)?,
        table_id: row.get(1)?,
        name: row.get(2)?,
        field_type: row.get(3)?,
        nullable: row.get::<_, i32>(4)? == 1,
        key: KeyKind::from_code(&row.get::<_, String>(5)?),
        comment: row.get(6)?,
        default_value: row.get(7)?,
        alias: row.get(8)?,
        display: row.get::<_, i32>(9)? == 1,
        remark: row.get(10)?,
        font_color: row.get(11)?,
        bg_color: row.get(12)?,
        sort: row.get(13)?,
    })
}

pub struct OverlayStore<'a> {
    conn: &'a Mutex<Connection>,
}

impl<'a> OverlayStore<'a> {
    pub(crate) fn new(conn: &'a Mutex<Connection>) -> Self {
        Self { conn }
    }

    // ===== Natural-key saves =====

    /// Returns the VO id written, or None when no raw database has this name
    pub fn save_database_overlay(
        &self,
        credential_id: i64,
        database: &DatabaseVo,
        mode: OverlayWrite,
    ) -> Result<Option<i64>, StoreError> {
        let conn = lock(self.conn)?;
        save_database_row(&conn, credential_id, database, mode)
    }

    pub fn save_schema_overlay(
        &self,
        database_id: i64,
        schema: &SchemaVo,
        mode: OverlayWrite,
    ) -> Result<Option<i64>, StoreError> {
        let conn = lock(self.conn)?;
        save_schema_row(&conn, database_id, schema, mode)
    }

    pub fn save_table_overlay(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
        table: &TableVo,
        mode: OverlayWrite,
    ) -> Result<Option<i64>, StoreError> {
        let conn = lock(self.conn)?;
        save_table_row(&conn, database_id, schema_id, table, mode)
    }

    pub fn save_field_overlay(
        &self,
        table_id: i64,
        field: &FieldVo,
        mode: OverlayWrite,
    ) -> Result<Option<i64>, StoreError> {
        let conn = lock(self.conn)?;
        save_field_row(&conn, table_id, field, mode)
    }

    pub fn save_view_overlay(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
        view: &ViewVo,
        mode: OverlayWrite,
    ) -> Result<Option<i64>, StoreError> {
        let conn = lock(self.conn)?;
        save_view_row(&conn, database_id, schema_id, view, mode)
    }

    /// Structural pass over a reconciled tree in one transaction.
    ///
    /// Creates missing VO rows and refreshes their keys; user-authored
    /// columns of existing rows are left alone. Returns the rows touched.
    pub fn sync_structure(
        &self,
        credential_id: i64,
        databases: &[DatabaseVo],
    ) -> Result<usize, StoreError> {
        let mode = OverlayWrite::StructureOnly;
        let mut conn = lock(self.conn)?;
        let tx = conn.transaction()?;
        let mut touched = 0;

        for database in databases {
            let Some(database_id) = save_database_row(&tx, credential_id, database, mode)? else {
                continue;
            };
            touched += 1;
            for schema in &database.schemas {
                let Some(schema_id) = save_schema_row(&tx, database_id, schema, mode)? else {
                    continue;
                };
                touched += 1;
                touched += save_scope(&tx, database_id, Some(schema_id), &schema.tables, &schema.views)?;
            }
            touched += save_scope(&tx, database_id, None, &database.tables, &database.views)?;
        }

        tx.commit()?;
        Ok(touched)
    }

    // ===== Projections =====

    /// Overlay fields of a table joined to their raw rows, ordered by (sort, id)
    pub fn fields_by_table(&self, table_id: i64) -> Result<Vec<FieldVo>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.table_id, r.name, r.field_type, r.nullable, r.key_kind, r.comment,
                    r.default_value, v.alias, v.display, v.remark, v.font_color, v.bg_color, v.sort
             FROM vo_field_info v
             JOIN raw_field_info r ON r.id = v.id
             WHERE v.table_id = ?
             ORDER BY v.sort ASC, v.id ASC",
        )?;
        let fields = stmt
            .query_map(params![table_id], field_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fields)
    }

    /// Overlay tables of a database, optionally narrowed to one schema; fields are not loaded
    pub fn tables_by_database(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<TableVo>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.database_id, v.schema_id, r.name, r.comment, v.alias, v.color, v.remark
             FROM vo_table_info v
             JOIN raw_table_info r ON r.id = v.id
             WHERE v.database_id = ?1 AND (?2 IS NULL OR v.schema_id = ?2)
             ORDER BY v.id",
        )?;
        let tables = stmt
            .query_map(params![database_id, schema_id], |row| {
                Ok(TableVo {
                    id: row.get(0)?,
                    database_id: row.get(1)?,
                    schema_id: row.get(2)?,
                    name: row.get(3)?,
                    comment: row.get(4)?,
                    alias: row.get(5)?,
                    color: row.get(6)?,
                    remark: row.get(7)?,
                    fields: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    pub fn views_by_database(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<ViewVo>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.database_id, v.schema_id, r.name, r.definition, v.alias, v.color,
                    v.remark, v.sort
             FROM vo_view_info v
             JOIN raw_view_info r ON r.id = v.id
             WHERE v.database_id = ?1 AND (?2 IS NULL OR v.schema_id = ?2)
             ORDER BY v.sort ASC, v.id ASC",
        )?;
        let views = stmt
            .query_map(params![database_id, schema_id], |row| {
                Ok(ViewVo {
                    id: row.get(0)?,
                    database_id: row.get(1)?,
                    schema_id: row.get(2)?,
                    name: row.get(3)?,
                    definition: row.get(4)?,
                    alias: row.get(5)?,
                    color: row.get(6)?,
                    remark: row.get(7)?,
                    sort: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(views)
    }

    /// The overlay subtree of a credential: databases, schemas, tables with fields, views
    pub fn databases_by_credential(&self, credential_id: i64) -> Result<Vec<DatabaseVo>, StoreError> {
        let databases = {
            let conn = lock(self.conn)?;
            let mut stmt = conn.prepare(
                "SELECT v.id, v.credential_id, r.name, r.comment, v.alias
                 FROM vo_database_info v
                 JOIN raw_database_info r ON r.id = v.id
                 WHERE v.credential_id = ?
                 ORDER BY v.id",
            )?;
            let rows = stmt
                .query_map(params![credential_id], |row| {
                    Ok(DatabaseVo {
                        id: row.get(0)?,
                        credential_id: row.get(1)?,
                        name: row.get(2)?,
                        comment: row.get(3)?,
                        alias: row.get(4)?,
                        ..Default::default()
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut result = Vec::with_capacity(databases.len());
        for mut database in databases {
            let mut tables = self.tables_by_database(database.id, None)?;
            for table in &mut tables {
                table.fields = self.fields_by_table(table.id)?;
            }
            let views = self.views_by_database(database.id, None)?;

            database.schemas = self.schemas_by_database(database.id)?;
            for schema in &mut database.schemas {
                schema.tables = tables
                    .iter()
                    .filter(|t| t.schema_id == Some(schema.id))
                    .cloned()
                    .collect();
                schema.views = views
                    .iter()
                    .filter(|v| v.schema_id == Some(schema.id))
                    .cloned()
                    .collect();
            }
            database.tables = tables.into_iter().filter(|t| t.schema_id.is_none()).collect();
            database.views = views.into_iter().filter(|v| v.schema_id.is_none()).collect();
            result.push(database);
        }
        Ok(result)
    }

    fn schemas_by_database(&self, database_id: i64) -> Result<Vec<SchemaVo>, StoreError> {
        let conn = lock(self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT v.id, v.database_id, r.name, v.alias
             FROM vo_schema_info v
             JOIN raw_schema_info r ON r.id = v.id
             WHERE v.database_id = ?
             ORDER BY v.id",
        )?;
        let schemas = stmt
            .query_map(params![database_id], |row| {
                Ok(SchemaVo {
                    id: row.get(0)?,
                    database_id: row.get(1)?,
                    name: row.get(2)?,
                    alias: row.get(3)?,
                    ..Default::default()
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(schemas)
    }

    /// Remark of a table's VO row, if one exists
    pub fn table_remark(&self, table_id: i64) -> Result<Option<String>, StoreError> {
        let conn = lock(self.conn)?;
        let remark = conn
            .query_row(
                "SELECT remark FROM vo_table_info WHERE id = ?",
                params![table_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(remark)
    }

    // ===== Annotation writes =====

    pub fn update_table_remark(&self, table_id: i64, remark: &str) -> Result<(), StoreError> {
        let conn = lock(self.conn)?;
        let updated = conn.execute(
            "UPDATE vo_table_info SET remark = ? WHERE id = ?",
            params![remark, table_id],
        )?;
        if updated == 0 {
            let created = conn.execute(
                "INSERT INTO vo_table_info (id, database_id, schema_id, alias, color, remark)
                 SELECT id, database_id, schema_id, '', '', ? FROM raw_table_info WHERE id = ?",
                params![remark, table_id],
            )?;
            if created == 0 {
                return Err(StoreError::MissingRaw {
                    kind: "table",
                    id: table_id,
                });
            }
        }
        Ok(())
    }

    pub fn update_field_remark(
        &self,
        table_id: i64,
        field_name: &str,
        remark: &str,
    ) -> Result<(), StoreError> {
        let conn = lock(self.conn)?;
        let field_id: i64 = conn
            .query_row(
                "SELECT id FROM raw_field_info WHERE table_id = ? AND name = ?",
                params![table_id, field_name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::MissingRawField {
                table_id,
                name: field_name.to_string(),
            })?;

        let updated = conn.execute(
            "UPDATE vo_field_info SET remark = ? WHERE id = ?",
            params![remark, field_id],
        )?;
        if updated == 0 {
            let sort = next_sort(&conn, table_id)?;
            conn.execute(
                "INSERT INTO vo_field_info (id, table_id, alias, display, remark, font_color, bg_color, sort)
                 SELECT id, table_id, '', 1, ?, '', '', ? FROM raw_field_info WHERE id = ?",
                params![remark, sort, field_id],
            )?;
        }
        Ok(())
    }

    /// Assign sort = position + 1 in the given order, creating missing VO rows.
    /// Unlisted fields of the table keep their relative order after the listed ones.
    pub fn update_fields_sort(&self, table_id: i64, field_ids: &[i64]) -> Result<(), StoreError> {
        let mut conn = lock(self.conn)?;
        let tx = conn.transaction()?;
        for (position, field_id) in field_ids.iter().enumerate() {
            let sort = position as i64 + 1;
            let updated = tx.execute(
                "UPDATE vo_field_info SET sort = ? WHERE id = ? AND table_id = ?",
                params![sort, field_id, table_id],
            )?;
            if updated == 0 {
                let created = tx.execute(
                    "INSERT INTO vo_field_info (id, table_id, alias, display, remark, font_color, bg_color, sort)
                     SELECT id, table_id, '', 1, '', '', '', ? FROM raw_field_info
                     WHERE id = ? AND table_id = ?",
                    params![sort, field_id, table_id],
                )?;
                if created == 0 {
                    return Err(StoreError::MissingRaw {
                        kind: "field",
                        id: *field_id,
                    });
                }
            }
        }

        let rest: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM vo_field_info WHERE table_id = ? ORDER BY sort ASC, id ASC",
            )?;
            let ids = stmt
                .query_map(params![table_id], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            ids.into_iter().filter(|id| !field_ids.contains(id)).collect()
        };
        let listed = field_ids.len() as i64;
        for (offset, field_id) in rest.iter().enumerate() {
            tx.execute(
                "UPDATE vo_field_info SET sort = ? WHERE id = ?",
                params![listed + offset as i64 + 1, field_id],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ===== Display =====

    pub fn get_display(&self, credential_id: i64) -> Result<Display, StoreError> {
        let conn = lock(self.conn)?;
        match conn.query_row(
            "SELECT db_cnt, style FROM vo_display WHERE credential_id = ?",
            params![credential_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        ) {
            Ok((db_cnt, style)) => Ok(Display {
                db_cnt,
                style: serde_json::from_str(&style)?,
            }),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Display::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_display(&self, credential_id: i64, display: &Display) -> Result<(), StoreError> {
        let style = serde_json::to_string(&display.style)?;
        let conn = lock(self.conn)?;
        conn.execute(
            "INSERT INTO vo_display (credential_id, db_cnt, style) VALUES (?, ?, ?)
             ON CONFLICT (credential_id) DO UPDATE SET db_cnt = excluded.db_cnt, style = excluded.style",
            params![credential_id, display.db_cnt, style],
        )?;
        Ok(())
    }

    // ===== Maintenance =====

    /// Remove every VO row under a credential, orphans included
    pub fn delete_by_credential(&self, credential_id: i64) -> Result<(), StoreError> {
        let mut conn = lock(self.conn)?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "DELETE FROM vo_field_info WHERE table_id IN (
                    SELECT id FROM vo_table_info WHERE database_id IN ({dbs})
                    UNION SELECT id FROM raw_table_info WHERE database_id IN ({dbs}))",
                dbs = CREDENTIAL_DATABASES
            ),
            params![credential_id],
        )?;
        for table in ["vo_table_info", "vo_view_info", "vo_schema_info"] {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE database_id IN ({})",
                    table, CREDENTIAL_DATABASES
                ),
                params![credential_id],
            )?;
        }
        tx.execute(
            "DELETE FROM vo_database_info WHERE credential_id = ?",
            params![credential_id],
        )?;
        tx.execute(
            "DELETE FROM vo_display WHERE credential_id = ?",
            params![credential_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn orphan_counts(&self, credential_id: i64) -> Result<OrphanCounts, StoreError> {
        let conn = lock(self.conn)?;
        let count = |sql: String| -> Result<i64, StoreError> {
            Ok(conn.query_row(&sql, params![credential_id], |row| row.get(0))?)
        };

        Ok(OrphanCounts {
            databases: count(
                "SELECT COUNT(*) FROM vo_database_info v WHERE v.credential_id = ?1
                 AND NOT EXISTS (SELECT 1 FROM raw_database_info r WHERE r.id = v.id)"
                    .to_string(),
            )?,
            schemas: count(format!(
                "SELECT COUNT(*) FROM vo_schema_info v WHERE v.database_id IN ({})
                 AND NOT EXISTS (SELECT 1 FROM raw_schema_info r WHERE r.id = v.id)",
                CREDENTIAL_DATABASES
            ))?,
            tables: count(format!(
                "SELECT COUNT(*) FROM vo_table_info v WHERE v.database_id IN ({})
                 AND NOT EXISTS (SELECT 1 FROM raw_table_info r WHERE r.id = v.id)",
                CREDENTIAL_DATABASES
            ))?,
            views: count(format!(
                "SELECT COUNT(*) FROM vo_view_info v WHERE v.database_id IN ({})
                 AND NOT EXISTS (SELECT 1 FROM raw_view_info r WHERE r.id = v.id)",
                CREDENTIAL_DATABASES
            ))?,
            fields: count(format!(
                "SELECT COUNT(*) FROM vo_field_info v WHERE v.table_id IN (
                    SELECT id FROM vo_table_info WHERE database_id IN ({dbs})
                    UNION SELECT id FROM raw_table_info WHERE database_id IN ({dbs}))
                 AND NOT EXISTS (SELECT 1 FROM raw_field_info r WHERE r.id = v.id)",
                dbs = CREDENTIAL_DATABASES
            ))?,
        })
    }
}

// ===== Row writers (shared by single saves and the structural pass) =====

fn save_database_row(
    conn: &Connection,
    credential_id: i64,
    database: &DatabaseVo,
    mode: OverlayWrite,
) -> Result<Option<i64>, StoreError> {
    let raw_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM raw_database_info WHERE credential_id = ? AND name = ?",
            params![credential_id, database.name],
            |row| row.get(0),
        )
        .optional()?;
    let Some(id) = raw_id else {
        return Ok(None);
    };

    let updated = match mode {
        OverlayWrite::StructureOnly => conn.execute(
            "UPDATE vo_database_info SET credential_id = ? WHERE id = ?",
            params![credential_id, id],
        )?,
        OverlayWrite::Annotations => conn.execute(
            "UPDATE vo_database_info SET credential_id = ?, alias = ? WHERE id = ?",
            params![credential_id, database.alias, id],
        )?,
    };
    if updated == 0 {
        let alias = annotation(mode, &database.alias);
        conn.execute(
            "INSERT INTO vo_database_info (id, credential_id, alias) VALUES (?, ?, ?)",
            params![id, credential_id, alias],
        )?;
    }
    Ok(Some(id))
}

fn save_schema_row(
    conn: &Connection,
    database_id: i64,
    schema: &SchemaVo,
    mode: OverlayWrite,
) -> Result<Option<i64>, StoreError> {
    let raw_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM raw_schema_info WHERE database_id = ? AND name = ?",
            params![database_id, schema.name],
            |row| row.get(0),
        )
        .optional()?;
    let Some(id) = raw_id else {
        return Ok(None);
    };

    let updated = match mode {
        OverlayWrite::StructureOnly => conn.execute(
            "UPDATE vo_schema_info SET database_id = ? WHERE id = ?",
            params![database_id, id],
        )?,
        OverlayWrite::Annotations => conn.execute(
            "UPDATE vo_schema_info SET database_id = ?, alias = ? WHERE id = ?",
            params![database_id, schema.alias, id],
        )?,
    };
    if updated == 0 {
        conn.execute(
            "INSERT INTO vo_schema_info (id, database_id, alias) VALUES (?, ?, ?)",
            params![id, database_id, annotation(mode, &schema.alias)],
        )?;
    }
    Ok(Some(id))
}

fn save_table_row(
    conn: &Connection,
    database_id: i64,
    schema_id: Option<i64>,
    table: &TableVo,
    mode: OverlayWrite,
) -> Result<Option<i64>, StoreError> {
    let raw_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM raw_table_info WHERE database_id = ? AND schema_id IS ? AND name = ?",
            params![database_id, schema_id, table.name],
            |row| row.get(0),
        )
        .optional()?;
    let Some(id) = raw_id else {
        return Ok(None);
    };

    let updated = match mode {
        OverlayWrite::StructureOnly => conn.execute(
            "UPDATE vo_table_info SET database_id = ?, schema_id = ? WHERE id = ?",
            params![database_id, schema_id, id],
        )?,
        OverlayWrite::Annotations => conn.execute(
            "UPDATE vo_table_info SET database_id = ?, schema_id = ?, alias = ?, color = ?, remark = ?
             WHERE id = ?",
            params![database_id, schema_id, table.alias, table.color, table.remark, id],
        )?,
    };
    if updated == 0 {
        conn.execute(
            "INSERT INTO vo_table_info (id, database_id, schema_id, alias, color, remark)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id,
                database_id,
                schema_id,
                annotation(mode, &table.alias),
                annotation(mode, &table.color),
                annotation(mode, &table.remark),
            ],
        )?;
    }
    Ok(Some(id))
}

/// New structural field rows sort after any explicitly ordered siblings
fn save_field_row(
    conn: &Connection,
    table_id: i64,
    field: &FieldVo,
    mode: OverlayWrite,
) -> Result<Option<i64>, StoreError> {
    let raw_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM raw_field_info WHERE table_id = ? AND name = ?",
            params![table_id, field.name],
            |row| row.get(0),
        )
        .optional()?;
    let Some(id) = raw_id else {
        return Ok(None);
    };

    let updated = match mode {
        OverlayWrite::StructureOnly => conn.execute(
            "UPDATE vo_field_info SET table_id = ? WHERE id = ?",
            params![table_id, id],
        )?,
        OverlayWrite::Annotations => conn.execute(
            "UPDATE vo_field_info SET table_id = ?, alias = ?, display = ?, remark = ?,
                font_color = ?, bg_color = ?, sort = ?
             WHERE id = ?",
            params![
                table_id,
                field.alias,
                field.display,
                field.remark,
                field.font_color,
                field.bg_color,
                field.sort,
                id
            ],
        )?,
    };
    if updated == 0 {
        let (display, sort) = match mode {
            OverlayWrite::Annotations => (field.display, field.sort),
            OverlayWrite::StructureOnly => (true, next_sort(conn, table_id)?),
        };
        conn.execute(
            "INSERT INTO vo_field_info (id, table_id, alias, display, remark, font_color, bg_color, sort)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                table_id,
                annotation(mode, &field.alias),
                display,
                annotation(mode, &field.remark),
                annotation(mode, &field.font_color),
                annotation(mode, &field.bg_color),
                sort,
            ],
        )?;
    }
    Ok(Some(id))
}

fn save_view_row(
    conn: &Connection,
    database_id: i64,
    schema_id: Option<i64>,
    view: &ViewVo,
    mode: OverlayWrite,
) -> Result<Option<i64>, StoreError> {
    let raw_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM raw_view_info WHERE database_id = ? AND schema_id IS ? AND name = ?",
            params![database_id, schema_id, view.name],
            |row| row.get(0),
        )
        .optional()?;
    let Some(id) = raw_id else {
        return Ok(None);
    };

    let updated = match mode {
        OverlayWrite::StructureOnly => conn.execute(
            "UPDATE vo_view_info SET database_id = ?, schema_id = ? WHERE id = ?",
            params![database_id, schema_id, id],
        )?,
        OverlayWrite::Annotations => conn.execute(
            "UPDATE vo_view_info SET database_id = ?, schema_id = ?, alias = ?, color = ?,
                remark = ?, sort = ?
             WHERE id = ?",
            params![
                database_id,
                schema_id,
                view.alias,
                view.color,
                view.remark,
                view.sort,
                id
            ],
        )?,
    };
    if updated == 0 {
        let sort = match mode {
            OverlayWrite::Annotations => view.sort,
            OverlayWrite::StructureOnly => 0,
        };
        conn.execute(
            "INSERT INTO vo_view_info (id, database_id, schema_id, alias, color, remark, sort)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                database_id,
                schema_id,
                annotation(mode, &view.alias),
                annotation(mode, &view.color),
                annotation(mode, &view.remark),
                sort,
            ],
        )?;
    }
    Ok(Some(id))
}

fn save_scope(
    conn: &Connection,
    database_id: i64,
    schema_id: Option<i64>,
    tables: &[TableVo],
    views: &[ViewVo],
) -> Result<usize, StoreError> {
    let mode = OverlayWrite::StructureOnly;
    let mut touched = 0;
    for table in tables {
        let Some(table_id) = save_table_row(conn, database_id, schema_id, table, mode)? else {
            continue;
        };
        touched += 1;
        for field in &table.fields {
            if save_field_row(conn, table_id, field, mode)?.is_some() {
                touched += 1;
            }
        }
    }
    for view in views {
        if save_view_row(conn, database_id, schema_id, view, mode)?.is_some() {
            touched += 1;
        }
    }
    Ok(touched)
}

fn annotation(mode: OverlayWrite, value: &str) -> &str {
    match mode {
        OverlayWrite::Annotations => value,
        OverlayWrite::StructureOnly => "",
    }
}

/// Zero while a table has no explicit ordering, otherwise one past the last position
fn next_sort(conn: &Connection, table_id: i64) -> Result<i64, StoreError> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort), 0) FROM vo_field_info WHERE table_id = ?",
        params![table_id],
        |row| row.get(0),
    )?;
    Ok(if max > 0 { max + 1 } else { 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::{DatabaseInfo, FieldInfo, TableInfo};
    use crate::db::MetadataStore;

    fn seed(store: &MetadataStore, columns: &[&str]) -> (i64, i64) {
        let database = DatabaseInfo {
            name: "shop".to_string(),
            tables: vec![TableInfo {
                name: "orders".to_string(),
                comment: "raw comment".to_string(),
                fields: columns
                    .iter()
                    .map(|name| FieldInfo {
                        name: name.to_string(),
                        field_type: "int".to_string(),
                        ..Default::default()
                    })
                    .collect(),
            }],
            ..Default::default()
        };
        let database_id = store.raw().save_database(7, &database).unwrap();
        let table_id = store.raw().tables(database_id, None).unwrap()[0].id;
        (database_id, table_id)
    }

    #[test]
    fn test_table_remark_lazily_creates_row() {
        let store = MetadataStore::open_in_memory().unwrap();
        let (database_id, table_id) = seed(&store, &["id"]);
        let overlay = store.overlay();

        assert!(overlay.tables_by_database(database_id, None).unwrap().is_empty());
        overlay.update_table_remark(table_id, "billing").unwrap();
        overlay.update_table_remark(table_id, "billing v2").unwrap();

        let tables = overlay.tables_by_database(database_id, None).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].id, table_id);
        assert_eq!(tables[0].remark, "billing v2");
        assert_eq!(tables[0].comment, "raw comment");
        assert_eq!(tables[0].database_id, database_id);

        assert!(matches!(
            overlay.update_table_remark(4242, "x"),
            Err(StoreError::MissingRaw { kind: "table", id: 4242 })
        ));
    }

    #[test]
    fn test_field_remark_by_name() {
        let store = MetadataStore::open_in_memory().unwrap();
        let (_, table_id) = seed(&store, &["id", "total"]);
        let overlay = store.overlay();

        overlay.update_field_remark(table_id, "total", "gross").unwrap();
        let fields = overlay.fields_by_table(table_id).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "total");
        assert_eq!(fields[0].remark, "gross");
        assert!(fields[0].display);

        assert!(matches!(
            overlay.update_field_remark(table_id, "missing", "x"),
            Err(StoreError::MissingRawField { .. })
        ));
    }

    #[test]
    fn test_update_fields_sort_orders_projection() {
        let store = MetadataStore::open_in_memory().unwrap();
        let (_, table_id) = seed(&store, &["a", "b", "c"]);
        let raw_fields = store.raw().fields(table_id).unwrap();
        let ids: Vec<i64> = raw_fields.iter().map(|f| f.id).collect();
        let overlay = store.overlay();

        overlay
            .update_fields_sort(table_id, &[ids[2], ids[0], ids[1]])
            .unwrap();
        let fields = overlay.fields_by_table(table_id).unwrap();
        let ordered: Vec<(i64, i64)> = fields.iter().map(|f| (f.id, f.sort)).collect();
        assert_eq!(ordered, vec![(ids[2], 1), (ids[0], 2), (ids[1], 3)]);

        assert!(overlay.update_fields_sort(table_id, &[99_999]).is_err());
        // failed batch leaves prior order intact
        let fields = overlay.fields_by_table(table_id).unwrap();
        assert_eq!(fields[0].id, ids[2]);
    }

    #[test]
    fn test_structure_save_keeps_annotations() {
        let store = MetadataStore::open_in_memory().unwrap();
        let (database_id, table_id) = seed(&store, &["id"]);
        let overlay = store.overlay();

        let annotated = TableVo {
            name: "orders".to_string(),
            alias: "Orders".to_string(),
            color: "#f00".to_string(),
            remark: "hot table".to_string(),
            ..Default::default()
        };
        assert_eq!(
            overlay
                .save_table_overlay(database_id, None, &annotated, OverlayWrite::Annotations)
                .unwrap(),
            Some(table_id)
        );

        let structural = TableVo {
            name: "orders".to_string(),
            ..Default::default()
        };
        overlay
            .save_table_overlay(database_id, None, &structural, OverlayWrite::StructureOnly)
            .unwrap();

        let table = overlay.tables_by_database(database_id, None).unwrap().remove(0);
        assert_eq!(table.alias, "Orders");
        assert_eq!(table.color, "#f00");
        assert_eq!(table.remark, "hot table");

        let unknown = TableVo {
            name: "nope".to_string(),
            ..Default::default()
        };
        assert_eq!(
            overlay
                .save_table_overlay(database_id, None, &unknown, OverlayWrite::Annotations)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_structural_field_rows_append_after_ordered_fields() {
        let store = MetadataStore::open_in_memory().unwrap();
        let (_, table_id) = seed(&store, &["a", "b", "c"]);
        let ids: Vec<i64> = store.raw().fields(table_id).unwrap().iter().map(|f| f.id).collect();
        let overlay = store.overlay();

        overlay.update_fields_sort(table_id, &[ids[2], ids[0]]).unwrap();
        let b = FieldVo {
            name: "b".to_string(),
            ..Default::default()
        };
        overlay
            .save_field_overlay(table_id, &b, OverlayWrite::StructureOnly)
            .unwrap();

        let names: Vec<String> = overlay
            .fields_by_table(table_id)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_partial_sort_over_structural_rows_moves_rest_after() {
        let store = MetadataStore::open_in_memory().unwrap();
        let (_, table_id) = seed(&store, &["a", "b", "c"]);
        let ids: Vec<i64> = store.raw().fields(table_id).unwrap().iter().map(|f| f.id).collect();
        let overlay = store.overlay();

        for name in ["a", "b", "c"] {
            let field = FieldVo {
                name: name.to_string(),
                ..Default::default()
            };
            overlay
                .save_field_overlay(table_id, &field, OverlayWrite::StructureOnly)
                .unwrap();
        }
        assert!(overlay
            .fields_by_table(table_id)
            .unwrap()
            .iter()
            .all(|f| f.sort == 0));

        overlay.update_fields_sort(table_id, &[ids[2], ids[0]]).unwrap();
        let ordered: Vec<(String, i64)> = overlay
            .fields_by_table(table_id)
            .unwrap()
            .into_iter()
            .map(|f| (f.name, f.sort))
            .collect();
        assert_eq!(
            ordered,
            vec![
                ("c".to_string(), 1),
                ("a".to_string(), 2),
                ("b".to_string(), 3)
            ]
        );
    }

    #[test]
    fn test_orphans_are_hidden_counted_and_pruned_on_delete() {
        let store = MetadataStore::open_in_memory().unwrap();
        let (_, table_id) = seed(&store, &["id", "legacy"]);
        let overlay = store.overlay();
        overlay.update_field_remark(table_id, "legacy", "old column").unwrap();

        seed(&store, &["id"]);
        assert!(overlay.fields_by_table(table_id).unwrap().is_empty());
        let counts = overlay.orphan_counts(7).unwrap();
        assert_eq!(counts.fields, 1);
        assert_eq!(counts.total(), 1);

        overlay.delete_by_credential(7).unwrap();
        assert_eq!(overlay.orphan_counts(7).unwrap(), OrphanCounts::default());
    }

    #[test]
    fn test_display_defaults_and_roundtrip() {
        let store = MetadataStore::open_in_memory().unwrap();
        let overlay = store.overlay();
        assert_eq!(overlay.get_display(7).unwrap(), Display::default());

        let mut display = Display {
            db_cnt: 2,
            ..Default::default()
        };
        display.style.insert(
            "shop".to_string(),
            crate::models::Style {
                color: "#0af".to_string(),
                is_show: true,
            },
        );
        overlay.save_display(7, &display).unwrap();
        assert_eq!(overlay.get_display(7).unwrap(), display);
    }
}
