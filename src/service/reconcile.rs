// ABOUTME: Pure conversion of the raw snapshot into the view model and the overlay merge
// ABOUTME: Every level matches by name through a per-scope index, never by nested scans

use std::collections::{HashMap, HashSet};

use crate::connect::{DatabaseInfo, FieldInfo, TableInfo, ViewInfo};
use crate::db::raw::RawField;
use crate::db::{RawStore, StoreError};
use crate::models::{DatabaseVo, Display, FieldVo, MetadataTree, SchemaVo, TableVo, ViewVo};

// ===== Raw snapshot -> view model =====

fn field_vo(field: &FieldInfo) -> FieldVo {
    FieldVo {
        name: field.name.clone(),
        field_type: field.field_type.clone(),
        nullable: field.nullable,
        key: field.key,
        comment: field.comment.clone(),
        default_value: field.default_value.clone(),
        display: true,
        ..Default::default()
    }
}

fn table_vo(table: &TableInfo) -> TableVo {
    TableVo {
        name: table.name.clone(),
        comment: table.comment.clone(),
        fields: table.fields.iter().map(field_vo).collect(),
        ..Default::default()
    }
}

fn view_vo(view: &ViewInfo) -> ViewVo {
    ViewVo {
        name: view.name.clone(),
        definition: view.definition.clone(),
        ..Default::default()
    }
}

/// Build the unannotated tree; ids are filled in by [`assign_raw_ids`]
pub fn convert(credential_id: i64, databases: &[DatabaseInfo]) -> MetadataTree {
    let dbs: Vec<DatabaseVo> = databases
        .iter()
        .map(|database| DatabaseVo {
            credential_id,
            name: database.name.clone(),
            comment: database.comment.clone(),
            schemas: database
                .schemas
                .iter()
                .map(|schema| SchemaVo {
                    name: schema.name.clone(),
                    tables: schema.tables.iter().map(table_vo).collect(),
                    views: schema.views.iter().map(view_vo).collect(),
                    ..Default::default()
                })
                .collect(),
            tables: database.tables.iter().map(table_vo).collect(),
            views: database.views.iter().map(view_vo).collect(),
            ..Default::default()
        })
        .collect();

    MetadataTree {
        display: Display {
            db_cnt: dbs.len() as i64,
            ..Default::default()
        },
        dbs,
    }
}

// ===== Raw id index =====

#[derive(Debug, Default)]
struct TableIds {
    id: i64,
    fields: HashMap<String, i64>,
}

#[derive(Debug, Default)]
struct ScopeIds {
    tables: HashMap<String, TableIds>,
    views: HashMap<String, i64>,
}

#[derive(Debug, Default)]
struct DatabaseIds {
    id: i64,
    root: ScopeIds,
    schemas: HashMap<String, (i64, ScopeIds)>,
}

/// Surrogate ids of a credential's raw rows, keyed by name within each parent
#[derive(Debug, Default)]
pub struct RawIndex {
    databases: HashMap<String, DatabaseIds>,
}

impl RawIndex {
    pub fn load(raw: &RawStore<'_>, credential_id: i64) -> Result<Self, StoreError> {
        let mut index = RawIndex::default();
        for database in raw.databases(credential_id)? {
            let mut ids = DatabaseIds {
                id: database.id,
                root: load_scope(raw, database.id, None)?,
                ..Default::default()
            };
            for schema in raw.schemas(database.id)? {
                let scope = load_scope(raw, database.id, Some(schema.id))?;
                ids.schemas.insert(schema.name, (schema.id, scope));
            }
            index.databases.insert(database.name, ids);
        }
        Ok(index)
    }
}

fn load_scope(
    raw: &RawStore<'_>,
    database_id: i64,
    schema_id: Option<i64>,
) -> Result<ScopeIds, StoreError> {
    let mut scope = ScopeIds::default();
    for table in raw.tables(database_id, schema_id)? {
        let fields = raw
            .fields(table.id)?
            .into_iter()
            .map(|field| (field.name, field.id))
            .collect();
        scope.tables.insert(
            table.name,
            TableIds {
                id: table.id,
                fields,
            },
        );
    }
    for view in raw.views(database_id, schema_id)? {
        scope.views.insert(view.name, view.id);
    }
    Ok(scope)
}

fn assign_scope(
    scope: &ScopeIds,
    database_id: i64,
    schema_id: Option<i64>,
    tables: &mut [TableVo],
    views: &mut [ViewVo],
) {
    for table in tables {
        table.database_id = database_id;
        table.schema_id = schema_id;
        if let Some(ids) = scope.tables.get(&table.name) {
            table.id = ids.id;
            for field in &mut table.fields {
                field.table_id = ids.id;
                if let Some(id) = ids.fields.get(&field.name) {
                    field.id = *id;
                }
            }
        }
    }
    for view in views {
        view.database_id = database_id;
        view.schema_id = schema_id;
        if let Some(id) = scope.views.get(&view.name) {
            view.id = *id;
        }
    }
}

/// Fill every node's id with its raw surrogate id, matching by name in scope
pub fn assign_raw_ids(tree: &mut MetadataTree, index: &RawIndex) {
    for database in &mut tree.dbs {
        let Some(ids) = index.databases.get(&database.name) else {
            continue;
        };
        database.id = ids.id;
        for schema in &mut database.schemas {
            schema.database_id = ids.id;
            if let Some((schema_id, scope)) = ids.schemas.get(&schema.name) {
                schema.id = *schema_id;
                assign_scope(
                    scope,
                    ids.id,
                    Some(*schema_id),
                    &mut schema.tables,
                    &mut schema.views,
                );
            }
        }
        assign_scope(
            &ids.root,
            ids.id,
            None,
            &mut database.tables,
            &mut database.views,
        );
    }
}

// ===== Overlay merge =====

/// Apply overlay annotations onto the raw-derived tree.
///
/// Overlay entries without a same-named raw node are ignored. The display
/// preference is replaced only when the overlay carries styles.
pub fn merge_overlay(tree: &mut MetadataTree, overlay: &[DatabaseVo], display: Display) {
    let by_name: HashMap<&str, &DatabaseVo> =
        overlay.iter().map(|db| (db.name.as_str(), db)).collect();

    for database in &mut tree.dbs {
        let Some(over) = by_name.get(database.name.as_str()) else {
            continue;
        };
        database.id = over.id;
        database.credential_id = over.credential_id;
        if database.alias.is_empty() {
            database.alias = over.alias.clone();
        }
        merge_tables(&mut database.tables, &over.tables);
        merge_views(&mut database.views, &over.views);

        let schemas: HashMap<&str, &SchemaVo> =
            over.schemas.iter().map(|s| (s.name.as_str(), s)).collect();
        for schema in &mut database.schemas {
            if let Some(over_schema) = schemas.get(schema.name.as_str()) {
                schema.id = over_schema.id;
                schema.database_id = over_schema.database_id;
                if schema.alias.is_empty() {
                    schema.alias = over_schema.alias.clone();
                }
                merge_tables(&mut schema.tables, &over_schema.tables);
                merge_views(&mut schema.views, &over_schema.views);
            }
        }
    }

    if !display.style.is_empty() {
        tree.display = display;
    }
}

pub fn merge_tables(base: &mut [TableVo], overlay: &[TableVo]) {
    let by_name: HashMap<&str, &TableVo> =
        overlay.iter().map(|t| (t.name.as_str(), t)).collect();

    for table in base {
        let Some(over) = by_name.get(table.name.as_str()) else {
            continue;
        };
        table.id = over.id;
        table.database_id = over.database_id;
        table.schema_id = over.schema_id;
        if table.alias.is_empty() {
            table.alias = over.alias.clone();
        }
        if !over.color.is_empty() {
            table.color = over.color.clone();
        }
        if !over.remark.is_empty() {
            table.remark = over.remark.clone();
        }
        table.fields = merge_fields(std::mem::take(&mut table.fields), &over.fields);
    }
}

/// Overlay order first, then raw fields the overlay does not list, in raw order.
/// Overlay fields with no raw counterpart are dropped.
pub fn merge_fields(base: Vec<FieldVo>, overlay: &[FieldVo]) -> Vec<FieldVo> {
    let mut remaining: HashMap<String, FieldVo> = HashMap::with_capacity(base.len());
    let mut raw_order = Vec::with_capacity(base.len());
    for field in base {
        raw_order.push(field.name.clone());
        remaining.insert(field.name.clone(), field);
    }

    let mut merged = Vec::with_capacity(raw_order.len());
    for over in overlay {
        let Some(mut field) = remaining.remove(&over.name) else {
            continue;
        };
        apply_field_overlay(&mut field, over);
        merged.push(field);
    }
    for name in raw_order {
        if let Some(field) = remaining.remove(&name) {
            merged.push(field);
        }
    }
    merged
}

fn apply_field_overlay(field: &mut FieldVo, over: &FieldVo) {
    field.id = over.id;
    field.table_id = over.table_id;
    if field.alias.is_empty() {
        field.alias = over.alias.clone();
    }
    field.display = over.display;
    if !over.remark.is_empty() {
        field.remark = over.remark.clone();
    }
    if !over.font_color.is_empty() {
        field.font_color = over.font_color.clone();
    }
    if !over.bg_color.is_empty() {
        field.bg_color = over.bg_color.clone();
    }
    field.sort = over.sort;
}

pub fn merge_views(base: &mut [ViewVo], overlay: &[ViewVo]) {
    let by_name: HashMap<&str, &ViewVo> = overlay.iter().map(|v| (v.name.as_str(), v)).collect();

    for view in base {
        let Some(over) = by_name.get(view.name.as_str()) else {
            continue;
        };
        view.id = over.id;
        view.database_id = over.database_id;
        view.schema_id = over.schema_id;
        if view.alias.is_empty() {
            view.alias = over.alias.clone();
        }
        if !over.color.is_empty() {
            view.color = over.color.clone();
        }
        if !over.remark.is_empty() {
            view.remark = over.remark.clone();
        }
        view.sort = over.sort;
    }
}

// ===== Scoped merges =====

fn raw_field_vo(field: &RawField) -> FieldVo {
    FieldVo {
        id: field.id,
        table_id: field.table_id,
        ..field_vo(&field.to_info())
    }
}

/// Merge one table's overlay projection with its raw fields.
///
/// Overlay rows bind by raw id, falling back to the column name; raw fields
/// left unbound are appended in raw order.
pub fn merge_scoped_fields(overlay: Vec<FieldVo>, raw: &[RawField]) -> Vec<FieldVo> {
    let by_id: HashMap<i64, &RawField> = raw.iter().map(|f| (f.id, f)).collect();
    let by_name: HashMap<&str, &RawField> = raw.iter().map(|f| (f.name.as_str(), f)).collect();

    let mut bound = HashSet::new();
    let mut merged = Vec::with_capacity(raw.len());
    for over in overlay {
        let Some(raw_field) = by_id
            .get(&over.id)
            .or_else(|| by_name.get(over.name.as_str()))
            .copied()
        else {
            continue;
        };
        if !bound.insert(raw_field.id) {
            continue;
        }
        let mut field = raw_field_vo(raw_field);
        apply_field_overlay(&mut field, &over);
        field.id = raw_field.id;
        merged.push(field);
    }
    merged.extend(
        raw.iter()
            .filter(|f| !bound.contains(&f.id))
            .map(raw_field_vo),
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::{KeyKind, SchemaInfo};
    use crate::models::Style;

    fn field(name: &str) -> FieldVo {
        FieldVo {
            name: name.to_string(),
            display: true,
            ..Default::default()
        }
    }

    fn names(fields: &[FieldVo]) -> Vec<&str> {
        fields.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_overlay_order_then_new_raw_fields() {
        let base = vec![field("A"), field("B"), field("C")];
        let overlay = vec![
            FieldVo {
                sort: 1,
                remark: "third column first".to_string(),
                ..field("C")
            },
            FieldVo {
                sort: 2,
                ..field("A")
            },
        ];

        let merged = merge_fields(base, &overlay);
        assert_eq!(names(&merged), vec!["C", "A", "B"]);
        assert_eq!(merged[0].remark, "third column first");
        assert_eq!(merged[0].sort, 1);
        assert_eq!(merged[2].sort, 0);
    }

    #[test]
    fn test_stale_overlay_fields_are_dropped() {
        let base = vec![field("id"), field("name")];
        let overlay = vec![
            field("dropped_column"),
            FieldVo {
                display: false,
                ..field("name")
            },
        ];

        let merged = merge_fields(base, &overlay);
        assert_eq!(names(&merged), vec!["name", "id"]);
        assert!(!merged[0].display);
    }

    #[test]
    fn test_table_annotation_precedence() {
        let mut base = vec![TableVo {
            name: "orders".to_string(),
            color: "#111".to_string(),
            remark: "kept".to_string(),
            ..Default::default()
        }];
        let overlay = vec![TableVo {
            id: 42,
            database_id: 3,
            name: "orders".to_string(),
            alias: "Orders".to_string(),
            color: String::new(),
            remark: String::new(),
            ..Default::default()
        }];

        merge_tables(&mut base, &overlay);
        assert_eq!(base[0].id, 42);
        assert_eq!(base[0].database_id, 3);
        assert_eq!(base[0].alias, "Orders");
        assert_eq!(base[0].color, "#111");
        assert_eq!(base[0].remark, "kept");
    }

    #[test]
    fn test_display_replaced_only_with_styles() {
        let databases = vec![DatabaseInfo::named("shop"), DatabaseInfo::named("crm")];
        let mut tree = convert(7, &databases);
        assert_eq!(tree.display.db_cnt, 2);

        merge_overlay(
            &mut tree,
            &[],
            Display {
                db_cnt: 9,
                ..Default::default()
            },
        );
        assert_eq!(tree.display.db_cnt, 2);

        let mut styled = Display {
            db_cnt: 1,
            ..Default::default()
        };
        styled.style.insert(
            "shop".to_string(),
            Style {
                color: "#0af".to_string(),
                is_show: true,
            },
        );
        merge_overlay(&mut tree, &[], styled.clone());
        assert_eq!(tree.display, styled);
    }

    #[test]
    fn test_convert_and_merge_nested_schema() {
        let databases = vec![DatabaseInfo {
            name: "warehouse".to_string(),
            schemas: vec![SchemaInfo {
                name: "sales".to_string(),
                tables: vec![TableInfo {
                    name: "orders".to_string(),
                    comment: String::new(),
                    fields: vec![FieldInfo {
                        name: "id".to_string(),
                        field_type: "integer".to_string(),
                        key: KeyKind::Primary,
                        ..Default::default()
                    }],
                }],
                views: vec![],
            }],
            ..Default::default()
        }];
        let mut tree = convert(7, &databases);
        let overlay = vec![DatabaseVo {
            id: 1,
            credential_id: 7,
            name: "warehouse".to_string(),
            alias: "DWH".to_string(),
            schemas: vec![SchemaVo {
                id: 2,
                database_id: 1,
                name: "sales".to_string(),
                alias: "Sales".to_string(),
                tables: vec![TableVo {
                    id: 3,
                    database_id: 1,
                    schema_id: Some(2),
                    name: "orders".to_string(),
                    remark: "fact table".to_string(),
                    fields: vec![FieldVo {
                        id: 4,
                        table_id: 3,
                        remark: "surrogate".to_string(),
                        ..field("id")
                    }],
                    ..Default::default()
                }],
                views: vec![],
            }],
            ..Default::default()
        }];

        merge_overlay(&mut tree, &overlay, Display::default());
        let database = &tree.dbs[0];
        assert_eq!(database.alias, "DWH");
        let schema = &database.schemas[0];
        assert_eq!((schema.id, schema.alias.as_str()), (2, "Sales"));
        let table = &schema.tables[0];
        assert_eq!(table.remark, "fact table");
        assert_eq!(table.schema_id, Some(2));
        assert_eq!(table.fields[0].remark, "surrogate");
        assert_eq!(table.fields[0].key, KeyKind::Primary);
        assert_eq!(table.fields[0].id, 4);
    }

    #[test]
    fn test_scoped_merge_binds_by_id_then_name() {
        let raw = vec![
            RawField {
                id: 53,
                table_id: 10,
                name: "a".to_string(),
                field_type: "int".to_string(),
                nullable: false,
                key: KeyKind::Primary,
                comment: String::new(),
                default_value: None,
            },
            RawField {
                id: 54,
                table_id: 10,
                name: "b".to_string(),
                field_type: "text".to_string(),
                nullable: true,
                key: KeyKind::None,
                comment: String::new(),
                default_value: None,
            },
            RawField {
                id: 55,
                table_id: 10,
                name: "c".to_string(),
                field_type: "text".to_string(),
                nullable: true,
                key: KeyKind::None,
                comment: String::new(),
                default_value: None,
            },
        ];
        let overlay = vec![
            FieldVo {
                id: 55,
                sort: 1,
                ..field("c")
            },
            FieldVo {
                id: 0,
                sort: 2,
                remark: "matched by name".to_string(),
                ..field("b")
            },
            FieldVo {
                id: 99,
                ..field("gone")
            },
        ];

        let merged = merge_scoped_fields(overlay, &raw);
        let ids: Vec<i64> = merged.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![55, 54, 53]);
        assert_eq!(merged[1].remark, "matched by name");
        assert_eq!(merged[1].field_type, "text");
        assert_eq!(merged[2].key, KeyKind::Primary);
    }
}
