// ABOUTME: View-model shapes returned to callers after raw/overlay reconciliation
// ABOUTME: Serialized in camelCase for the desktop frontend

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::connect::KeyKind;

/// A column with its user annotations applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldVo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub table_id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub key: KeyKind,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub alias: String,
    #[serde(default = "default_true")]
    pub display: bool,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub font_color: String,
    #[serde(default)]
    pub bg_color: String,
    #[serde(default)]
    pub sort: i64,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableVo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub database_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub fields: Vec<FieldVo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewVo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub database_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub sort: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub database_id: i64,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub tables: Vec<TableVo>,
    #[serde(default)]
    pub views: Vec<ViewVo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseVo {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub credential_id: i64,
    pub name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub schemas: Vec<SchemaVo>,
    #[serde(default)]
    pub tables: Vec<TableVo>,
    #[serde(default)]
    pub views: Vec<ViewVo>,
}

/// Per-database presentation settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub is_show: bool,
}

/// Aggregate display preference, one per credential
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Display {
    #[serde(rename = "dbCnt", default)]
    pub db_cnt: i64,
    #[serde(default)]
    pub style: HashMap<String, Style>,
}

/// Full reconciled tree for one credential
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataTree {
    pub dbs: Vec<DatabaseVo>,
    pub display: Display,
}

/// Remarks for one table and its columns, keyed by column name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableAnnotations {
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub field_remarks: HashMap<String, String>,
}
