// ABOUTME: Engine-neutral introspection contract shared by every database connector
// ABOUTME: Defines credentials, catalog shapes, key classification, and the Connector trait

pub mod error;
pub mod factory;
pub mod mariadb;
pub mod mysql;
pub mod oracle;
pub mod pool;
pub mod postgres;
pub mod sqlserver;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use error::{CatalogStage, ConnectError};
pub use factory::{ConnectorFactory, EngineFactory};
pub use pool::ConnectionPool;

// ===== Engine selection =====

/// The closed set of engines a credential can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineType {
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "mariadb")]
    MariaDb,
    #[serde(rename = "postgresql")]
    Postgres,
    #[serde(rename = "sqlserver")]
    SqlServer,
    #[serde(rename = "oracle")]
    Oracle,
}

impl EngineType {
    pub const ALL: [EngineType; 5] = [
        EngineType::MySql,
        EngineType::MariaDb,
        EngineType::Postgres,
        EngineType::SqlServer,
        EngineType::Oracle,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            EngineType::MySql => "mysql",
            EngineType::MariaDb => "mariadb",
            EngineType::Postgres => "postgresql",
            EngineType::SqlServer => "sqlserver",
            EngineType::Oracle => "oracle",
        }
    }

    /// Exact tag lookup; anything else is unsupported
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|engine| engine.tag() == tag)
    }

    /// Engines whose databases contain a schema level. MySQL and MariaDB treat
    /// the database itself as the schema.
    pub fn has_schemas(&self) -> bool {
        matches!(
            self,
            EngineType::Postgres | EngineType::SqlServer | EngineType::Oracle
        )
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ===== Credentials =====

/// Connection settings for one registered database server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default)]
    pub id: i64,
    /// Raw engine tag as stored; validated when a connector is requested
    #[serde(rename = "type", default)]
    pub engine: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub options: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Resolve the engine tag, distinguishing a missing tag from an unknown one
    pub fn engine_type(&self) -> Result<EngineType, ConnectError> {
        let tag = self.engine.trim();
        if tag.is_empty() {
            return Err(ConnectError::MissingEngine(self.id));
        }
        EngineType::from_tag(tag).ok_or_else(|| ConnectError::UnsupportedEngine {
            engine: self.engine.clone(),
            credential_id: self.id,
        })
    }

    /// Only positive ids are pool keys; zero is a one-off test credential
    pub fn is_poolable(&self) -> bool {
        self.id > 0
    }
}

/// Options applied to every connector construction
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

// ===== Catalog shapes =====

/// Scope of a catalog query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pub database: String,
    pub schema: Option<String>,
    pub table: Option<String>,
}

impl QueryParams {
    pub fn database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: Option<&str>) -> Self {
        self.schema = schema.map(str::to_string);
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Schema if present, otherwise the database; used by engines without schemas
    pub fn owner(&self) -> &str {
        self.schema.as_deref().unwrap_or(&self.database)
    }

    /// Human-readable target for error messages
    pub fn target(&self) -> String {
        let mut parts = vec![self.database.as_str()];
        if let Some(schema) = self.schema.as_deref() {
            parts.push(schema);
        }
        if let Some(table) = self.table.as_deref() {
            parts.push(table);
        }
        parts.join(".")
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInfo {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub schemas: Vec<SchemaInfo>,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub views: Vec<ViewInfo>,
}

impl DatabaseInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub views: Vec<ViewInfo>,
}

impl SchemaInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
    #[serde(default)]
    pub definition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub key: KeyKind,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub default_value: Option<String>,
}

// ===== Key classification =====

/// Column key classification, serialized with the catalog's three-letter codes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    #[serde(rename = "PRI")]
    Primary,
    #[serde(rename = "FOR")]
    Foreign,
    #[serde(rename = "UNI")]
    Unique,
    #[serde(rename = "MUL")]
    Multiple,
    #[serde(rename = "IDX")]
    Indexed,
    #[default]
    #[serde(rename = "")]
    None,
}

impl KeyKind {
    pub fn code(&self) -> &'static str {
        match self {
            KeyKind::Primary => "PRI",
            KeyKind::Foreign => "FOR",
            KeyKind::Unique => "UNI",
            KeyKind::Multiple => "MUL",
            KeyKind::Indexed => "IDX",
            KeyKind::None => "",
        }
    }

    /// Unknown codes degrade to `None`
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "PRI" => KeyKind::Primary,
            "FOR" => KeyKind::Foreign,
            "UNI" => KeyKind::Unique,
            "MUL" => KeyKind::Multiple,
            "IDX" => KeyKind::Indexed,
            _ => KeyKind::None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            KeyKind::Primary => 5,
            KeyKind::Foreign => 4,
            KeyKind::Unique => 3,
            KeyKind::Multiple => 2,
            KeyKind::Indexed => 1,
            KeyKind::None => 0,
        }
    }

    /// Keep whichever classification has the higher precedence
    pub fn promote(self, other: KeyKind) -> KeyKind {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

// ===== Connector contract =====

/// Uniform catalog introspection over one engine connection.
///
/// Implementations own their driver state and serialize their own catalog
/// calls; a connector is shared behind an `Arc` by the pool.
#[async_trait]
pub trait Connector: Send + Sync {
    fn engine(&self) -> EngineType;

    /// Echo of the credential this connector was built from
    fn credential(&self) -> &Credential;

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, ConnectError>;

    /// Engines without schemas return an empty list
    async fn list_schemas(&self, database: &str) -> Result<Vec<SchemaInfo>, ConnectError>;

    async fn list_tables(&self, params: &QueryParams) -> Result<Vec<TableInfo>, ConnectError>;

    async fn list_views(&self, params: &QueryParams) -> Result<Vec<ViewInfo>, ConnectError>;

    async fn list_fields(&self, params: &QueryParams) -> Result<Vec<FieldInfo>, ConnectError>;

    async fn test_connection(&self) -> Result<(), ConnectError>;

    async fn close(&self) -> Result<(), ConnectError>;
}
