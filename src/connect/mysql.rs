// ABOUTME: MySQL connector over a sqlx pool, introspecting information_schema
// ABOUTME: The catalog queries here are shared with the MariaDB connector

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Connection as _;

use super::{
    CatalogStage, ConnectError, ConnectOptions, Connector, Credential, DatabaseInfo, EngineType,
    FieldInfo, KeyKind, QueryParams, SchemaInfo, TableInfo, ViewInfo,
};

const DEFAULT_PORT: u16 = 3306;
const POOL_SIZE: u32 = 4;

/// Server-internal databases hidden from the database list
const SYSTEM_DATABASES: [&str; 4] = ["information_schema", "mysql", "performance_schema", "sys"];

pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES
        .iter()
        .any(|system| system.eq_ignore_ascii_case(name))
}

/// Map one information_schema.COLUMNS row to a field
pub fn field_from_columns(
    name: String,
    column_type: String,
    is_nullable: &str,
    column_key: &str,
    comment: String,
    default_value: Option<String>,
) -> FieldInfo {
    FieldInfo {
        name,
        field_type: column_type,
        nullable: is_nullable.eq_ignore_ascii_case("YES"),
        key: KeyKind::from_code(column_key),
        comment,
        default_value,
    }
}

pub(crate) async fn open_pool(
    credential: &Credential,
    options: &ConnectOptions,
) -> Result<MySqlPool, ConnectError> {
    let port = if credential.port == 0 {
        DEFAULT_PORT
    } else {
        credential.port
    };
    let mut connect = MySqlConnectOptions::new()
        .host(&credential.host)
        .port(port)
        .username(&credential.username)
        .password(&credential.password);
    if !credential.database.is_empty() {
        connect = connect.database(&credential.database);
    }

    let pool = MySqlPoolOptions::new()
        .max_connections(POOL_SIZE)
        .acquire_timeout(options.timeout)
        .connect_with(connect)
        .await
        .map_err(|e| ConnectError::ConnectionFailed(format!("Failed to connect to MySQL: {}", e)))?;

    ping(&pool).await?;
    Ok(pool)
}

pub(crate) async fn ping(pool: &MySqlPool) -> Result<(), ConnectError> {
    let mut conn = pool.acquire().await.map_err(ConnectError::connection)?;
    conn.ping().await.map_err(ConnectError::connection)
}

/// information_schema catalog shared by MySQL-protocol engines
pub(crate) struct MySqlCatalog {
    pool: MySqlPool,
}

impl MySqlCatalog {
    pub(crate) fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub(crate) async fn databases(&self) -> Result<Vec<DatabaseInfo>, ConnectError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT CAST(SCHEMA_NAME AS CHAR) FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConnectError::catalog(CatalogStage::Databases, "server", e))?;

        Ok(names
            .into_iter()
            .filter(|name| !is_system_database(name))
            .map(DatabaseInfo::named)
            .collect())
    }

    pub(crate) async fn tables(&self, params: &QueryParams) -> Result<Vec<TableInfo>, ConnectError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR), CAST(COALESCE(TABLE_COMMENT, '') AS CHAR)
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(params.owner())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConnectError::catalog(CatalogStage::Tables, params.target(), e))?;

        Ok(rows
            .into_iter()
            .map(|(name, comment)| TableInfo {
                name,
                comment,
                fields: Vec::new(),
            })
            .collect())
    }

    pub(crate) async fn views(&self, params: &QueryParams) -> Result<Vec<ViewInfo>, ConnectError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR), CAST(COALESCE(VIEW_DEFINITION, '') AS CHAR)
            FROM information_schema.VIEWS
            WHERE TABLE_SCHEMA = ?
            ORDER BY TABLE_NAME
            "#,
        )
        .bind(params.owner())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConnectError::catalog(CatalogStage::Views, params.target(), e))?;

        Ok(rows
            .into_iter()
            .map(|(name, definition)| ViewInfo { name, definition })
            .collect())
    }

    pub(crate) async fn fields(&self, params: &QueryParams) -> Result<Vec<FieldInfo>, ConnectError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, Option<String>)>(
            r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR),
                CAST(COLUMN_TYPE AS CHAR),
                CAST(IS_NULLABLE AS CHAR),
                CAST(COLUMN_KEY AS CHAR),
                CAST(COALESCE(COLUMN_COMMENT, '') AS CHAR),
                CAST(COLUMN_DEFAULT AS CHAR)
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(params.owner())
        .bind(params.table_name())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConnectError::catalog(CatalogStage::Fields, params.target(), e))?;

        Ok(rows
            .into_iter()
            .map(|(name, column_type, nullable, key, comment, default_value)| {
                field_from_columns(name, column_type, &nullable, &key, comment, default_value)
            })
            .collect())
    }

    pub(crate) async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct MySqlConnector {
    credential: Credential,
    catalog: MySqlCatalog,
}

impl MySqlConnector {
    /// Open a pool and verify it with a ping
    pub async fn connect(
        credential: &Credential,
        options: &ConnectOptions,
    ) -> Result<Self, ConnectError> {
        let pool = open_pool(credential, options).await?;
        Ok(Self {
            credential: credential.clone(),
            catalog: MySqlCatalog::new(pool),
        })
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    fn engine(&self) -> EngineType {
        EngineType::MySql
    }

    fn credential(&self) -> &Credential {
        &self.credential
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, ConnectError> {
        self.catalog.databases().await
    }

    async fn list_schemas(&self, _database: &str) -> Result<Vec<SchemaInfo>, ConnectError> {
        Ok(Vec::new())
    }

    async fn list_tables(&self, params: &QueryParams) -> Result<Vec<TableInfo>, ConnectError> {
        self.catalog.tables(params).await
    }

    async fn list_views(&self, params: &QueryParams) -> Result<Vec<ViewInfo>, ConnectError> {
        self.catalog.views(params).await
    }

    async fn list_fields(&self, params: &QueryParams) -> Result<Vec<FieldInfo>, ConnectError> {
        self.catalog.fields(params).await
    }

    async fn test_connection(&self) -> Result<(), ConnectError> {
        ping(self.catalog.pool()).await
    }

    async fn close(&self) -> Result<(), ConnectError> {
        self.catalog.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_databases_are_hidden() {
        assert!(is_system_database("information_schema"));
        assert!(is_system_database("PERFORMANCE_SCHEMA"));
        assert!(is_system_database("sys"));
        assert!(!is_system_database("shop"));
    }

    #[test]
    fn test_field_from_columns() {
        let field = field_from_columns(
            "id".to_string(),
            "bigint unsigned".to_string(),
            "NO",
            "PRI",
            "surrogate key".to_string(),
            None,
        );
        assert!(!field.nullable);
        assert_eq!(field.key, KeyKind::Primary);

        let field = field_from_columns(
            "customer_id".to_string(),
            "int".to_string(),
            "YES",
            "MUL",
            String::new(),
            Some("0".to_string()),
        );
        assert!(field.nullable);
        assert_eq!(field.key, KeyKind::Multiple);
        assert_eq!(field.default_value.as_deref(), Some("0"));
    }
}
