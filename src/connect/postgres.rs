// ABOUTME: PostgreSQL connector with one lazily opened sqlx pool per database
// ABOUTME: Comments come from obj_description/col_description, keys from table_constraints

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Connection as _;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{
    CatalogStage, ConnectError, ConnectOptions, Connector, Credential, DatabaseInfo, EngineType,
    FieldInfo, KeyKind, QueryParams, SchemaInfo, TableInfo, ViewInfo,
};

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DATABASE: &str = "postgres";
const DEFAULT_SCHEMA: &str = "public";
const POOL_SIZE: u32 = 2;

pub struct PostgresConnector {
    credential: Credential,
    options: ConnectOptions,
    default_database: String,
    /// Catalogs are per database, so each database gets its own pool
    pools: Mutex<HashMap<String, PgPool>>,
}

impl PostgresConnector {
    pub async fn connect(
        credential: &Credential,
        options: &ConnectOptions,
    ) -> Result<Self, ConnectError> {
        let default_database = if credential.database.is_empty() {
            DEFAULT_DATABASE.to_string()
        } else {
            credential.database.clone()
        };

        let connector = Self {
            credential: credential.clone(),
            options: *options,
            default_database,
            pools: Mutex::new(HashMap::new()),
        };
        connector.test_connection().await?;
        Ok(connector)
    }

    fn connect_options(&self, database: &str) -> PgConnectOptions {
        let port = if self.credential.port == 0 {
            DEFAULT_PORT
        } else {
            self.credential.port
        };
        PgConnectOptions::new()
            .host(&self.credential.host)
            .port(port)
            .username(&self.credential.username)
            .password(&self.credential.password)
            .database(database)
    }

    async fn pool_for(&self, database: &str) -> Result<PgPool, ConnectError> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(database) {
            return Ok(pool.clone());
        }

        let pool = PgPoolOptions::new()
            .max_connections(POOL_SIZE)
            .acquire_timeout(self.options.timeout)
            .connect_with(self.connect_options(database))
            .await
            .map_err(|e| {
                ConnectError::ConnectionFailed(format!(
                    "Failed to connect to PostgreSQL database '{}': {}",
                    database, e
                ))
            })?;
        log::debug!("[PostgreSQL] opened pool for database {}", database);
        pools.insert(database.to_string(), pool.clone());
        Ok(pool)
    }

    fn schema_of(params: &QueryParams) -> &str {
        params.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }
}

/// Highest-precedence key among a column's constraint types
pub fn key_from_constraints<'a>(constraint_types: impl IntoIterator<Item = &'a str>) -> KeyKind {
    constraint_types
        .into_iter()
        .map(|kind| match kind {
            "PRIMARY KEY" => KeyKind::Primary,
            "FOREIGN KEY" => KeyKind::Foreign,
            "UNIQUE" => KeyKind::Unique,
            _ => KeyKind::None,
        })
        .fold(KeyKind::None, KeyKind::promote)
}

#[async_trait]
impl Connector for PostgresConnector {
    fn engine(&self) -> EngineType {
        EngineType::Postgres
    }

    fn credential(&self) -> &Credential {
        &self.credential
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, ConnectError> {
        let pool = self.pool_for(&self.default_database).await?;
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT datname::text, COALESCE(shobj_description(oid, 'pg_database'), '')::text
            FROM pg_database
            WHERE datistemplate = false
            ORDER BY datname
            "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| ConnectError::catalog(CatalogStage::Databases, "server", e))?;

        Ok(rows
            .into_iter()
            .map(|(name, comment)| DatabaseInfo {
                name,
                comment,
                ..Default::default()
            })
            .collect())
    }

    async fn list_schemas(&self, database: &str) -> Result<Vec<SchemaInfo>, ConnectError> {
        let pool = self.pool_for(database).await?;
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT schema_name::text
            FROM information_schema.schemata
            WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
              AND schema_name NOT LIKE 'pg_toast%'
              AND schema_name NOT LIKE 'pg_temp%'
            ORDER BY schema_name
            "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| ConnectError::catalog(CatalogStage::Schemas, database, e))?;

        Ok(names.into_iter().map(SchemaInfo::named).collect())
    }

    async fn list_tables(&self, params: &QueryParams) -> Result<Vec<TableInfo>, ConnectError> {
        let pool = self.pool_for(&params.database).await?;
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT
                t.table_name::text,
                COALESCE(obj_description(
                    (quote_ident(t.table_schema) || '.' || quote_ident(t.table_name))::regclass,
                    'pg_class'), '')::text
            FROM information_schema.tables t
            WHERE t.table_schema = $1 AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
            "#,
        )
        .bind(Self::schema_of(params))
        .fetch_all(&pool)
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

    async fn list_views(&self, params: &QueryParams) -> Result<Vec<ViewInfo>, ConnectError> {
        let pool = self.pool_for(&params.database).await?;
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT table_name::text, COALESCE(view_definition, '')::text
            FROM information_schema.views
            WHERE table_schema = $1
            ORDER BY table_name
            "#,
        )
        .bind(Self::schema_of(params))
        .fetch_all(&pool)
        .await
        .map_err(|e| ConnectError::catalog(CatalogStage::Views, params.target(), e))?;

        Ok(rows
            .into_iter()
            .map(|(name, definition)| ViewInfo { name, definition })
            .collect())
    }

    async fn list_fields(&self, params: &QueryParams) -> Result<Vec<FieldInfo>, ConnectError> {
        let pool = self.pool_for(&params.database).await?;
        let rows = sqlx::query_as::<_, (String, String, String, String, Option<String>, Option<String>)>(
            r#"
            SELECT
                c.column_name::text,
                c.data_type::text,
                c.is_nullable::text,
                COALESCE(col_description(
                    (quote_ident(c.table_schema) || '.' || quote_ident(c.table_name))::regclass::oid,
                    c.ordinal_position::int), '')::text,
                c.column_default::text,
                (
                    SELECT string_agg(tc.constraint_type::text, ',')
                    FROM information_schema.key_column_usage kcu
                    JOIN information_schema.table_constraints tc
                      ON tc.constraint_name = kcu.constraint_name
                     AND tc.table_schema = kcu.table_schema
                     AND tc.table_name = kcu.table_name
                    WHERE kcu.table_schema = c.table_schema
                      AND kcu.table_name = c.table_name
                      AND kcu.column_name = c.column_name
                )
            FROM information_schema.columns c
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
            "#,
        )
        .bind(Self::schema_of(params))
        .bind(params.table_name())
        .fetch_all(&pool)
        .await
        .map_err(|e| ConnectError::catalog(CatalogStage::Fields, params.target(), e))?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, comment, default_value, constraints)| FieldInfo {
                name,
                field_type: data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
                key: key_from_constraints(constraints.as_deref().unwrap_or_default().split(',')),
                comment,
                default_value,
            })
            .collect())
    }

    async fn test_connection(&self) -> Result<(), ConnectError> {
        let pool = self.pool_for(&self.default_database).await?;
        let mut conn = pool.acquire().await.map_err(ConnectError::connection)?;
        conn.ping().await.map_err(ConnectError::connection)
    }

    async fn close(&self) -> Result<(), ConnectError> {
        let pools: Vec<PgPool> = self.pools.lock().await.drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_constraints() {
        assert_eq!(key_from_constraints(["UNIQUE", "PRIMARY KEY"]), KeyKind::Primary);
        assert_eq!(key_from_constraints(["FOREIGN KEY", "UNIQUE"]), KeyKind::Foreign);
        assert_eq!(key_from_constraints([""]), KeyKind::None);
        assert_eq!(key_from_constraints(Vec::<&str>::new()), KeyKind::None);
    }
}
