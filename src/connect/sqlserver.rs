// ABOUTME: SQL Server connector using tiberius over a tokio TCP stream
// ABOUTME: Switches database context with USE and reads comments from MS_Description

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, Row, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{
    CatalogStage, ConnectError, ConnectOptions, Connector, Credential, DatabaseInfo, EngineType,
    FieldInfo, KeyKind, QueryParams, SchemaInfo, TableInfo, ViewInfo,
};

const DEFAULT_PORT: u16 = 1433;
const DEFAULT_SCHEMA: &str = "dbo";

type SqlClient = Client<Compat<TcpStream>>;

pub struct SqlServerConnector {
    credential: Credential,
    /// None once closed; the TDS client runs one request at a time
    client: Mutex<Option<SqlClient>>,
}

/// Quote an identifier for USE [..] statements
fn bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn text(row: &Row, idx: usize) -> Result<String, tiberius::error::Error> {
    Ok(row.try_get::<&str, _>(idx)?.unwrap_or_default().to_string())
}

impl SqlServerConnector {
    /// Connect to SQL Server and verify the session with a version query
    pub async fn connect(
        credential: &Credential,
        _options: &ConnectOptions,
    ) -> Result<Self, ConnectError> {
        let mut config = Config::new();
        config.host(&credential.host);
        config.port(if credential.port == 0 {
            DEFAULT_PORT
        } else {
            credential.port
        });
        config.authentication(AuthMethod::sql_server(
            &credential.username,
            &credential.password,
        ));
        if !credential.database.is_empty() {
            config.database(&credential.database);
        }
        config.trust_cert();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| ConnectError::ConnectionFailed(e.to_string()))?;

        tcp.set_nodelay(true).map_err(ConnectError::connection)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| ConnectError::ConnectionFailed(e.to_string()))?;

        let connector = Self {
            credential: credential.clone(),
            client: Mutex::new(Some(client)),
        };
        connector.test_connection().await?;
        Ok(connector)
    }

    /// Run one catalog query, optionally inside a database context
    async fn rows(
        &self,
        database: Option<&str>,
        sql: &str,
        params: &[&dyn ToSql],
        stage: CatalogStage,
        target: &str,
    ) -> Result<Vec<Row>, ConnectError> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or(ConnectError::Closed(EngineType::SqlServer))?;

        if let Some(database) = database {
            client
                .execute(format!("USE {}", bracket(database)), &[])
                .await
                .map_err(|e| ConnectError::catalog(stage, target, e))?;
        }

        let rows = client
            .query(sql, params)
            .await
            .map_err(|e| ConnectError::catalog(stage, target, e))?
            .into_first_result()
            .await
            .map_err(|e| ConnectError::catalog(stage, target, e));
        rows
    }

    fn schema_of(params: &QueryParams) -> &str {
        params.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }
}

#[async_trait]
impl Connector for SqlServerConnector {
    fn engine(&self) -> EngineType {
        EngineType::SqlServer
    }

    fn credential(&self) -> &Credential {
        &self.credential
    }

    /// User databases, excluding system databases and database snapshots
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, ConnectError> {
        let query = r#"
            SELECT name
            FROM sys.databases
            WHERE database_id > 4
              AND source_database_id IS NULL
            ORDER BY name
        "#;
        let rows = self
            .rows(None, query, &[], CatalogStage::Databases, "server")
            .await?;

        rows.iter()
            .map(|row| text(row, 0).map(DatabaseInfo::named))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectError::catalog(CatalogStage::Databases, "server", e))
    }

    async fn list_schemas(&self, database: &str) -> Result<Vec<SchemaInfo>, ConnectError> {
        let query = r#"
            SELECT name
            FROM sys.schemas
            WHERE name NOT IN ('sys', 'guest', 'INFORMATION_SCHEMA')
            ORDER BY name
        "#;
        let rows = self
            .rows(Some(database), query, &[], CatalogStage::Schemas, database)
            .await?;

        rows.iter()
            .map(|row| text(row, 0).map(SchemaInfo::named))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectError::catalog(CatalogStage::Schemas, database, e))
    }

    async fn list_tables(&self, params: &QueryParams) -> Result<Vec<TableInfo>, ConnectError> {
        let query = r#"
            SELECT t.name, CAST(ISNULL(ep.value, '') AS NVARCHAR(MAX))
            FROM sys.tables t
            LEFT JOIN sys.extended_properties ep
              ON ep.major_id = t.object_id AND ep.minor_id = 0 AND ep.name = 'MS_Description'
            WHERE t.schema_id = SCHEMA_ID(@P1)
            ORDER BY t.name
        "#;
        let target = params.target();
        let schema = Self::schema_of(params);
        let rows = self
            .rows(
                Some(&params.database),
                query,
                &[&schema],
                CatalogStage::Tables,
                &target,
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(TableInfo {
                    name: text(row, 0)?,
                    comment: text(row, 1)?,
                    fields: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, tiberius::error::Error>>()
            .map_err(|e| ConnectError::catalog(CatalogStage::Tables, target, e))
    }

    async fn list_views(&self, params: &QueryParams) -> Result<Vec<ViewInfo>, ConnectError> {
        let query = r#"
            SELECT v.name, ISNULL(m.definition, '')
            FROM sys.views v
            JOIN sys.sql_modules m ON m.object_id = v.object_id
            WHERE v.schema_id = SCHEMA_ID(@P1)
            ORDER BY v.name
        "#;
        let target = params.target();
        let schema = Self::schema_of(params);
        let rows = self
            .rows(
                Some(&params.database),
                query,
                &[&schema],
                CatalogStage::Views,
                &target,
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ViewInfo {
                    name: text(row, 0)?,
                    definition: text(row, 1)?,
                })
            })
            .collect::<Result<Vec<_>, tiberius::error::Error>>()
            .map_err(|e| ConnectError::catalog(CatalogStage::Views, target, e))
    }

    async fn list_fields(&self, params: &QueryParams) -> Result<Vec<FieldInfo>, ConnectError> {
        let query = r#"
            SELECT
                c.name,
                ty.name,
                c.is_nullable,
                CAST(ISNULL(ep.value, '') AS NVARCHAR(MAX)),
                OBJECT_DEFINITION(c.default_object_id),
                CASE
                    WHEN EXISTS (
                        SELECT 1 FROM sys.index_columns ic
                        JOIN sys.indexes i ON i.object_id = ic.object_id AND i.index_id = ic.index_id
                        WHERE ic.object_id = c.object_id AND ic.column_id = c.column_id
                          AND i.is_primary_key = 1) THEN 'PRI'
                    WHEN EXISTS (
                        SELECT 1 FROM sys.foreign_key_columns fk
                        WHERE fk.parent_object_id = c.object_id
                          AND fk.parent_column_id = c.column_id) THEN 'FOR'
                    WHEN EXISTS (
                        SELECT 1 FROM sys.index_columns ic
                        JOIN sys.indexes i ON i.object_id = ic.object_id AND i.index_id = ic.index_id
                        WHERE ic.object_id = c.object_id AND ic.column_id = c.column_id
                          AND i.is_unique = 1) THEN 'UNI'
                    WHEN EXISTS (
                        SELECT 1 FROM sys.index_columns ic
                        WHERE ic.object_id = c.object_id AND ic.column_id = c.column_id) THEN 'IDX'
                    ELSE ''
                END
            FROM sys.columns c
            JOIN sys.types ty ON ty.user_type_id = c.user_type_id
            LEFT JOIN sys.extended_properties ep
              ON ep.major_id = c.object_id AND ep.minor_id = c.column_id AND ep.name = 'MS_Description'
            WHERE c.object_id = OBJECT_ID(QUOTENAME(@P1) + '.' + QUOTENAME(@P2))
            ORDER BY c.column_id
        "#;
        let target = params.target();
        let schema = Self::schema_of(params);
        let table = params.table_name();
        let rows = self
            .rows(
                Some(&params.database),
                query,
                &[&schema, &table],
                CatalogStage::Fields,
                &target,
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(FieldInfo {
                    name: text(row, 0)?,
                    field_type: text(row, 1)?,
                    nullable: row.try_get::<bool, _>(2)?.unwrap_or(true),
                    comment: text(row, 3)?,
                    default_value: row.try_get::<&str, _>(4)?.map(str::to_string),
                    key: KeyKind::from_code(&text(row, 5)?),
                })
            })
            .collect::<Result<Vec<_>, tiberius::error::Error>>()
            .map_err(|e| ConnectError::catalog(CatalogStage::Fields, target, e))
    }

    /// Test connection by querying SQL Server version
    async fn test_connection(&self) -> Result<(), ConnectError> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or(ConnectError::Closed(EngineType::SqlServer))?;
        let row = client
            .simple_query("SELECT @@VERSION")
            .await
            .map_err(ConnectError::connection)?
            .into_row()
            .await
            .map_err(ConnectError::connection)?
            .ok_or_else(|| ConnectError::ConnectionFailed("No version returned".to_string()))?;

        let version = text(&row, 0).unwrap_or_else(|_| "Unknown".to_string());
        log::debug!("[SQLServer] {}", version.lines().next().unwrap_or_default());
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectError> {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await.map_err(|e| ConnectError::Close {
                credential_id: self.credential.id,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}
