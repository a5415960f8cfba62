// ABOUTME: MariaDB connector; speaks the MySQL protocol but verifies the server build
// ABOUTME: Construction fails when the reported version is not a MariaDB build

use async_trait::async_trait;

use super::mysql::{open_pool, ping, MySqlCatalog};
use super::{
    ConnectError, ConnectOptions, Connector, Credential, DatabaseInfo, EngineType, FieldInfo,
    QueryParams, SchemaInfo, TableInfo, ViewInfo,
};

/// Only version strings that begin with `MariaDB` identify a MariaDB build
pub fn is_mariadb_version(version: &str) -> bool {
    version.starts_with("MariaDB")
}

pub struct MariaDbConnector {
    credential: Credential,
    catalog: MySqlCatalog,
    version: String,
}

impl MariaDbConnector {
    /// Open, ping, then reject plain MySQL servers
    pub async fn connect(
        credential: &Credential,
        options: &ConnectOptions,
    ) -> Result<Self, ConnectError> {
        let pool = open_pool(credential, options).await?;

        let version = sqlx::query_scalar::<_, String>("SELECT CAST(VERSION() AS CHAR)")
            .fetch_one(&pool)
            .await
            .map_err(ConnectError::connection)?;

        if !is_mariadb_version(&version) {
            pool.close().await;
            return Err(ConnectError::NotMariaDb(version));
        }
        log::debug!("[MariaDB] connected to server version {}", version);

        Ok(Self {
            credential: credential.clone(),
            catalog: MySqlCatalog::new(pool),
            version,
        })
    }

    pub fn server_version(&self) -> &str {
        &self.version
    }
}

#[async_trait]
impl Connector for MariaDbConnector {
    fn engine(&self) -> EngineType {
        EngineType::MariaDb
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
