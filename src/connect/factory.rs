// ABOUTME: Static dispatch from an engine tag to its connector constructor
// ABOUTME: Every construction is bounded by the configured connect timeout

use async_trait::async_trait;
use std::sync::Arc;

use super::mariadb::MariaDbConnector;
use super::mysql::MySqlConnector;
use super::oracle::OracleConnector;
use super::postgres::PostgresConnector;
use super::sqlserver::SqlServerConnector;
use super::{ConnectError, ConnectOptions, Connector, Credential, EngineType};

/// Builds a live connector for an already-validated engine
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn create(
        &self,
        engine: EngineType,
        credential: &Credential,
    ) -> Result<Arc<dyn Connector>, ConnectError>;
}

/// Production factory backed by the real drivers
#[derive(Debug, Clone, Default)]
pub struct EngineFactory {
    options: ConnectOptions,
}

impl EngineFactory {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }

    async fn build(
        &self,
        engine: EngineType,
        credential: &Credential,
    ) -> Result<Arc<dyn Connector>, ConnectError> {
        let options = &self.options;
        let connector: Arc<dyn Connector> = match engine {
            EngineType::MySql => Arc::new(MySqlConnector::connect(credential, options).await?),
            EngineType::MariaDb => Arc::new(MariaDbConnector::connect(credential, options).await?),
            EngineType::Postgres => {
                Arc::new(PostgresConnector::connect(credential, options).await?)
            }
            EngineType::SqlServer => {
                Arc::new(SqlServerConnector::connect(credential, options).await?)
            }
            EngineType::Oracle => Arc::new(OracleConnector::connect(credential, options).await?),
        };
        Ok(connector)
    }
}

#[async_trait]
impl ConnectorFactory for EngineFactory {
    async fn create(
        &self,
        engine: EngineType,
        credential: &Credential,
    ) -> Result<Arc<dyn Connector>, ConnectError> {
        match tokio::time::timeout(self.options.timeout, self.build(engine, credential)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout {
                engine,
                secs: self.options.timeout.as_secs(),
            }),
        }
    }
}
