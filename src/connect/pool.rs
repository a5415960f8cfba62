// ABOUTME: Keyed cache of live connectors, one per persisted credential
// ABOUTME: Lazily creates through a factory and centralizes teardown

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ConnectError, Connector, ConnectorFactory, Credential};

pub struct ConnectionPool {
    connectors: Mutex<HashMap<i64, Arc<dyn Connector>>>,
    factory: Arc<dyn ConnectorFactory>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectorFactory>) -> Self {
        Self {
            connectors: Mutex::new(HashMap::new()),
            factory,
        }
    }

    /// Pure lookup; never creates
    pub async fn get(&self, credential_id: i64) -> Option<Arc<dyn Connector>> {
        self.connectors.lock().await.get(&credential_id).cloned()
    }

    /// Return the pooled connector or build one.
    ///
    /// The engine tag is validated before the pool is touched. Credentials with
    /// a non-positive id get an ephemeral connector that is never pooled.
    pub async fn get_or_create(
        &self,
        credential: &Credential,
    ) -> Result<Arc<dyn Connector>, ConnectError> {
        let engine = match credential.engine_type() {
            Ok(engine) => engine,
            Err(e) => {
                log::warn!("[ConnectionPool] {}", e);
                return Err(e);
            }
        };

        if !credential.is_poolable() {
            log::info!(
                "[ConnectionPool] ephemeral {} connection for {}",
                engine,
                credential.host
            );
            return self.factory.create(engine, credential).await;
        }

        // Held across creation so concurrent callers never build duplicates
        let mut connectors = self.connectors.lock().await;
        if let Some(connector) = connectors.get(&credential.id) {
            log::debug!("[ConnectionPool] hit connection pool for id {}", credential.id);
            return Ok(Arc::clone(connector));
        }

        let connector = self.factory.create(engine, credential).await?;
        connectors.insert(credential.id, Arc::clone(&connector));
        log::info!(
            "[ConnectionPool] new {} connection created and pooled for id {}",
            engine,
            credential.id
        );
        Ok(connector)
    }

    /// Close and drop one pooled connector; returns whether one was pooled
    pub async fn remove(&self, credential_id: i64) -> Result<bool, ConnectError> {
        let removed = self.connectors.lock().await.remove(&credential_id);
        match removed {
            Some(connector) => {
                connector.close().await?;
                log::info!("[ConnectionPool] closed connection for id {}", credential_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every pooled connector and clear the pool.
    ///
    /// Keeps going after a failure; the last failure is the one reported.
    pub async fn close_all(&self) -> Result<(), ConnectError> {
        let drained: Vec<(i64, Arc<dyn Connector>)> =
            self.connectors.lock().await.drain().collect();

        let mut last_error = None;
        for (id, connector) in drained {
            if let Err(e) = connector.close().await {
                log::warn!("[ConnectionPool] failed to close connection {}: {}", id, e);
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn len(&self) -> usize {
        self.connectors.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::EngineType;
    use crate::testing::{credential, FakeCatalog, RecordingFactory};

    #[tokio::test]
    async fn test_dispatches_by_engine_tag() {
        let factory = Arc::new(RecordingFactory::new(FakeCatalog::default()));
        let pool = ConnectionPool::new(factory.clone());

        let connector = pool.get_or_create(&credential(5, "postgresql")).await.unwrap();
        assert_eq!(connector.engine(), EngineType::Postgres);
        assert_eq!(factory.created(EngineType::Postgres), 1);
        for engine in [EngineType::MySql, EngineType::MariaDb, EngineType::Oracle, EngineType::SqlServer] {
            assert_eq!(factory.created(engine), 0);
        }
    }

    #[tokio::test]
    async fn test_reuses_pooled_connector() {
        let factory = Arc::new(RecordingFactory::new(FakeCatalog::default()));
        let pool = ConnectionPool::new(factory.clone());

        assert!(pool.get(7).await.is_none());
        let first = pool.get_or_create(&credential(7, "mysql")).await.unwrap();
        let second = pool.get_or_create(&credential(7, "mysql")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.total_created(), 1);
        assert!(pool.get(7).await.is_some());
    }

    #[tokio::test]
    async fn test_unsupported_engine_never_touches_pool() {
        let factory = Arc::new(RecordingFactory::new(FakeCatalog::default()));
        let pool = ConnectionPool::new(factory.clone());

        match pool.get_or_create(&credential(7, "db2")).await {
            Err(ConnectError::UnsupportedEngine {
                engine,
                credential_id,
            }) => {
                assert_eq!(engine, "db2");
                assert_eq!(credential_id, 7);
            }
            other => panic!("unexpected result: {:?}", other.map(|c| c.engine())),
        }
        assert_eq!(factory.total_created(), 0);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_id_is_ephemeral() {
        let factory = Arc::new(RecordingFactory::new(FakeCatalog::default()));
        let pool = ConnectionPool::new(factory.clone());

        pool.get_or_create(&credential(0, "oracle")).await.unwrap();
        pool.get_or_create(&credential(0, "oracle")).await.unwrap();
        assert_eq!(factory.created(EngineType::Oracle), 2);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_all_continues_after_failure() {
        let factory = Arc::new(RecordingFactory::new(FakeCatalog::default()));
        factory.fail_close_for(1);
        let pool = ConnectionPool::new(factory.clone());

        pool.get_or_create(&credential(1, "mysql")).await.unwrap();
        pool.get_or_create(&credential(2, "sqlserver")).await.unwrap();
        pool.get_or_create(&credential(3, "postgresql")).await.unwrap();

        assert!(matches!(
            pool.close_all().await,
            Err(ConnectError::Close { credential_id: 1, .. })
        ));
        assert!(pool.is_empty().await);
        assert_eq!(factory.closed(), 3);
    }
}
