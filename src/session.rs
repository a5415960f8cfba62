// ABOUTME: Project-scoped handle pairing one metadata store with one connection pool
// ABOUTME: Switching projects closes the old pool's connections before the new store takes over

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::AppConfig;
use crate::connect::{ConnectionPool, ConnectorFactory, EngineFactory};
use crate::db::{MetadataStore, StoreError};
use crate::service::MetadataService;

pub struct ProjectSession {
    dir: PathBuf,
    store: MetadataStore,
    pool: ConnectionPool,
}

impl ProjectSession {
    pub fn open(dir: &Path, config: &AppConfig) -> Result<Self, StoreError> {
        let factory = Arc::new(EngineFactory::new(config.connect_options()));
        Self::with_factory(dir, &config.store_file_name, factory)
    }

    pub fn with_factory(
        dir: &Path,
        store_file_name: &str,
        factory: Arc<dyn ConnectorFactory>,
    ) -> Result<Self, StoreError> {
        let store = MetadataStore::open(dir, store_file_name)?;
        Ok(Self {
            dir: normalize(dir),
            store,
            pool: ConnectionPool::new(factory),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn service(&self) -> MetadataService<'_> {
        MetadataService::new(&self.store, &self.pool)
    }
}

fn normalize(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

/// The currently open project, if any
pub struct SessionHolder {
    current: RwLock<Option<Arc<ProjectSession>>>,
    factory: Arc<dyn ConnectorFactory>,
    store_file_name: String,
}

impl SessionHolder {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_factory(
            Arc::new(EngineFactory::new(config.connect_options())),
            &config.store_file_name,
        )
    }

    pub fn with_factory(factory: Arc<dyn ConnectorFactory>, store_file_name: &str) -> Self {
        Self {
            current: RwLock::new(None),
            factory,
            store_file_name: store_file_name.to_string(),
        }
    }

    pub async fn current(&self) -> Option<Arc<ProjectSession>> {
        self.current.read().await.clone()
    }

    /// Open `dir` as the current project.
    ///
    /// Re-selecting the open project is a no-op. Otherwise the new store is opened
    /// first; only then are the previous session's connections closed.
    pub async fn switch_to(&self, dir: &Path) -> Result<Arc<ProjectSession>, StoreError> {
        let mut current = self.current.write().await;
        if let Some(session) = current.as_ref() {
            if session.dir == normalize(dir) {
                return Ok(Arc::clone(session));
            }
        }

        let session = Arc::new(ProjectSession::with_factory(
            dir,
            &self.store_file_name,
            Arc::clone(&self.factory),
        )?);

        if let Some(previous) = current.replace(Arc::clone(&session)) {
            if let Err(e) = previous.pool.close_all().await {
                log::warn!(
                    "[Session] error closing connections of {}: {}",
                    previous.dir.display(),
                    e
                );
            }
            log::info!("[Session] closed project {}", previous.dir.display());
        }
        log::info!("[Session] opened project {}", session.dir.display());
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{credential, FakeCatalog, RecordingFactory};

    #[tokio::test]
    async fn test_switching_projects_closes_previous_pool() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let factory = Arc::new(RecordingFactory::new(FakeCatalog::default()));
        let holder = SessionHolder::with_factory(factory.clone(), "relation.db");
        assert!(holder.current().await.is_none());

        let session = holder.switch_to(first.path()).await.unwrap();
        session
            .pool()
            .get_or_create(&credential(1, "mysql"))
            .await
            .unwrap();

        let again = holder.switch_to(first.path()).await.unwrap();
        assert!(Arc::ptr_eq(&session, &again));
        assert_eq!(factory.closed(), 0);

        let next = holder.switch_to(second.path()).await.unwrap();
        assert_eq!(factory.closed(), 1);
        assert!(session.pool().is_empty().await);
        assert_eq!(next.dir(), normalize(second.path()));
        assert!(second.path().join("relation.db").exists());
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(RecordingFactory::new(FakeCatalog::default()));

        let id = {
            let session =
                ProjectSession::with_factory(dir.path(), "relation.db", factory.clone()).unwrap();
            session
                .store()
                .credentials()
                .insert(&credential(0, "postgresql"))
                .unwrap()
                .id
        };

        let session = ProjectSession::with_factory(dir.path(), "relation.db", factory).unwrap();
        let stored = session.service().credential(id).unwrap();
        assert_eq!(stored.engine, "postgresql");
    }
}
