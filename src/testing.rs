// ABOUTME: In-memory connector and recording factory for exercising the pool and sync paths
// ABOUTME: The catalog is shared so tests can change the "live" schema between calls

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::connect::{
    CatalogStage, ConnectError, Connector, ConnectorFactory, Credential, DatabaseInfo, EngineType,
    FieldInfo, QueryParams, SchemaInfo, TableInfo, ViewInfo,
};

#[derive(Debug, Clone, Default)]
pub struct FakeCatalog {
    pub databases: Vec<DatabaseInfo>,
    pub fail_at: Option<CatalogStage>,
}

pub struct FakeConnector {
    engine: EngineType,
    credential: Credential,
    catalog: Arc<Mutex<FakeCatalog>>,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
}

impl FakeConnector {
    fn snapshot(&self, stage: CatalogStage, target: &str) -> Result<FakeCatalog, ConnectError> {
        let catalog = self.catalog.lock().unwrap().clone();
        if catalog.fail_at == Some(stage) {
            return Err(ConnectError::catalog(stage, target, "injected failure"));
        }
        Ok(catalog)
    }

    fn scope(
        &self,
        stage: CatalogStage,
        params: &QueryParams,
    ) -> Result<(Vec<TableInfo>, Vec<ViewInfo>), ConnectError> {
        let catalog = self.snapshot(stage, &params.target())?;
        let Some(database) = catalog
            .databases
            .into_iter()
            .find(|db| db.name == params.database)
        else {
            return Ok((Vec::new(), Vec::new()));
        };
        match &params.schema {
            Some(name) => Ok(database
                .schemas
                .into_iter()
                .find(|s| &s.name == name)
                .map(|s| (s.tables, s.views))
                .unwrap_or_default()),
            None => Ok((database.tables, database.views)),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn engine(&self) -> EngineType {
        self.engine
    }

    fn credential(&self) -> &Credential {
        &self.credential
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, ConnectError> {
        let catalog = self.snapshot(CatalogStage::Databases, &self.credential.host)?;
        Ok(catalog
            .databases
            .into_iter()
            .map(|db| DatabaseInfo {
                name: db.name,
                comment: db.comment,
                ..Default::default()
            })
            .collect())
    }

    async fn list_schemas(&self, database: &str) -> Result<Vec<SchemaInfo>, ConnectError> {
        let catalog = self.snapshot(CatalogStage::Schemas, database)?;
        if !self.engine.has_schemas() {
            return Ok(Vec::new());
        }
        Ok(catalog
            .databases
            .into_iter()
            .filter(|db| db.name == database)
            .flat_map(|db| db.schemas)
            .map(|s| SchemaInfo::named(s.name))
            .collect())
    }

    async fn list_tables(&self, params: &QueryParams) -> Result<Vec<TableInfo>, ConnectError> {
        let (tables, _) = self.scope(CatalogStage::Tables, params)?;
        Ok(tables
            .into_iter()
            .map(|t| TableInfo {
                fields: Vec::new(),
                ..t
            })
            .collect())
    }

    async fn list_views(&self, params: &QueryParams) -> Result<Vec<ViewInfo>, ConnectError> {
        let (_, views) = self.scope(CatalogStage::Views, params)?;
        Ok(views)
    }

    async fn list_fields(&self, params: &QueryParams) -> Result<Vec<FieldInfo>, ConnectError> {
        let (tables, _) = self.scope(CatalogStage::Fields, params)?;
        Ok(tables
            .into_iter()
            .find(|t| t.name == params.table_name())
            .map(|t| t.fields)
            .unwrap_or_default())
    }

    async fn test_connection(&self) -> Result<(), ConnectError> {
        self.snapshot(CatalogStage::Databases, &self.credential.host)
            .map(|_| ())
    }

    async fn close(&self) -> Result<(), ConnectError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(ConnectError::Close {
                credential_id: self.credential.id,
                message: "injected close failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Hands out [`FakeConnector`]s and counts what it built and closed
pub struct RecordingFactory {
    catalog: Arc<Mutex<FakeCatalog>>,
    created: Mutex<HashMap<EngineType, usize>>,
    closes: Arc<AtomicUsize>,
    fail_close: Mutex<Vec<i64>>,
}

impl RecordingFactory {
    pub fn new(catalog: FakeCatalog) -> Self {
        Self {
            catalog: Arc::new(Mutex::new(catalog)),
            created: Mutex::new(HashMap::new()),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_close: Mutex::new(Vec::new()),
        }
    }

    pub fn set_catalog(&self, catalog: FakeCatalog) {
        *self.catalog.lock().unwrap() = catalog;
    }

    pub fn update_catalog(&self, f: impl FnOnce(&mut FakeCatalog)) {
        let mut catalog = self.catalog.lock().unwrap();
        f(&mut *catalog);
    }

    pub fn created(&self, engine: EngineType) -> usize {
        self.created
            .lock()
            .unwrap()
            .get(&engine)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_created(&self) -> usize {
        self.created.lock().unwrap().values().sum()
    }

    pub fn fail_close_for(&self, credential_id: i64) {
        self.fail_close.lock().unwrap().push(credential_id);
    }

    pub fn closed(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectorFactory for RecordingFactory {
    async fn create(
        &self,
        engine: EngineType,
        credential: &Credential,
    ) -> Result<Arc<dyn Connector>, ConnectError> {
        *self.created.lock().unwrap().entry(engine).or_insert(0) += 1;
        let fail_close = self.fail_close.lock().unwrap().contains(&credential.id);
        Ok(Arc::new(FakeConnector {
            engine,
            credential: credential.clone(),
            catalog: Arc::clone(&self.catalog),
            closes: Arc::clone(&self.closes),
            fail_close,
        }))
    }
}

pub fn credential(id: i64, engine: &str) -> Credential {
    Credential {
        id,
        engine: engine.to_string(),
        label: format!("{} #{}", engine, id),
        username: "app".to_string(),
        password: "secret".to_string(),
        host: "localhost".to_string(),
        port: 0,
        database: "shop".to_string(),
        ..Default::default()
    }
}

pub fn field(name: &str, field_type: &str) -> FieldInfo {
    FieldInfo {
        name: name.to_string(),
        field_type: field_type.to_string(),
        nullable: true,
        ..Default::default()
    }
}

pub fn table(name: &str, fields: &[&str]) -> TableInfo {
    TableInfo {
        name: name.to_string(),
        comment: String::new(),
        fields: fields.iter().map(|f| field(f, "varchar(64)")).collect(),
    }
}
