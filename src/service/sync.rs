// ABOUTME: Targeted re-sync of a table, schema or database from its live server
// ABOUTME: Each call re-fetches the owning database, persists raw rows, then refreshes overlay structure

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::{fetch, reconcile, EntityKind, MetadataService, ServiceError};
use crate::connect::{CatalogStage, ConnectError, Connector, DatabaseInfo};
use crate::db::{DatabaseContext, OrphanCounts};

/// Stages of one sync call; a failure aborts with the stage it happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    ResolvingLineage,
    ObtainingConnector,
    Fetching,
    PersistingRaw,
    ReconcilingOverlay,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStage::ResolvingLineage => "resolving lineage",
            SyncStage::ObtainingConnector => "obtaining connector",
            SyncStage::Fetching => "fetching",
            SyncStage::PersistingRaw => "persisting raw metadata",
            SyncStage::ReconcilingOverlay => "reconciling overlay",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub credential_id: i64,
    pub database_id: i64,
    pub database_name: String,
    pub overlay_rows: usize,
    pub orphans: OrphanCounts,
}

fn at<E: Into<ServiceError>>(stage: SyncStage) -> impl FnOnce(E) -> ServiceError {
    move |e| ServiceError::Sync {
        stage,
        source: Box::new(e.into()),
    }
}

impl<'a> MetadataService<'a> {
    pub async fn sync_table(&self, table_id: i64) -> Result<SyncReport, ServiceError> {
        log::debug!("[Sync] table {}: {}", table_id, SyncStage::ResolvingLineage);
        let context = self
            .store
            .raw()
            .resolve_table_context(table_id)
            .map_err(at(SyncStage::ResolvingLineage))?
            .ok_or(ServiceError::ContextResolution {
                kind: EntityKind::Table,
                id: table_id,
            })?;

        self.sync_owning_database(DatabaseContext {
            credential_id: context.credential_id,
            database_id: context.database_id,
            database_name: context.database_name,
        })
        .await
    }

    pub async fn sync_schema(&self, schema_id: i64) -> Result<SyncReport, ServiceError> {
        log::debug!("[Sync] schema {}: {}", schema_id, SyncStage::ResolvingLineage);
        let context = self
            .store
            .raw()
            .resolve_schema_context(schema_id)
            .map_err(at(SyncStage::ResolvingLineage))?
            .ok_or(ServiceError::ContextResolution {
                kind: EntityKind::Schema,
                id: schema_id,
            })?;

        self.sync_owning_database(DatabaseContext {
            credential_id: context.credential_id,
            database_id: context.database_id,
            database_name: context.database_name,
        })
        .await
    }

    pub async fn sync_database(&self, database_id: i64) -> Result<SyncReport, ServiceError> {
        log::debug!("[Sync] database {}: {}", database_id, SyncStage::ResolvingLineage);
        let context = self
            .store
            .raw()
            .resolve_database_context(database_id)
            .map_err(at(SyncStage::ResolvingLineage))?
            .ok_or(ServiceError::ContextResolution {
                kind: EntityKind::Database,
                id: database_id,
            })?;

        self.sync_owning_database(context).await
    }

    async fn sync_owning_database(
        &self,
        context: DatabaseContext,
    ) -> Result<SyncReport, ServiceError> {
        let credential_id = context.credential_id;
        let name = context.database_name;

        log::debug!("[Sync] {}: {}", name, SyncStage::ObtainingConnector);
        let connector = self
            .connector_for(credential_id)
            .await
            .map_err(at(SyncStage::ObtainingConnector))?;

        log::debug!("[Sync] {}: {}", name, SyncStage::Fetching);
        let database = fetch_database(connector.as_ref(), &name)
            .await
            .map_err(at(SyncStage::Fetching))?;

        log::debug!("[Sync] {}: {}", name, SyncStage::PersistingRaw);
        let database_id = self
            .store
            .raw()
            .save_database(credential_id, &database)
            .map_err(at(SyncStage::PersistingRaw))?;

        log::debug!("[Sync] {}: {}", name, SyncStage::ReconcilingOverlay);
        let overlay_rows = self
            .reconcile_structure(credential_id)
            .map_err(at(SyncStage::ReconcilingOverlay))?;
        let orphans = self
            .store
            .overlay()
            .orphan_counts(credential_id)
            .map_err(at(SyncStage::ReconcilingOverlay))?;

        log::info!(
            "[Sync] {} synced for credential {}: {} overlay rows, {} orphaned annotations",
            name,
            credential_id,
            overlay_rows,
            orphans.total()
        );
        Ok(SyncReport {
            credential_id,
            database_id,
            database_name: name,
            overlay_rows,
            orphans,
        })
    }

    /// Pooled connector if present; otherwise load the credential and build one
    async fn connector_for(&self, credential_id: i64) -> Result<Arc<dyn Connector>, ServiceError> {
        if let Some(connector) = self.pool.get(credential_id).await {
            return Ok(connector);
        }
        let credential = self.credential(credential_id)?;
        Ok(self.pool.get_or_create(&credential).await?)
    }

    /// Re-save the structural overlay of everything known under the credential
    fn reconcile_structure(&self, credential_id: i64) -> Result<usize, ServiceError> {
        let raw = self.store.raw();
        let snapshot = raw.get_by_credential(credential_id)?;
        let mut tree = reconcile::convert(credential_id, &snapshot);
        let index = reconcile::RawIndex::load(&raw, credential_id)?;
        reconcile::assign_raw_ids(&mut tree, &index);
        Ok(self
            .store
            .overlay()
            .sync_structure(credential_id, &tree.dbs)?)
    }
}

async fn fetch_database(
    connector: &dyn Connector,
    name: &str,
) -> Result<DatabaseInfo, ConnectError> {
    let seed = connector
        .list_databases()
        .await?
        .into_iter()
        .find(|db| db.name == name)
        .ok_or_else(|| {
            ConnectError::catalog(CatalogStage::Databases, name, "database no longer exists")
        })?;
    fetch::fetch_raw_database(connector, seed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::{ConnectionPool, SchemaInfo, TableInfo};
    use crate::db::MetadataStore;
    use crate::models::MetadataTree;
    use crate::testing::{credential, field, table, FakeCatalog, RecordingFactory};

    struct Fixture {
        store: MetadataStore,
        pool: ConnectionPool,
        factory: Arc<RecordingFactory>,
        credential_id: i64,
    }

    impl Fixture {
        fn new() -> Self {
            let catalog = FakeCatalog {
                databases: vec![DatabaseInfo {
                    name: "shop".to_string(),
                    comment: "storefront".to_string(),
                    tables: vec![
                        table("customers", &["id", "name", "email"]),
                        table("orders", &["id", "total"]),
                    ],
                    ..Default::default()
                }],
                fail_at: None,
            };
            let store = MetadataStore::open_in_memory().unwrap();
            let credential_id = store
                .credentials()
                .insert(&credential(0, "mysql"))
                .unwrap()
                .id;
            let factory = Arc::new(RecordingFactory::new(catalog));
            let pool = ConnectionPool::new(factory.clone());
            Self {
                store,
                pool,
                factory,
                credential_id,
            }
        }

        fn service(&self) -> MetadataService<'_> {
            MetadataService::new(&self.store, &self.pool)
        }

        async fn load(&self) -> MetadataTree {
            self.service().get_metadata(self.credential_id).await.unwrap()
        }

        fn customers(&self) -> TableInfo {
            table("customers", &["id", "name", "email"])
        }
    }

    fn table_id(tree: &MetadataTree, name: &str) -> i64 {
        tree.dbs[0]
            .tables
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_read_fetches_once() {
        let fixture = Fixture::new();
        let tree = fixture.load().await;
        assert_eq!(tree.dbs.len(), 1);
        assert_eq!(tree.dbs[0].tables.len(), 2);
        assert!(tree.dbs[0].id > 0);
        assert!(tree.dbs[0].tables.iter().all(|t| t.id > 0));

        fixture.load().await;
        assert_eq!(fixture.factory.total_created(), 1);
    }

    #[tokio::test]
    async fn test_pooled_connector_skips_credential_lookup() {
        let fixture = Fixture::new();
        let tree = fixture.load().await;
        fixture
            .store
            .credentials()
            .delete(fixture.credential_id)
            .unwrap();

        let report = fixture.service().sync_database(tree.dbs[0].id).await.unwrap();
        assert_eq!(report.database_name, "shop");
        assert_eq!(fixture.factory.total_created(), 1);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_obtaining_connector() {
        let fixture = Fixture::new();
        let tree = fixture.load().await;
        fixture.pool.close_all().await.unwrap();
        fixture
            .store
            .credentials()
            .delete(fixture.credential_id)
            .unwrap();

        match fixture.service().sync_database(tree.dbs[0].id).await {
            Err(ServiceError::Sync { stage, source }) => {
                assert_eq!(stage, SyncStage::ObtainingConnector);
                assert!(matches!(*source, ServiceError::CredentialNotFound(_)));
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.database_name)),
        }
    }

    #[tokio::test]
    async fn test_unknown_table_fails_context_resolution() {
        let fixture = Fixture::new();
        fixture.load().await;

        assert!(matches!(
            fixture.service().sync_table(9999).await,
            Err(ServiceError::ContextResolution {
                kind: EntityKind::Table,
                id: 9999
            })
        ));
    }

    #[tokio::test]
    async fn test_remark_survives_resync() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let tree = fixture.load().await;
        let customers = table_id(&tree, "customers");
        service.update_table_remark(customers, "billing contacts").unwrap();

        fixture.factory.update_catalog(|catalog| {
            let shop = &mut catalog.databases[0];
            shop.tables[0].comment = "customer master".to_string();
            shop.tables[0].fields.push(field("phone", "varchar(32)"));
        });
        service.sync_table(customers).await.unwrap();

        assert_eq!(
            service.table_annotations(customers).unwrap().remark,
            "billing contacts"
        );
        let raw = fixture.store.raw().table(customers).unwrap().unwrap();
        assert_eq!(raw.comment, "customer master");
        let names: Vec<String> = service
            .fields_for_table(customers)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["id", "name", "email", "phone"]);

        let reread = fixture.load().await;
        let merged = reread.dbs[0]
            .tables
            .iter()
            .find(|t| t.name == "customers")
            .unwrap();
        assert_eq!(merged.remark, "billing contacts");
        assert_eq!(merged.comment, "customer master");
    }

    #[tokio::test]
    async fn test_dropped_column_orphan_is_hidden() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let tree = fixture.load().await;
        let customers = table_id(&tree, "customers");
        service
            .update_field_remark(customers, "email", "primary contact")
            .unwrap();

        fixture.factory.update_catalog(|catalog| {
            let mut trimmed = fixture.customers();
            trimmed.fields.retain(|f| f.name != "email");
            catalog.databases[0].tables[0] = trimmed;
        });
        let report = service.sync_table(customers).await.unwrap();
        assert_eq!(report.orphans.fields, 1);

        let fields = service.fields_for_table(customers).unwrap();
        assert!(fields.iter().all(|f| f.name != "email"));
        assert_eq!(fields.len(), 2);
        assert!(service
            .table_annotations(customers)
            .unwrap()
            .field_remarks
            .is_empty());
    }

    #[tokio::test]
    async fn test_sort_order_drives_scoped_fields() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let tree = fixture.load().await;
        let customers = table_id(&tree, "customers");
        let ids: Vec<i64> = service
            .fields_for_table(customers)
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        let reordered = vec![ids[2], ids[0], ids[1]];

        service.update_fields_sort(customers, &reordered).unwrap();
        service.sync_table(customers).await.unwrap();

        let after: Vec<i64> = service
            .fields_for_table(customers)
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(after, reordered);

        let tree = fixture.load().await;
        let names: Vec<&str> = tree.dbs[0].tables[0]
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["email", "id", "name"]);
    }

    #[tokio::test]
    async fn test_partial_sort_after_sync_keeps_rest_last() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let tree = fixture.load().await;
        let customers = table_id(&tree, "customers");
        let ids: Vec<i64> = service
            .fields_for_table(customers)
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();

        service.sync_table(customers).await.unwrap();
        service
            .update_fields_sort(customers, &[ids[2], ids[0]])
            .unwrap();

        let scoped: Vec<String> = service
            .fields_for_table(customers)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(scoped, vec!["email", "id", "name"]);

        let tree = fixture.load().await;
        let merged: Vec<&str> = tree.dbs[0]
            .tables
            .iter()
            .find(|t| t.name == "customers")
            .unwrap()
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(merged, vec!["email", "id", "name"]);
    }

    #[tokio::test]
    async fn test_schema_sync_refreshes_schema_tables() {
        let catalog = FakeCatalog {
            databases: vec![DatabaseInfo {
                name: "warehouse".to_string(),
                schemas: vec![
                    SchemaInfo {
                        name: "sales".to_string(),
                        tables: vec![table("orders", &["id", "total"])],
                        views: vec![],
                    },
                    SchemaInfo {
                        name: "hr".to_string(),
                        tables: vec![table("staff", &["id"])],
                        views: vec![],
                    },
                ],
                ..Default::default()
            }],
            fail_at: None,
        };
        let store = MetadataStore::open_in_memory().unwrap();
        let saved = store
            .credentials()
            .insert(&credential(0, "postgresql"))
            .unwrap();
        let factory = Arc::new(RecordingFactory::new(catalog));
        let pool = ConnectionPool::new(factory.clone());
        let service = MetadataService::new(&store, &pool);

        let tree = service.get_metadata(saved.id).await.unwrap();
        let database_id = tree.dbs[0].id;
        let sales = tree.dbs[0]
            .schemas
            .iter()
            .find(|s| s.name == "sales")
            .map(|s| s.id)
            .unwrap();

        factory.update_catalog(|catalog| {
            catalog.databases[0].schemas[0]
                .tables
                .push(table("refunds", &["id", "amount"]));
        });
        let report = service.sync_schema(sales).await.unwrap();
        assert_eq!(report.database_id, database_id);
        assert_eq!(report.database_name, "warehouse");
        assert_eq!(factory.total_created(), 1);

        let names: Vec<String> = service
            .tables_for_database(database_id, Some(sales))
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["orders", "refunds"]);
        let refunds = service
            .tables_for_database(database_id, Some(sales))
            .unwrap()
            .into_iter()
            .find(|t| t.name == "refunds")
            .unwrap();
        assert_eq!(service.fields_for_table(refunds.id).unwrap().len(), 2);

        assert!(matches!(
            service.sync_schema(9999).await,
            Err(ServiceError::ContextResolution {
                kind: EntityKind::Schema,
                id: 9999
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_snapshot_intact() {
        let fixture = Fixture::new();
        let service = fixture.service();
        let tree = fixture.load().await;
        let orders = table_id(&tree, "orders");

        fixture.factory.update_catalog(|catalog| {
            catalog.databases[0].tables.pop();
            catalog.fail_at = Some(CatalogStage::Fields);
        });
        match service.sync_table(orders).await {
            Err(ServiceError::Sync { stage, .. }) => assert_eq!(stage, SyncStage::Fetching),
            other => panic!("unexpected result: {:?}", other.map(|r| r.database_name)),
        }
        assert!(fixture.store.raw().table(orders).unwrap().is_some());
        assert_eq!(service.fields_for_table(orders).unwrap().len(), 2);
    }
}
