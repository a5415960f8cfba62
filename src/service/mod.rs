// ABOUTME: Reconciliation engine over the raw store, the overlay store and the connection pool
// ABOUTME: Full and scoped reads, annotation writes, credential lifecycle and connectivity tests

pub mod fetch;
pub mod reconcile;
pub mod sync;
pub mod view_sql;

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::connect::{ConnectError, ConnectionPool, Credential};
use crate::db::raw::{RawTable, RawView};
use crate::db::{MetadataStore, OrphanCounts, OverlayWrite, StoreError};
use crate::models::{Display, FieldVo, MetadataTree, TableAnnotations, TableVo, ViewVo};

pub use sync::{SyncReport, SyncStage};
pub use view_sql::parse_view_sql;

/// Identity kinds that targeted operations resolve through raw lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Database,
    Schema,
    Table,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Database => "database",
            EntityKind::Schema => "schema",
            EntityKind::Table => "table",
        })
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("context resolution failed: no raw lineage for {kind} {id}")]
    ContextResolution { kind: EntityKind, id: i64 },
    #[error("credential {0} not found")]
    CredentialNotFound(i64),
    #[error("View SQL error: {0}")]
    ViewSql(String),
    #[error("Sync failed while {stage}: {source}")]
    Sync {
        stage: SyncStage,
        source: Box<ServiceError>,
    },
}

impl ServiceError {
    /// The innermost error, looking through sync-stage wrapping
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::Sync { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Borrowed view over one project's store and pool
pub struct MetadataService<'a> {
    store: &'a MetadataStore,
    pool: &'a ConnectionPool,
}

impl<'a> MetadataService<'a> {
    pub fn new(store: &'a MetadataStore, pool: &'a ConnectionPool) -> Self {
        Self { store, pool }
    }

    // ===== Full read =====

    /// The reconciled tree for a credential.
    ///
    /// Fetches and persists a full raw snapshot first when none is stored.
    pub async fn get_metadata_for_credential(
        &self,
        credential: &Credential,
    ) -> Result<MetadataTree, ServiceError> {
        let raw = self.store.raw();
        let mut snapshot = raw.get_by_credential(credential.id)?;

        if snapshot.is_empty() {
            log::info!(
                "[MetadataService] no raw snapshot for credential {}, fetching from {}",
                credential.id,
                credential.host
            );
            let connector = self.pool.get_or_create(credential).await?;
            let fetched = fetch::fetch_raw_databases(connector.as_ref()).await?;
            raw.save_databases(credential.id, &fetched)?;
            snapshot = raw.get_by_credential(credential.id)?;
        }

        let mut tree = reconcile::convert(credential.id, &snapshot);
        let index = reconcile::RawIndex::load(&raw, credential.id)?;
        reconcile::assign_raw_ids(&mut tree, &index);

        let overlay = self.store.overlay();
        let databases = overlay.databases_by_credential(credential.id)?;
        let display = overlay.get_display(credential.id)?;
        reconcile::merge_overlay(&mut tree, &databases, display);
        Ok(tree)
    }

    /// [`Self::get_metadata_for_credential`] for a stored credential id
    pub async fn get_metadata(&self, credential_id: i64) -> Result<MetadataTree, ServiceError> {
        let credential = self.credential(credential_id)?;
        self.get_metadata_for_credential(&credential).await
    }

    // ===== Scoped reads =====

    pub fn fields_for_table(&self, table_id: i64) -> Result<Vec<FieldVo>, ServiceError> {
        let overlay = self.store.overlay().fields_by_table(table_id)?;
        let raw = self.store.raw().fields(table_id)?;
        Ok(reconcile::merge_scoped_fields(overlay, &raw))
    }

    /// Tables of a database in raw order with their overlay annotations.
    ///
    /// Without a schema id every table of the database is returned. Fields are
    /// not loaded; use [`Self::fields_for_table`].
    pub fn tables_for_database(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<TableVo>, ServiceError> {
        let raw = self.store.raw();
        let mut raw_tables = Vec::new();
        for scope in self.scopes(database_id, schema_id)? {
            raw_tables.extend(raw.tables(database_id, scope)?);
        }

        let overlay: HashMap<i64, TableVo> = self
            .store
            .overlay()
            .tables_by_database(database_id, schema_id)?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        Ok(raw_tables
            .into_iter()
            .map(|table| {
                let annotated = overlay.get(&table.id);
                merge_raw_table(table, annotated)
            })
            .collect())
    }

    pub fn views_for_database(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<ViewVo>, ServiceError> {
        let raw = self.store.raw();
        let mut raw_views = Vec::new();
        for scope in self.scopes(database_id, schema_id)? {
            raw_views.extend(raw.views(database_id, scope)?);
        }

        let overlay: HashMap<i64, ViewVo> = self
            .store
            .overlay()
            .views_by_database(database_id, schema_id)?
            .into_iter()
            .map(|v| (v.id, v))
            .collect();

        let mut views: Vec<ViewVo> = raw_views
            .into_iter()
            .map(|view| {
                let annotated = overlay.get(&view.id);
                merge_raw_view(view, annotated)
            })
            .collect();
        views.sort_by_key(|v| v.sort);
        Ok(views)
    }

    /// Raw scopes to scan: one schema, or the root plus every schema
    fn scopes(
        &self,
        database_id: i64,
        schema_id: Option<i64>,
    ) -> Result<Vec<Option<i64>>, ServiceError> {
        if schema_id.is_some() {
            return Ok(vec![schema_id]);
        }
        let mut scopes = vec![None];
        scopes.extend(
            self.store
                .raw()
                .schemas(database_id)?
                .into_iter()
                .map(|s| Some(s.id)),
        );
        Ok(scopes)
    }

    // ===== Annotations =====

    pub fn update_table_remark(&self, table_id: i64, remark: &str) -> Result<(), ServiceError> {
        Ok(self.store.overlay().update_table_remark(table_id, remark)?)
    }

    pub fn update_field_remark(
        &self,
        table_id: i64,
        field_name: &str,
        remark: &str,
    ) -> Result<(), ServiceError> {
        Ok(self
            .store
            .overlay()
            .update_field_remark(table_id, field_name, remark)?)
    }

    pub fn update_fields_sort(&self, table_id: i64, field_ids: &[i64]) -> Result<(), ServiceError> {
        Ok(self.store.overlay().update_fields_sort(table_id, field_ids)?)
    }

    /// Table remark plus the non-empty remarks of its fields, keyed by field name
    pub fn table_annotations(&self, table_id: i64) -> Result<TableAnnotations, ServiceError> {
        let overlay = self.store.overlay();
        let remark = overlay.table_remark(table_id)?.unwrap_or_default();
        let field_remarks = overlay
            .fields_by_table(table_id)?
            .into_iter()
            .filter(|f| !f.remark.is_empty())
            .map(|f| (f.name, f.remark))
            .collect();
        Ok(TableAnnotations {
            remark,
            field_remarks,
        })
    }

    pub fn set_table_annotations(
        &self,
        table_id: i64,
        annotations: &TableAnnotations,
    ) -> Result<(), ServiceError> {
        let overlay = self.store.overlay();
        overlay.update_table_remark(table_id, &annotations.remark)?;
        for (name, remark) in &annotations.field_remarks {
            overlay.update_field_remark(table_id, name, remark)?;
        }
        Ok(())
    }

    pub fn clear_table_annotations(&self, table_id: i64) -> Result<(), ServiceError> {
        self.update_table_remark(table_id, "")
    }

    /// Write a table's user-authored columns and those of the fields it carries
    pub fn save_table_overlay(&self, table: &TableVo) -> Result<Option<i64>, ServiceError> {
        let overlay = self.store.overlay();
        let Some(table_id) = overlay.save_table_overlay(
            table.database_id,
            table.schema_id,
            table,
            OverlayWrite::Annotations,
        )?
        else {
            return Ok(None);
        };
        for field in &table.fields {
            overlay.save_field_overlay(table_id, field, OverlayWrite::Annotations)?;
        }
        Ok(Some(table_id))
    }

    pub fn save_view_overlay(&self, view: &ViewVo) -> Result<Option<i64>, ServiceError> {
        Ok(self.store.overlay().save_view_overlay(
            view.database_id,
            view.schema_id,
            view,
            OverlayWrite::Annotations,
        )?)
    }

    pub fn save_display(&self, credential_id: i64, display: &Display) -> Result<(), ServiceError> {
        Ok(self.store.overlay().save_display(credential_id, display)?)
    }

    pub fn orphan_counts(&self, credential_id: i64) -> Result<OrphanCounts, ServiceError> {
        Ok(self.store.overlay().orphan_counts(credential_id)?)
    }

    // ===== Credentials =====

    pub fn credential(&self, id: i64) -> Result<Credential, ServiceError> {
        self.store
            .credentials()
            .get(id)?
            .ok_or(ServiceError::CredentialNotFound(id))
    }

    pub fn list_credentials(&self) -> Result<Vec<Credential>, ServiceError> {
        Ok(self.store.credentials().list()?)
    }

    pub fn create_credential(&self, credential: &Credential) -> Result<Credential, ServiceError> {
        credential.engine_type()?;
        Ok(self.store.credentials().insert(credential)?)
    }

    /// Persist new connection parameters and drop any connector built from the old ones
    pub async fn update_credential(&self, credential: &Credential) -> Result<(), ServiceError> {
        credential.engine_type()?;
        if !self.store.credentials().update(credential)? {
            return Err(ServiceError::CredentialNotFound(credential.id));
        }
        self.evict(credential.id).await;
        Ok(())
    }

    /// Remove a credential with its overlay and raw metadata
    pub async fn delete_credential(&self, id: i64) -> Result<(), ServiceError> {
        self.store.overlay().delete_by_credential(id)?;
        let databases = self.store.raw().delete_by_credential(id)?;
        if !self.store.credentials().delete(id)? {
            return Err(ServiceError::CredentialNotFound(id));
        }
        self.evict(id).await;
        log::info!(
            "[MetadataService] deleted credential {} and {} cached databases",
            id,
            databases
        );
        Ok(())
    }

    async fn evict(&self, credential_id: i64) {
        if let Err(e) = self.pool.remove(credential_id).await {
            log::warn!(
                "[MetadataService] failed to close connection for credential {}: {}",
                credential_id,
                e
            );
        }
    }

    // ===== Connectivity =====

    /// Open (or reuse) a connector for the credential and ping it
    pub async fn test_connection(&self, credential: &Credential) -> Result<(), ServiceError> {
        let connector = self.pool.get_or_create(credential).await?;
        let result = connector.test_connection().await;
        if !credential.is_poolable() {
            if let Err(e) = connector.close().await {
                log::warn!("[MetadataService] failed to close test connection: {}", e);
            }
        }
        Ok(result?)
    }

    pub async fn close_all_connections(&self) -> Result<(), ServiceError> {
        Ok(self.pool.close_all().await?)
    }
}

fn merge_raw_table(table: RawTable, overlay: Option<&TableVo>) -> TableVo {
    let mut merged = TableVo {
        id: table.id,
        database_id: table.database_id,
        schema_id: table.schema_id,
        name: table.name,
        comment: table.comment,
        ..Default::default()
    };
    if let Some(over) = overlay {
        merged.alias = over.alias.clone();
        merged.color = over.color.clone();
        merged.remark = over.remark.clone();
    }
    merged
}

fn merge_raw_view(view: RawView, overlay: Option<&ViewVo>) -> ViewVo {
    let mut merged = ViewVo {
        id: view.id,
        database_id: view.database_id,
        schema_id: view.schema_id,
        name: view.name,
        definition: view.definition,
        ..Default::default()
    };
    if let Some(over) = overlay {
        merged.alias = over.alias.clone();
        merged.color = over.color.clone();
        merged.remark = over.remark.clone();
        merged.sort = over.sort;
    }
    merged
}
