// ABOUTME: Walks a connector's catalog into a full raw snapshot
// ABOUTME: Schema-scoped introspection is used only for engines that have schemas

use crate::connect::{
    ConnectError, Connector, DatabaseInfo, QueryParams, SchemaInfo, TableInfo, ViewInfo,
};

async fn fetch_scope(
    connector: &dyn Connector,
    params: &QueryParams,
) -> Result<(Vec<TableInfo>, Vec<ViewInfo>), ConnectError> {
    let mut tables = connector.list_tables(params).await?;
    for table in &mut tables {
        let field_params = params.clone().with_table(table.name.clone());
        table.fields = connector.list_fields(&field_params).await?;
    }
    let views = connector.list_views(params).await?;
    Ok((tables, views))
}

/// Introspect one database's full structure, keeping the name and comment of `seed`
pub async fn fetch_raw_database(
    connector: &dyn Connector,
    seed: DatabaseInfo,
) -> Result<DatabaseInfo, ConnectError> {
    let mut database = DatabaseInfo {
        name: seed.name,
        comment: seed.comment,
        ..Default::default()
    };
    let params = QueryParams::database(database.name.clone());

    if connector.engine().has_schemas() {
        for schema in connector.list_schemas(&database.name).await? {
            let scoped = params.clone().with_schema(Some(&schema.name));
            let (tables, views) = fetch_scope(connector, &scoped).await?;
            database.schemas.push(SchemaInfo {
                name: schema.name,
                tables,
                views,
            });
        }
    } else {
        let (tables, views) = fetch_scope(connector, &params).await?;
        database.tables = tables;
        database.views = views;
    }

    log::debug!(
        "[MetadataService] fetched {}: {} schemas, {} root tables, {} root views",
        database.name,
        database.schemas.len(),
        database.tables.len(),
        database.views.len()
    );
    Ok(database)
}

/// Introspect every database the connector can see
pub async fn fetch_raw_databases(connector: &dyn Connector) -> Result<Vec<DatabaseInfo>, ConnectError> {
    let mut databases = Vec::new();
    for seed in connector.list_databases().await? {
        databases.push(fetch_raw_database(connector, seed).await?);
    }
    Ok(databases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connect::{CatalogStage, ConnectorFactory, EngineType};
    use crate::testing::{credential, table, FakeCatalog, RecordingFactory};

    fn catalog() -> FakeCatalog {
        FakeCatalog {
            databases: vec![DatabaseInfo {
                name: "shop".to_string(),
                comment: "storefront".to_string(),
                schemas: vec![SchemaInfo {
                    name: "sales".to_string(),
                    tables: vec![table("orders", &["id", "total"])],
                    views: vec![],
                }],
                tables: vec![table("customers", &["id", "name", "email"])],
                views: vec![],
            }],
            fail_at: None,
        }
    }

    #[tokio::test]
    async fn test_flat_engine_ignores_schemas() {
        let factory = RecordingFactory::new(catalog());
        let connector = factory
            .create(EngineType::MySql, &credential(1, "mysql"))
            .await
            .unwrap();

        let databases = fetch_raw_databases(connector.as_ref()).await.unwrap();
        assert_eq!(databases.len(), 1);
        assert_eq!(databases[0].comment, "storefront");
        assert!(databases[0].schemas.is_empty());
        assert_eq!(databases[0].tables[0].fields.len(), 3);
    }

    #[tokio::test]
    async fn test_schema_engine_walks_schemas() {
        let factory = RecordingFactory::new(catalog());
        let connector = factory
            .create(EngineType::Postgres, &credential(1, "postgresql"))
            .await
            .unwrap();

        let databases = fetch_raw_databases(connector.as_ref()).await.unwrap();
        let schema = &databases[0].schemas[0];
        assert_eq!(schema.name, "sales");
        assert_eq!(schema.tables[0].name, "orders");
        assert_eq!(schema.tables[0].fields.len(), 2);
        assert!(databases[0].tables.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_failure_carries_stage() {
        let mut failing = catalog();
        failing.fail_at = Some(CatalogStage::Fields);
        let factory = RecordingFactory::new(failing);
        let connector = factory
            .create(EngineType::MySql, &credential(1, "mysql"))
            .await
            .unwrap();

        let err = fetch_raw_databases(connector.as_ref()).await.unwrap_err();
        assert_eq!(err.stage(), Some(CatalogStage::Fields));
    }
}
