// ABOUTME: Oracle connector on the blocking ODPI-C driver, run on tokio's blocking pool
// ABOUTME: One logical database per connection; schemas are non-maintained users

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    CatalogStage, ConnectError, ConnectOptions, Connector, Credential, DatabaseInfo, EngineType,
    FieldInfo, KeyKind, QueryParams, SchemaInfo, TableInfo, ViewInfo,
};

const DEFAULT_PORT: u16 = 1521;

type SharedConnection = Arc<Mutex<Option<oracle::Connection>>>;

pub struct OracleConnector {
    credential: Credential,
    conn: SharedConnection,
}

/// Easy Connect string; the database field names the service
pub fn connect_string(credential: &Credential) -> String {
    let port = if credential.port == 0 {
        DEFAULT_PORT
    } else {
        credential.port
    };
    let service = if credential.database.is_empty() {
        &credential.instance
    } else {
        &credential.database
    };
    format!("//{}:{}/{}", credential.host, port, service)
}

/// Merge constraint and index catalogs into one classification per column.
///
/// `constraints` holds (constraint name, type) with types P, R and U;
/// `constraint_columns` holds (constraint name, column name).
pub fn classify_keys(
    constraints: &[(String, String)],
    constraint_columns: &[(String, String)],
    index_columns: &[String],
) -> HashMap<String, KeyKind> {
    let kinds: HashMap<&str, KeyKind> = constraints
        .iter()
        .map(|(name, kind)| {
            let key = match kind.as_str() {
                "P" => KeyKind::Primary,
                "R" => KeyKind::Foreign,
                "U" => KeyKind::Unique,
                _ => KeyKind::None,
            };
            (name.as_str(), key)
        })
        .collect();

    let mut keys: HashMap<String, KeyKind> = HashMap::new();
    for (constraint, column) in constraint_columns {
        if let Some(kind) = kinds.get(constraint.as_str()) {
            let entry = keys.entry(column.clone()).or_default();
            *entry = entry.promote(*kind);
        }
    }
    for column in index_columns {
        let entry = keys.entry(column.clone()).or_default();
        *entry = entry.promote(KeyKind::Indexed);
    }
    keys
}

fn locked(
    conn: &Mutex<Option<oracle::Connection>>,
) -> Result<std::sync::MutexGuard<'_, Option<oracle::Connection>>, ConnectError> {
    conn.lock()
        .map_err(|_| ConnectError::ConnectionFailed("Oracle connection lock poisoned".to_string()))
}

impl OracleConnector {
    pub async fn connect(
        credential: &Credential,
        _options: &ConnectOptions,
    ) -> Result<Self, ConnectError> {
        let username = credential.username.clone();
        let password = credential.password.clone();
        let dsn = connect_string(credential);

        let conn = tokio::task::spawn_blocking(move || {
            let conn = oracle::Connection::connect(&username, &password, &dsn)
                .map_err(ConnectError::connection)?;
            conn.ping().map_err(ConnectError::connection)?;
            Ok::<_, ConnectError>(conn)
        })
        .await
        .map_err(ConnectError::connection)??;

        Ok(Self {
            credential: credential.clone(),
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Run a closure against the live connection on the blocking pool
    async fn run<T, F>(&self, f: F) -> Result<T, ConnectError>
    where
        T: Send + 'static,
        F: FnOnce(&oracle::Connection) -> Result<T, ConnectError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = locked(&conn)?;
            let conn = guard.as_ref().ok_or(ConnectError::Closed(EngineType::Oracle))?;
            f(conn)
        })
        .await
        .map_err(ConnectError::connection)?
    }

    fn owner_of(&self, params: &QueryParams) -> String {
        params
            .schema
            .clone()
            .unwrap_or_else(|| self.credential.username.to_uppercase())
    }
}

#[async_trait]
impl Connector for OracleConnector {
    fn engine(&self) -> EngineType {
        EngineType::Oracle
    }

    fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Oracle models the database as the instance, so there is exactly one
    async fn list_databases(&self) -> Result<Vec<DatabaseInfo>, ConnectError> {
        let name = if self.credential.database.is_empty() {
            self.credential.instance.clone()
        } else {
            self.credential.database.clone()
        };
        Ok(vec![DatabaseInfo::named(name)])
    }

    async fn list_schemas(&self, database: &str) -> Result<Vec<SchemaInfo>, ConnectError> {
        let target = database.to_string();
        self.run(move |conn| {
            let rows = conn
                .query_as::<String>(
                    "SELECT USERNAME FROM ALL_USERS WHERE ORACLE_MAINTAINED = 'N' ORDER BY USERNAME",
                    &[],
                )
                .map_err(|e| ConnectError::catalog(CatalogStage::Schemas, &target, e))?;
            rows.map(|row| row.map(SchemaInfo::named))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConnectError::catalog(CatalogStage::Schemas, &target, e))
        })
        .await
    }

    async fn list_tables(&self, params: &QueryParams) -> Result<Vec<TableInfo>, ConnectError> {
        let owner = self.owner_of(params);
        let target = params.target();
        self.run(move |conn| {
            let rows = conn
                .query_as::<(String, Option<String>)>(
                    "SELECT t.TABLE_NAME, c.COMMENTS
                     FROM ALL_TABLES t
                     LEFT JOIN ALL_TAB_COMMENTS c ON c.OWNER = t.OWNER AND c.TABLE_NAME = t.TABLE_NAME
                     WHERE t.OWNER = :1
                     ORDER BY t.TABLE_NAME",
                    &[&owner],
                )
                .map_err(|e| ConnectError::catalog(CatalogStage::Tables, &target, e))?;
            rows.map(|row| {
                row.map(|(name, comment)| TableInfo {
                    name,
                    comment: comment.unwrap_or_default(),
                    fields: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectError::catalog(CatalogStage::Tables, &target, e))
        })
        .await
    }

    async fn list_views(&self, params: &QueryParams) -> Result<Vec<ViewInfo>, ConnectError> {
        let owner = self.owner_of(params);
        let target = params.target();
        self.run(move |conn| {
            let rows = conn
                .query_as::<(String, Option<String>)>(
                    "SELECT VIEW_NAME, TEXT FROM ALL_VIEWS WHERE OWNER = :1 ORDER BY VIEW_NAME",
                    &[&owner],
                )
                .map_err(|e| ConnectError::catalog(CatalogStage::Views, &target, e))?;
            rows.map(|row| {
                row.map(|(name, definition)| ViewInfo {
                    name,
                    definition: definition.unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConnectError::catalog(CatalogStage::Views, &target, e))
        })
        .await
    }

    async fn list_fields(&self, params: &QueryParams) -> Result<Vec<FieldInfo>, ConnectError> {
        let owner = self.owner_of(params);
        let table = params.table_name().to_string();
        let target = params.target();
        self.run(move |conn| {
            let fail = |e: oracle::Error| ConnectError::catalog(CatalogStage::Fields, &target, e);

            let constraints = conn
                .query_as::<(String, String)>(
                    "SELECT CONSTRAINT_NAME, CONSTRAINT_TYPE FROM ALL_CONSTRAINTS
                     WHERE OWNER = :1 AND TABLE_NAME = :2 AND CONSTRAINT_TYPE IN ('P', 'R', 'U')",
                    &[&owner, &table],
                )
                .map_err(fail)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(fail)?;
            let constraint_columns = conn
                .query_as::<(String, String)>(
                    "SELECT CONSTRAINT_NAME, COLUMN_NAME FROM ALL_CONS_COLUMNS
                     WHERE OWNER = :1 AND TABLE_NAME = :2",
                    &[&owner, &table],
                )
                .map_err(fail)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(fail)?;
            let index_columns = conn
                .query_as::<String>(
                    "SELECT COLUMN_NAME FROM ALL_IND_COLUMNS WHERE TABLE_OWNER = :1 AND TABLE_NAME = :2",
                    &[&owner, &table],
                )
                .map_err(fail)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(fail)?;
            let keys = classify_keys(&constraints, &constraint_columns, &index_columns);

            let rows = conn
                .query_as::<(String, String, String, Option<String>, Option<String>)>(
                    "SELECT col.COLUMN_NAME, col.DATA_TYPE, col.NULLABLE, cc.COMMENTS, col.DATA_DEFAULT
                     FROM ALL_TAB_COLUMNS col
                     LEFT JOIN ALL_COL_COMMENTS cc
                       ON cc.OWNER = col.OWNER AND cc.TABLE_NAME = col.TABLE_NAME
                      AND cc.COLUMN_NAME = col.COLUMN_NAME
                     WHERE col.OWNER = :1 AND col.TABLE_NAME = :2
                     ORDER BY col.COLUMN_ID",
                    &[&owner, &table],
                )
                .map_err(fail)?;
            rows.map(|row| {
                row.map(|(name, data_type, nullable, comment, default_value)| FieldInfo {
                    key: keys.get(&name).copied().unwrap_or_default(),
                    name,
                    field_type: data_type,
                    nullable: nullable == "Y",
                    comment: comment.unwrap_or_default(),
                    default_value: default_value.map(|d| d.trim().to_string()),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)
        })
        .await
    }

    async fn test_connection(&self) -> Result<(), ConnectError> {
        self.run(|conn| conn.ping().map_err(ConnectError::connection))
            .await
    }

    async fn close(&self) -> Result<(), ConnectError> {
        let conn = Arc::clone(&self.conn);
        let credential_id = self.credential.id;
        tokio::task::spawn_blocking(move || {
            let taken = locked(&conn)?.take();
            match taken {
                Some(conn) => conn.close().map_err(|e| ConnectError::Close {
                    credential_id,
                    message: e.to_string(),
                }),
                None => Ok(()),
            }
        })
        .await
        .map_err(ConnectError::connection)?
    }
}
