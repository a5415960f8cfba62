// ABOUTME: Error types for engine connectors and the connection pool
// ABOUTME: Catalog failures carry the failing stage and the object being introspected

use std::fmt;
use thiserror::Error;

use super::EngineType;

/// Introspection stage a catalog query belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogStage {
    Databases,
    Schemas,
    Tables,
    Views,
    Fields,
}

impl fmt::Display for CatalogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatalogStage::Databases => "databases",
            CatalogStage::Schemas => "schemas",
            CatalogStage::Tables => "tables",
            CatalogStage::Views => "views",
            CatalogStage::Fields => "fields",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("unsupported database type: {engine} (credential {credential_id})")]
    UnsupportedEngine { engine: String, credential_id: i64 },
    #[error("missing database type in credentials for id {0}")]
    MissingEngine(i64),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connecting to {engine} timed out after {secs}s")]
    Timeout { engine: EngineType, secs: u64 },
    #[error("Server is not MariaDB (reported version: {0})")]
    NotMariaDb(String),
    #[error("Failed to list {stage} for '{target}': {message}")]
    Catalog {
        stage: CatalogStage,
        target: String,
        message: String,
    },
    #[error("{0} connection is closed")]
    Closed(EngineType),
    #[error("Failed to close connection for credential {credential_id}: {message}")]
    Close { credential_id: i64, message: String },
}

impl ConnectError {
    pub fn catalog(stage: CatalogStage, target: impl Into<String>, err: impl fmt::Display) -> Self {
        ConnectError::Catalog {
            stage,
            target: target.into(),
            message: err.to_string(),
        }
    }

    pub fn connection(err: impl fmt::Display) -> Self {
        ConnectError::ConnectionFailed(err.to_string())
    }

    /// Stage of a catalog failure, if this is one
    pub fn stage(&self) -> Option<CatalogStage> {
        match self {
            ConnectError::Catalog { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_names_stage_and_target() {
        let err = ConnectError::catalog(CatalogStage::Fields, "shop.orders", "permission denied");
        assert_eq!(err.stage(), Some(CatalogStage::Fields));
        assert_eq!(
            err.to_string(),
            "Failed to list fields for 'shop.orders': permission denied"
        );
    }

    #[test]
    fn test_unsupported_engine_message() {
        let err = ConnectError::UnsupportedEngine {
            engine: "db2".to_string(),
            credential_id: 9,
        };
        let message = err.to_string();
        assert!(message.contains("db2"));
        assert!(message.contains('9'));
    }
}
