// ABOUTME: Project-local persistence for the metadata snapshot and annotations
// ABOUTME: One SQLite file per project, split into raw, overlay, and credential views

pub mod credentials;
pub mod metadata;
pub mod overlay;
pub mod raw;

pub use credentials::CredentialStore;
pub use metadata::{MetadataStore, StoreError};
pub use overlay::{OrphanCounts, OverlayStore, OverlayWrite};
pub use raw::{DatabaseContext, RawStore, SchemaContext, TableContext};
