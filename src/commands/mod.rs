// ABOUTME: Tauri command module exports
// ABOUTME: Organizes all frontend-callable commands by category

pub mod connection;
pub mod credentials;
pub mod metadata;
pub mod project;

pub use connection::*;
pub use credentials::*;
pub use metadata::*;
pub use project::*;

use std::sync::Arc;
use tauri::{AppHandle, Manager};

use crate::session::ProjectSession;
use crate::AppState;

/// The open project, or the message every command reports when there is none
pub(crate) async fn current_session(app: &AppHandle) -> Result<Arc<ProjectSession>, String> {
    app.state::<AppState>()
        .sessions
        .current()
        .await
        .ok_or_else(|| "No project is open".to_string())
}
