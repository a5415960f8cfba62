// ABOUTME: Project selection Tauri commands
// ABOUTME: Opening a project switches the metadata store and resets the connection pool

use serde::Serialize;
use std::path::PathBuf;
use tauri::{AppHandle, Manager};

use crate::{ApiResponse, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub path: String,
    pub store_file: Option<String>,
    pub store_version: String,
}

/// Open (or create) a project directory and remember it
#[tauri::command]
pub async fn open_project(app: AppHandle, path: String) -> ApiResponse<ProjectInfo> {
    let state = app.state::<AppState>();
    let dir = PathBuf::from(&path);

    let session = match state.sessions.switch_to(&dir).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(format!("Failed to open project: {}", e)),
    };

    {
        let mut config = state.config.lock().await;
        config.remember_project(session.dir());
        if let Err(e) = config.save() {
            log::warn!("Failed to save config: {}", e);
        }
    }

    let store_version = match session.store().last_version_seen() {
        Ok(v) => v,
        Err(e) => return ApiResponse::error(format!("Failed to read store version: {}", e)),
    };

    ApiResponse::success(ProjectInfo {
        path: session.dir().display().to_string(),
        store_file: session.store().path().map(|p| p.display().to_string()),
        store_version,
    })
}

#[tauri::command]
pub async fn current_project(app: AppHandle) -> ApiResponse<Option<String>> {
    let state = app.state::<AppState>();
    let current = state.sessions.current().await;
    ApiResponse::success(current.map(|s| s.dir().display().to_string()))
}
