// ABOUTME: Connection-related Tauri commands
// ABOUTME: Connectivity tests and explicit teardown of pooled connections

use tauri::AppHandle;

use super::current_session;
use crate::connect::Credential;
use crate::ApiResponse;

/// Test connectivity for a saved or unsaved (id 0) credential
#[tauri::command]
pub async fn test_connection(app: AppHandle, credential: Credential) -> ApiResponse<String> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().test_connection(&credential).await {
        Ok(_) => ApiResponse::success(format!("Connected to {}", credential.host)),
        Err(e) => ApiResponse::error(format!("Connection test failed: {}", e)),
    }
}

#[tauri::command]
pub async fn close_all_connections(app: AppHandle) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().close_all_connections().await {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to close connections: {}", e)),
    }
}
