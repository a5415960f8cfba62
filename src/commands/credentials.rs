// ABOUTME: Credential management Tauri commands
// ABOUTME: Edits and deletions also drop any pooled connection built from the old record

use tauri::AppHandle;

use super::current_session;
use crate::connect::Credential;
use crate::ApiResponse;

#[tauri::command]
pub async fn list_credentials(app: AppHandle) -> ApiResponse<Vec<Credential>> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().list_credentials() {
        Ok(credentials) => ApiResponse::success(credentials),
        Err(e) => ApiResponse::error(format!("Failed to list credentials: {}", e)),
    }
}

#[tauri::command]
pub async fn create_credential(app: AppHandle, credential: Credential) -> ApiResponse<Credential> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().create_credential(&credential) {
        Ok(created) => ApiResponse::success(created),
        Err(e) => ApiResponse::error(format!("Failed to create credential: {}", e)),
    }
}

#[tauri::command]
pub async fn update_credential(app: AppHandle, credential: Credential) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().update_credential(&credential).await {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to update credential: {}", e)),
    }
}

/// Delete a credential together with its cached metadata and annotations
#[tauri::command]
pub async fn delete_credential(app: AppHandle, id: i64) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().delete_credential(id).await {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to delete credential: {}", e)),
    }
}
