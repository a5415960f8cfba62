// ABOUTME: Metadata browsing, sync and annotation Tauri commands
// ABOUTME: Thin wrappers over the reconciliation service of the open project

use tauri::AppHandle;

use super::current_session;
use crate::db::OrphanCounts;
use crate::models::{Display, FieldVo, MetadataTree, TableAnnotations, TableVo, ViewVo};
use crate::service::{self, SyncReport};
use crate::ApiResponse;

// ===== Reads =====

/// Reconciled tree for a credential; the first call fetches from the server
#[tauri::command]
pub async fn get_metadata(app: AppHandle, credential_id: i64) -> ApiResponse<MetadataTree> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().get_metadata(credential_id).await {
        Ok(tree) => ApiResponse::success(tree),
        Err(e) => ApiResponse::error(format!("Failed to load metadata: {}", e)),
    }
}

#[tauri::command]
pub async fn fields_for_table(app: AppHandle, table_id: i64) -> ApiResponse<Vec<FieldVo>> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().fields_for_table(table_id) {
        Ok(fields) => ApiResponse::success(fields),
        Err(e) => ApiResponse::error(format!("Failed to load fields: {}", e)),
    }
}

#[tauri::command]
pub async fn tables_for_database(
    app: AppHandle,
    database_id: i64,
    schema_id: Option<i64>,
) -> ApiResponse<Vec<TableVo>> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().tables_for_database(database_id, schema_id) {
        Ok(tables) => ApiResponse::success(tables),
        Err(e) => ApiResponse::error(format!("Failed to load tables: {}", e)),
    }
}

#[tauri::command]
pub async fn views_for_database(
    app: AppHandle,
    database_id: i64,
    schema_id: Option<i64>,
) -> ApiResponse<Vec<ViewVo>> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().views_for_database(database_id, schema_id) {
        Ok(views) => ApiResponse::success(views),
        Err(e) => ApiResponse::error(format!("Failed to load views: {}", e)),
    }
}

#[tauri::command]
pub async fn orphan_counts(app: AppHandle, credential_id: i64) -> ApiResponse<OrphanCounts> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().orphan_counts(credential_id) {
        Ok(counts) => ApiResponse::success(counts),
        Err(e) => ApiResponse::error(format!("Failed to count orphaned annotations: {}", e)),
    }
}

// ===== Sync =====

#[tauri::command]
pub async fn sync_table(app: AppHandle, table_id: i64) -> ApiResponse<SyncReport> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().sync_table(table_id).await {
        Ok(report) => ApiResponse::success(report),
        Err(e) => ApiResponse::error(format!("Failed to sync table: {}", e)),
    }
}

#[tauri::command]
pub async fn sync_schema(app: AppHandle, schema_id: i64) -> ApiResponse<SyncReport> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().sync_schema(schema_id).await {
        Ok(report) => ApiResponse::success(report),
        Err(e) => ApiResponse::error(format!("Failed to sync schema: {}", e)),
    }
}

#[tauri::command]
pub async fn sync_database(app: AppHandle, database_id: i64) -> ApiResponse<SyncReport> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().sync_database(database_id).await {
        Ok(report) => ApiResponse::success(report),
        Err(e) => ApiResponse::error(format!("Failed to sync database: {}", e)),
    }
}

// ===== Annotations =====

#[tauri::command]
pub async fn update_table_remark(app: AppHandle, table_id: i64, remark: String) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().update_table_remark(table_id, &remark) {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to update table remark: {}", e)),
    }
}

#[tauri::command]
pub async fn update_field_remark(
    app: AppHandle,
    table_id: i64,
    field_name: String,
    remark: String,
) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session
        .service()
        .update_field_remark(table_id, &field_name, &remark)
    {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to update field remark: {}", e)),
    }
}

/// Persist a field order; ids are raw field ids in display order
#[tauri::command]
pub async fn update_fields_sort(
    app: AppHandle,
    table_id: i64,
    field_ids: Vec<i64>,
) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().update_fields_sort(table_id, &field_ids) {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to update field order: {}", e)),
    }
}

#[tauri::command]
pub async fn get_table_annotations(
    app: AppHandle,
    table_id: i64,
) -> ApiResponse<TableAnnotations> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().table_annotations(table_id) {
        Ok(annotations) => ApiResponse::success(annotations),
        Err(e) => ApiResponse::error(format!("Failed to load table annotations: {}", e)),
    }
}

#[tauri::command]
pub async fn set_table_annotations(
    app: AppHandle,
    table_id: i64,
    annotations: TableAnnotations,
) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().set_table_annotations(table_id, &annotations) {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to save table annotations: {}", e)),
    }
}

#[tauri::command]
pub async fn clear_table_annotations(app: AppHandle, table_id: i64) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().clear_table_annotations(table_id) {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to clear table annotations: {}", e)),
    }
}

#[tauri::command]
pub async fn save_table_overlay(app: AppHandle, table: TableVo) -> ApiResponse<Option<i64>> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().save_table_overlay(&table) {
        Ok(id) => ApiResponse::success(id),
        Err(e) => ApiResponse::error(format!("Failed to save table: {}", e)),
    }
}

#[tauri::command]
pub async fn save_view_overlay(app: AppHandle, view: ViewVo) -> ApiResponse<Option<i64>> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().save_view_overlay(&view) {
        Ok(id) => ApiResponse::success(id),
        Err(e) => ApiResponse::error(format!("Failed to save view: {}", e)),
    }
}

#[tauri::command]
pub async fn save_display(
    app: AppHandle,
    credential_id: i64,
    display: Display,
) -> ApiResponse<()> {
    let session = match current_session(&app).await {
        Ok(s) => s,
        Err(e) => return ApiResponse::error(e),
    };

    match session.service().save_display(credential_id, &display) {
        Ok(_) => ApiResponse::success(()),
        Err(e) => ApiResponse::error(format!("Failed to save display settings: {}", e)),
    }
}

// ===== Views =====

/// Best-effort columns of a view that has not been synced yet
#[tauri::command]
pub fn parse_view_sql(sql: String) -> ApiResponse<Vec<FieldVo>> {
    match service::parse_view_sql(&sql) {
        Ok(fields) => ApiResponse::success(fields),
        Err(e) => ApiResponse::error(format!("Failed to parse view SQL: {}", e)),
    }
}
