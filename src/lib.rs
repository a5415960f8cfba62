// ABOUTME: Main library for Schema Lens, a multi-engine schema browser with annotations
// ABOUTME: Declares the core modules and, with the desktop feature, the Tauri app setup

use serde::{Deserialize, Serialize};

pub mod config;
pub mod connect;
pub mod db;
pub mod models;
pub mod service;
pub mod session;

#[cfg(feature = "desktop")]
mod commands;
#[cfg(test)]
mod testing;

/// Standard response envelope for every UI call
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub messages: Messages,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Messages {
    pub error: Vec<String>,
    pub warning: Vec<String>,
    pub info: Vec<String>,
    pub success: Vec<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            messages: Messages::default(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            messages: Messages {
                error: vec![message],
                ..Default::default()
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Shared state handed to every command
pub struct AppState {
    pub sessions: session::SessionHolder,
    pub config: tokio::sync::Mutex<config::AppConfig>,
}

impl AppState {
    pub fn new(config: config::AppConfig) -> Self {
        Self {
            sessions: session::SessionHolder::new(&config),
            config: tokio::sync::Mutex::new(config),
        }
    }
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    let config = match config::AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            config::AppConfig::default()
        }
    };

    tauri::Builder::default()
        .setup(move |app| {
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }

            let last_project = config.last_project.clone();
            let state = AppState::new(config);
            if let Some(dir) = last_project {
                let sessions = &state.sessions;
                if let Err(e) = tauri::async_runtime::block_on(sessions.switch_to(&dir)) {
                    log::warn!("Could not reopen project {}: {}", dir.display(), e);
                }
            }
            app.manage(state);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::open_project,
            commands::current_project,
            commands::list_credentials,
            commands::create_credential,
            commands::update_credential,
            commands::delete_credential,
            commands::test_connection,
            commands::close_all_connections,
            commands::get_metadata,
            commands::fields_for_table,
            commands::tables_for_database,
            commands::views_for_database,
            commands::orphan_counts,
            commands::sync_table,
            commands::sync_schema,
            commands::sync_database,
            commands::update_table_remark,
            commands::update_field_remark,
            commands::update_fields_sort,
            commands::get_table_annotations,
            commands::set_table_annotations,
            commands::clear_table_annotations,
            commands::save_table_overlay,
            commands::save_view_overlay,
            commands::save_display,
            commands::parse_view_sql,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
