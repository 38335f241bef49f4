//! File tree, workspace, version, settings and code index handlers.

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use protocol::{CodeIndexResponse, FileEntry, StatusResponse, VersionEntry, WorkspaceEntry};
use serde::Deserialize;
use serde_json::Value;

use super::error::ApiError;
use super::form::FormFields;
use super::{blocking, AppState};
use crate::files::SettingsStore;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/files/", get(list_files))
        .route("/list_dir/", get(list_files))
        .route("/file/", get(read_file).post(write_file).delete(delete_file))
        .route("/file/upload/", post(upload_file))
        .route("/folder/", post(create_folder).delete(delete_folder))
        .route("/rename/", post(rename_path))
        .route(
            "/workspaces/",
            get(list_workspaces)
                .post(create_workspace)
                .delete(delete_workspace),
        )
        .route("/workspaces/rename/", post(rename_workspace))
        .route("/file/versions/", get(list_versions))
        .route("/file/version/", get(read_version))
        .route("/file/restore/", post(restore_version))
        .route("/settings/", get(get_settings).post(update_settings))
        .route(
            "/workspace/settings/",
            get(get_workspace_settings).post(update_workspace_settings),
        )
        .route("/index_code_recursive/", post(index_code))
        .route("/index_code/", post(index_code))
        .route("/get_code_index/", get(get_code_index))
}

#[derive(Debug, Deserialize)]
struct DirQuery {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    path: String,
}

#[derive(Debug, Deserialize)]
struct NameQuery {
    name: String,
}

#[derive(Debug, Deserialize)]
struct VersionQuery {
    version_path: String,
}

#[derive(Debug, Deserialize)]
struct DirectoryQuery {
    current_directory: String,
}

/// Raw file content. Text is labelled as such so the editor can read it
/// straight into a buffer.
fn content_response(bytes: Vec<u8>) -> Response {
    let content_type = if std::str::from_utf8(&bytes).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    };
    ([(CONTENT_TYPE, content_type)], bytes).into_response()
}

// ============================================================================
// File tree
// ============================================================================

async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<DirQuery>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let sandbox = state.sandbox.clone();
    let entries = blocking(move || sandbox.list_dir(&query.path)).await?;
    Ok(Json(entries))
}

async fn read_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let sandbox = state.sandbox.clone();
    let bytes = blocking(move || sandbox.read_file(&query.path)).await?;
    Ok(content_response(bytes))
}

async fn write_file(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let path = form.text("path")?.to_string();
    let content = form.text("content")?.to_string();
    let sandbox = state.sandbox.clone();
    blocking(move || sandbox.write_file(&path, content.as_bytes())).await?;
    Ok(Json(StatusResponse::new("ok")))
}

async fn upload_file(
    State(state): State<AppState>,
    mut form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let path = form.text("path")?.to_string();
    let data = form.take_file("file")?;
    let sandbox = state.sandbox.clone();
    blocking(move || sandbox.upload_file(&path, &data)).await?;
    Ok(Json(StatusResponse::new("ok")))
}

async fn delete_file(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let sandbox = state.sandbox.clone();
    blocking(move || sandbox.delete_file(&query.path)).await?;
    Ok(Json(StatusResponse::new("deleted")))
}

async fn create_folder(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let path = form.text("path")?.to_string();
    let sandbox = state.sandbox.clone();
    blocking(move || sandbox.create_dir(&path)).await?;
    Ok(Json(StatusResponse::new("created")))
}

async fn delete_folder(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let sandbox = state.sandbox.clone();
    blocking(move || sandbox.delete_dir(&query.path)).await?;
    Ok(Json(StatusResponse::new("deleted")))
}

async fn rename_path(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let old_path = form.text("old_path")?.to_string();
    let new_path = form.text("new_path")?.to_string();
    let sandbox = state.sandbox.clone();
    blocking(move || sandbox.rename(&old_path, &new_path)).await?;
    Ok(Json(StatusResponse::new("renamed")))
}

// ============================================================================
// Workspaces
// ============================================================================

async fn list_workspaces(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkspaceEntry>>, ApiError> {
    let sandbox = state.sandbox.clone();
    let workspaces = blocking(move || sandbox.list_workspaces()).await?;
    Ok(Json(workspaces))
}

async fn create_workspace(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let name = form.text("name")?.to_string();
    let sandbox = state.sandbox.clone();
    let created = name.clone();
    blocking(move || sandbox.create_workspace(&created)).await?;
    Ok(Json(StatusResponse::new("created").with_name(name)))
}

async fn delete_workspace(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let sandbox = state.sandbox.clone();
    let name = query.name.clone();
    blocking(move || sandbox.delete_workspace(&name)).await?;
    Ok(Json(StatusResponse::new("deleted").with_name(query.name)))
}

async fn rename_workspace(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let old_name = form.text("old_name")?.to_string();
    let new_name = form.text("new_name")?.to_string();
    let sandbox = state.sandbox.clone();
    let (from, to) = (old_name.clone(), new_name.clone());
    blocking(move || sandbox.rename_workspace(&from, &to)).await?;
    Ok(Json(StatusResponse::new("renamed").with_rename(old_name, new_name)))
}

// ============================================================================
// Versions
// ============================================================================

async fn list_versions(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<VersionEntry>>, ApiError> {
    let sandbox = state.sandbox.clone();
    let versions = blocking(move || {
        let file = sandbox.resolve(&query.path)?;
        Ok::<_, ApiError>(sandbox.versions().list(&file)?)
    })
    .await?;
    Ok(Json(versions))
}

async fn read_version(
    State(state): State<AppState>,
    Query(query): Query<VersionQuery>,
) -> Result<Response, ApiError> {
    let sandbox = state.sandbox.clone();
    let bytes = blocking(move || sandbox.versions().read(&query.version_path)).await?;
    Ok(content_response(bytes))
}

async fn restore_version(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let path = form.text("path")?.to_string();
    let version_path = form.text("version_path")?.to_string();
    let sandbox = state.sandbox.clone();
    blocking(move || {
        let file = sandbox.resolve(&path)?;
        Ok::<_, ApiError>(sandbox.versions().restore(&file, &version_path)?)
    })
    .await?;
    Ok(Json(StatusResponse::new("restored")))
}

// ============================================================================
// Settings
// ============================================================================

async fn get_settings(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings.clone();
    let value = blocking(move || settings.global()).await?;
    Ok(Json(value))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(value): Json<Value>,
) -> Result<Json<StatusResponse>, ApiError> {
    if !value.is_object() {
        return Err(ApiError::Unprocessable(
            "Settings must be a JSON object".to_string(),
        ));
    }
    let settings = state.settings.clone();
    blocking(move || settings.save_global(&value)).await?;
    Ok(Json(StatusResponse::new("ok")))
}

async fn get_workspace_settings(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Value>, ApiError> {
    let sandbox = state.sandbox.clone();
    let settings = state.settings.clone();
    let value = blocking(move || {
        let dir = sandbox.workspace_dir(&query.name)?;
        Ok::<_, ApiError>(settings.workspace(&dir)?)
    })
    .await?;
    Ok(Json(value))
}

async fn update_workspace_settings(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let name = form.text("name")?.to_string();
    let value = SettingsStore::parse(form.text("settings")?)?;
    let sandbox = state.sandbox.clone();
    let settings = state.settings.clone();
    blocking(move || {
        let dir = sandbox.workspace_dir(&name)?;
        Ok::<_, ApiError>(settings.save_workspace(&dir, &value)?)
    })
    .await?;
    Ok(Json(StatusResponse::new("ok")))
}

// ============================================================================
// Code index
// ============================================================================

async fn index_code(
    State(state): State<AppState>,
    form: FormFields,
) -> Result<Json<StatusResponse>, ApiError> {
    let directory = form.text("current_directory")?.to_string();
    let sandbox = state.sandbox.clone();
    let settings = state.settings.clone();
    let indexer = state.indexer.clone();
    let count = blocking(move || {
        let dir = sandbox.resolve(&directory)?;
        Ok::<_, ApiError>(indexer.index(&dir, &settings)?)
    })
    .await?;
    Ok(Json(StatusResponse::new("ok").with_count(count)))
}

async fn get_code_index(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<Json<CodeIndexResponse>, ApiError> {
    let sandbox = state.sandbox.clone();
    let settings = state.settings.clone();
    let indexer = state.indexer.clone();
    let code_index = blocking(move || {
        let dir = sandbox.resolve(&query.current_directory)?;
        Ok::<_, ApiError>(indexer.stored(&dir, &settings))
    })
    .await?;
    Ok(Json(CodeIndexResponse { code_index }))
}
