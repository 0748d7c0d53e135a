use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{login_handler, logout_handler, Teacher, TeacherSessions};
use crate::config::RelayConfig;
use crate::constants::generate_token;
use crate::credentials::load_credentials;
use crate::db::{self, DynError};
use crate::error::ApiError;
use crate::exam;
use crate::models::{Exam, ProctorOptions, Recording, Student};
use crate::object_store::ObjectStore;
use crate::rooms::RoomRegistry;
use crate::session::ws_handler;
use crate::upload::{
    object_key, receive_chunk, recording_path, sanitize_filename, ChunkUpload, UploadLocks,
};

// Shared state for all HTTP and WebSocket handlers
pub struct AppState {
    pub pool: SqlitePool,
    pub config: RelayConfig,
    pub rooms: RoomRegistry,
    pub sessions: TeacherSessions,
    pub teacher_password: String,
    pub object_store: Option<ObjectStore>,
    pub upload_locks: UploadLocks,
}

/// Prepare directories, database and secrets for a config
pub async fn build_state(config: RelayConfig) -> Result<Arc<AppState>, DynError> {
    std::fs::create_dir_all(config.recordings_dir()).map_err(|e| {
        format!(
            "Failed to create recordings directory '{}': {}",
            config.recordings_dir().display(),
            e
        )
    })?;

    let pool = db::open_database_connection(&config.database_path()).await?;
    db::init_database_schema(&pool).await?;
    db::verify_version(&pool).await?;

    let needs_credentials = config.teacher.password.is_none()
        || config
            .object_store
            .as_ref()
            .is_some_and(|store| store.secret_access_key.is_none());
    let credentials = if needs_credentials {
        load_credentials()?
    } else {
        None
    };

    let teacher_password = config.teacher_password(&credentials)?;
    let object_store = match &config.object_store {
        Some(store_config) => {
            let secret = store_config.secret(&credentials)?;
            Some(ObjectStore::new(store_config, secret)?)
        }
        None => None,
    };

    Ok(Arc::new(AppState {
        pool,
        rooms: RoomRegistry::new(config.room_capacity),
        sessions: TeacherSessions::new(config.session_ttl_hours),
        teacher_password,
        object_store,
        upload_locks: UploadLocks::new(),
        config,
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // room for the multipart envelope and text fields around one chunk
    let body_limit = state.config.chunk_size as usize + 64 * 1024;

    Router::new()
        .route("/health", get(health_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .route("/create_exam", get(create_exam_handler))
        .route("/exams/{id}", get(get_exam_handler))
        .route("/exams/{id}/students", get(list_students_handler))
        .route("/exams/{id}/recordings", get(list_recordings_handler))
        .route("/teacher", post(teacher_action_handler))
        .route("/student", get(student_handler))
        .route("/upload_chunk", post(upload_chunk_handler))
        .route("/download/{filename}", get(download_handler))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Run the relay server (for serve command)
pub fn serve(config: RelayConfig, port_override: Option<u16>) -> Result<(), DynError> {
    let port = port_override.unwrap_or(config.port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let state = build_state(config).await?;

        println!("Data directory: {}", state.config.data_dir.display());
        match &state.config.object_store {
            Some(store) => println!("Object store: {} (bucket {})", store.endpoint, store.bucket),
            None => println!("Object store: disabled, recordings stay on local disk"),
        }
        println!("Listening on: http://0.0.0.0:{}", port);
        println!("Endpoints:");
        println!("  POST /login, /logout  - Teacher session");
        println!("  GET  /create_exam  - Create an exam (teacher)");
        println!("  GET  /exams/{{id}}[/students|/recordings]  - Inspect an exam (teacher)");
        println!("  POST /teacher  - Start or end an exam (teacher)");
        println!("  GET  /student?examId=<id>  - Issue a student id");
        println!("  POST /upload_chunk  - Chunked recording upload");
        println!("  GET  /download/{{filename}}[?examId=]  - Fetch a recording (teacher)");
        println!("  GET  /ws  - Real-time channel");
        println!("  GET  /health  - Health check");

        let app = build_router(state);
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
            .await
            .map_err(|e| format!("Failed to bind to port {}: {}", port, e))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        Ok::<(), DynError>(())
    })
}

/// Create the database and schema without starting the server (for init-db command)
pub fn init_db(config: &RelayConfig) -> Result<(), DynError> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        std::fs::create_dir_all(&config.data_dir)?;
        let pool = db::open_database_connection(&config.database_path()).await?;
        db::init_database_schema(&pool).await?;
        db::verify_version(&pool).await?;
        println!("Database ready at {}", config.database_path().display());
        Ok::<(), DynError>(())
    })
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn create_exam_handler(
    _teacher: Teacher,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let exam_id = exam::create_exam(&state).await?;
    Ok(Json(json!({ "exam_id": exam_id })))
}

async fn get_exam_handler(
    _teacher: Teacher,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Exam>, ApiError> {
    Ok(Json(exam::require_exam(&state, &id).await?))
}

async fn list_students_handler(
    _teacher: Teacher,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Student>>, ApiError> {
    exam::require_exam(&state, &id).await?;
    Ok(Json(db::list_students(&state.pool, &id).await?))
}

async fn list_recordings_handler(
    _teacher: Teacher,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Recording>>, ApiError> {
    exam::require_exam(&state, &id).await?;
    Ok(Json(db::list_recordings(&state.pool, &id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherAction {
    pub exam_id: String,
    pub action: String,
    pub options: Option<ProctorOptions>,
}

async fn teacher_action_handler(
    _teacher: Teacher,
    State(state): State<Arc<AppState>>,
    Json(request): Json<TeacherAction>,
) -> Result<Json<Value>, ApiError> {
    match request.action.as_str() {
        "start_exam" => {
            exam::start_exam(
                &state,
                &request.exam_id,
                request.options.unwrap_or_default(),
            )
            .await?
        }
        "end_exam" => exam::end_exam(&state, &request.exam_id).await?,
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unknown action '{}', expected start_exam or end_exam",
                other
            )))
        }
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct StudentQuery {
    #[serde(rename = "examId")]
    pub exam_id: Option<String>,
}

async fn student_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StudentQuery>,
) -> Result<Json<Value>, ApiError> {
    let exam_id = query
        .exam_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("examId is required".to_string()))?;
    exam::require_exam(&state, &exam_id).await?;

    let student_id = generate_token();
    info!("Issued student id {} for exam {}", student_id, exam_id);
    Ok(Json(json!({ "student_id": student_id, "exam_id": exam_id })))
}

fn parse_count(field: &str, value: &str) -> Result<u64, ApiError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ApiError::BadRequest(format!("{} must be a non-negative integer", field)))
}

fn missing(field: &str) -> ApiError {
    ApiError::BadRequest(format!("Missing multipart field '{}'", field))
}

async fn upload_chunk_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut exam_id = None;
    let mut student_id = None;
    let mut filename = None;
    let mut chunk_index = None;
    let mut total_chunks = None;
    let mut chunk = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "chunk" => {
                if filename.is_none() {
                    filename = field.file_name().map(str::to_string);
                }
                chunk = Some(field.bytes().await?);
            }
            "examId" => exam_id = Some(field.text().await?),
            "studentId" => student_id = Some(field.text().await?),
            "filename" => filename = Some(field.text().await?),
            "chunkIndex" => chunk_index = Some(parse_count("chunkIndex", &field.text().await?)?),
            "totalChunks" => total_chunks = Some(parse_count("totalChunks", &field.text().await?)?),
            other => warn!("Ignoring unexpected multipart field '{}'", other),
        }
    }

    let upload = ChunkUpload {
        exam_id: exam_id.ok_or_else(|| missing("examId"))?,
        student_id: student_id.ok_or_else(|| missing("studentId"))?,
        filename: filename.ok_or_else(|| missing("filename"))?,
        chunk_index: chunk_index.ok_or_else(|| missing("chunkIndex"))?,
        total_chunks: total_chunks.ok_or_else(|| missing("totalChunks"))?,
        chunk: chunk.ok_or_else(|| missing("chunk"))?,
    };

    let recording = receive_chunk(&state, upload).await?;
    Ok(Json(match recording {
        Some(recording) => json!({ "success": true, "filename": recording.filename }),
        None => json!({ "success": true }),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(rename = "examId")]
    pub exam_id: Option<String>,
}

/// Find the recording a download refers to. Without an exam id the filename
/// must be unique across exams.
async fn find_download(
    pool: &SqlitePool,
    exam_id: Option<&str>,
    filename: &str,
) -> Result<Option<Recording>, ApiError> {
    if let Some(exam_id) = exam_id {
        return Ok(db::get_recording(pool, exam_id, filename).await?);
    }
    let mut matches = db::find_recordings_by_filename(pool, filename).await?;
    if matches.len() > 1 {
        return Err(ApiError::BadRequest(format!(
            "{} exams have a recording named '{}', pass examId",
            matches.len(),
            filename
        )));
    }
    Ok(matches.pop())
}

async fn download_handler(
    _teacher: Teacher,
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError::RecordingNotFound(format!("Recording '{}' not found", filename));

    let safe_name = sanitize_filename(&filename).ok_or_else(not_found)?;
    let exam_id = query.exam_id.as_deref().filter(|id| !id.is_empty());
    let recording = find_download(&state.pool, exam_id, &safe_name)
        .await?
        .ok_or_else(not_found)?;

    if let (true, Some(store)) = (recording.stored_remotely, &state.object_store) {
        let url = store
            .presign_download(&object_key(&recording.exam_id, &recording.filename))
            .map_err(|e| ApiError::Upstream(e.to_string()))?;
        return Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response());
    }

    let path = recording_path(&state.config.recordings_dir(), &recording.exam_id, &recording.filename)
        .ok_or_else(not_found)?;
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(e.into()),
    };

    let disposition = format!("attachment; filename=\"{}\"", recording.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
