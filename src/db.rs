use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::constants::EXPECTED_DB_VERSION;
use crate::models::{Exam, ProctorOptions, Recording, Student};
use crate::queries::{ddl, exams, metadata, recordings, students};

pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Open a file-based database pool for production use
/// Creates the file if missing, enables WAL mode and foreign keys
pub async fn open_database_connection(db_path: &Path) -> Result<SqlitePool, DynError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create a database in a fresh temporary directory for testing
/// Keep the returned TempDir alive for as long as the pool is used
pub async fn create_test_connection_in_temporary_file(
) -> Result<(SqlitePool, tempfile::TempDir), DynError> {
    let dir = tempfile::TempDir::new()?;
    let pool = open_database_connection(&dir.path().join("test.sqlite")).await?;
    Ok((pool, dir))
}

/// Create tables and indexes if they don't exist and stamp the schema version
pub async fn init_database_schema(pool: &SqlitePool) -> Result<(), DynError> {
    sqlx::query(&ddl::create_metadata_table())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_exams_table()).execute(pool).await?;
    sqlx::query(&ddl::create_students_table())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_recordings_table())
        .execute(pool)
        .await?;

    sqlx::query(&ddl::create_students_exam_id_index())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_recordings_exam_id_index())
        .execute(pool)
        .await?;
    sqlx::query(&ddl::create_recordings_exam_filename_index())
        .execute(pool)
        .await?;

    sqlx::query(&metadata::insert_or_ignore("version", EXPECTED_DB_VERSION))
        .execute(pool)
        .await?;

    Ok(())
}

/// Query a single metadata value by key
pub async fn query_metadata(pool: &SqlitePool, key: &str) -> Result<Option<String>, DynError> {
    let row = sqlx::query(&metadata::select_by_key(key))
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| row.get::<String, _>(0)))
}

/// Refuse databases written with a different schema version
pub async fn verify_version(pool: &SqlitePool) -> Result<(), DynError> {
    let version = query_metadata(pool, "version")
        .await?
        .ok_or("Database has no version metadata")?;

    if version != EXPECTED_DB_VERSION {
        return Err(format!(
            "Unsupported database version: '{}'. This application only supports version '{}'",
            version, EXPECTED_DB_VERSION
        )
        .into());
    }
    Ok(())
}

fn exam_from_row(row: &SqliteRow) -> Result<Exam, DynError> {
    let options: Option<String> = row.try_get(1)?;
    let options = match options {
        Some(json) => Some(serde_json::from_str::<ProctorOptions>(&json)?),
        None => None,
    };
    Ok(Exam {
        id: row.try_get(0)?,
        options,
        active: row.try_get::<i64, _>(2)? != 0,
        created_at: row.try_get(3)?,
    })
}

fn student_from_row(row: &SqliteRow) -> Result<Student, DynError> {
    Ok(Student {
        id: row.try_get(0)?,
        exam_id: row.try_get(1)?,
        joined_at: row.try_get(2)?,
    })
}

fn recording_from_row(row: &SqliteRow) -> Result<Recording, DynError> {
    Ok(Recording {
        id: row.try_get(0)?,
        exam_id: row.try_get(1)?,
        student_id: row.try_get(2)?,
        filename: row.try_get(3)?,
        uploaded_at: row.try_get(4)?,
        size_bytes: row.try_get(5)?,
        crc32: row.try_get::<i64, _>(6)? as u32,
        stored_remotely: row.try_get::<i64, _>(7)? != 0,
    })
}

/// Insert a new, inactive exam with no options
pub async fn insert_exam(pool: &SqlitePool, id: &str, created_at: &str) -> Result<(), DynError> {
    sqlx::query(&exams::insert(id, created_at))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_exam(pool: &SqlitePool, id: &str) -> Result<Option<Exam>, DynError> {
    let row = sqlx::query(&exams::select_by_id(id))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(exam_from_row).transpose()
}

/// Overwrite the options and mark the exam active. Returns rows affected.
pub async fn start_exam(
    pool: &SqlitePool,
    id: &str,
    options: &ProctorOptions,
) -> Result<u64, DynError> {
    let options_json = serde_json::to_string(options)?;
    let result = sqlx::query(&exams::update_start(id, &options_json))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Mark the exam inactive, keeping its options. Returns rows affected.
pub async fn end_exam(pool: &SqlitePool, id: &str) -> Result<u64, DynError> {
    let result = sqlx::query(&exams::update_end(id)).execute(pool).await?;
    Ok(result.rows_affected())
}

/// Insert a student row; a repeated join with the same id is ignored
pub async fn upsert_student(
    pool: &SqlitePool,
    id: &str,
    exam_id: &str,
    joined_at: &str,
) -> Result<(), DynError> {
    sqlx::query(&students::insert_or_ignore(id, exam_id, joined_at))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_student(pool: &SqlitePool, id: &str, exam_id: &str) -> Result<u64, DynError> {
    let result = sqlx::query(&students::delete(id, exam_id))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn list_students(pool: &SqlitePool, exam_id: &str) -> Result<Vec<Student>, DynError> {
    let rows = sqlx::query(&students::select_by_exam(exam_id))
        .fetch_all(pool)
        .await?;
    rows.iter().map(student_from_row).collect()
}

pub async fn upsert_recording(pool: &SqlitePool, recording: &Recording) -> Result<(), DynError> {
    sqlx::query(&recordings::upsert(recording))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_recordings(pool: &SqlitePool, exam_id: &str) -> Result<Vec<Recording>, DynError> {
    let rows = sqlx::query(&recordings::select_by_exam(exam_id))
        .fetch_all(pool)
        .await?;
    rows.iter().map(recording_from_row).collect()
}

pub async fn get_recording(
    pool: &SqlitePool,
    exam_id: &str,
    filename: &str,
) -> Result<Option<Recording>, DynError> {
    let row = sqlx::query(&recordings::select_by_exam_and_filename(exam_id, filename))
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(recording_from_row).transpose()
}

/// Every recording stored under `filename`, across exams
pub async fn find_recordings_by_filename(
    pool: &SqlitePool,
    filename: &str,
) -> Result<Vec<Recording>, DynError> {
    let rows = sqlx::query(&recordings::select_by_filename(filename))
        .fetch_all(pool)
        .await?;
    rows.iter().map(recording_from_row).collect()
}
