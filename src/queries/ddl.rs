use sea_query::{ColumnDef, ForeignKey, ForeignKeyAction, Index, SqliteQueryBuilder, Table};

use crate::schema::{Exams, Metadata, Recordings, Students};

/// CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)
pub fn create_metadata_table() -> String {
    Table::create()
        .table(Metadata::Table)
        .if_not_exists()
        .col(ColumnDef::new(Metadata::Key).string().primary_key())
        .col(ColumnDef::new(Metadata::Value).string().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS exams (
///     id TEXT PRIMARY KEY,
///     options TEXT,
///     active INTEGER NOT NULL DEFAULT 0,
///     created_at TEXT NOT NULL
/// )
pub fn create_exams_table() -> String {
    Table::create()
        .table(Exams::Table)
        .if_not_exists()
        .col(ColumnDef::new(Exams::Id).string().primary_key())
        .col(ColumnDef::new(Exams::Options).text().null())
        .col(
            ColumnDef::new(Exams::Active)
                .integer()
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new(Exams::CreatedAt).string().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS students (
///     id TEXT PRIMARY KEY,
///     exam_id TEXT NOT NULL REFERENCES exams(id) ON DELETE CASCADE,
///     joined_at TEXT NOT NULL
/// )
pub fn create_students_table() -> String {
    Table::create()
        .table(Students::Table)
        .if_not_exists()
        .col(ColumnDef::new(Students::Id).string().primary_key())
        .col(ColumnDef::new(Students::ExamId).string().not_null())
        .col(ColumnDef::new(Students::JoinedAt).string().not_null())
        .foreign_key(
            ForeignKey::create()
                .from(Students::Table, Students::ExamId)
                .to(Exams::Table, Exams::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS recordings (
///     id TEXT PRIMARY KEY,
///     exam_id TEXT NOT NULL REFERENCES exams(id) ON DELETE CASCADE,
///     student_id TEXT NOT NULL,
///     filename TEXT NOT NULL,
///     uploaded_at TEXT NOT NULL,
///     size_bytes INTEGER NOT NULL,
///     crc32 INTEGER NOT NULL,
///     stored_remotely INTEGER NOT NULL DEFAULT 0
/// )
pub fn create_recordings_table() -> String {
    Table::create()
        .table(Recordings::Table)
        .if_not_exists()
        .col(ColumnDef::new(Recordings::Id).string().primary_key())
        .col(ColumnDef::new(Recordings::ExamId).string().not_null())
        .col(ColumnDef::new(Recordings::StudentId).string().not_null())
        .col(ColumnDef::new(Recordings::Filename).string().not_null())
        .col(ColumnDef::new(Recordings::UploadedAt).string().not_null())
        .col(ColumnDef::new(Recordings::SizeBytes).big_integer().not_null())
        .col(ColumnDef::new(Recordings::Crc32).big_integer().not_null())
        .col(
            ColumnDef::new(Recordings::StoredRemotely)
                .integer()
                .not_null()
                .default(0),
        )
        .foreign_key(
            ForeignKey::create()
                .from(Recordings::Table, Recordings::ExamId)
                .to(Exams::Table, Exams::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_students_exam_id ON students(exam_id)
pub fn create_students_exam_id_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_students_exam_id")
        .table(Students::Table)
        .col(Students::ExamId)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_recordings_exam_id ON recordings(exam_id)
pub fn create_recordings_exam_id_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_recordings_exam_id")
        .table(Recordings::Table)
        .col(Recordings::ExamId)
        .to_string(SqliteQueryBuilder)
}

/// CREATE UNIQUE INDEX IF NOT EXISTS idx_recordings_exam_filename ON recordings(exam_id, filename)
///
/// Two exams may hold recordings with the same name.
pub fn create_recordings_exam_filename_index() -> String {
    Index::create()
        .if_not_exists()
        .unique()
        .name("idx_recordings_exam_filename")
        .table(Recordings::Table)
        .col(Recordings::ExamId)
        .col(Recordings::Filename)
        .to_string(SqliteQueryBuilder)
}
