use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};

use crate::models::Recording;
use crate::schema::Recordings;

const COLUMNS: [Recordings; 8] = [
    Recordings::Id,
    Recordings::ExamId,
    Recordings::StudentId,
    Recordings::Filename,
    Recordings::UploadedAt,
    Recordings::SizeBytes,
    Recordings::Crc32,
    Recordings::StoredRemotely,
];

/// INSERT INTO recordings (...) VALUES (...)
/// ON CONFLICT (exam_id, filename) DO UPDATE SET student_id, uploaded_at, size_bytes, crc32, stored_remotely
///
/// Re-uploading a file within the same exam refreshes the existing row.
pub fn upsert(recording: &Recording) -> String {
    Query::insert()
        .into_table(Recordings::Table)
        .columns(COLUMNS)
        .values_panic([
            recording.id.as_str().into(),
            recording.exam_id.as_str().into(),
            recording.student_id.as_str().into(),
            recording.filename.as_str().into(),
            recording.uploaded_at.as_str().into(),
            recording.size_bytes.into(),
            (recording.crc32 as i64).into(),
            (recording.stored_remotely as i32).into(),
        ])
        .on_conflict(
            OnConflict::columns([Recordings::ExamId, Recordings::Filename])
                .update_columns([
                    Recordings::StudentId,
                    Recordings::UploadedAt,
                    Recordings::SizeBytes,
                    Recordings::Crc32,
                    Recordings::StoredRemotely,
                ])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM recordings WHERE exam_id = ? ORDER BY uploaded_at
pub fn select_by_exam(exam_id: &str) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::ExamId).eq(exam_id))
        .order_by(Recordings::UploadedAt, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM recordings WHERE exam_id = ? AND filename = ?
pub fn select_by_exam_and_filename(exam_id: &str, filename: &str) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::ExamId).eq(exam_id))
        .and_where(Expr::col(Recordings::Filename).eq(filename))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM recordings WHERE filename = ? ORDER BY uploaded_at
pub fn select_by_filename(filename: &str) -> String {
    Query::select()
        .columns(COLUMNS)
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::Filename).eq(filename))
        .order_by(Recordings::UploadedAt, Order::Asc)
        .to_string(SqliteQueryBuilder)
}
