use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};

use crate::schema::Students;

/// INSERT OR IGNORE INTO students (id, exam_id, joined_at) VALUES (?, ?, ?)
pub fn insert_or_ignore(id: &str, exam_id: &str, joined_at: &str) -> String {
    Query::insert()
        .into_table(Students::Table)
        .columns([Students::Id, Students::ExamId, Students::JoinedAt])
        .values_panic([id.into(), exam_id.into(), joined_at.into()])
        .on_conflict(OnConflict::new().do_nothing().to_owned())
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM students WHERE id = ? AND exam_id = ?
pub fn delete(id: &str, exam_id: &str) -> String {
    Query::delete()
        .from_table(Students::Table)
        .and_where(Expr::col(Students::Id).eq(id))
        .and_where(Expr::col(Students::ExamId).eq(exam_id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, exam_id, joined_at FROM students WHERE exam_id = ? ORDER BY joined_at, id
pub fn select_by_exam(exam_id: &str) -> String {
    Query::select()
        .columns([Students::Id, Students::ExamId, Students::JoinedAt])
        .from(Students::Table)
        .and_where(Expr::col(Students::ExamId).eq(exam_id))
        .order_by(Students::JoinedAt, Order::Asc)
        .order_by(Students::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}
