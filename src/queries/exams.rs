use sea_query::{Expr, Query, SqliteQueryBuilder};

use crate::schema::Exams;

/// INSERT INTO exams (id, active, created_at) VALUES (?, 0, ?)
pub fn insert(id: &str, created_at: &str) -> String {
    Query::insert()
        .into_table(Exams::Table)
        .columns([Exams::Id, Exams::Active, Exams::CreatedAt])
        .values_panic([id.into(), 0i32.into(), created_at.into()])
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, options, active, created_at FROM exams WHERE id = ?
pub fn select_by_id(id: &str) -> String {
    Query::select()
        .columns([Exams::Id, Exams::Options, Exams::Active, Exams::CreatedAt])
        .from(Exams::Table)
        .and_where(Expr::col(Exams::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE exams SET options = ?, active = 1 WHERE id = ?
pub fn update_start(id: &str, options_json: &str) -> String {
    Query::update()
        .table(Exams::Table)
        .value(Exams::Options, options_json)
        .value(Exams::Active, 1i32)
        .and_where(Expr::col(Exams::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE exams SET active = 0 WHERE id = ?
pub fn update_end(id: &str) -> String {
    Query::update()
        .table(Exams::Table)
        .value(Exams::Active, 0i32)
        .and_where(Expr::col(Exams::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}
