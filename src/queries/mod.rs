//! SQL text for every statement the relay issues, built with sea-query.

pub mod ddl;
pub mod exams;
pub mod metadata;
pub mod recordings;
pub mod students;
