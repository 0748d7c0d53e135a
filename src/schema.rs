use sea_query::Iden;

/// Metadata table - key-value store for database configuration
#[derive(Iden)]
pub enum Metadata {
    Table,
    Key,
    Value,
}

/// Exams table - one mutable row per proctoring session
#[derive(Iden)]
pub enum Exams {
    Table,
    Id,
    Options,
    Active,
    CreatedAt,
}

/// Students table - current room members, deleted on leave
#[derive(Iden)]
pub enum Students {
    Table,
    Id,
    ExamId,
    JoinedAt,
}

/// Recordings table - one row per fully reassembled upload
#[derive(Iden)]
pub enum Recordings {
    Table,
    Id,
    ExamId,
    StudentId,
    Filename,
    UploadedAt,
    SizeBytes,
    Crc32,
    StoredRemotely,
}
