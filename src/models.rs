use serde::{Deserialize, Serialize};

/// Browser capture features a student's client should activate.
/// Field names follow the wire format the browser client sends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProctorOptions {
    #[serde(default)]
    pub camera: bool,
    #[serde(default)]
    pub mic: bool,
    #[serde(default)]
    pub screen: bool,
    #[serde(default, rename = "tabDetect")]
    pub tab_detect: bool,
    #[serde(default)]
    pub record: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exam {
    pub id: String,
    /// None until the teacher starts the exam
    pub options: Option<ProctorOptions>,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: String,
    pub exam_id: String,
    pub joined_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recording {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub filename: String,
    pub uploaded_at: String,
    pub size_bytes: i64,
    pub crc32: u32,
    pub stored_remotely: bool,
}
