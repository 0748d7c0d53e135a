//! Chunked recording uploads.
//!
//! The browser slices a recording into `chunk_size` pieces and posts them in
//! index order. Each piece is written at `index * chunk_size` into
//! `recordings/<exam_id>/<filename>`; the final piece truncates the file to its
//! real length, stores a recording row and notifies the exam room.

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use fs2::FileExt;
use log::{debug, error, info};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::constants::generate_token;
use crate::db;
use crate::error::ApiError;
use crate::events::ServerEvent;
use crate::exam::require_exam;
use crate::models::Recording;
use crate::serve::AppState;

/// One multipart `POST /upload_chunk` request
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub exam_id: String,
    pub student_id: String,
    pub filename: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub chunk: Bytes,
}

impl ChunkUpload {
    pub fn is_final(&self) -> bool {
        self.chunk_index + 1 == self.total_chunks
    }
}

/// Per-file locks, keyed by `<exam_id>/<filename>`, so two requests never
/// interleave writes to one file
#[derive(Default)]
pub struct UploadLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl UploadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the lock once nobody else holds a handle to it
    fn release(&self, key: &str) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Reduce a client-supplied name to a safe basename.
/// Returns None when nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Check chunk bounds against the configured chunk size
pub fn validate_chunk(upload: &ChunkUpload, chunk_size: u64) -> Result<(), ApiError> {
    if upload.total_chunks == 0 {
        return Err(ApiError::BadRequest("totalChunks must be at least 1".to_string()));
    }
    if upload.chunk_index >= upload.total_chunks {
        return Err(ApiError::BadRequest(format!(
            "chunkIndex {} out of range for {} chunks",
            upload.chunk_index, upload.total_chunks
        )));
    }
    let len = upload.chunk.len() as u64;
    if len == 0 {
        return Err(ApiError::BadRequest("Chunk is empty".to_string()));
    }
    if len > chunk_size {
        return Err(ApiError::PayloadTooLarge(format!(
            "Chunk of {} bytes exceeds chunk size {}",
            len, chunk_size
        )));
    }
    if !upload.is_final() && len != chunk_size {
        return Err(ApiError::BadRequest(format!(
            "Chunk {} is {} bytes; only the final chunk may be shorter than {}",
            upload.chunk_index, len, chunk_size
        )));
    }
    Ok(())
}

/// Byte offset of a chunk. Rejects offsets that overflow or would grow the
/// file past `max_bytes`.
pub fn chunk_offset(upload: &ChunkUpload, chunk_size: u64, max_bytes: u64) -> Result<u64, ApiError> {
    let too_far = || {
        ApiError::BadRequest(format!(
            "Chunk {} would end past the {} byte recording limit",
            upload.chunk_index, max_bytes
        ))
    };
    let offset = upload.chunk_index.checked_mul(chunk_size).ok_or_else(too_far)?;
    match offset.checked_add(upload.chunk.len() as u64) {
        Some(end) if end <= max_bytes => Ok(offset),
        _ => Err(too_far()),
    }
}

/// On-disk location of a recording. None when the exam id is not a plain
/// path segment.
pub fn recording_path(recordings_dir: &Path, exam_id: &str, filename: &str) -> Option<PathBuf> {
    match sanitize_filename(exam_id) {
        Some(segment) if segment == exam_id => Some(recordings_dir.join(exam_id).join(filename)),
        _ => None,
    }
}

/// Write `data` at `offset`. When `final_len` is given the file is cut to that
/// length and its (size, crc32) is returned.
fn write_chunk_at(
    path: &Path,
    offset: u64,
    data: &[u8],
    final_len: Option<u64>,
) -> std::io::Result<Option<(u64, u32)>> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.lock_exclusive()?;

    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;

    let summary = match final_len {
        Some(len) => {
            file.set_len(len)?;
            file.sync_all()?;
            file.seek(SeekFrom::Start(0))?;
            let mut hasher = crc32fast::Hasher::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Some((len, hasher.finalize()))
        }
        None => None,
    };

    // the lock is released when the file is closed
    Ok(summary)
}

/// Store one chunk. Returns the recording once the final chunk has landed.
pub async fn receive_chunk(
    state: &AppState,
    upload: ChunkUpload,
) -> Result<Option<Recording>, ApiError> {
    let filename = sanitize_filename(&upload.filename).ok_or_else(|| {
        ApiError::BadRequest(format!("Invalid filename '{}'", upload.filename))
    })?;
    validate_chunk(&upload, state.config.chunk_size)?;
    let offset = chunk_offset(&upload, state.config.chunk_size, state.config.max_recording_bytes)?;
    require_exam(state, &upload.exam_id).await?;

    let path = recording_path(&state.config.recordings_dir(), &upload.exam_id, &filename)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid examId '{}'", upload.exam_id)))?;
    if let Some(exam_dir) = path.parent() {
        tokio::fs::create_dir_all(exam_dir).await?;
    }
    let final_len = upload
        .is_final()
        .then(|| offset + upload.chunk.len() as u64);

    let lock_key = object_key(&upload.exam_id, &filename);
    let lock = state.upload_locks.get(&lock_key);
    let summary = {
        let _guard = lock.lock().await;
        let data = upload.chunk.clone();
        let write_path = path.clone();
        let result = tokio::task::spawn_blocking(move || {
            write_chunk_at(&write_path, offset, &data, final_len)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Chunk writer panicked: {}", e)))?;
        result?
    };
    drop(lock);
    state.upload_locks.release(&lock_key);

    debug!(
        "Wrote chunk {}/{} of {} ({} bytes at offset {})",
        upload.chunk_index + 1,
        upload.total_chunks,
        filename,
        upload.chunk.len(),
        offset
    );

    let (size_bytes, crc32) = match summary {
        Some(summary) => summary,
        None => return Ok(None),
    };

    let mut recording = Recording {
        id: generate_token(),
        exam_id: upload.exam_id.clone(),
        student_id: upload.student_id.clone(),
        filename: filename.clone(),
        uploaded_at: Utc::now().to_rfc3339(),
        size_bytes: size_bytes as i64,
        crc32,
        stored_remotely: false,
    };
    db::upsert_recording(&state.pool, &recording).await?;
    info!(
        "Saved recording {} for student {} in exam {} ({} bytes, crc32 {:08x})",
        filename, upload.student_id, upload.exam_id, size_bytes, crc32
    );

    state.rooms.publish(
        &upload.exam_id,
        &ServerEvent::RecordingSaved {
            filename: filename.clone(),
        },
    );

    if let Some(store) = &state.object_store {
        if let Err(e) = store.upload_file(&path, &lock_key).await {
            error!("Failed to upload {} to object store: {}", filename, e);
            return Err(ApiError::Upstream(format!(
                "Recording saved locally but the object store upload failed: {}",
                e
            )));
        }
        recording.stored_remotely = true;
        db::upsert_recording(&state.pool, &recording).await?;
    }

    Ok(Some(recording))
}

/// Bucket key of a recording, also used as its upload lock key
pub fn object_key(exam_id: &str, filename: &str) -> String {
    format!("{}/{}", exam_id, filename)
}
