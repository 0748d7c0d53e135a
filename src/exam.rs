//! Exam lifecycle shared by the HTTP and WebSocket surfaces.
//!
//! Each operation persists first, then publishes to the exam's room. There is
//! no state machine: starting twice or ending an exam that never started just
//! overwrites the row.

use chrono::Utc;
use log::info;

use crate::constants::generate_token;
use crate::db;
use crate::error::ApiError;
use crate::events::ServerEvent;
use crate::models::{Exam, ProctorOptions};
use crate::serve::AppState;

/// Create an inactive exam and return its id
pub async fn create_exam(state: &AppState) -> Result<String, ApiError> {
    let exam_id = generate_token();
    db::insert_exam(&state.pool, &exam_id, &Utc::now().to_rfc3339()).await?;
    info!("Created exam {}", exam_id);
    Ok(exam_id)
}

/// Load an exam or fail with `exam_not_found`
pub async fn require_exam(state: &AppState, exam_id: &str) -> Result<Exam, ApiError> {
    db::get_exam(&state.pool, exam_id)
        .await?
        .ok_or_else(|| ApiError::exam_not_found(exam_id))
}

/// Store the options, activate the exam, then announce it to the room
pub async fn start_exam(
    state: &AppState,
    exam_id: &str,
    options: ProctorOptions,
) -> Result<(), ApiError> {
    if db::start_exam(&state.pool, exam_id, &options).await? == 0 {
        return Err(ApiError::exam_not_found(exam_id));
    }
    info!("Started exam {} with {:?}", exam_id, options);

    state.rooms.publish(
        exam_id,
        &ServerEvent::ExamStarted {
            exam_id: exam_id.to_string(),
        },
    );
    state
        .rooms
        .publish(exam_id, &ServerEvent::OptionsPush(options));
    Ok(())
}

/// Deactivate the exam and send a single `exam_ended` to the room
pub async fn end_exam(state: &AppState, exam_id: &str) -> Result<(), ApiError> {
    if db::end_exam(&state.pool, exam_id).await? == 0 {
        return Err(ApiError::exam_not_found(exam_id));
    }
    let reached = state.rooms.publish(exam_id, &ServerEvent::ExamEnded {});
    info!("Ended exam {} ({} subscribers notified)", exam_id, reached);
    Ok(())
}

/// Options a newly joined student should receive.
/// Only an active exam with stored options yields anything; no defaults are invented.
pub fn options_for_join(exam: &Exam) -> Option<ProctorOptions> {
    if exam.active {
        exam.options
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exam(active: bool, options: Option<ProctorOptions>) -> Exam {
        Exam {
            id: "e1".to_string(),
            options,
            active,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_options_for_join() {
        let opts = ProctorOptions {
            camera: true,
            ..Default::default()
        };
        assert_eq!(options_for_join(&exam(true, Some(opts))), Some(opts));
        assert_eq!(options_for_join(&exam(false, Some(opts))), None);
        assert_eq!(options_for_join(&exam(true, None)), None);
    }
}
