//! CSV roll export.
//!
//! One row per attendance record, oldest first, so the export round-trips
//! the stored roll exactly.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue};
use uuid::Uuid;

use rollcall_store::{AttendanceRecord, Course};

use crate::api::AppState;
use crate::error::ServerError;

pub async fn export_roll(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> Result<(HeaderMap, Vec<u8>), ServerError> {
    let course = state.store.get_course(course_id).await?;
    let records = state.store.list_attendance(course_id).await?;
    let body = render_roll_csv(&course, &records)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    let disposition = format!("attachment; filename=\"attendance-{}.csv\"", course.id);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .map_err(|e| ServerError::Internal(format!("export header: {e}")))?,
    );

    tracing::info!(course = %course.id, rows = records.len(), "exported attendance roll");
    Ok((headers, body))
}

fn render_roll_csv(course: &Course, records: &[AttendanceRecord]) -> Result<Vec<u8>, ServerError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record([
            "timestamp",
            "student_name",
            "student_id",
            "course_name",
            "course_id",
        ])
        .map_err(|e| ServerError::Internal(format!("CSV write failed: {e}")))?;

    for record in records {
        writer
            .write_record([
                record.timestamp.to_rfc3339().as_str(),
                record.student_name.as_str(),
                record.student_id.as_str(),
                course.name.as_str(),
                course.id.to_string().as_str(),
            ])
            .map_err(|e| ServerError::Internal(format!("CSV write failed: {e}")))?;
    }

    writer
        .into_inner()
        .map_err(|e| ServerError::Internal(format!("CSV flush failed: {e}")))
}
