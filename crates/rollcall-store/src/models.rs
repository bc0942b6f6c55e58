use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tracked course as persisted and as serialized over HTTP.
///
/// The current confirmation code lives on the same row but is never part of
/// the course payload; see [`CurrentCode`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub section_number: String,
    pub sections: Vec<String>,
    pub professor_name: String,
    pub office_hours: String,
    pub news: String,
    pub total_students: i64,
    pub logo_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client-supplied course attributes, validated and normalized before any
/// insert or full-replacement update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourseDraft {
    pub name: String,
    pub section_number: String,
    pub sections: Vec<String>,
    pub professor_name: String,
    pub office_hours: String,
    pub news: String,
    pub total_students: i64,
    pub logo_path: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CourseSummary {
    pub id: Uuid,
    pub name: String,
}

/// The confirmation code currently stored for a course, expiry included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// One accepted attendance submission. Append-only.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub record_id: i64,
    pub course_id: Uuid,
    pub student_name: String,
    pub student_id: String,
    pub timestamp: DateTime<Utc>,
    pub attendance_date: NaiveDate,
}
