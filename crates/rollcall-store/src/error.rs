use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Course not found")]
    CourseMissing,

    #[error("Course name already in use")]
    DuplicateName,

    #[error("Attendance already recorded for this student today")]
    DuplicateStudent,

    #[error("This device has already submitted attendance for this course today")]
    DuplicateDevice,

    #[error("Invalid course: {0}")]
    InvalidCourse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Map a unique-constraint failure to the typed conflict for the violated
/// index. SQLite names the columns for plain indexes and the index itself
/// for expression indexes, so both spellings are checked.
pub(crate) fn map_constraint_violation(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(err, Some(msg)) = &e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation {
            if msg.contains("attendance_records") {
                return StoreError::DuplicateStudent;
            }
            if msg.contains("device_submissions") {
                return StoreError::DuplicateDevice;
            }
            if msg.contains("idx_courses_name_ci") || msg.contains("courses.") {
                return StoreError::DuplicateName;
            }
        }
    }
    StoreError::Sqlite(e)
}
