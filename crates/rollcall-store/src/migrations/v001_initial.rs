//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `courses`, `attendance_records`, and
//! `preferences`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Courses
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS courses (
    id             TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name           TEXT NOT NULL,
    section_number TEXT NOT NULL,               -- primary section label
    sections       TEXT NOT NULL,               -- JSON array, sorted
    professor_name TEXT NOT NULL,
    office_hours   TEXT NOT NULL,
    news           TEXT NOT NULL,
    total_students INTEGER NOT NULL DEFAULT 0,
    logo_path      TEXT NOT NULL,

    -- Rotating confirmation code; both columns NULL until first mint.
    confirmation_code            TEXT,
    confirmation_code_expires_at TEXT,          -- ISO-8601 / RFC-3339

    created_at     TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    updated_at     TEXT NOT NULL
);

-- Display names are unique regardless of case.
CREATE UNIQUE INDEX IF NOT EXISTS idx_courses_name_ci ON courses(lower(name));

-- ----------------------------------------------------------------
-- Attendance records
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS attendance_records (
    record_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id       TEXT NOT NULL,
    student_name    TEXT NOT NULL,
    student_id      TEXT NOT NULL,
    timestamp       TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    attendance_date TEXT NOT NULL,              -- YYYY-MM-DD, UTC day of timestamp

    FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
);

-- One attendance per student per course per UTC day.
CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_student_day
    ON attendance_records(course_id, student_id, attendance_date);

CREATE INDEX IF NOT EXISTS idx_attendance_course_ts
    ON attendance_records(course_id, timestamp);

-- ----------------------------------------------------------------
-- Preferences (key -> value)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS preferences (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL                         -- empty string means unset
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
