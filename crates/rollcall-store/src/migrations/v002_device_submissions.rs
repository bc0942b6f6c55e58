//! v002 -- Per-device submission tracking.
//!
//! One row per accepted submission keyed by the submitting peer address, so
//! a single device cannot mark several students present on the same day.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS device_submissions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id       TEXT NOT NULL,
    ip_address      TEXT NOT NULL,              -- textual peer address
    timestamp       TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    submission_date TEXT NOT NULL,              -- YYYY-MM-DD, UTC day of timestamp

    FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
);

-- One submission per device per course per UTC day.
CREATE UNIQUE INDEX IF NOT EXISTS idx_device_submissions_day
    ON device_submissions(course_id, ip_address, submission_date);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
