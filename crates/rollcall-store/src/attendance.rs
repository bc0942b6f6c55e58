use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, TransactionBehavior};
use uuid::Uuid;

use crate::courses::parse_utc;
use crate::database::Database;
use crate::error::{map_constraint_violation, Result, StoreError};
use crate::models::AttendanceRecord;

const DATE_FMT: &str = "%Y-%m-%d";

impl Database {
    /// Append one attendance record and its device-submission row in a single
    /// transaction. Either unique index firing rolls the whole thing back.
    ///
    /// The caller has already trimmed and validated the student fields.
    pub fn record_attendance(
        &mut self,
        course_id: Uuid,
        student_name: &str,
        student_id: &str,
        now: DateTime<Utc>,
        peer_addr: &str,
    ) -> Result<AttendanceRecord> {
        let day = now.date_naive();
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let course_known: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM courses WHERE id = ?1",
                params![course_id.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if course_known.is_none() {
            return Err(StoreError::CourseMissing);
        }

        tx.execute(
            "INSERT INTO attendance_records
                 (course_id, student_name, student_id, timestamp, attendance_date)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                course_id.to_string(),
                student_name,
                student_id,
                now.to_rfc3339(),
                day.format(DATE_FMT).to_string(),
            ],
        )
        .map_err(map_constraint_violation)?;
        let record_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO device_submissions (course_id, ip_address, timestamp, submission_date)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                course_id.to_string(),
                peer_addr,
                now.to_rfc3339(),
                day.format(DATE_FMT).to_string(),
            ],
        )
        .map_err(map_constraint_violation)?;

        tx.commit()?;

        Ok(AttendanceRecord {
            record_id,
            course_id,
            student_name: student_name.to_string(),
            student_id: student_id.to_string(),
            timestamp: now,
            attendance_date: day,
        })
    }

    /// Number of accepted attendance records for a course on a calendar day.
    pub fn present_count(&self, course_id: Uuid, date: NaiveDate) -> Result<i64> {
        if !self.course_exists(course_id)? {
            return Err(StoreError::CourseMissing);
        }

        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM attendance_records
             WHERE course_id = ?1 AND attendance_date = ?2",
            params![course_id.to_string(), date.format(DATE_FMT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Every attendance record for a course, oldest first. Feeds the CSV
    /// roll export.
    pub fn list_attendance(&self, course_id: Uuid) -> Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT record_id, course_id, student_name, student_id, timestamp, attendance_date
             FROM attendance_records
             WHERE course_id = ?1
             ORDER BY timestamp ASC, record_id ASC",
        )?;
        let rows = stmt.query_map(params![course_id.to_string()], row_to_record)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    #[cfg(test)]
    fn device_submission_count(&self, course_id: Uuid) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM device_submissions WHERE course_id = ?1",
            params![course_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let record_id: i64 = row.get(0)?;
    let course_id_str: String = row.get(1)?;
    let student_name: String = row.get(2)?;
    let student_id: String = row.get(3)?;
    let ts_str: String = row.get(4)?;
    let date_str: String = row.get(5)?;

    let course_id = Uuid::parse_str(&course_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let timestamp = parse_utc(&ts_str, 4)?;
    let attendance_date = NaiveDate::parse_from_str(&date_str, DATE_FMT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AttendanceRecord {
        record_id,
        course_id,
        student_name,
        student_id,
        timestamp,
        attendance_date,
    })
}
