use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{map_constraint_violation, Result, StoreError};
use crate::models::{Course, CourseDraft, CourseSummary, CurrentCode};

impl Database {
    /// Validate and persist a new course. The caller supplies `now` so the
    /// clock stays injectable.
    pub fn create_course(&self, draft: &CourseDraft, now: DateTime<Utc>) -> Result<Course> {
        let draft = normalize_draft(draft)?;
        let course = Course {
            id: Uuid::new_v4(),
            name: draft.name,
            section_number: draft.section_number,
            sections: draft.sections,
            professor_name: draft.professor_name,
            office_hours: draft.office_hours,
            news: draft.news,
            total_students: draft.total_students,
            logo_path: draft.logo_path,
            created_at: now,
            updated_at: now,
        };

        self.conn()
            .execute(
                "INSERT INTO courses (id, name, section_number, sections, professor_name,
                                      office_hours, news, total_students, logo_path,
                                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    course.id.to_string(),
                    course.name,
                    course.section_number,
                    sections_to_json(&course.sections),
                    course.professor_name,
                    course.office_hours,
                    course.news,
                    course.total_students,
                    course.logo_path,
                    course.created_at.to_rfc3339(),
                    course.updated_at.to_rfc3339(),
                ],
            )
            .map_err(map_constraint_violation)?;

        Ok(course)
    }

    pub fn get_course(&self, id: Uuid) -> Result<Course> {
        self.conn()
            .query_row(
                "SELECT id, name, section_number, sections, professor_name, office_hours,
                        news, total_students, logo_path, created_at, updated_at
                 FROM courses WHERE id = ?1",
                params![id.to_string()],
                row_to_course,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::CourseMissing,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn course_exists(&self, id: Uuid) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM courses WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found.is_some())
    }

    /// `{id, name}` pairs for every course, name-ascending and stable.
    pub fn list_courses(&self) -> Result<Vec<CourseSummary>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name FROM courses ORDER BY lower(name) ASC, id ASC")?;
        let rows = stmt.query_map([], |row| {
            let id_str: String = row.get(0)?;
            let name: String = row.get(1)?;
            let id = Uuid::parse_str(&id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(CourseSummary { id, name })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Full course rows in the same order as [`Database::list_courses`].
    pub fn all_courses(&self) -> Result<Vec<Course>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, section_number, sections, professor_name, office_hours,
                    news, total_students, logo_path, created_at, updated_at
             FROM courses ORDER BY lower(name) ASC, id ASC",
        )?;
        let rows = stmt.query_map([], row_to_course)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Full replacement of a course's attributes. Bumps `updated_at`,
    /// leaves `created_at` and any stored confirmation code untouched.
    pub fn update_course(
        &self,
        id: Uuid,
        draft: &CourseDraft,
        now: DateTime<Utc>,
    ) -> Result<Course> {
        let draft = normalize_draft(draft)?;
        let existing = self.get_course(id)?;

        self.conn()
            .execute(
                "UPDATE courses
                 SET name = ?1, section_number = ?2, sections = ?3, professor_name = ?4,
                     office_hours = ?5, news = ?6, total_students = ?7, logo_path = ?8,
                     updated_at = ?9
                 WHERE id = ?10",
                params![
                    draft.name,
                    draft.section_number,
                    sections_to_json(&draft.sections),
                    draft.professor_name,
                    draft.office_hours,
                    draft.news,
                    draft.total_students,
                    draft.logo_path,
                    now.to_rfc3339(),
                    id.to_string(),
                ],
            )
            .map_err(map_constraint_violation)?;

        Ok(Course {
            id,
            name: draft.name,
            section_number: draft.section_number,
            sections: draft.sections,
            professor_name: draft.professor_name,
            office_hours: draft.office_hours,
            news: draft.news,
            total_students: draft.total_students,
            logo_path: draft.logo_path,
            created_at: existing.created_at,
            updated_at: now,
        })
    }

    /// Delete a course. Attendance and device rows cascade via foreign keys;
    /// a matching `current_course_id` preference is cleared in the same
    /// transaction.
    pub fn delete_course(&mut self, id: Uuid) -> Result<()> {
        let tx = self.conn_mut().transaction()?;

        let affected = tx.execute("DELETE FROM courses WHERE id = ?1", params![id.to_string()])?;
        if affected == 0 {
            return Err(StoreError::CourseMissing);
        }

        tx.execute(
            "UPDATE preferences SET value = '' WHERE key = 'current_course_id' AND value = ?1",
            params![id.to_string()],
        )?;

        tx.commit()?;
        tracing::info!(course = %id, "deleted course");
        Ok(())
    }

    pub fn set_current_code(
        &self,
        course_id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE courses SET confirmation_code = ?1, confirmation_code_expires_at = ?2
             WHERE id = ?3",
            params![code, expires_at.to_rfc3339(), course_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::CourseMissing);
        }
        Ok(())
    }

    /// The stored code for a course, if one has ever been minted. Expiry is
    /// not checked here; that is the code engine's call to make.
    pub fn read_current_code(&self, course_id: Uuid) -> Result<Option<CurrentCode>> {
        let row: (Option<String>, Option<String>) = self
            .conn()
            .query_row(
                "SELECT confirmation_code, confirmation_code_expires_at
                 FROM courses WHERE id = ?1",
                params![course_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::CourseMissing,
                other => StoreError::Sqlite(other),
            })?;

        match row {
            (Some(code), Some(expires)) => {
                let expires_at = DateTime::parse_from_rfc3339(&expires)
                    .map(|dt| dt.with_timezone(&Utc))?;
                Ok(Some(CurrentCode { code, expires_at }))
            }
            _ => Ok(None),
        }
    }
}

/// Trim, sort, and validate a draft. Name uniqueness is left to the
/// storage-level index.
fn normalize_draft(draft: &CourseDraft) -> Result<CourseDraft> {
    let name = draft.name.trim().to_string();
    if name.is_empty() {
        return Err(StoreError::InvalidCourse(
            "course name must not be empty".into(),
        ));
    }
    if draft.total_students < 0 {
        return Err(StoreError::InvalidCourse(
            "total_students must be non-negative".into(),
        ));
    }

    let section_number = draft.section_number.trim().to_string();
    let mut sections: Vec<String> = draft
        .sections
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    sections.sort();
    sections.dedup();

    if sections.is_empty() {
        return Err(StoreError::InvalidCourse(
            "at least one section is required".into(),
        ));
    }
    if !sections.contains(&section_number) {
        return Err(StoreError::InvalidCourse(
            "primary section must be one of the listed sections".into(),
        ));
    }

    Ok(CourseDraft {
        name,
        section_number,
        sections,
        professor_name: draft.professor_name.trim().to_string(),
        office_hours: draft.office_hours.clone(),
        news: draft.news.clone(),
        total_students: draft.total_students,
        logo_path: draft.logo_path.clone(),
    })
}

fn sections_to_json(sections: &[String]) -> String {
    serde_json::to_string(sections).unwrap_or_else(|_| "[]".to_string())
}

fn row_to_course(row: &rusqlite::Row<'_>) -> rusqlite::Result<Course> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let section_number: String = row.get(2)?;
    let sections_json: String = row.get(3)?;
    let professor_name: String = row.get(4)?;
    let office_hours: String = row.get(5)?;
    let news: String = row.get(6)?;
    let total_students: i64 = row.get(7)?;
    let logo_path: String = row.get(8)?;
    let created_str: String = row.get(9)?;
    let updated_str: String = row.get(10)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sections: Vec<String> = serde_json::from_str(&sections_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at = parse_utc(&created_str, 9)?;
    let updated_at = parse_utc(&updated_str, 10)?;

    Ok(Course {
        id,
        name,
        section_number,
        sections,
        professor_name,
        office_hours,
        news,
        total_students,
        logo_path,
        created_at,
        updated_at,
    })
}

pub(crate) fn parse_utc(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
