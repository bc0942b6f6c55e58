//! Key/value app preferences.
//!
//! The core uses a single key, `current_course_id`; everything else in this
//! table belongs to UI collaborators. An empty value means "unset".

use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;

pub const CURRENT_COURSE_ID_KEY: &str = "current_course_id";

impl Database {
    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self
            .conn()
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(value.filter(|v| !v.is_empty()))
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// The currently selected course for the dashboard.
    ///
    /// A stored value that no longer parses or no longer refers to an
    /// existing course is repaired to unset before returning.
    pub fn current_course_id(&self) -> Result<Option<Uuid>> {
        let Some(raw) = self.get_preference(CURRENT_COURSE_ID_KEY)? else {
            return Ok(None);
        };

        let repaired = match Uuid::parse_str(&raw) {
            Ok(id) if self.course_exists(id)? => return Ok(Some(id)),
            Ok(id) => {
                tracing::warn!(course = %id, "current course no longer exists, clearing preference");
                None
            }
            Err(_) => {
                tracing::warn!(value = %raw, "unparseable current_course_id, clearing preference");
                None
            }
        };

        self.set_preference(CURRENT_COURSE_ID_KEY, "")?;
        Ok(repaired)
    }

    pub fn set_current_course_id(&self, course_id: Uuid) -> Result<()> {
        self.set_preference(CURRENT_COURSE_ID_KEY, &course_id.to_string())
    }
}
