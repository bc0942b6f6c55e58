//! Attendance submission pipeline.
//!
//! One public operation, [`SubmissionPipeline::submit`], with a fixed check
//! order: field presence, course existence, code freshness, then the
//! transactional double insert. Only a committed record triggers a
//! present-count broadcast, and a failed broadcast never turns a committed
//! submission into an error.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use rollcall_store::StoreError;

use crate::clock::Clock;
use crate::codes::{CodeEngine, CodeValidation};
use crate::presence::PresenceBus;
use crate::store::StoreHandle;

/// A committed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub student_name: String,
}

/// Why a submission was not committed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("Course not found")]
    CourseMissing,

    #[error("Name, student ID, and confirmation code are all required")]
    FieldMissing,

    #[error("Invalid confirmation code")]
    InvalidCode,

    #[error("Confirmation code has expired")]
    ExpiredCode,

    #[error("Attendance already recorded for this student today")]
    DuplicateStudent,

    #[error("This device has already submitted attendance for this course today")]
    DuplicateDevice,

    #[error("Storage unavailable: {0}")]
    Storage(String),
}

pub struct SubmissionPipeline {
    store: StoreHandle,
    codes: Arc<CodeEngine>,
    presence: PresenceBus,
    clock: Arc<dyn Clock>,
}

impl SubmissionPipeline {
    pub fn new(
        store: StoreHandle,
        codes: Arc<CodeEngine>,
        presence: PresenceBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            codes,
            presence,
            clock,
        }
    }

    pub async fn submit(
        &self,
        course_id: Uuid,
        student_name: &str,
        student_id: &str,
        submitted_code: &str,
        peer_addr: &str,
    ) -> Result<Accepted, Rejection> {
        let student_name = student_name.trim();
        let student_id = student_id.trim();
        let submitted_code = submitted_code.trim();
        if student_name.is_empty() || student_id.is_empty() || submitted_code.is_empty() {
            return Err(Rejection::FieldMissing);
        }

        match self.store.get_course(course_id).await {
            Ok(_) => {}
            Err(StoreError::CourseMissing) => return Err(Rejection::CourseMissing),
            Err(e) => return Err(Rejection::Storage(e.to_string())),
        }

        let now = self.clock.now();
        match self.codes.validate(course_id, submitted_code, now).await {
            Ok(CodeValidation::Valid) => {}
            Ok(CodeValidation::Expired) => return Err(Rejection::ExpiredCode),
            Ok(CodeValidation::Mismatch) => return Err(Rejection::InvalidCode),
            Ok(CodeValidation::CourseMissing) => return Err(Rejection::CourseMissing),
            Err(e) => return Err(Rejection::Storage(e.to_string())),
        }

        match self
            .store
            .record_attendance(
                course_id,
                student_name.to_string(),
                student_id.to_string(),
                now,
                peer_addr.to_string(),
            )
            .await
        {
            Ok(record) => {
                tracing::info!(
                    course = %course_id,
                    student = %record.student_id,
                    "attendance recorded"
                );
            }
            Err(StoreError::DuplicateStudent) => return Err(Rejection::DuplicateStudent),
            Err(StoreError::DuplicateDevice) => return Err(Rejection::DuplicateDevice),
            // The course can vanish between the existence check and the
            // insert; the delete wins.
            Err(StoreError::CourseMissing) => return Err(Rejection::CourseMissing),
            Err(e) => return Err(Rejection::Storage(e.to_string())),
        }

        // The commit stands regardless of what delivery does; the bus logs
        // its own failures.
        self.presence.broadcast(course_id).await;

        Ok(Accepted {
            student_name: student_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ServerConfig;
    use chrono::{DateTime, TimeZone, Utc};
    use rollcall_store::{CourseDraft, Database};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    struct Harness {
        pipeline: SubmissionPipeline,
        store: StoreHandle,
        codes: Arc<CodeEngine>,
        clock: Arc<ManualClock>,
        bus: PresenceBus,
        course: Uuid,
    }

    async fn harness() -> Harness {
        let store = StoreHandle::new(
            Database::open_in_memory().unwrap(),
            std::time::Duration::from_secs(5),
        );
        let clock = Arc::new(ManualClock::starting_at(t0()));
        let course = store
            .create_course(
                CourseDraft {
                    name: "CS 101".into(),
                    section_number: "001".into(),
                    sections: vec!["001".into()],
                    professor_name: "Prof".into(),
                    office_hours: String::new(),
                    news: String::new(),
                    total_students: 0,
                    logo_path: String::new(),
                },
                t0(),
            )
            .await
            .unwrap()
            .id;

        let codes = Arc::new(CodeEngine::seeded(
            store.clone(),
            Arc::clone(&clock) as Arc<dyn Clock>,
            &ServerConfig::default(),
            9,
        ));
        let bus = PresenceBus::new(store.clone(), Arc::clone(&clock) as Arc<dyn Clock>);
        let pipeline = SubmissionPipeline::new(
            store.clone(),
            Arc::clone(&codes),
            bus.clone(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        Harness {
            pipeline,
            store,
            codes,
            clock,
            bus,
            course,
        }
    }

    #[tokio::test]
    async fn happy_path_commits_and_broadcasts() {
        let h = harness().await;
        let code = h.codes.current(h.course).await.unwrap().code;
        let (_id, mut rx) = h.bus.subscribe(h.course).await;

        h.clock.advance(chrono::Duration::seconds(10));
        let accepted = h
            .pipeline
            .submit(h.course, "Ada Lovelace", "S001", &code, "10.0.0.5")
            .await
            .unwrap();

        assert_eq!(accepted.student_name, "Ada Lovelace");
        assert_eq!(
            h.store.present_count(h.course, t0().date_naive()).await.unwrap(),
            1
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            crate::presence::DashboardEvent::AttendanceUpdate { present_count: 1 }
        );
    }

    #[tokio::test]
    async fn blank_fields_rejected_before_anything_else() {
        let h = harness().await;

        // Even with an unknown course, missing fields win.
        let err = h
            .pipeline
            .submit(Uuid::new_v4(), "  ", "S001", "AAAAAA", "10.0.0.5")
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::FieldMissing);

        for (name, sid, code) in [("Ada", "", "AAAAAA"), ("Ada", "S001", "   ")] {
            let err = h
                .pipeline
                .submit(h.course, name, sid, code, "10.0.0.5")
                .await
                .unwrap_err();
            assert_eq!(err, Rejection::FieldMissing);
        }
    }

    #[tokio::test]
    async fn unknown_course_rejected() {
        let h = harness().await;
        let err = h
            .pipeline
            .submit(Uuid::new_v4(), "Ada", "S001", "AAAAAA", "10.0.0.5")
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::CourseMissing);
    }

    #[tokio::test]
    async fn wrong_code_rejected_without_side_effects() {
        let h = harness().await;
        let code = h.codes.current(h.course).await.unwrap().code;
        let wrong = if code == "AAAAAA" { "BBBBBB" } else { "AAAAAA" };

        let err = h
            .pipeline
            .submit(h.course, "Ada", "S001", wrong, "10.0.0.5")
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::InvalidCode);

        assert_eq!(
            h.store.present_count(h.course, t0().date_naive()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn expired_code_rejected_then_fresh_code_works() {
        let h = harness().await;
        let first = h.codes.current(h.course).await.unwrap();

        // One second past the (inclusive) deadline.
        h.clock.set(first.expires_at + chrono::Duration::seconds(1));
        let err = h
            .pipeline
            .submit(h.course, "Blaise Pascal", "S003", &first.code, "10.0.0.7")
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::ExpiredCode);

        // The rejection did not mint; a current() read does.
        let second = h.codes.current(h.course).await.unwrap();
        assert_ne!(second.code, first.code);
        h.pipeline
            .submit(h.course, "Blaise Pascal", "S003", &second.code, "10.0.0.7")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_student_and_device() {
        let h = harness().await;
        let code = h.codes.current(h.course).await.unwrap().code;
        let (_id, mut rx) = h.bus.subscribe(h.course).await;

        h.pipeline
            .submit(h.course, "Ada Lovelace", "S001", &code, "10.0.0.5")
            .await
            .unwrap();
        let _ = rx.try_recv();

        // Same student, different device.
        let err = h
            .pipeline
            .submit(h.course, "Ada Lovelace", "S001", &code, "10.0.0.9")
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::DuplicateStudent);

        // Different student, same device.
        let err = h
            .pipeline
            .submit(h.course, "Other Person", "S002", &code, "10.0.0.5")
            .await
            .unwrap_err();
        assert_eq!(err, Rejection::DuplicateDevice);

        // No broadcast for either rejection, no ghost rows.
        assert!(rx.try_recv().is_err());
        assert_eq!(
            h.store.present_count(h.course, t0().date_naive()).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn fields_are_trimmed_before_use() {
        let h = harness().await;
        let code = h.codes.current(h.course).await.unwrap().code;

        let accepted = h
            .pipeline
            .submit(h.course, "  Ada Lovelace  ", " S001 ", &format!(" {code} "), "10.0.0.5")
            .await
            .unwrap();
        assert_eq!(accepted.student_name, "Ada Lovelace");

        let roll = h.store.list_attendance(h.course).await.unwrap();
        assert_eq!(roll[0].student_name, "Ada Lovelace");
        assert_eq!(roll[0].student_id, "S001");
    }
}
