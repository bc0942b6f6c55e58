//! Async facade over the synchronous store.
//!
//! [`StoreHandle`] is a thin `Arc<Mutex<Database>>` shared by every handler
//! and background task. Each operation runs on tokio's blocking pool under a
//! deadline; a missed deadline surfaces as [`StoreError::Unavailable`] so
//! callers never hang on a wedged database.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use rollcall_store::{
    AttendanceRecord, Course, CourseDraft, CourseSummary, CurrentCode, Database, StoreError,
};

#[derive(Clone)]
pub struct StoreHandle {
    db: Arc<Mutex<Database>>,
    deadline: Duration,
}

impl StoreHandle {
    pub fn new(db: Database, deadline: Duration) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            deadline,
        }
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let task = tokio::task::spawn_blocking(move || {
            let mut db = db.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut db)
        });

        match tokio::time::timeout(self.deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(StoreError::Unavailable(format!("{op} worker failed: {join}"))),
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} exceeded the {:?} storage deadline",
                self.deadline
            ))),
        }
    }

    pub async fn create_course(
        &self,
        draft: CourseDraft,
        now: DateTime<Utc>,
    ) -> Result<Course, StoreError> {
        self.run("create_course", move |db| db.create_course(&draft, now))
            .await
    }

    pub async fn get_course(&self, id: Uuid) -> Result<Course, StoreError> {
        self.run("get_course", move |db| db.get_course(id)).await
    }

    pub async fn list_courses(&self) -> Result<Vec<CourseSummary>, StoreError> {
        self.run("list_courses", |db| db.list_courses()).await
    }

    pub async fn all_courses(&self) -> Result<Vec<Course>, StoreError> {
        self.run("all_courses", |db| db.all_courses()).await
    }

    pub async fn update_course(
        &self,
        id: Uuid,
        draft: CourseDraft,
        now: DateTime<Utc>,
    ) -> Result<Course, StoreError> {
        self.run("update_course", move |db| db.update_course(id, &draft, now))
            .await
    }

    pub async fn delete_course(&self, id: Uuid) -> Result<(), StoreError> {
        self.run("delete_course", move |db| db.delete_course(id))
            .await
    }

    pub async fn record_attendance(
        &self,
        course_id: Uuid,
        student_name: String,
        student_id: String,
        now: DateTime<Utc>,
        peer_addr: String,
    ) -> Result<AttendanceRecord, StoreError> {
        self.run("record_attendance", move |db| {
            db.record_attendance(course_id, &student_name, &student_id, now, &peer_addr)
        })
        .await
    }

    pub async fn present_count(
        &self,
        course_id: Uuid,
        date: NaiveDate,
    ) -> Result<i64, StoreError> {
        self.run("present_count", move |db| db.present_count(course_id, date))
            .await
    }

    pub async fn list_attendance(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.run("list_attendance", move |db| db.list_attendance(course_id))
            .await
    }

    pub async fn set_current_code(
        &self,
        course_id: Uuid,
        code: String,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.run("set_current_code", move |db| {
            db.set_current_code(course_id, &code, expires_at)
        })
        .await
    }

    pub async fn read_current_code(
        &self,
        course_id: Uuid,
    ) -> Result<Option<CurrentCode>, StoreError> {
        self.run("read_current_code", move |db| db.read_current_code(course_id))
            .await
    }

    pub async fn current_course_id(&self) -> Result<Option<Uuid>, StoreError> {
        self.run("current_course_id", |db| db.current_course_id())
            .await
    }

    pub async fn set_current_course_id(&self, course_id: Uuid) -> Result<(), StoreError> {
        self.run("set_current_course_id", move |db| {
            db.set_current_course_id(course_id)
        })
        .await
    }
}
