//! Rotating confirmation-code engine.
//!
//! Each course has at most one active code, stored on its course row. Reads
//! go through [`CodeEngine::current`], which lazily mints a replacement when
//! the stored code is absent or past its expiry; a per-course lock guarantees
//! that concurrent readers observing an expired code produce exactly one
//! successor. A background loop re-checks every course on the code-lifetime
//! interval so the dashboard never has to wait for a mint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use uuid::Uuid;

use rollcall_store::StoreError;

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::store::StoreHandle;

/// A code the dashboard can display right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub seconds_remaining: i64,
}

/// Outcome of checking a submitted code. A code that was never minted
/// reports `Expired`, same as one past its deadline; the student reaction
/// (re-read the dashboard) is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeValidation {
    Valid,
    Expired,
    Mismatch,
    CourseMissing,
}

pub struct CodeEngine {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
    lifetime: ChronoDuration,
    length: usize,
    alphabet: Vec<char>,
    rng: StdMutex<StdRng>,
    // One mint guard per course; insertion into the map is itself guarded.
    mint_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CodeEngine {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>, config: &ServerConfig) -> Self {
        Self::with_rng(store, clock, config, StdRng::from_entropy())
    }

    /// Same as [`CodeEngine::new`] with a caller-supplied RNG. Production
    /// always seeds from OS entropy; tests pass a fixed seed.
    fn with_rng(
        store: StoreHandle,
        clock: Arc<dyn Clock>,
        config: &ServerConfig,
        rng: StdRng,
    ) -> Self {
        let lifetime_secs = config.code_lifetime.as_secs().min(i64::MAX as u64) as i64;
        Self {
            store,
            clock,
            lifetime: ChronoDuration::seconds(lifetime_secs),
            length: config.code_length,
            alphabet: config.code_alphabet.clone(),
            rng: StdMutex::new(rng),
            mint_locks: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub fn seeded(
        store: StoreHandle,
        clock: Arc<dyn Clock>,
        config: &ServerConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(store, clock, config, StdRng::seed_from_u64(seed))
    }

    /// The currently valid code for a course, minting a fresh one if the
    /// stored code is absent or expired.
    pub async fn current(&self, course_id: Uuid) -> Result<ActiveCode, StoreError> {
        let guard = self.mint_lock(course_id).await;
        let _minting = guard.lock().await;

        let now = self.clock.now();
        if let Some(stored) = self.store.read_current_code(course_id).await? {
            if now < stored.expires_at {
                return Ok(ActiveCode {
                    seconds_remaining: (stored.expires_at - now).num_seconds(),
                    code: stored.code,
                    expires_at: stored.expires_at,
                });
            }
        }

        let code = self.fresh_code();
        let expires_at = now + self.lifetime;
        self.store
            .set_current_code(course_id, code.clone(), expires_at)
            .await?;

        tracing::debug!(course = %course_id, expires_at = %expires_at, "minted confirmation code");

        Ok(ActiveCode {
            code,
            expires_at,
            seconds_remaining: self.lifetime.num_seconds(),
        })
    }

    /// Check a submitted code against the stored one. Never mints; the code
    /// is dead at `now >= expires_at`, the deadline itself included.
    pub async fn validate(
        &self,
        course_id: Uuid,
        submitted_code: &str,
        now: DateTime<Utc>,
    ) -> Result<CodeValidation, StoreError> {
        let stored = match self.store.read_current_code(course_id).await {
            Ok(stored) => stored,
            Err(StoreError::CourseMissing) => return Ok(CodeValidation::CourseMissing),
            Err(other) => return Err(other),
        };

        Ok(match stored {
            None => CodeValidation::Expired,
            Some(stored) if now >= stored.expires_at => CodeValidation::Expired,
            Some(stored) if stored.code == submitted_code => CodeValidation::Valid,
            Some(_) => CodeValidation::Mismatch,
        })
    }

    /// Drop the mint guard for a deleted course. The stored code itself dies
    /// with the course row.
    pub async fn forget(&self, course_id: Uuid) {
        self.mint_locks.lock().await.remove(&course_id);
    }

    async fn mint_lock(&self, course_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.mint_locks.lock().await;
        Arc::clone(locks.entry(course_id).or_default())
    }

    /// Uniform draw of `length` symbols from the alphabet. One RNG lock per
    /// mint, never held across an await.
    fn fresh_code(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect()
    }
}

/// Background refresh: re-check every course once per code lifetime. The
/// first tick fires immediately so all courses have a code at startup;
/// `current()` only mints when needed, so this loop and lazy dashboard
/// reads never double-mint.
pub fn spawn_refresh_loop(
    engine: Arc<CodeEngine>,
    store: StoreHandle,
    period: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;

            let courses = match store.list_courses().await {
                Ok(courses) => courses,
                Err(e) => {
                    tracing::error!(error = %e, "failed to list courses for code refresh");
                    continue;
                }
            };

            for course in courses {
                if let Err(e) = engine.current(course.id).await {
                    tracing::warn!(course = %course.id, error = %e, "code refresh failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use rollcall_store::{CourseDraft, Database};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    async fn setup() -> (StoreHandle, Arc<ManualClock>, Uuid) {
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
            .unwrap();
        (store, clock, course.id)
    }

    fn engine(store: &StoreHandle, clock: &Arc<ManualClock>, seed: u64) -> CodeEngine {
        CodeEngine::seeded(
            store.clone(),
            Arc::clone(clock) as Arc<dyn Clock>,
            &ServerConfig::default(),
            seed,
        )
    }

    #[tokio::test]
    async fn mints_on_first_read() {
        let (store, clock, course) = setup().await;
        let engine = engine(&store, &clock, 7);

        let active = engine.current(course).await.unwrap();
        assert_eq!(active.code.len(), 6);
        assert!(active
            .code
            .chars()
            .all(|c| crate::config::CODE_ALPHABET.contains(c)));
        assert_eq!(active.expires_at, t0() + ChronoDuration::seconds(300));
        assert_eq!(active.seconds_remaining, 300);

        // Persisted, not just cached.
        let stored = store.read_current_code(course).await.unwrap().unwrap();
        assert_eq!(stored.code, active.code);
    }

    #[tokio::test]
    async fn fresh_code_is_returned_unchanged() {
        let (store, clock, course) = setup().await;
        let engine = engine(&store, &clock, 7);

        let first = engine.current(course).await.unwrap();
        clock.advance(ChronoDuration::seconds(100));

        let second = engine.current(course).await.unwrap();
        assert_eq!(second.code, first.code);
        assert_eq!(second.expires_at, first.expires_at);
        assert_eq!(second.seconds_remaining, 200);
    }

    #[tokio::test]
    async fn remints_after_expiry() {
        let (store, clock, course) = setup().await;
        let engine = engine(&store, &clock, 7);

        let first = engine.current(course).await.unwrap();

        // The deadline itself is already expired.
        clock.set(first.expires_at);
        let second = engine.current(course).await.unwrap();
        assert_ne!(second.code, first.code);
        assert_eq!(second.expires_at, first.expires_at + ChronoDuration::seconds(300));
    }

    #[tokio::test]
    async fn validate_boundaries() {
        let (store, clock, course) = setup().await;
        let engine = engine(&store, &clock, 7);

        // Nothing minted yet.
        assert_eq!(
            engine.validate(course, "AAAAAA", t0()).await.unwrap(),
            CodeValidation::Expired
        );

        let active = engine.current(course).await.unwrap();

        let just_before = active.expires_at - ChronoDuration::seconds(1);
        assert_eq!(
            engine.validate(course, &active.code, just_before).await.unwrap(),
            CodeValidation::Valid
        );

        // Expiry is inclusive.
        assert_eq!(
            engine
                .validate(course, &active.code, active.expires_at)
                .await
                .unwrap(),
            CodeValidation::Expired
        );

        assert_eq!(
            engine
                .validate(Uuid::new_v4(), &active.code, just_before)
                .await
                .unwrap(),
            CodeValidation::CourseMissing
        );
    }

    #[tokio::test]
    async fn validate_is_case_sensitive() {
        let (store, clock, course) = setup().await;
        let engine = engine(&store, &clock, 7);

        let expires = t0() + ChronoDuration::seconds(300);
        store
            .set_current_code(course, "AB3DE6".to_string(), expires)
            .await
            .unwrap();

        assert_eq!(
            engine.validate(course, "AB3DE6", t0()).await.unwrap(),
            CodeValidation::Valid
        );
        assert_eq!(
            engine.validate(course, "ab3de6", t0()).await.unwrap(),
            CodeValidation::Mismatch
        );
        assert_eq!(
            engine.validate(course, "AB3DE7", t0()).await.unwrap(),
            CodeValidation::Mismatch
        );
    }

    #[tokio::test]
    async fn validate_never_mints() {
        let (store, clock, course) = setup().await;
        let engine = engine(&store, &clock, 7);

        engine.validate(course, "AAAAAA", t0()).await.unwrap();
        assert_eq!(store.read_current_code(course).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_reads_mint_exactly_once() {
        let (store, clock, course) = setup().await;
        let shared = Arc::new(engine(&store, &clock, 42));

        let a = Arc::clone(&shared);
        let b = Arc::clone(&shared);
        let (first, second) = tokio::join!(a.current(course), b.current(course));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first, second);

        // A same-seeded engine's first draw matches, proving the pair above
        // consumed exactly one draw between them.
        let (other_store, other_clock, other_course) = setup().await;
        let reference = engine(&other_store, &other_clock, 42);
        let reference_code = reference.current(other_course).await.unwrap();
        assert_eq!(first.code, reference_code.code);
    }

    #[tokio::test]
    async fn missing_course_surfaces() {
        let (store, clock, _) = setup().await;
        let engine = engine(&store, &clock, 7);

        let err = engine.current(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::CourseMissing));
    }
}
