//! Presence bus: live present-count fan-out to dashboard viewers.
//!
//! Subscribers are grouped into per-course rooms. A broadcast reads today's
//! present-count once and pushes it to every subscriber in the room over its
//! bounded channel; delivery is best-effort, at most once per broadcast.
//! Broadcasts for the same course are serialized through a per-room gate, so
//! any single subscriber observes non-decreasing counts within a day.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{utc_day, Clock};
use crate::store::StoreHandle;

/// Server-to-dashboard event. Serializes to
/// `{"type":"attendance_update","presentCount":N}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    AttendanceUpdate {
        #[serde(rename = "presentCount")]
        present_count: i64,
    },
}

/// How many undelivered events a single subscriber may queue. A viewer that
/// falls further behind simply misses intermediate counts and catches up on
/// the next broadcast.
const SUBSCRIBER_QUEUE: usize = 32;

struct Room {
    subscribers: HashMap<u64, mpsc::Sender<DashboardEvent>>,
    /// Serializes broadcasts for this course; never held while the rooms
    /// map lock is held.
    gate: Arc<Mutex<()>>,
}

impl Room {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            gate: Arc::new(Mutex::new(())),
        }
    }
}

/// Registry of dashboard subscribers keyed by course id.
///
/// Thread-safe via `Arc<RwLock<..>>` interior; callers obtain a handle via
/// `clone()`.
#[derive(Clone)]
pub struct PresenceBus {
    rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
    store: StoreHandle,
    clock: Arc<dyn Clock>,
    next_id: Arc<AtomicU64>,
}

impl PresenceBus {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            store,
            clock,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Add a subscriber to a course room.
    ///
    /// Returns the subscriber id (the cancellation token for
    /// [`PresenceBus::unsubscribe`]) and the receiver to drain.
    pub async fn subscribe(&self, course_id: Uuid) -> (u64, mpsc::Receiver<DashboardEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(course_id).or_insert_with(Room::new);
        room.subscribers.insert(id, tx);

        info!(
            course = %course_id,
            subscriber = id,
            viewers = room.subscribers.len(),
            "dashboard subscribed"
        );

        (id, rx)
    }

    /// Remove a subscriber. Idempotent; empty rooms are deleted.
    pub async fn unsubscribe(&self, course_id: Uuid, subscriber_id: u64) {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&course_id) else {
            return;
        };

        if room.subscribers.remove(&subscriber_id).is_some() {
            info!(
                course = %course_id,
                subscriber = subscriber_id,
                viewers = room.subscribers.len(),
                "dashboard unsubscribed"
            );
        }

        if room.subscribers.is_empty() {
            rooms.remove(&course_id);
            debug!(course = %course_id, "removed empty presence room");
        }
    }

    /// Push today's present-count to every subscriber of a course.
    ///
    /// Failures are logged and swallowed; a broadcast must never fail the
    /// submission that triggered it. Subscribers whose channel is closed are
    /// dropped from the room.
    pub async fn broadcast(&self, course_id: Uuid) {
        // Clone the gate out so the map lock is not held across delivery.
        let gate = {
            let rooms = self.rooms.read().await;
            match rooms.get(&course_id) {
                Some(room) => Arc::clone(&room.gate),
                None => return,
            }
        };
        let _serialized = gate.lock().await;

        let today = utc_day(self.clock.now());
        let count = match self.store.present_count(course_id, today).await {
            Ok(count) => count,
            Err(e) => {
                warn!(course = %course_id, error = %e, "skipping broadcast, count read failed");
                return;
            }
        };
        let event = DashboardEvent::AttendanceUpdate {
            present_count: count,
        };

        // Snapshot under the read lock, deliver outside it.
        let snapshot: Vec<(u64, mpsc::Sender<DashboardEvent>)> = {
            let rooms = self.rooms.read().await;
            match rooms.get(&course_id) {
                Some(room) => room
                    .subscribers
                    .iter()
                    .map(|(id, tx)| (*id, tx.clone()))
                    .collect(),
                None => return,
            }
        };

        let mut gone = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Best-effort: the subscriber misses this count and
                    // catches up on the next broadcast.
                    debug!(course = %course_id, subscriber = id, "dropping update for slow viewer");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(id),
            }
        }

        for id in gone {
            self.unsubscribe(course_id, id).await;
        }

        debug!(course = %course_id, present = count, "broadcast attendance update");
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self, course_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .get(&course_id)
            .map(|r| r.subscribers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use rollcall_store::{CourseDraft, Database};

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    async fn setup() -> (PresenceBus, StoreHandle, Arc<ManualClock>, Uuid) {
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
        let bus = PresenceBus::new(store.clone(), Arc::clone(&clock) as Arc<dyn Clock>);
        (bus, store, clock, course.id)
    }

    #[test]
    fn event_wire_shape() {
        let event = DashboardEvent::AttendanceUpdate { present_count: 3 };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"attendance_update","presentCount":3}"#
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let (bus, store, _clock, course) = setup().await;

        let (_id_a, mut rx_a) = bus.subscribe(course).await;
        let (_id_b, mut rx_b) = bus.subscribe(course).await;

        store
            .record_attendance(course, "Ada Lovelace".into(), "S001".into(), t0(), "10.0.0.5".into())
            .await
            .unwrap();
        bus.broadcast(course).await;

        let expected = DashboardEvent::AttendanceUpdate { present_count: 1 };
        assert_eq!(rx_a.try_recv().unwrap(), expected);
        assert_eq!(rx_b.try_recv().unwrap(), expected);
    }

    #[tokio::test]
    async fn counts_are_non_decreasing_per_subscriber() {
        let (bus, store, _clock, course) = setup().await;
        let (_id, mut rx) = bus.subscribe(course).await;

        store
            .record_attendance(course, "Ada".into(), "S001".into(), t0(), "10.0.0.5".into())
            .await
            .unwrap();
        bus.broadcast(course).await;

        store
            .record_attendance(course, "Blaise".into(), "S002".into(), t0(), "10.0.0.6".into())
            .await
            .unwrap();
        bus.broadcast(course).await;

        let mut last = -1;
        while let Ok(DashboardEvent::AttendanceUpdate { present_count }) = rx.try_recv() {
            assert!(present_count >= last);
            last = present_count;
        }
        assert_eq!(last, 2);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let (bus, _store, _clock, course) = setup().await;
        let (id, _rx) = bus.subscribe(course).await;

        bus.unsubscribe(course, id).await;
        bus.unsubscribe(course, id).await;

        // Room was removed with its last subscriber.
        assert_eq!(bus.subscriber_count(course).await, 0);
    }

    #[tokio::test]
    async fn gone_subscribers_are_dropped_on_broadcast() {
        let (bus, _store, _clock, course) = setup().await;

        let (_id, rx) = bus.subscribe(course).await;
        drop(rx);

        bus.broadcast(course).await;
        assert_eq!(bus.subscriber_count(course).await, 0);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_no_op() {
        let (bus, _store, _clock, course) = setup().await;
        // Must not panic or touch the store in a way that fails.
        bus.broadcast(course).await;
        bus.broadcast(Uuid::new_v4()).await;
    }
}
