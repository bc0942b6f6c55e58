//! Submission throttling.
//!
//! `POST /attendance` is the one endpoint a student device has any reason to
//! hit repeatedly, and the only payoff for hammering it is enumerating the
//! confirmation code. Every device carries a small allowance of attempts
//! that refills while it stays quiet: plenty for a student who fumbles the
//! code a few times, useless against a 32^6 code space inside one lifetime.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

/// Remaining attempts for a single device.
#[derive(Debug)]
struct Allowance {
    attempts: f64,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct SubmissionThrottle {
    devices: Arc<Mutex<HashMap<IpAddr, Allowance>>>,
    /// Attempts restored per second of quiet time.
    refill_per_sec: f64,
    /// Attempts a device may spend back-to-back.
    burst: f64,
}

impl SubmissionThrottle {
    pub fn new(refill_per_sec: f64, burst: f64) -> Self {
        Self {
            devices: Arc::new(Mutex::new(HashMap::new())),
            refill_per_sec,
            burst,
        }
    }

    /// Spend one attempt for `device`. Returns `false` once the allowance
    /// is exhausted; quiet time refills it up to the burst ceiling.
    pub async fn allow(&self, device: IpAddr) -> bool {
        let now = Instant::now();
        let mut devices = self.devices.lock().await;
        let allowance = devices.entry(device).or_insert(Allowance {
            attempts: self.burst,
            last_seen: now,
        });

        let quiet = now.duration_since(allowance.last_seen).as_secs_f64();
        allowance.attempts = (allowance.attempts + quiet * self.refill_per_sec).min(self.burst);
        allowance.last_seen = now;

        if allowance.attempts >= 1.0 {
            allowance.attempts -= 1.0;
            true
        } else {
            false
        }
    }

    /// Forget devices that have not submitted for `idle_for`. Keeps the map
    /// from growing across class sessions.
    pub async fn evict_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        self.devices
            .lock()
            .await
            .retain(|_, allowance| now.duration_since(allowance.last_seen) < idle_for);
    }
}

impl Default for SubmissionThrottle {
    /// One attempt every two seconds sustained, burst of 8. A device gets at
    /// most ~160 guesses per five-minute code lifetime.
    fn default() -> Self {
        Self::new(0.5, 8.0)
    }
}

/// Keyed strictly by the socket peer; forwarded-for headers are not
/// consulted, same as device deduplication.
pub async fn throttle_submissions(
    State(throttle): State<SubmissionThrottle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !throttle.allow(peer.ip()).await {
        warn!(device = %peer.ip(), "throttling attendance submissions");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}
