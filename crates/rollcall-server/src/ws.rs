//! WebSocket endpoint for dashboard viewers.
//!
//! `GET /ws/{course_id}` upgrades, subscribes the connection to the course's
//! presence room, pushes the current count immediately, then forwards every
//! broadcast until the peer goes away. The server pings on an interval; a
//! peer silent past the grace window is dropped, which keeps the subscriber
//! registry from accumulating dead dashboards.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::AppState;
use crate::clock::utc_day;
use crate::error::ServerError;
use crate::presence::DashboardEvent;

pub async fn ws_handler(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    // Reject unknown courses before committing to the upgrade.
    state.store.get_course(course_id).await?;

    Ok(ws.on_upgrade(move |socket| dashboard_session(state, course_id, socket)))
}

async fn dashboard_session(state: AppState, course_id: Uuid, mut socket: WebSocket) {
    let (subscriber_id, mut events) = state.presence.subscribe(course_id).await;
    info!(course = %course_id, subscriber = subscriber_id, "dashboard connected");

    // Push the current count so a reconnecting viewer does not have to wait
    // for the next submission.
    let today = utc_day(state.clock.now());
    match state.store.present_count(course_id, today).await {
        Ok(count) => {
            let event = DashboardEvent::AttendanceUpdate {
                present_count: count,
            };
            if send_event(&mut socket, &event).await.is_err() {
                state.presence.unsubscribe(course_id, subscriber_id).await;
                return;
            }
        }
        Err(e) => {
            debug!(course = %course_id, error = %e, "initial count read failed");
        }
    }

    let mut probe = tokio::time::interval(state.config.probe_interval);
    probe.tick().await; // first tick completes immediately
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    // Bus dropped us (e.g. closed channel); nothing more to do.
                    None => break,
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    // The protocol layer answers pings itself; any frame
                    // counts as liveness. Application payloads are ignored.
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => {
                        debug!(course = %course_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }

            _ = probe.tick() => {
                if last_seen.elapsed() > state.config.probe_grace {
                    info!(
                        course = %course_id,
                        subscriber = subscriber_id,
                        "dashboard failed liveness probe, disconnecting"
                    );
                    break;
                }
                if socket.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.presence.unsubscribe(course_id, subscriber_id).await;
    info!(course = %course_id, subscriber = subscriber_id, "dashboard disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &DashboardEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event)
        .map_err(|e| axum::Error::new(format!("event serialization failed: {e}")))?;
    socket.send(Message::Text(payload.into())).await
}
