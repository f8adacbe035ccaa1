//! Background refresh of an open board.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::ReloadOutcome;
use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::session::BoardSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    Applied { changed: bool },
    /// A gesture was active; the data was dropped and the next tick retries.
    Deferred,
    Failed(String),
}

/// Spawn a background task that reloads `session` from the backend every
/// `interval` until `stop` is set or the receiver goes away.
pub fn spawn_board_poller<G>(
    gateway: Arc<G>,
    session: Arc<Mutex<BoardSession>>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<PollEvent>,
) -> JoinHandle<()>
where
    G: Gateway + ?Sized + 'static,
{
    tokio::spawn(async move {
        while !stop.load(Ordering::Relaxed) {
            interruptible_sleep(interval, &stop).await;
            if stop.load(Ordering::Relaxed) {
                break;
            }

            let event = match poll_once(gateway.as_ref(), &session).await {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "board poll failed");
                    PollEvent::Failed(err.user_message())
                }
            };

            if events.send(event).is_err() {
                debug!("poll receiver dropped, stopping poller");
                break;
            }
        }
    })
}

/// Fetches the board's tasks and categories and applies them. The session
/// lock is not held while requests are in flight.
pub async fn poll_once<G: Gateway + ?Sized>(
    gateway: &G,
    session: &Mutex<BoardSession>,
) -> Result<PollEvent, ApiError> {
    let board_id = session.lock().await.board().id.clone();

    let tasks = gateway.list_tasks(Some(&board_id)).await?;
    let categories = gateway.list_categories(&board_id).await?;

    let mut session = session.lock().await;
    let changed = session.differs_from(&tasks, &categories) || session.is_stale();
    let event = match session.reload(tasks, categories, Utc::now()) {
        ReloadOutcome::Applied => PollEvent::Applied { changed },
        ReloadOutcome::Deferred => PollEvent::Deferred,
    };
    debug!(board_id = %board_id, ?event, "poll cycle finished");
    Ok(event)
}

async fn interruptible_sleep(duration: Duration, stop: &AtomicBool) {
    let chunk = Duration::from_millis(100);
    let mut remaining = duration;
    while remaining > Duration::ZERO && !stop.load(Ordering::Relaxed) {
        let sleep_duration = remaining.min(chunk);
        tokio::time::sleep(sleep_duration).await;
        remaining = remaining.saturating_sub(sleep_duration);
    }
}
