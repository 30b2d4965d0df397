//! Event delivery to the embedding application
//!
//! Events are queued from the control and decode threads and delivered on a
//! dedicated dispatcher thread, so a slow callback can never stall decoding
//! or the render path. Position updates are throttled to the configured
//! interval with intermediate values coalesced; all other events pass
//! through immediately in order.

use crate::player::state::PlayerState;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Notifications emitted by a player instance.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    /// Throttled progress report. At most one per configured interval.
    PositionChanged {
        position_ms: u64,
        duration_ms: u64,
    },
    /// Load finished; the track can start instantly.
    TrackReady {
        duration_ms: u64,
    },
    /// The track played to its natural end.
    PlaybackCompleted,
    /// Network cannot keep up (true) or has caught back up (false).
    BufferingChanged(bool),
    PlaybackError {
        code: i32,
        message: String,
    },
}

/// Receiver for player events. Called on the dispatcher thread, never on
/// the render callback or decode thread.
pub trait PlayerCallback: Send + Sync {
    fn on_event(&self, event: &PlayerEvent);
}

/// Queues events and delivers them on a background thread.
pub struct CallbackDispatcher {
    tx: Option<mpsc::Sender<PlayerEvent>>,
    worker: Option<JoinHandle<()>>,
}

impl CallbackDispatcher {
    pub fn new(callback: Arc<dyn PlayerCallback>, position_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = thread::spawn(move || dispatch_loop(rx, callback, position_interval));
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queue an event. Never blocks; a dead dispatcher drops the event.
    pub fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn dispatch_loop(
    rx: mpsc::Receiver<PlayerEvent>,
    callback: Arc<dyn PlayerCallback>,
    interval: Duration,
) {
    // Most recent position update held back by the throttle. Newer updates
    // replace it, so only the latest value is ever delivered late.
    let mut held: Option<PlayerEvent> = None;
    let mut last_position = Instant::now() - interval;

    loop {
        let timeout = if held.is_some() {
            interval.saturating_sub(last_position.elapsed())
        } else {
            Duration::from_secs(60)
        };
        match rx.recv_timeout(timeout) {
            Ok(event @ PlayerEvent::PositionChanged { .. }) => {
                if last_position.elapsed() >= interval {
                    callback.on_event(&event);
                    last_position = Instant::now();
                    held = None;
                } else {
                    held = Some(event);
                }
            }
            Ok(event) => callback.on_event(&event),
            Err(RecvTimeoutError::Timeout) => {
                if let Some(event) = held.take() {
                    callback.on_event(&event);
                    last_position = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(event) = held.take() {
                    callback.on_event(&event);
                }
                break;
            }
        }
    }
    debug!("event dispatcher exiting");
}
