//! Handle-based C ABI
//!
//! The only global state in the crate: an atomic handle counter plus a
//! mutexed handle-to-player registry, required because opaque integer
//! handles are what cross the language boundary.
//!
//! Contract: mutating entry points return an integer status (0 = success,
//! nonzero = error kind per [`Error::status_code`]); queries never fail and
//! return a default (-1) for an unknown or released handle. Nothing here
//! unwinds across the boundary.

use crate::config::PlayerConfig;
use crate::error::Error;
use crate::player::{Player, PlayerCallback, PlayerEvent};
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock};
use tracing::{info, warn};

const STATUS_OK: i32 = 0;
/// Status for malformed arguments (null or non-UTF-8 pointers, NaN volume).
const STATUS_INTERNAL: i32 = 6;

static NEXT_HANDLE: AtomicI64 = AtomicI64::new(1);

fn registry() -> &'static Mutex<HashMap<i64, Player>> {
    static REGISTRY: OnceLock<Mutex<HashMap<i64, Player>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Install the tracing subscriber once, honoring `RUST_LOG`. A host that
/// already installed one wins; `try_init` keeps that quiet.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Event sink for handles created over the C ABI. Hosts on this boundary
/// observe progress by polling the query entry points; events are logged
/// for diagnostics.
struct LoggingSink;

impl PlayerCallback for LoggingSink {
    fn on_event(&self, event: &PlayerEvent) {
        match event {
            PlayerEvent::PlaybackError { code, message } => {
                warn!(code, message, "player error");
            }
            other => info!(?other, "player event"),
        }
    }
}

/// Run `op` against the player for `handle`, translating errors and panics
/// into status codes.
fn with_player(handle: i64, op: impl FnOnce(&mut Player) -> crate::error::Result<()>) -> i32 {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut registry = match registry().lock() {
            Ok(guard) => guard,
            Err(_) => return STATUS_INTERNAL,
        };
        match registry.get_mut(&handle) {
            Some(player) => match op(player) {
                Ok(()) => STATUS_OK,
                Err(e) => e.status_code(),
            },
            None => Error::State(format!("unknown handle {handle}")).status_code(),
        }
    }));
    result.unwrap_or(STATUS_INTERNAL)
}

fn query<T>(handle: i64, default: T, op: impl FnOnce(&Player) -> T) -> T {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        registry()
            .lock()
            .ok()
            .and_then(|registry| registry.get(&handle).map(op))
    }));
    match result {
        Ok(Some(value)) => value,
        _ => default,
    }
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated C string.
unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Create a player and return its handle. Handles are positive and never
/// reused within a process.
#[no_mangle]
pub extern "C" fn castplay_create() -> i64 {
    init_tracing();
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    let player = Player::new(PlayerConfig::default(), Arc::new(LoggingSink));
    match registry().lock() {
        Ok(mut registry) => {
            registry.insert(handle, player);
            info!(handle, "player created");
            handle
        }
        Err(_) => -1,
    }
}

/// # Safety
/// `path` must be null or a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn castplay_load_file(handle: i64, path: *const c_char) -> i32 {
    let Some(path) = c_str(path) else {
        return STATUS_INTERNAL;
    };
    let path = path.to_string();
    with_player(handle, move |player| player.load_file(path))
}

/// # Safety
/// `url` must be null or a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn castplay_load_url(handle: i64, url: *const c_char) -> i32 {
    let Some(url) = c_str(url) else {
        return STATUS_INTERNAL;
    };
    let url = url.to_string();
    with_player(handle, move |player| player.load_url(&url))
}

#[no_mangle]
pub extern "C" fn castplay_play(handle: i64) -> i32 {
    with_player(handle, |player| player.play())
}

#[no_mangle]
pub extern "C" fn castplay_pause(handle: i64) -> i32 {
    with_player(handle, |player| player.pause())
}

#[no_mangle]
pub extern "C" fn castplay_stop(handle: i64) -> i32 {
    with_player(handle, |player| player.stop())
}

#[no_mangle]
pub extern "C" fn castplay_seek(handle: i64, position_ms: i64) -> i32 {
    with_player(handle, move |player| player.seek(position_ms.max(0) as u64))
}

/// Volume outside [0.0, 1.0] or non-finite is rejected without touching
/// the player.
#[no_mangle]
pub extern "C" fn castplay_set_volume(handle: i64, level: f32) -> i32 {
    if !level.is_finite() || !(0.0..=1.0).contains(&level) {
        return STATUS_INTERNAL;
    }
    with_player(handle, move |player| player.set_volume(level))
}

#[no_mangle]
pub extern "C" fn castplay_get_position_ms(handle: i64) -> i64 {
    query(handle, -1, |player| player.position_ms() as i64)
}

#[no_mangle]
pub extern "C" fn castplay_get_duration_ms(handle: i64) -> i64 {
    query(handle, -1, |player| player.duration_ms() as i64)
}

/// Current state as an integer (Idle=0, Loading=1, Ready=2, Playing=3,
/// Paused=4, Stopped=5, Error=6); -1 for an unknown handle.
#[no_mangle]
pub extern "C" fn castplay_get_state(handle: i64) -> i32 {
    query(handle, -1, |player| player.state().code())
}

/// Destroy the player behind `handle`. Releasing an already-released
/// handle is a successful no-op.
#[no_mangle]
pub extern "C" fn castplay_release(handle: i64) -> i32 {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let removed = match registry().lock() {
            Ok(mut registry) => registry.remove(&handle),
            Err(_) => return STATUS_INTERNAL,
        };
        if let Some(mut player) = removed {
            player.release();
            info!(handle, "player released");
        }
        STATUS_OK
    }));
    result.unwrap_or(STATUS_INTERNAL)
}
