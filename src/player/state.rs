//! Player state machine
//!
//! Every control-surface operation is gated by the transition table here.
//! State only ever changes through [`PlayerState::can`] checks on the
//! control side plus engine-driven transitions (Ready, Stopped on
//! completion, Error on fault).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a player instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    /// Created, nothing loaded.
    Idle,
    /// A load is in flight (probe, prebuffer, demux).
    Loading,
    /// A track is loaded and decoded far enough to start instantly.
    Ready,
    Playing,
    Paused,
    /// Playback halted by request or by reaching end of stream.
    Stopped,
    /// A load or playback fault. Non-fatal faults allow a new load.
    Error,
}

/// Control operations checked against the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerOp {
    Load,
    Play,
    Pause,
    Stop,
    Seek,
    SetVolume,
}

impl PlayerState {
    /// Integer code for the FFI surface.
    pub fn code(&self) -> i32 {
        match self {
            PlayerState::Idle => 0,
            PlayerState::Loading => 1,
            PlayerState::Ready => 2,
            PlayerState::Playing => 3,
            PlayerState::Paused => 4,
            PlayerState::Stopped => 5,
            PlayerState::Error => 6,
        }
    }

    /// Whether `op` is legal in this state.
    ///
    /// Volume is legal everywhere. Stop is legal everywhere and is a no-op
    /// when nothing is active. Load from Error is allowed so a failed track
    /// does not strand the instance; fatal device faults are screened by the
    /// caller before the table is consulted.
    pub fn can(&self, op: PlayerOp) -> bool {
        use PlayerOp::*;
        use PlayerState::*;
        match op {
            SetVolume | Stop => true,
            Load => matches!(self, Idle | Ready | Stopped | Error),
            Play => matches!(self, Ready | Paused),
            Pause => matches!(self, Playing),
            Seek => matches!(self, Ready | Playing | Paused),
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Loading => "loading",
            PlayerState::Ready => "ready",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Stopped => "stopped",
            PlayerState::Error => "error",
        };
        write!(f, "{}", name)
    }
}
