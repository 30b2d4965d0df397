//! castplay: streaming audio playback engine
//!
//! A self-contained playback pipeline for podcast-style audio: progressive
//! HTTP download, container demuxing, decoding to f32 PCM, lightweight
//! resampling, a lock-free ring buffer, and a cpal output stream, fronted
//! by a state-machine [`Player`] and a handle-based C ABI.
//!
//! ```no_run
//! use castplay::{Player, PlayerCallback, PlayerConfig, PlayerEvent};
//! use std::sync::Arc;
//!
//! struct Sink;
//! impl PlayerCallback for Sink {
//!     fn on_event(&self, event: &PlayerEvent) {
//!         println!("{event:?}");
//!     }
//! }
//!
//! let mut player = Player::new(PlayerConfig::default(), Arc::new(Sink));
//! player.load_url("https://example.com/episode.mp3")?;
//! # Ok::<(), castplay::Error>(())
//! ```

pub mod config;
pub mod decode;
pub mod demux;
pub mod error;
pub mod ffi;
pub mod player;
pub mod render;
pub mod resample;
pub mod ring;
pub mod source;
pub mod transport;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use player::{Player, PlayerCallback, PlayerEvent, PlayerState};
pub use render::{AudioRenderer, AudioSpec, RendererFactory, SampleFormat};
