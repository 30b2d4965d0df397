//! Player control surface
//!
//! [`Player`] is the embedding-facing handle: load, play, pause, stop,
//! seek, volume, and queries. Every mutating call is validated against the
//! state machine before it touches the engine, so an illegal call fails
//! fast with [`Error::State`] and changes nothing.
//!
//! Control calls return quickly. Loading, decoding, and device work happen
//! on the engine's decode thread; results come back through the callback.

mod callback;
mod engine;
mod state;

pub use callback::{CallbackDispatcher, PlayerCallback, PlayerEvent};
pub use state::{PlayerOp, PlayerState};

pub(crate) use engine::EngineShared;

use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::render::{AudioRenderer, CpalRenderer, RendererFactory};
use engine::{Engine, TrackSource};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct Player {
    config: PlayerConfig,
    factory: RendererFactory,
    dispatcher: Arc<CallbackDispatcher>,
    state: Arc<Mutex<PlayerState>>,
    shared: Arc<EngineShared>,
    engine: Option<Engine>,
    released: bool,
}

impl Player {
    /// Create a player that renders to the default output device.
    pub fn new(config: PlayerConfig, callback: Arc<dyn PlayerCallback>) -> Self {
        let factory: RendererFactory = Arc::new(|| {
            CpalRenderer::new(None).map(|r| Box::new(r) as Box<dyn AudioRenderer>)
        });
        Self::with_renderer_factory(config, callback, factory)
    }

    /// Create a player with a custom renderer factory. The factory is
    /// invoked on the decode thread once per loaded track.
    pub fn with_renderer_factory(
        config: PlayerConfig,
        callback: Arc<dyn PlayerCallback>,
        factory: RendererFactory,
    ) -> Self {
        let dispatcher = Arc::new(CallbackDispatcher::new(
            callback,
            config.position_interval,
        ));
        Self {
            config,
            factory,
            dispatcher,
            state: Arc::new(Mutex::new(PlayerState::Idle)),
            shared: Arc::new(EngineShared::new(1.0)),
            engine: None,
            released: false,
        }
    }

    /// Load a local audio file. Readiness arrives as
    /// [`PlayerEvent::TrackReady`]; failures as [`PlayerEvent::PlaybackError`].
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "loading file");
        self.begin_load(TrackSource::Local(path))
    }

    /// Load a remote track over progressive HTTP download.
    pub fn load_url(&mut self, url: &str) -> Result<()> {
        info!(url, "loading url");
        self.begin_load(TrackSource::Remote(url.to_string()))
    }

    fn begin_load(&mut self, source: TrackSource) -> Result<()> {
        self.check(PlayerOp::Load)?;
        if self.shared.fatal.load(Ordering::Acquire) {
            return Err(Error::State(
                "device fault is unrecoverable; release this player".to_string(),
            ));
        }

        // Tear down any previous track before starting the next.
        self.teardown_engine();

        let volume = f32::from_bits(self.shared.volume_bits.load(Ordering::Acquire));
        self.shared = Arc::new(EngineShared::new(volume));
        self.set_state(PlayerState::Loading);

        self.engine = Some(Engine::spawn(
            source,
            self.config.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.state),
            Arc::clone(&self.shared),
        ));
        Ok(())
    }

    /// Start or resume audible playback.
    pub fn play(&mut self) -> Result<()> {
        self.check(PlayerOp::Play)?;
        self.shared.playing.store(true, Ordering::Release);
        self.set_state(PlayerState::Playing);
        Ok(())
    }

    /// Pause, keeping the pipeline primed for instant resume.
    pub fn pause(&mut self) -> Result<()> {
        self.check(PlayerOp::Pause)?;
        self.shared.playing.store(false, Ordering::Release);
        self.set_state(PlayerState::Paused);
        Ok(())
    }

    /// Halt playback and tear down the pipeline. No-op when idle.
    pub fn stop(&mut self) -> Result<()> {
        self.check(PlayerOp::Stop)?;
        if self.state() == PlayerState::Idle {
            return Ok(());
        }
        debug!("stopping playback");
        self.teardown_engine();
        self.set_state(PlayerState::Stopped);
        Ok(())
    }

    /// Request a jump to `position_ms`. Asynchronous; the playback state is
    /// unchanged and the landed position arrives as a position event.
    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.check(PlayerOp::Seek)?;
        debug!(position_ms, "seek requested");
        self.shared.request_seek(position_ms);
        Ok(())
    }

    /// Set the volume multiplier, clamped to [0.0, 1.0]. Takes effect on
    /// the next render quantum and persists across loads.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.check(PlayerOp::SetVolume)?;
        let clamped = volume.clamp(0.0, 1.0);
        self.shared
            .volume_bits
            .store(clamped.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Acquire))
    }

    /// Current playback position in milliseconds, derived from audio that
    /// actually reached the renderer.
    pub fn position_ms(&self) -> u64 {
        match self.state() {
            PlayerState::Idle | PlayerState::Loading => 0,
            _ => self.shared.position_ms(),
        }
    }

    /// Track duration in milliseconds, 0 until a track is ready or when
    /// the container does not declare one.
    pub fn duration_ms(&self) -> u64 {
        self.shared.duration_ms.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PlayerState {
        *self.state.lock().unwrap()
    }

    /// Render-side underruns for the current track. Diagnostic only.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Acquire)
    }

    /// Tear down everything. Idempotent; any call after release fails with
    /// a state error.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        debug!("releasing player");
        self.teardown_engine();
        self.released = true;
        *self.state.lock().unwrap() = PlayerState::Idle;
    }

    fn teardown_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
        self.shared.playing.store(false, Ordering::Release);
    }

    fn check(&self, op: PlayerOp) -> Result<()> {
        if self.released {
            return Err(Error::State("player has been released".to_string()));
        }
        let state = self.state();
        if !state.can(op) {
            return Err(Error::State(format!("cannot {op:?} while {state}")));
        }
        Ok(())
    }

    fn set_state(&self, next: PlayerState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            *state = next;
            self.dispatcher.emit(PlayerEvent::StateChanged(next));
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.release();
    }
}
