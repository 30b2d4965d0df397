//! Audio output contract
//!
//! The renderer is the platform edge of the pipeline: a real-time callback
//! thread pulls interleaved f32 frames at a fixed quantum. Implementations
//! must keep the pull path free of allocation, locks and logging; a late
//! callback is an audible glitch.

mod cpal_renderer;

pub use cpal_renderer::CpalRenderer;

use crate::error::Result;

/// Negotiated audio output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

/// Sample encoding at the device boundary. The pipeline itself is always f32;
/// integer formats are converted in the device callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    #[default]
    F32,
    I16,
}

impl AudioSpec {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            format: SampleFormat::F32,
        }
    }

    /// Interleaved samples per second of audio at this spec.
    pub fn samples_per_sec(&self) -> usize {
        self.sample_rate as usize * self.channels as usize
    }
}

/// Callback invoked on the real-time audio thread. Must completely fill the
/// slice (silence when nothing is available) and return without blocking.
pub type PullFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Platform output sink contract.
///
/// `start` hands the hardware a pull callback; the renderer owns format
/// negotiation with the device and reports underruns for diagnostics.
///
/// Renderers are created, started and stopped on the decode thread. Platform
/// stream handles (cpal in particular) are not `Send`, so the factory runs
/// where the renderer lives.
pub trait AudioRenderer {
    /// Output format the device wants to be fed.
    fn preferred_spec(&self) -> AudioSpec;

    /// Begin pulling audio. The callback runs on a dedicated real-time
    /// thread at a fixed quantum until `stop` is called.
    fn start(&mut self, spec: AudioSpec, pull: PullFn) -> Result<()>;

    /// Stop the stream and release the callback.
    fn stop(&mut self) -> Result<()>;

    /// Device-side fault flag (stream died, device unplugged).
    fn has_failed(&self) -> bool {
        false
    }
}

/// Builds a renderer on the thread that will drive it.
pub type RendererFactory =
    std::sync::Arc<dyn Fn() -> Result<Box<dyn AudioRenderer>> + Send + Sync>;
