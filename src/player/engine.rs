//! Decode engine
//!
//! One engine instance drives one loaded track. It owns the decode thread,
//! which runs the whole pipeline: source open, demux, decode, convert, ring
//! write. The renderer is also created, started, and stopped on the decode
//! thread, since output stream handles must stay on the thread that built
//! them.
//!
//! Control methods never touch the pipeline directly. They flip atomics in
//! [`EngineShared`] and the decode thread picks the flags up between
//! packets; the render callback reads only atomics and the lock-free ring.

use crate::config::PlayerConfig;
use crate::decode::PacketDecoder;
use crate::demux::{Demuxer, TrackDescriptor};
use crate::error::{Error, Result};
use crate::player::callback::{CallbackDispatcher, PlayerEvent};
use crate::player::state::PlayerState;
use crate::render::{AudioSpec, RendererFactory};
use crate::resample;
use crate::ring::{pcm_ring, PcmConsumer, PcmProducer, RingSwap};
use crate::source::SourceBuffer;
use crate::transport::{DownloadSession, ProgressTracker, TransportClient};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sentinel meaning no seek is pending.
const NO_SEEK: u64 = u64::MAX;

/// Poll interval for the end-of-stream drain and stall retries.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// What to play.
pub enum TrackSource {
    Local(PathBuf),
    Remote(String),
}

/// Flags and counters shared between the control surface, the decode
/// thread, and the render callback.
pub(crate) struct EngineShared {
    /// True while audio should be flowing. Paused keeps the stream open
    /// and feeds silence.
    pub playing: AtomicBool,
    /// Decode thread shutdown request.
    pub stop: AtomicBool,
    /// Pending seek target in ms, [`NO_SEEK`] when none. A newer request
    /// overwrites an unserviced one.
    pub seek_request_ms: AtomicU64,
    /// Position of ring frame zero, reset on every seek.
    pub position_base_ms: AtomicU64,
    /// Frames consumed by the render callback since the last base reset.
    pub frames_consumed: AtomicU64,
    /// Output sample rate, for position math on the control side.
    pub output_rate: AtomicU32,
    pub duration_ms: AtomicU64,
    /// Volume multiplier stored as f32 bits.
    pub volume_bits: AtomicU32,
    /// Render-side underruns observed while playing.
    pub underruns: AtomicU64,
    /// True while the network is not keeping up with playback.
    pub buffering: AtomicBool,
    /// Set when the pipeline died from a device fault. A fatal fault
    /// cannot be cleared by loading another track.
    pub fatal: AtomicBool,
}

impl EngineShared {
    pub fn new(volume: f32) -> Self {
        Self {
            playing: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            seek_request_ms: AtomicU64::new(NO_SEEK),
            position_base_ms: AtomicU64::new(0),
            frames_consumed: AtomicU64::new(0),
            output_rate: AtomicU32::new(44100),
            duration_ms: AtomicU64::new(0),
            volume_bits: AtomicU32::new(volume.to_bits()),
            underruns: AtomicU64::new(0),
            buffering: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
        }
    }

    /// Playback position derived from render-side consumption, so it only
    /// advances as audio actually reaches the device.
    pub fn position_ms(&self) -> u64 {
        let base = self.position_base_ms.load(Ordering::Acquire);
        let frames = self.frames_consumed.load(Ordering::Acquire);
        let rate = self.output_rate.load(Ordering::Acquire).max(1) as u64;
        base + frames * 1000 / rate
    }

    pub fn request_seek(&self, position_ms: u64) {
        // NO_SEEK is reserved as the empty sentinel.
        self.seek_request_ms
            .store(position_ms.min(NO_SEEK - 1), Ordering::Release);
    }

    fn seek_pending(&self) -> bool {
        self.seek_request_ms.load(Ordering::Acquire) != NO_SEEK
    }
}

/// Handle to the decode thread for one loaded track.
pub(crate) struct Engine {
    shared: Arc<EngineShared>,
    thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Spawn the decode thread. Returns immediately; readiness and failures
    /// are reported through `state` and `dispatcher`.
    pub fn spawn(
        source: TrackSource,
        config: PlayerConfig,
        factory: RendererFactory,
        dispatcher: Arc<CallbackDispatcher>,
        state: Arc<Mutex<PlayerState>>,
        shared: Arc<EngineShared>,
    ) -> Self {
        let thread_shared = Arc::clone(&shared);
        let thread = thread::spawn(move || {
            let mut pipeline = Pipeline {
                config,
                factory,
                dispatcher,
                state,
                shared: thread_shared,
            };
            pipeline.run(source);
        });

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Request shutdown and wait for the decode thread to exit.
    pub fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.playing.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Everything the decode thread needs, moved onto it at spawn.
struct Pipeline {
    config: PlayerConfig,
    factory: RendererFactory,
    dispatcher: Arc<CallbackDispatcher>,
    state: Arc<Mutex<PlayerState>>,
    shared: Arc<EngineShared>,
}

impl Pipeline {
    fn run(&mut self, source: TrackSource) {
        match self.run_inner(source) {
            Ok(()) => {}
            // A stop during load cancels the pipeline; that is not a fault.
            Err(e) if self.shared.stop.load(Ordering::Acquire) => {
                debug!("load abandoned on stop: {e}");
            }
            Err(e) => self.fail(e),
        }
    }

    fn run_inner(&mut self, source: TrackSource) -> Result<()> {
        let (source_buffer, hint, tracker) = self.open_source(source)?;

        let mut demuxer = Demuxer::open(Box::new(source_buffer), hint)?;
        let descriptor = demuxer.descriptor().clone();
        info!(
            codec = %descriptor.codec,
            duration_ms = descriptor.duration_ms,
            sample_rate = descriptor.sample_rate,
            channels = descriptor.channels,
            "track opened"
        );
        self.shared
            .duration_ms
            .store(descriptor.duration_ms, Ordering::Release);

        let mut decoder = PacketDecoder::new(&demuxer)?;

        // The renderer lives and dies on this thread.
        let mut renderer = (self.factory)()?;
        let out_spec = output_spec(&renderer.preferred_spec());
        self.shared
            .output_rate
            .store(out_spec.sample_rate, Ordering::Release);

        let swap = Arc::new(RingSwap::new());
        let (mut producer, consumer) = pcm_ring(out_spec, self.config.ring_buffer_secs);
        swap.park(consumer);
        renderer.start(out_spec, self.pull_fn(Arc::clone(&swap), out_spec.channels))?;

        self.set_state(PlayerState::Ready);
        self.dispatcher.emit(PlayerEvent::TrackReady {
            duration_ms: descriptor.duration_ms,
        });

        let result = self.decode_loop(
            &mut demuxer,
            &mut decoder,
            &mut producer,
            &swap,
            &mut *renderer,
            out_spec,
            &descriptor,
            tracker.as_deref(),
        );

        if let Err(e) = renderer.stop() {
            warn!("renderer stop failed: {e}");
        }
        if decoder.skipped_packets() > 0 {
            info!(
                skipped = decoder.skipped_packets(),
                "corrupt packets skipped during playback"
            );
        }
        result
    }

    fn open_source(
        &self,
        source: TrackSource,
    ) -> Result<(SourceBuffer, symphonia::core::probe::Hint, Option<Arc<ProgressTracker>>)> {
        match source {
            TrackSource::Local(path) => {
                let hint = Demuxer::hint_for(&path.to_string_lossy());
                let buffer = SourceBuffer::local(&path)?;
                Ok((buffer, hint, None))
            }
            TrackSource::Remote(url) => {
                let client = TransportClient::new(&self.config)?;
                let stop = Arc::clone(&self.shared);
                let session = Arc::new(DownloadSession::start(
                    client,
                    &url,
                    &self.config,
                    move || stop.stop.load(Ordering::Acquire),
                )?);
                let tracker = session.tracker();
                let hint = Demuxer::hint_for(&url);
                let buffer = SourceBuffer::remote(session, self.config.source_read_timeout)?;
                Ok((buffer, hint, Some(tracker)))
            }
        }
    }

    /// Render callback body. Runs on the output stream thread: no locks
    /// beyond the swap try_lock, no allocation, no logging.
    fn pull_fn(&self, swap: Arc<RingSwap>, channels: u16) -> crate::render::PullFn {
        let shared = Arc::clone(&self.shared);
        let mut consumer: Option<PcmConsumer> = None;
        Box::new(move |out: &mut [f32]| {
            if let Some(fresh) = swap.try_adopt() {
                consumer = Some(fresh);
            }
            if !shared.playing.load(Ordering::Acquire) {
                out.fill(0.0);
                return;
            }
            let Some(consumer) = consumer.as_mut() else {
                out.fill(0.0);
                return;
            };
            let read = consumer.read_padded(out);
            if read < out.len() {
                shared.underruns.fetch_add(1, Ordering::Relaxed);
            }
            let volume = f32::from_bits(shared.volume_bits.load(Ordering::Relaxed));
            if volume < 1.0 {
                for sample in out[..read].iter_mut() {
                    *sample *= volume;
                }
            }
            shared
                .frames_consumed
                .fetch_add((read / channels.max(1) as usize) as u64, Ordering::Release);
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_loop(
        &mut self,
        demuxer: &mut Demuxer,
        decoder: &mut PacketDecoder,
        producer: &mut PcmProducer,
        swap: &Arc<RingSwap>,
        renderer: &mut dyn crate::render::AudioRenderer,
        out_spec: AudioSpec,
        descriptor: &TrackDescriptor,
        tracker: Option<&ProgressTracker>,
    ) -> Result<()> {
        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                debug!("decode loop stopping on request");
                return Ok(());
            }
            if renderer.has_failed() {
                return Err(Error::Device("output stream failed".to_string()));
            }

            let seek = self.shared.seek_request_ms.swap(NO_SEEK, Ordering::AcqRel);
            if seek != NO_SEEK {
                self.perform_seek(seek, demuxer, decoder, producer, swap, out_spec)?;
                continue;
            }

            match demuxer.next_packet() {
                Ok(Some(packet)) => {
                    self.clear_buffering();
                    let block = match decoder.decode(&packet) {
                        Ok(Some(block)) => block,
                        Ok(None) => continue,
                        Err(e) => return Err(e),
                    };
                    let converted = resample::convert(&block.samples, block.spec, out_spec);
                    let shared = Arc::clone(&self.shared);
                    producer.write_all(&converted, move || {
                        shared.stop.load(Ordering::Acquire) || shared.seek_pending()
                    });
                    self.emit_position(descriptor.duration_ms);
                }
                Ok(None) => {
                    if self.drain_to_end(producer)? {
                        self.finish_track();
                        return Ok(());
                    }
                    // A stop or seek interrupted the drain; loop back to
                    // service it.
                }
                Err(e) => {
                    if self.is_network_stall(tracker) {
                        self.enter_buffering();
                        thread::sleep(DRAIN_POLL);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    fn perform_seek(
        &mut self,
        target_ms: u64,
        demuxer: &mut Demuxer,
        decoder: &mut PacketDecoder,
        producer: &mut PcmProducer,
        swap: &Arc<RingSwap>,
        out_spec: AudioSpec,
    ) -> Result<()> {
        let duration_ms = self.shared.duration_ms.load(Ordering::Acquire);
        let target_ms = if duration_ms > 0 {
            target_ms.min(duration_ms)
        } else {
            target_ms
        };
        match demuxer.seek(target_ms) {
            Ok(landed_ms) => {
                decoder.reset();
                // Fresh ring so stale audio is dropped. The render side
                // adopts it at its next quantum; the old halves free once
                // both sides let go.
                let (new_producer, new_consumer) =
                    pcm_ring(out_spec, self.config.ring_buffer_secs);
                *producer = new_producer;
                swap.park(new_consumer);
                self.shared.frames_consumed.store(0, Ordering::Release);
                self.shared
                    .position_base_ms
                    .store(landed_ms, Ordering::Release);
                debug!(target_ms, landed_ms, "seek complete");
                // Reported even while paused so the UI lands on the new
                // position immediately.
                self.dispatcher.emit(PlayerEvent::PositionChanged {
                    position_ms: landed_ms,
                    duration_ms,
                });
                Ok(())
            }
            Err(e) => {
                // Position and pipeline are unchanged; the track keeps
                // playing from where it was.
                warn!("seek to {target_ms}ms failed: {e}");
                self.dispatcher.emit(PlayerEvent::PlaybackError {
                    code: e.status_code(),
                    message: e.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Wait for the render side to consume everything buffered. Returns
    /// `Ok(true)` when the track fully drained, `Ok(false)` when a stop or
    /// seek interrupted the drain.
    fn drain_to_end(&self, producer: &PcmProducer) -> Result<bool> {
        debug!("end of stream, draining ring");
        loop {
            if self.shared.stop.load(Ordering::Acquire) || self.shared.seek_pending() {
                return Ok(false);
            }
            if producer.occupied() == 0 && self.shared.playing.load(Ordering::Acquire) {
                return Ok(true);
            }
            thread::sleep(DRAIN_POLL);
        }
    }

    fn finish_track(&self) {
        info!("playback complete");
        self.shared.playing.store(false, Ordering::Release);
        self.set_state(PlayerState::Stopped);
        self.dispatcher.emit(PlayerEvent::PlaybackCompleted);
    }

    /// A read failure on a live progressive download is a stall, not a
    /// fatal error; the background download keeps retrying.
    fn is_network_stall(&self, tracker: Option<&ProgressTracker>) -> bool {
        match tracker {
            Some(tracker) => {
                let snapshot = tracker.snapshot();
                !snapshot.failed && !snapshot.complete
            }
            None => false,
        }
    }

    fn enter_buffering(&self) {
        if !self.shared.buffering.swap(true, Ordering::AcqRel) {
            info!("network stall, buffering");
            self.dispatcher.emit(PlayerEvent::BufferingChanged(true));
        }
    }

    fn clear_buffering(&self) {
        if self.shared.buffering.swap(false, Ordering::AcqRel) {
            info!("buffering recovered");
            self.dispatcher.emit(PlayerEvent::BufferingChanged(false));
        }
    }

    fn emit_position(&self, duration_ms: u64) {
        if self.shared.playing.load(Ordering::Acquire) {
            self.dispatcher.emit(PlayerEvent::PositionChanged {
                position_ms: self.shared.position_ms(),
                duration_ms,
            });
        }
    }

    fn set_state(&self, next: PlayerState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            *state = next;
            self.dispatcher.emit(PlayerEvent::StateChanged(next));
        }
    }

    fn fail(&self, e: Error) {
        error!("pipeline failed: {e}");
        if e.is_fatal() {
            self.shared.fatal.store(true, Ordering::Release);
        }
        self.shared.playing.store(false, Ordering::Release);
        self.set_state(PlayerState::Error);
        self.dispatcher.emit(PlayerEvent::PlaybackError {
            code: e.status_code(),
            message: e.to_string(),
        });
    }
}

/// Pipeline output format: the device's preferred rate, capped at stereo
/// (conversion beyond stereo is downmix-only).
fn output_spec(preferred: &AudioSpec) -> AudioSpec {
    AudioSpec::new(preferred.sample_rate, preferred.channels.clamp(1, 2))
}
