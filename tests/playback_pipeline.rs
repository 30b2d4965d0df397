//! End-to-end pipeline tests driven by a synthesized WAV fixture and a
//! mock renderer whose pull callback the test invokes by hand, standing in
//! for the hardware stream thread.

use castplay::render::PullFn;
use castplay::{
    AudioRenderer, AudioSpec, Error, Player, PlayerCallback, PlayerConfig, PlayerEvent,
    PlayerState, RendererFactory, Result,
};
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const RATE: u32 = 44100;
/// One 10ms quantum of mono audio.
const QUANTUM: usize = 441;

/// Renderer that hands its pull callback to the test instead of a device.
struct MockRenderer {
    slot: Arc<Mutex<Option<PullFn>>>,
}

impl AudioRenderer for MockRenderer {
    fn preferred_spec(&self) -> AudioSpec {
        AudioSpec::new(RATE, 1)
    }

    fn start(&mut self, _spec: AudioSpec, pull: PullFn) -> Result<()> {
        *self.slot.lock().unwrap() = Some(pull);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Recorder {
    events: Mutex<Vec<PlayerEvent>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    fn saw(&self, wanted: impl Fn(&PlayerEvent) -> bool) -> bool {
        self.events.lock().unwrap().iter().any(|e| wanted(e))
    }
}

impl PlayerCallback for Recorder {
    fn on_event(&self, event: &PlayerEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Write a mono 16-bit sine fixture of `secs` seconds at 44.1kHz.
fn write_fixture(dir: &TempDir, secs: u32) -> PathBuf {
    let path = dir.path().join("fixture.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..RATE * secs {
        let t = i as f32 / RATE as f32;
        let sample = (TAU * 440.0 * t).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

struct Harness {
    player: Player,
    pull: Arc<Mutex<Option<PullFn>>>,
    recorder: Arc<Recorder>,
    _dir: TempDir,
}

fn harness(fixture_secs: u32) -> Harness {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, fixture_secs);

    let slot: Arc<Mutex<Option<PullFn>>> = Arc::new(Mutex::new(None));
    let factory_slot = Arc::clone(&slot);
    let factory: RendererFactory = Arc::new(move || {
        Ok(Box::new(MockRenderer {
            slot: Arc::clone(&factory_slot),
        }) as Box<dyn AudioRenderer>)
    });

    let recorder = Recorder::new();
    let mut player =
        Player::with_renderer_factory(PlayerConfig::default(), recorder.clone(), factory);
    player.load_file(&path).unwrap();

    let mut h = Harness {
        player,
        pull: slot,
        recorder,
        _dir: dir,
    };
    h.wait_for_state(PlayerState::Ready, Duration::from_secs(10));
    h
}

impl Harness {
    fn wait_for_state(&mut self, wanted: PlayerState, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.player.state() != wanted {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {wanted}, stuck in {}",
                self.player.state()
            );
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Run one quantum of the render callback. Returns the pulled buffer.
    fn pull_quantum(&mut self) -> Vec<f32> {
        let mut out = vec![0.0f32; QUANTUM];
        let mut slot = self.pull.lock().unwrap();
        let pull = slot.as_mut().expect("renderer started");
        pull(&mut out);
        out
    }

    /// Pull until `position_ms` reaches `target_ms` (real samples only;
    /// underruns do not advance position).
    fn pull_until_position(&mut self, target_ms: u64) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while self.player.position_ms() < target_ms {
            assert!(
                Instant::now() < deadline,
                "position stalled at {}ms",
                self.player.position_ms()
            );
            self.pull_quantum();
        }
    }
}

#[test]
fn test_load_reports_ready_and_duration() {
    let h = harness(10);
    assert_eq!(h.player.state(), PlayerState::Ready);
    assert_eq!(h.player.duration_ms(), 10_000);
    assert_eq!(h.player.position_ms(), 0);

    // Event delivery is asynchronous; give the dispatcher a moment.
    let deadline = Instant::now() + Duration::from_secs(2);
    while !h
        .recorder
        .saw(|e| matches!(e, PlayerEvent::TrackReady { duration_ms: 10_000 }))
    {
        assert!(Instant::now() < deadline, "TrackReady never delivered");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_position_tracks_rendered_audio() {
    let mut h = harness(10);
    h.player.play().unwrap();
    assert_eq!(h.player.state(), PlayerState::Playing);

    h.pull_until_position(5_000);

    // One quantum of overshoot at most.
    let position = h.player.position_ms();
    assert!(
        (5_000..5_100).contains(&position),
        "position {position}ms after 5s of pulls"
    );
    assert_eq!(h.player.duration_ms(), 10_000);
}

#[test]
fn test_track_plays_to_completion() {
    let mut h = harness(2);
    h.player.play().unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    while h.player.state() != PlayerState::Stopped {
        assert!(Instant::now() < deadline, "never completed");
        h.pull_quantum();
    }

    // Frames consumed match the fixture length within a quantum.
    let position = h.player.position_ms();
    assert!(
        (1_990..=2_010).contains(&position),
        "final position {position}ms"
    );
    let deadline = Instant::now() + Duration::from_secs(2);
    while !h.recorder.saw(|e| matches!(e, PlayerEvent::PlaybackCompleted)) {
        assert!(Instant::now() < deadline, "completion event never delivered");
        thread::sleep(Duration::from_millis(10));
    }

    // Past the end the callback keeps producing pure silence.
    let out = h.pull_quantum();
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn test_pause_freezes_position_and_outputs_silence() {
    let mut h = harness(10);
    h.player.play().unwrap();
    h.pull_until_position(1_000);

    h.player.pause().unwrap();
    assert_eq!(h.player.state(), PlayerState::Paused);
    let frozen = h.player.position_ms();

    for _ in 0..50 {
        let out = h.pull_quantum();
        assert!(out.iter().all(|&s| s == 0.0), "audible output while paused");
    }
    assert_eq!(h.player.position_ms(), frozen);

    // Resume picks up where it left off.
    h.player.play().unwrap();
    h.pull_until_position(frozen + 500);
}

#[test]
fn test_seek_jumps_position() {
    let mut h = harness(10);
    h.player.play().unwrap();
    h.pull_until_position(500);

    h.player.seek(8_000).unwrap();
    assert_eq!(h.player.state(), PlayerState::Playing);

    // The decode thread services the seek; keep pulling until the new
    // position shows up.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        h.pull_quantum();
        let position = h.player.position_ms();
        if position >= 8_000 {
            assert!(position < 9_000, "overshot to {position}ms");
            break;
        }
        assert!(Instant::now() < deadline, "seek never landed");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_volume_scales_rendered_samples() {
    let mut h = harness(10);
    h.player.play().unwrap();
    h.pull_until_position(100);

    h.player.set_volume(0.0).unwrap();
    // Drain whatever was rendered at full volume before the change landed.
    for _ in 0..5 {
        h.pull_quantum();
    }
    let out = h.pull_quantum();
    assert!(out.iter().all(|&s| s == 0.0), "volume 0 still audible");
}

#[test]
fn test_stop_then_reload_same_player() {
    let mut h = harness(10);
    h.player.play().unwrap();
    h.pull_until_position(200);

    h.player.stop().unwrap();
    assert_eq!(h.player.state(), PlayerState::Stopped);

    // A stopped player accepts a fresh load.
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, 1);
    h.player.load_file(&path).unwrap();
    h.wait_for_state(PlayerState::Ready, Duration::from_secs(10));
    assert_eq!(h.player.duration_ms(), 1_000);
}

#[test]
fn test_invalid_operations_leave_state_unchanged() {
    let mut h = harness(2);
    // Ready: pause is invalid, state sticks.
    assert!(matches!(h.player.pause(), Err(Error::State(_))));
    assert_eq!(h.player.state(), PlayerState::Ready);

    h.player.play().unwrap();
    assert!(matches!(h.player.play(), Err(Error::State(_))));
    assert_eq!(h.player.state(), PlayerState::Playing);
}

#[test]
fn test_release_tears_down_mid_playback() {
    let mut h = harness(10);
    h.player.play().unwrap();
    h.pull_until_position(200);

    h.player.release();
    h.player.release();
    assert!(matches!(h.player.play(), Err(Error::State(_))));
}
