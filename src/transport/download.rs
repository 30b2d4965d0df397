//! Progressive download session with prebuffering
//!
//! Remote audio is spooled into a temp file. For MP4-family containers the
//! whole file is fetched before the session is handed to the demuxer, since
//! the sample index may trail the media data. Everything else starts playing
//! after a prebuffer while a background thread fills in the rest.

use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::transport::client::{RemoteInfo, TransportClient};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const IO_CHUNK: usize = 64 * 1024;

/// Point-in-time view of download progress
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub complete: bool,
    /// The download died and no more bytes are coming. Readers distinguish
    /// this from a transient stall on a still-live session.
    pub failed: bool,
}

#[derive(Debug, Default)]
struct ProgressState {
    downloaded: u64,
    total: Option<u64>,
    complete: bool,
    failed: Option<String>,
}

/// Shared download progress, written by the transport thread and waited on by
/// the source buffer.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    cond: Condvar,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().unwrap();
        ProgressSnapshot {
            bytes_downloaded: state.downloaded,
            total_bytes: state.total,
            complete: state.complete,
            failed: state.failed.is_some(),
        }
    }

    pub fn set_total(&self, total: Option<u64>) {
        self.state.lock().unwrap().total = total;
    }

    pub fn advance(&self, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        state.downloaded += bytes;
        drop(state);
        self.cond.notify_all();
    }

    pub fn mark_complete(&self) {
        let mut state = self.state.lock().unwrap();
        state.complete = true;
        if state.total.is_none() {
            state.total = Some(state.downloaded);
        }
        drop(state);
        self.cond.notify_all();
    }

    pub fn mark_failed(&self, message: String) {
        let mut state = self.state.lock().unwrap();
        state.failed = Some(message);
        drop(state);
        self.cond.notify_all();
    }

    /// Block until at least one byte past `offset` is on disk, the download
    /// finished, or `timeout` elapsed. A timed-out wait is a recoverable I/O
    /// error, not a hang.
    pub fn wait_for(&self, offset: u64, timeout: Duration) -> Result<ProgressSnapshot> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(msg) = &state.failed {
                return Err(Error::Io(format!("Download failed: {msg}")));
            }
            if state.downloaded > offset || state.complete {
                return Ok(ProgressSnapshot {
                    bytes_downloaded: state.downloaded,
                    total_bytes: state.total,
                    complete: state.complete,
                    failed: false,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Io(format!(
                    "Timed out waiting for byte {offset} (have {})",
                    state.downloaded
                )));
            }
            let (guard, _) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }
}

/// A progressive download owned by the transport layer.
///
/// Dropping the session cancels the background thread and removes the spool
/// file.
pub struct DownloadSession {
    spool: NamedTempFile,
    tracker: Arc<ProgressTracker>,
    info: RemoteInfo,
    cancel: Arc<AtomicBool>,
}

impl DownloadSession {
    /// Open `url` and download until playback can start.
    ///
    /// Returns once the prebuffer target is reached (or the file is complete,
    /// for full-download containers); the remainder continues on a background
    /// thread. `abort` is checked once per chunk so a stop or release during
    /// the foreground phase cancels the download promptly instead of waiting
    /// for it to finish.
    pub fn start(
        client: TransportClient,
        url: &str,
        config: &PlayerConfig,
        abort: impl Fn() -> bool,
    ) -> Result<Self> {
        info!("Starting download from {url}");

        let info = client.probe(url);
        let needs_full = config.requires_full_download(url);
        if needs_full {
            info!("Container requires trailing metadata, downloading complete file first");
        }

        let tracker = Arc::new(ProgressTracker::new());
        tracker.set_total(info.total_bytes);

        let spool_file = NamedTempFile::new()
            .map_err(|e| Error::Io(format!("Failed to create spool file: {e}")))?;
        let mut writer = spool_file
            .as_file()
            .try_clone()
            .map_err(|e| Error::Io(format!("Failed to clone spool handle: {e}")))?;

        let mut reader = client.get_retrying(url)?;
        let prebuffer_target = if needs_full {
            u64::MAX
        } else {
            config.prebuffer_target(info.total_bytes)
        };
        debug!(
            prebuffer_target,
            total = ?info.total_bytes,
            supports_range = info.supports_range,
            "download plan"
        );

        let cancel = Arc::new(AtomicBool::new(false));
        match spool(&mut reader, &mut writer, &tracker, prebuffer_target, &abort)? {
            SpoolOutcome::Complete => {
                info!(
                    "Download complete: {} bytes",
                    tracker.snapshot().bytes_downloaded
                );
            }
            SpoolOutcome::Prebuffered => {
                info!(
                    "Prebuffer complete: {} bytes, continuing in background",
                    tracker.snapshot().bytes_downloaded
                );
                spawn_background(
                    Box::new(reader),
                    writer,
                    Arc::clone(&tracker),
                    client,
                    url.to_string(),
                    info,
                    Arc::clone(&cancel),
                );
            }
        }

        Ok(Self {
            spool: spool_file,
            tracker,
            info,
            cancel,
        })
    }

    pub fn path(&self) -> &Path {
        self.spool.path()
    }

    pub fn tracker(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn info(&self) -> RemoteInfo {
        self.info
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

#[derive(Debug)]
enum SpoolOutcome {
    /// End of stream reached; the whole file is on disk.
    Complete,
    /// Prebuffer target reached; the stream has more to give.
    Prebuffered,
}

/// Drain `reader` into the spool until end of stream or the prebuffer
/// target. `abort` is consulted once per chunk; the client's per-operation
/// read timeout bounds how long a single chunk read can block, so a stop
/// request is honored at loop granularity even on a stalled connection.
fn spool(
    reader: &mut impl Read,
    writer: &mut File,
    tracker: &ProgressTracker,
    prebuffer_target: u64,
    abort: &impl Fn() -> bool,
) -> Result<SpoolOutcome> {
    let mut chunk = vec![0u8; IO_CHUNK];
    loop {
        if abort() {
            return Err(Error::Io("Download cancelled".to_string()));
        }

        let n = reader
            .read(&mut chunk)
            .map_err(|e| Error::Io(format!("Download read failed: {e}")))?;
        if n == 0 {
            tracker.mark_complete();
            return Ok(SpoolOutcome::Complete);
        }

        writer.write_all(&chunk[..n])?;
        tracker.advance(n as u64);

        if tracker.snapshot().bytes_downloaded >= prebuffer_target {
            writer.flush()?;
            return Ok(SpoolOutcome::Prebuffered);
        }
    }
}

/// Continue draining `reader` into the spool off-thread. On a mid-stream
/// network error the download resumes with a validated range request when the
/// server supports ranges; otherwise the session is marked failed so blocked
/// readers wake up.
fn spawn_background(
    mut reader: Box<dyn Read + Send>,
    mut writer: File,
    tracker: Arc<ProgressTracker>,
    client: TransportClient,
    url: String,
    info: RemoteInfo,
    cancel: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        let mut chunk = vec![0u8; IO_CHUNK];
        loop {
            if cancel.load(Ordering::Relaxed) {
                debug!("Background download cancelled");
                return;
            }

            match reader.read(&mut chunk) {
                Ok(0) => {
                    tracker.mark_complete();
                    info!(
                        "Background download complete: {} bytes",
                        tracker.snapshot().bytes_downloaded
                    );
                    return;
                }
                Ok(n) => {
                    if writer.write_all(&chunk[..n]).is_err() {
                        tracker.mark_failed("Spool write failed".to_string());
                        return;
                    }
                    tracker.advance(n as u64);
                }
                Err(e) => {
                    let resumed_from = tracker.snapshot().bytes_downloaded;
                    if !info.supports_range {
                        warn!("Download interrupted at byte {resumed_from}, no range support: {e}");
                        tracker.mark_failed(format!("Connection lost: {e}"));
                        return;
                    }
                    warn!("Download interrupted at byte {resumed_from}, resuming: {e}");
                    match client.get_range_from(&url, resumed_from) {
                        Ok(resumed) => reader = Box::new(resumed),
                        Err(resume_err) => {
                            tracker.mark_failed(resume_err.to_string());
                            return;
                        }
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_wait_returns_once_bytes_arrive() {
        let tracker = Arc::new(ProgressTracker::new());
        let feeder = Arc::clone(&tracker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            feeder.advance(1024);
        });

        let snap = tracker.wait_for(512, Duration::from_secs(2)).unwrap();
        assert_eq!(snap.bytes_downloaded, 1024);
        handle.join().unwrap();
    }

    #[test]
    fn test_tracker_wait_times_out() {
        let tracker = ProgressTracker::new();
        tracker.advance(10);
        let err = tracker.wait_for(100, Duration::from_millis(30)).unwrap_err();
        assert_eq!(err.status_code(), 1);
    }

    #[test]
    fn test_tracker_completion_unblocks_short_reads() {
        let tracker = ProgressTracker::new();
        tracker.advance(50);
        tracker.mark_complete();
        // Waiting past EOF returns immediately; the caller sees `complete`
        // and reads whatever is on disk.
        let snap = tracker.wait_for(100, Duration::from_millis(10)).unwrap();
        assert!(snap.complete);
        assert_eq!(snap.total_bytes, Some(50));
    }

    #[test]
    fn test_tracker_failure_propagates() {
        let tracker = ProgressTracker::new();
        tracker.mark_failed("connection reset".to_string());
        let err = tracker.wait_for(0, Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_failed_download_shows_in_snapshot() {
        let tracker = ProgressTracker::new();
        tracker.advance(10);
        assert!(!tracker.snapshot().failed);

        tracker.mark_failed("connection reset".to_string());
        let snap = tracker.snapshot();
        assert!(snap.failed);
        assert!(!snap.complete);
        assert_eq!(snap.bytes_downloaded, 10);
    }

    #[test]
    fn test_spool_cancelled_without_waiting_for_stream_end() {
        let tracker = ProgressTracker::new();
        let mut writer = tempfile::tempfile().unwrap();
        // An endless stream: without the abort check this would never return.
        let mut reader = std::io::repeat(0u8);

        let err = spool(&mut reader, &mut writer, &tracker, u64::MAX, &|| true).unwrap_err();
        assert_eq!(err.status_code(), 1);
        assert!(!tracker.snapshot().complete);
    }

    #[test]
    fn test_spool_stops_at_prebuffer_target() {
        let tracker = ProgressTracker::new();
        let mut writer = tempfile::tempfile().unwrap();
        let mut reader = std::io::repeat(0u8);

        let target = 3 * IO_CHUNK as u64;
        let outcome = spool(&mut reader, &mut writer, &tracker, target, &|| false).unwrap();
        assert!(matches!(outcome, SpoolOutcome::Prebuffered));
        let snap = tracker.snapshot();
        assert!(snap.bytes_downloaded >= target);
        assert!(!snap.complete);
    }

    #[test]
    fn test_spool_drains_finite_stream_to_completion() {
        let tracker = ProgressTracker::new();
        let mut writer = tempfile::tempfile().unwrap();
        let data = vec![7u8; IO_CHUNK + 100];
        let mut reader = &data[..];

        let outcome = spool(&mut reader, &mut writer, &tracker, u64::MAX, &|| false).unwrap();
        assert!(matches!(outcome, SpoolOutcome::Complete));
        let snap = tracker.snapshot();
        assert!(snap.complete);
        assert_eq!(snap.bytes_downloaded, data.len() as u64);
        assert_eq!(snap.total_bytes, Some(data.len() as u64));
    }
}
