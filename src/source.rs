//! Seekable byte-stream adapter for the demuxer
//!
//! Presents the same `MediaSource` interface whether the bytes come from a
//! local file or a transport spool that is still downloading. Reads past the
//! downloaded frontier block on transport progress with a bounded wait.

use crate::error::{Error, Result};
use crate::transport::{DownloadSession, ProgressTracker};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::io::MediaSource;
use tracing::trace;

enum Backing {
    /// Local file, trivial passthrough
    Local { len: u64 },

    /// Transport spool file still being written
    Remote {
        tracker: Arc<ProgressTracker>,
        read_timeout: Duration,
        /// Keeps the spool file alive for the lifetime of the source
        _session: Option<Arc<DownloadSession>>,
    },
}

/// Seekable source over a local file or an in-flight download.
pub struct SourceBuffer {
    file: File,
    position: u64,
    backing: Backing,
}

impl SourceBuffer {
    /// Open a local file.
    pub fn local(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Io(format!("Failed to open {}: {e}", path.display())))?;
        let len = file
            .metadata()
            .map_err(|e| Error::Io(format!("Failed to stat {}: {e}", path.display())))?
            .len();

        Ok(Self {
            file,
            position: 0,
            backing: Backing::Local { len },
        })
    }

    /// Adapt a transport session. The spool file is opened read-only; the
    /// download thread keeps appending to it independently.
    pub fn remote(session: Arc<DownloadSession>, read_timeout: Duration) -> Result<Self> {
        let file = File::open(session.path())
            .map_err(|e| Error::Io(format!("Failed to open spool file: {e}")))?;
        let tracker = session.tracker();

        Ok(Self {
            file,
            position: 0,
            backing: Backing::Remote {
                tracker,
                read_timeout,
                _session: Some(session),
            },
        })
    }

    /// Remote source over an explicit spool file and tracker. Used by tests
    /// to simulate download progress without a network.
    pub fn remote_parts(
        file: File,
        tracker: Arc<ProgressTracker>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            file,
            position: 0,
            backing: Backing::Remote {
                tracker,
                read_timeout,
                _session: None,
            },
        }
    }

    fn total_len(&self) -> Option<u64> {
        match &self.backing {
            Backing::Local { len } => Some(*len),
            Backing::Remote { tracker, .. } => tracker.snapshot().total_bytes,
        }
    }
}

impl Read for SourceBuffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Backing::Remote {
            tracker,
            read_timeout,
            ..
        } = &self.backing
        {
            let snap = tracker
                .wait_for(self.position, *read_timeout)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::TimedOut, e.to_string()))?;

            if snap.complete && self.position >= snap.bytes_downloaded {
                return Ok(0); // EOF
            }

            // Never read past the frontier; the spool may have been opened
            // before the latest append landed.
            let available = snap.bytes_downloaded.saturating_sub(self.position);
            let cap = (buf.len() as u64).min(available) as usize;
            self.file.seek(SeekFrom::Start(self.position))?;
            let n = self.file.read(&mut buf[..cap])?;
            trace!(pos = self.position, n, "remote read");
            self.position += n as u64;
            return Ok(n);
        }

        self.file.seek(SeekFrom::Start(self.position))?;
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for SourceBuffer {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::Current(delta) => {
                if delta >= 0 {
                    self.position.saturating_add(delta as u64)
                } else {
                    self.position.saturating_sub(delta.unsigned_abs())
                }
            }
            SeekFrom::End(delta) => {
                let len = self.total_len().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "Cannot seek from end: total size unknown",
                    )
                })?;
                if delta >= 0 {
                    len.saturating_add(delta as u64)
                } else {
                    len.saturating_sub(delta.unsigned_abs())
                }
            }
        };

        // Seeking only repositions the cursor. A forward seek beyond the
        // frontier resolves (or times out) on the next read.
        self.position = new_pos;
        Ok(new_pos)
    }
}

impl MediaSource for SourceBuffer {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        self.total_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    fn spool_with(data: &[u8]) -> (tempfile::NamedTempFile, File) {
        let mut spool = tempfile::NamedTempFile::new().unwrap();
        spool.write_all(data).unwrap();
        spool.flush().unwrap();
        let reader = File::open(spool.path()).unwrap();
        (spool, reader)
    }

    #[test]
    fn test_local_read_and_seek() {
        let (spool, _) = spool_with(b"abcdefgh");
        let mut src = SourceBuffer::local(spool.path()).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");

        src.seek(SeekFrom::Start(6)).unwrap();
        assert_eq!(src.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"gh");

        assert_eq!(src.byte_len(), Some(8));
        assert!(src.is_seekable());
    }

    #[test]
    fn test_remote_read_stops_at_frontier() {
        let (spool, reader) = spool_with(b"0123456789");
        let tracker = Arc::new(ProgressTracker::new());
        tracker.advance(4); // only 4 bytes "downloaded"
        let mut src = SourceBuffer::remote_parts(reader, tracker, Duration::from_millis(50));

        let mut buf = [0u8; 10];
        assert_eq!(src.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"0123");
        drop(spool);
    }

    #[test]
    fn test_remote_read_blocks_then_resumes() {
        let (spool, reader) = spool_with(b"0123456789");
        let tracker = Arc::new(ProgressTracker::new());
        tracker.advance(2);
        let mut src =
            SourceBuffer::remote_parts(reader, Arc::clone(&tracker), Duration::from_secs(2));

        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf).unwrap(), 2);

        // Next read has no data yet; feed it from another thread
        let feeder = Arc::clone(&tracker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            feeder.advance(8);
            feeder.mark_complete();
        });

        let mut rest = [0u8; 8];
        assert_eq!(src.read(&mut rest).unwrap(), 8);
        assert_eq!(&rest, b"23456789");

        // Past EOF
        assert_eq!(src.read(&mut buf).unwrap(), 0);
        handle.join().unwrap();
        drop(spool);
    }

    #[test]
    fn test_remote_read_times_out_recoverably() {
        let (spool, reader) = spool_with(b"01");
        let tracker = Arc::new(ProgressTracker::new());
        tracker.advance(2);
        let mut src = SourceBuffer::remote_parts(reader, tracker, Duration::from_millis(30));

        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf).unwrap(), 2);

        // Frontier never advances: bounded wait, then TimedOut
        let err = src.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        drop(spool);
    }

    #[test]
    fn test_backward_seek_serves_buffered_data() {
        let (spool, reader) = spool_with(b"abcdef");
        let tracker = Arc::new(ProgressTracker::new());
        tracker.advance(6);
        tracker.mark_complete();
        let mut src = SourceBuffer::remote_parts(reader, tracker, Duration::from_millis(50));

        let mut buf = [0u8; 6];
        assert_eq!(src.read(&mut buf).unwrap(), 6);

        src.seek(SeekFrom::Start(1)).unwrap();
        let mut two = [0u8; 2];
        assert_eq!(src.read(&mut two).unwrap(), 2);
        assert_eq!(&two, b"bc");
        drop(spool);
    }
}
