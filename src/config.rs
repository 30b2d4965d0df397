//! Playback engine configuration
//!
//! All tunables live here with defaults that match podcast-style content:
//! speech-heavy audio, long episodes, unreliable mobile networks.

use std::time::Duration;

/// Player configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Ring buffer capacity in seconds of audio at the negotiated output spec
    pub ring_buffer_secs: u32,

    /// Interval between position callbacks forwarded to the host
    pub position_interval: Duration,

    /// Maximum time a source read may wait on download progress before
    /// surfacing a recoverable I/O error
    pub source_read_timeout: Duration,

    /// HTTP connect timeout
    pub connect_timeout: Duration,

    /// Per-operation timeout on transport socket reads and writes. Bounds
    /// how long a single chunk read on a stalled connection can block; a
    /// timed-out read goes through the normal error and resume paths.
    pub transport_read_timeout: Duration,

    /// Retry attempts for transient transport failures
    pub transport_retries: u32,

    /// Initial backoff delay, doubled per attempt
    pub transport_backoff: Duration,

    /// Prebuffer floor before playback of a progressive download may start
    pub prebuffer_min_bytes: u64,

    /// Prebuffer ceiling (large files stop prebuffering here)
    pub prebuffer_max_bytes: u64,

    /// Fraction of the total file targeted by the prebuffer, when known
    pub prebuffer_fraction: f64,

    /// Container extensions that require a complete download before the
    /// demuxer can seek reliably (MP4-family trailing atom index)
    pub full_download_extensions: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ring_buffer_secs: 5,
            position_interval: Duration::from_millis(100),
            source_read_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            transport_read_timeout: Duration::from_secs(30),
            transport_retries: 3,
            transport_backoff: Duration::from_millis(500),
            prebuffer_min_bytes: 5 * 1024 * 1024,
            prebuffer_max_bytes: 15 * 1024 * 1024,
            prebuffer_fraction: 0.3,
            full_download_extensions: vec![
                "m4a".to_string(),
                "mp4".to_string(),
                "m4b".to_string(),
            ],
        }
    }
}

impl PlayerConfig {
    /// Whether a URL points at a container that needs the whole file on disk
    /// before random access is reliable.
    ///
    /// Extension matching on the URL path is deliberate: the decision has to
    /// be made before any bytes arrive.
    pub fn requires_full_download(&self, url: &str) -> bool {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        self.full_download_extensions
            .iter()
            .any(|ext| path.ends_with(&format!(".{ext}")))
    }

    /// Prebuffer target for a progressive download of `total_bytes` (None when
    /// the server did not report a length).
    pub fn prebuffer_target(&self, total_bytes: Option<u64>) -> u64 {
        match total_bytes {
            Some(total) => ((total as f64 * self.prebuffer_fraction) as u64)
                .max(self.prebuffer_min_bytes)
                .min(self.prebuffer_max_bytes),
            None => self.prebuffer_min_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_download_policy_matches_mp4_family() {
        let config = PlayerConfig::default();
        assert!(config.requires_full_download("https://cdn.example.com/ep01.m4a"));
        assert!(config.requires_full_download("https://cdn.example.com/ep01.M4B"));
        assert!(config.requires_full_download("https://cdn.example.com/a.mp4?token=x"));
        assert!(!config.requires_full_download("https://cdn.example.com/ep01.mp3"));
        assert!(!config.requires_full_download("https://cdn.example.com/ep01.ogg"));
    }

    #[test]
    fn test_policy_is_configurable() {
        let mut config = PlayerConfig::default();
        config.full_download_extensions = vec!["ogg".to_string()];
        assert!(config.requires_full_download("http://x/y.ogg"));
        assert!(!config.requires_full_download("http://x/y.m4a"));
    }

    #[test]
    fn test_prebuffer_target_clamped() {
        let config = PlayerConfig::default();
        // 30% of 100 MiB exceeds the 15 MiB ceiling
        assert_eq!(
            config.prebuffer_target(Some(100 * 1024 * 1024)),
            config.prebuffer_max_bytes
        );
        // 30% of 1 MiB falls below the 5 MiB floor
        assert_eq!(
            config.prebuffer_target(Some(1024 * 1024)),
            config.prebuffer_min_bytes
        );
        // Unknown size uses the floor
        assert_eq!(config.prebuffer_target(None), config.prebuffer_min_bytes);
    }
}
