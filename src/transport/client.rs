//! HTTP client configuration and retry logic

use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header;
use std::time::Duration;
use tracing::{debug, warn};

/// What the server told us about a remote resource
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteInfo {
    /// Total size in bytes, when reported
    pub total_bytes: Option<u64>,

    /// Whether the server honors byte-range requests
    pub supports_range: bool,
}

/// Blocking HTTP client for the download thread
pub struct TransportClient {
    client: Client,
    retries: u32,
    backoff: Duration,
}

impl TransportClient {
    pub fn new(config: &PlayerConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            // Per-operation socket timeout, not a whole-request deadline:
            // episode downloads run for minutes, but no single read may
            // block past this bound. A stalled connection errors out and
            // takes the resume path.
            .timeout(config.transport_read_timeout)
            .user_agent(concat!("castplay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Io(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            retries: config.transport_retries,
            backoff: config.transport_backoff,
        })
    }

    /// Probe the resource for size and range support.
    ///
    /// Tries HEAD first; some podcast CDNs reject HEAD, so a one-byte range
    /// GET serves as fallback and doubles as a range-support check.
    pub fn probe(&self, url: &str) -> RemoteInfo {
        match self.client.head(url).send() {
            Ok(resp) if resp.status().is_success() => {
                let supports_range = resp
                    .headers()
                    .get(header::ACCEPT_RANGES)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.eq_ignore_ascii_case("bytes"))
                    .unwrap_or(false);
                let info = RemoteInfo {
                    total_bytes: resp.content_length(),
                    supports_range,
                };
                debug!(?info, "HEAD probe succeeded");
                info
            }
            _ => self.probe_with_range(url),
        }
    }

    fn probe_with_range(&self, url: &str) -> RemoteInfo {
        match self
            .client
            .get(url)
            .header(header::RANGE, "bytes=0-0")
            .send()
        {
            Ok(resp) if resp.status().as_u16() == 206 => {
                let total = resp
                    .headers()
                    .get(header::CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.rsplit('/').next())
                    .and_then(|v| v.parse::<u64>().ok());
                debug!(total, "range probe succeeded");
                RemoteInfo {
                    total_bytes: total,
                    supports_range: true,
                }
            }
            Ok(resp) => RemoteInfo {
                total_bytes: resp.content_length(),
                supports_range: false,
            },
            Err(e) => {
                warn!("Probe failed for {url}: {e}");
                RemoteInfo::default()
            }
        }
    }

    /// GET with bounded exponential backoff on transient failures.
    pub fn get_retrying(&self, url: &str) -> Result<Response> {
        let mut last_error = None;

        for attempt in 0..=self.retries {
            match self.client.get(url).send() {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    return Err(Error::Io(format!(
                        "HTTP GET {url} returned status {}",
                        resp.status()
                    )));
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.retries {
                        let delay = self.backoff * 2u32.pow(attempt);
                        warn!(
                            "Request failed (attempt {}), retrying after {:?}",
                            attempt + 1,
                            delay
                        );
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        Err(Error::Io(format!(
            "Request failed after {} attempts: {:?}",
            self.retries + 1,
            last_error
        )))
    }

    /// GET from `start` to end of file, validating that the server actually
    /// honored the range. Appending an unvalidated 200 body would corrupt the
    /// spool file.
    pub fn get_range_from(&self, url: &str, start: u64) -> Result<Response> {
        let resp = self
            .client
            .get(url)
            .header(header::RANGE, format!("bytes={start}-"))
            .send()
            .map_err(|e| Error::Io(format!("HTTP range GET failed: {e}")))?;

        if resp.status().as_u16() != 206 {
            return Err(Error::Io(format!(
                "Server returned {} instead of 206 Partial Content",
                resp.status()
            )));
        }

        let expected_prefix = format!("bytes {start}-");
        let range_ok = resp
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with(&expected_prefix))
            .unwrap_or(false);
        if !range_ok {
            return Err(Error::Io(format!(
                "Content-Range does not match requested start position {start}"
            )));
        }

        Ok(resp)
    }
}
