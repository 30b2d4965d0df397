//! Progressive HTTP transport
//!
//! Fetches remote audio into a local spool file so the demuxer sees a
//! seekable byte stream. Playback starts after a prebuffer; the rest of the
//! file continues downloading on a background thread.

mod client;
mod download;

pub use client::{RemoteInfo, TransportClient};
pub use download::{DownloadSession, ProgressSnapshot, ProgressTracker};
