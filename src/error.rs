//! Error types for castplay
//!
//! Defines the playback engine error taxonomy using thiserror. Each variant
//! carries a stable integer status code for the FFI boundary, where errors
//! must not unwind across the language barrier.

use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug)]
pub enum Error {
    /// Network or file access failures (transport, source buffer)
    #[error("I/O error: {0}")]
    Io(String),

    /// Unrecognized or malformed container
    #[error("Format error: {0}")]
    Format(String),

    /// Codec-level decode failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Operation invalid in the current player state
    #[error("Invalid state: {0}")]
    State(String),

    /// Renderer initialization or output device failure
    #[error("Audio device error: {0}")]
    Device(String),

    /// Other internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable status code for the C ABI (0 is reserved for success).
    pub fn status_code(&self) -> i32 {
        match self {
            Error::Io(_) => 1,
            Error::Format(_) => 2,
            Error::Decode(_) => 3,
            Error::State(_) => 4,
            Error::Device(_) => 5,
            Error::Internal(_) => 6,
        }
    }

    /// Whether the error leaves the handle unusable until `release` + `create`.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Device(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// Convenience Result type using the castplay Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_distinct_and_nonzero() {
        let errors = [
            Error::Io("a".into()),
            Error::Format("b".into()),
            Error::Decode("c".into()),
            Error::State("d".into()),
            Error::Device("e".into()),
            Error::Internal("f".into()),
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.status_code()).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_only_device_errors_are_fatal() {
        assert!(Error::Device("gone".into()).is_fatal());
        assert!(!Error::Io("timeout".into()).is_fatal());
        assert!(!Error::State("bad op".into()).is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let err: Error = io.into();
        assert_eq!(err.status_code(), 1);
    }
}
