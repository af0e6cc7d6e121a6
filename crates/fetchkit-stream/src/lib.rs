//! Streaming download pipeline.
//!
//! The pipeline downloads in chunks with adaptive sizing, reports
//! progress on a fixed cadence, resumes from whatever prefix is on
//! disk, optionally caps throughput, and verifies the finished file by
//! size or digest. The chunked copy loop is transport-agnostic (any
//! `futures::io::AsyncRead`); the HTTP entry point lives here, the FTP
//! one in `fetchkit-ftp` on top of the same loop.

mod copy;
mod http;
mod progress;
mod verify;

pub use copy::{copy_with_progress, CopyOutcome};
pub use http::download_http;
pub use progress::{ProgressCallback, ProgressInfo};
pub use verify::{verify_file, VerificationMethod};

use std::path::PathBuf;
use std::time::Duration;

/// Streaming configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Starting chunk size.
    pub chunk_size: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    /// Grow/shrink the chunk with the observed rate.
    pub adaptive_chunk_size: bool,
    /// Resume from an existing local prefix.
    pub enable_resume: bool,
    /// Throughput cap in bytes/second.
    pub max_rate: Option<f64>,
    /// Progress emission cadence.
    pub progress_interval: Duration,
    pub verification: VerificationMethod,
    /// Hard cap on the downloaded size.
    pub max_file_size: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            min_chunk_size: 8 * 1024,
            max_chunk_size: 1024 * 1024,
            adaptive_chunk_size: true,
            enable_resume: true,
            max_rate: None,
            progress_interval: Duration::from_millis(100),
            verification: VerificationMethod::None,
            max_file_size: None,
        }
    }
}

/// Outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    /// Bytes moved by this call; resumed bytes are not re-counted.
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub resumed_from: u64,
    pub elapsed: Duration,
    pub final_chunk_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ordered() {
        let config = StreamConfig::default();
        assert!(config.min_chunk_size <= config.chunk_size);
        assert!(config.chunk_size <= config.max_chunk_size);
        assert!(config.adaptive_chunk_size);
        assert!(config.enable_resume);
        assert_eq!(config.verification, VerificationMethod::None);
    }
}
