//! The chunked copy loop shared by HTTP and FTP downloads.

use std::time::{Duration, Instant};

use fetchkit_core::FetchError;
use futures_util::io::{AsyncRead, AsyncReadExt};
use tokio::io::AsyncWriteExt;

use crate::progress::{ProgressCallback, ProgressTracker};
use crate::StreamConfig;

/// Rates at which the adaptive chunk size grows or shrinks.
const FAST_LINK: f64 = 1024.0 * 1024.0; // 1 MiB/s
const SLOW_LINK: f64 = 100.0 * 1024.0; // 100 KiB/s

/// Outcome of one copy loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Bytes written by this call (resumed bytes not included).
    pub bytes_written: u64,
    /// Chunk size in effect when the transfer finished.
    pub final_chunk_size: usize,
}

/// Streams `reader` into `file` chunk by chunk.
///
/// `resumed` is the byte offset already on disk (progress and rate
/// caps account for it); `total` is the remote size when known. The
/// chunk size adapts to the observed rate when the config says so, a
/// configured rate cap is enforced by sleeping, and progress is
/// emitted on the configured cadence.
pub async fn copy_with_progress<R>(
    mut reader: R,
    file: &mut tokio::fs::File,
    config: &StreamConfig,
    resumed: u64,
    total: Option<u64>,
    file_label: &str,
    progress: Option<&ProgressCallback>,
) -> Result<CopyOutcome, FetchError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk_size = config
        .chunk_size
        .clamp(config.min_chunk_size, config.max_chunk_size);
    let mut buf = vec![0u8; chunk_size];
    let mut written: u64 = 0;
    let mut tracker = ProgressTracker::new(
        config.progress_interval,
        file_label.to_string(),
        total,
        resumed,
    );
    let started = Instant::now();
    let mut last_adapt = Instant::now();

    loop {
        let n = reader
            .read(&mut buf[..chunk_size])
            .await
            .map_err(|e| FetchError::Io {
                message: e.to_string(),
            })?;
        if n == 0 {
            break;
        }

        file.write_all(&buf[..n]).await?;
        written += n as u64;
        let transferred = resumed + written;

        if let Some(limit) = config.max_file_size {
            if transferred > limit {
                return Err(FetchError::Content {
                    message: format!("download exceeds the {limit}-byte limit"),
                });
            }
        }

        let rate = tracker.update_rate(transferred);

        if config.adaptive_chunk_size && last_adapt.elapsed() >= Duration::from_secs(1) {
            last_adapt = Instant::now();
            let adapted = if rate > FAST_LINK {
                ((chunk_size as f64 * 1.2) as usize).min(config.max_chunk_size)
            } else if rate > 0.0 && rate < SLOW_LINK {
                ((chunk_size as f64 * 0.8) as usize).max(config.min_chunk_size)
            } else {
                chunk_size
            };
            if adapted != chunk_size {
                tracing::trace!(from = chunk_size, to = adapted, "adapting chunk size");
                chunk_size = adapted;
                buf.resize(chunk_size, 0);
            }
        }

        tracker.maybe_emit(transferred, progress);

        if let Some(cap) = config.max_rate {
            if cap > 0.0 {
                let expected = Duration::from_secs_f64(written as f64 / cap);
                let actual = started.elapsed();
                if expected > actual {
                    tokio::time::sleep(expected - actual).await;
                }
            }
        }
    }

    file.flush().await?;
    tracker.emit_final(resumed + written, progress);

    Ok(CopyOutcome {
        bytes_written: written,
        final_chunk_size: chunk_size,
    })
}
