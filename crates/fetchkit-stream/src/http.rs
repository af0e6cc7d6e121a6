//! HTTP download pipeline: stat, resume, ranged GET, verify.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fetchkit_core::FetchError;
use futures_util::TryStreamExt;
use url::Url;

use fetchkit_pool::HttpPool;

use crate::copy::copy_with_progress;
use crate::progress::ProgressCallback;
use crate::verify::verify_file;
use crate::{DownloadOutcome, StreamConfig};

/// Downloads `url` to `dest` through the pool, resuming from whatever
/// is already on disk when the config allows it, and verifying the
/// result when a method is configured.
///
/// Partial writes are recoverable by construction: bytes are appended
/// in order, so a failed attempt leaves a prefix a later call resumes
/// from.
pub async fn download_http(
    pool: &HttpPool,
    url: &Url,
    dest: &Path,
    config: &StreamConfig,
    progress: Option<&ProgressCallback>,
) -> Result<DownloadOutcome, FetchError> {
    let started = Instant::now();
    let host = fetchkit_url::host_key(url);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let total = stat_remote(pool, &host, url).await?;

    let mut resume_position: u64 = 0;
    if config.enable_resume {
        if let Ok(meta) = tokio::fs::metadata(dest).await {
            resume_position = meta.len();
        }
    }

    if let (Some(total), true) = (total, resume_position > 0) {
        if resume_position >= total {
            verify_file(dest, &config.verification).await?;
            return Ok(DownloadOutcome {
                path: PathBuf::from(dest),
                bytes_transferred: 0,
                total_bytes: Some(total),
                resumed_from: resume_position,
                elapsed: started.elapsed(),
                final_chunk_size: config.chunk_size,
            });
        }
    }

    let label = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string());

    let outcome = pool
        .with_session(&host, |client| {
            let url = url.clone();
            let dest = dest.to_path_buf();
            let config = config.clone();
            let label = label.clone();
            async move {
                let mut request = client.get(url.clone());
                if resume_position > 0 {
                    request = request.header("range", format!("bytes={resume_position}-"));
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| HttpPool::classify_error(&e, started.elapsed()))?;

                let status = response.status().as_u16();
                let mut from = resume_position;
                match status {
                    206 => {}
                    200 => {
                        // Server ignored (or never saw) the range; start over.
                        from = 0;
                    }
                    s => return Err(FetchError::from_status(s, url.as_str(), None)),
                }

                let mut file = if from > 0 {
                    tokio::fs::OpenOptions::new().append(true).open(&dest).await?
                } else {
                    tokio::fs::File::create(&dest).await?
                };

                let reader = response
                    .bytes_stream()
                    .map_err(std::io::Error::other)
                    .into_async_read();

                let copy = copy_with_progress(
                    reader,
                    &mut file,
                    &config,
                    from,
                    total,
                    &label,
                    progress,
                )
                .await?;

                Ok((from, copy))
            }
        })
        .await?;

    let (resumed_from, copy) = outcome;

    verify_file(dest, &config.verification).await?;

    tracing::debug!(
        url = %url,
        bytes = copy.bytes_written,
        resumed_from,
        "download complete"
    );

    Ok(DownloadOutcome {
        path: PathBuf::from(dest),
        bytes_transferred: copy.bytes_written,
        total_bytes: total,
        resumed_from,
        elapsed: started.elapsed(),
        final_chunk_size: copy.final_chunk_size,
    })
}

/// HEAD the remote for its size; servers without HEAD support just
/// leave the total unknown.
async fn stat_remote(
    pool: &HttpPool,
    host: &str,
    url: &Url,
) -> Result<Option<u64>, FetchError> {
    let size = pool
        .with_session(host, |client| {
            let url = url.clone();
            async move {
                let response = client
                    .head(url)
                    .send()
                    .await
                    .map_err(|e| HttpPool::classify_error(&e, Duration::ZERO))?;
                if !response.status().is_success() {
                    return Ok(None);
                }
                Ok(response
                    .headers()
                    .get("content-length")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok()))
            }
        })
        .await?;
    Ok(size)
}
