//! FTP operations: download (with resume), list, info.

use std::path::Path;
use std::time::Instant;

use fetchkit_core::FetchError;
use fetchkit_stream::{
    copy_with_progress, verify_file, DownloadOutcome, ProgressCallback, StreamConfig,
};
use url::Url;

use crate::pool::{map_ftp_error, FtpClient, FtpConnection, FtpPool};
use crate::target::FtpTarget;

/// SIZE/MDTM metadata for one remote path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpFileInfo {
    pub path: String,
    pub size: Option<u64>,
    pub modified: Option<String>,
}

/// One directory-listing entry. `raw` keeps the server line; the
/// parsed fields are best-effort over the common UNIX format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub raw: String,
}

/// Streams a remote file to `dest`, resuming from the local prefix via
/// `REST` when enabled, then verifies per the config. On error the
/// control connection is dropped (its state is unknown); on success it
/// returns to the pool.
pub async fn download(
    pool: &FtpPool,
    url: &Url,
    dest: &Path,
    config: &StreamConfig,
    progress: Option<&ProgressCallback>,
) -> Result<DownloadOutcome, FetchError> {
    let started = Instant::now();
    let target = FtpTarget::from_url(url)?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut conn = pool.checkout(&target).await?;
    let result = download_on(&mut conn, &target, dest, config, progress, started).await;
    match result {
        Ok(outcome) => {
            pool.checkin(conn).await;
            Ok(outcome)
        }
        Err(err) => Err(fill_url(err, url)),
    }
}

async fn download_on(
    conn: &mut FtpConnection,
    target: &FtpTarget,
    dest: &Path,
    config: &StreamConfig,
    progress: Option<&ProgressCallback>,
    started: Instant,
) -> Result<DownloadOutcome, FetchError> {
    let total = conn.client.size(&target.path).await.ok().map(|s| s as u64);

    let mut resume_position: u64 = 0;
    if config.enable_resume {
        if let Ok(meta) = tokio::fs::metadata(dest).await {
            resume_position = meta.len();
        }
    }

    if let Some(total) = total {
        if resume_position >= total && resume_position > 0 {
            verify_file(dest, &config.verification).await?;
            return Ok(DownloadOutcome {
                path: dest.to_path_buf(),
                bytes_transferred: 0,
                total_bytes: Some(total),
                resumed_from: resume_position,
                elapsed: started.elapsed(),
                final_chunk_size: config.chunk_size,
            });
        }
    }

    if resume_position > 0 {
        conn.client.resume_transfer(resume_position as usize).await?;
    }

    let mut file = if resume_position > 0 {
        tokio::fs::OpenOptions::new().append(true).open(dest).await?
    } else {
        tokio::fs::File::create(dest).await?
    };

    let copy = match &mut conn.client {
        FtpClient::Plain(ftp) => {
            let mut reader = ftp
                .retr_as_stream(&target.path)
                .await
                .map_err(map_ftp_error)?;
            let copy = copy_with_progress(
                &mut reader,
                &mut file,
                config,
                resume_position,
                total,
                &target.filename,
                progress,
            )
            .await?;
            ftp.finalize_retr_stream(reader)
                .await
                .map_err(map_ftp_error)?;
            copy
        }
        FtpClient::Secure(ftp) => {
            let mut reader = ftp
                .retr_as_stream(&target.path)
                .await
                .map_err(map_ftp_error)?;
            let copy = copy_with_progress(
                &mut reader,
                &mut file,
                config,
                resume_position,
                total,
                &target.filename,
                progress,
            )
            .await?;
            ftp.finalize_retr_stream(reader)
                .await
                .map_err(map_ftp_error)?;
            copy
        }
    };

    verify_file(dest, &config.verification).await?;

    tracing::debug!(
        host = %target.host,
        path = %target.path,
        bytes = copy.bytes_written,
        resumed_from = resume_position,
        reused_connection = conn.reused,
        "FTP download complete"
    );

    Ok(DownloadOutcome {
        path: dest.to_path_buf(),
        bytes_transferred: copy.bytes_written,
        total_bytes: total,
        resumed_from: resume_position,
        elapsed: started.elapsed(),
        final_chunk_size: copy.final_chunk_size,
    })
}

/// Lists a remote directory.
pub async fn list(pool: &FtpPool, url: &Url) -> Result<Vec<FtpEntry>, FetchError> {
    let target = FtpTarget::from_url(url)?;
    let mut conn = pool.checkout(&target).await?;
    let lines = match conn.client.list(Some(&target.path)).await {
        Ok(lines) => lines,
        Err(err) => return Err(fill_url(err, url)),
    };
    pool.checkin(conn).await;
    Ok(lines.iter().map(|line| parse_entry(line)).collect())
}

/// Fetches SIZE and MDTM without transferring the body.
pub async fn info(pool: &FtpPool, url: &Url) -> Result<FtpFileInfo, FetchError> {
    let target = FtpTarget::from_url(url)?;
    let mut conn = pool.checkout(&target).await?;
    let size = match conn.client.size(&target.path).await {
        Ok(size) => Some(size as u64),
        Err(FetchError::NotFound { .. }) => {
            pool.checkin(conn).await;
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        Err(_) => None,
    };
    let modified = conn.client.mdtm(&target.path).await.unwrap_or(None);
    pool.checkin(conn).await;
    Ok(FtpFileInfo {
        path: target.path.clone(),
        size,
        modified,
    })
}

/// Best-effort parse of a UNIX `LIST` line:
/// `-rw-r--r-- 1 owner group 4096 Jan 01 12:00 name`.
fn parse_entry(line: &str) -> FtpEntry {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let is_dir = line.starts_with('d');
    let size = tokens.get(4).and_then(|t| t.parse::<u64>().ok());
    let name = tokens
        .get(8..)
        .map(|rest| rest.join(" "))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| tokens.last().map(|s| s.to_string()).unwrap_or_default());
    FtpEntry {
        name,
        is_dir,
        size,
        raw: line.to_string(),
    }
}

fn fill_url(err: FetchError, url: &Url) -> FetchError {
    match err {
        FetchError::NotFound { .. } => FetchError::NotFound {
            url: url.to_string(),
        },
        other => other,
    }
}
