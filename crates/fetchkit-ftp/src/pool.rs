//! Authenticated FTP control-connection pool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fetchkit_core::FetchError;
use parking_lot::Mutex;
use suppaftp::types::{FileType, FormatControl};
use suppaftp::{AsyncFtpStream, AsyncNativeTlsConnector, AsyncNativeTlsFtpStream, Mode};

use crate::target::FtpTarget;

/// Transfer representation negotiated after login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferType {
    #[default]
    Binary,
    Ascii,
}

/// FTP pool configuration.
#[derive(Debug, Clone)]
pub struct FtpConfig {
    /// Idle control connections kept per (host, port, user).
    pub max_connections_per_host: usize,
    /// Idle age at which the sweeper quits a connection.
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub passive: bool,
    pub transfer_type: TransferType,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: 3,
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            passive: true,
            transfer_type: TransferType::Binary,
        }
    }
}

/// A logged-in control connection, plain or TLS.
pub enum FtpClient {
    Plain(AsyncFtpStream),
    Secure(AsyncNativeTlsFtpStream),
}

impl FtpClient {
    pub async fn size(&mut self, path: &str) -> Result<usize, FetchError> {
        match self {
            FtpClient::Plain(ftp) => ftp.size(path).await.map_err(map_ftp_error),
            FtpClient::Secure(ftp) => ftp.size(path).await.map_err(map_ftp_error),
        }
    }

    pub async fn noop(&mut self) -> Result<(), FetchError> {
        match self {
            FtpClient::Plain(ftp) => ftp.noop().await.map_err(map_ftp_error),
            FtpClient::Secure(ftp) => ftp.noop().await.map_err(map_ftp_error),
        }
    }

    pub async fn resume_transfer(&mut self, offset: usize) -> Result<(), FetchError> {
        match self {
            FtpClient::Plain(ftp) => ftp.resume_transfer(offset).await.map_err(map_ftp_error),
            FtpClient::Secure(ftp) => ftp.resume_transfer(offset).await.map_err(map_ftp_error),
        }
    }

    pub async fn list(&mut self, path: Option<&str>) -> Result<Vec<String>, FetchError> {
        match self {
            FtpClient::Plain(ftp) => ftp.list(path).await.map_err(map_ftp_error),
            FtpClient::Secure(ftp) => ftp.list(path).await.map_err(map_ftp_error),
        }
    }

    pub async fn mdtm(&mut self, path: &str) -> Result<Option<String>, FetchError> {
        let stamp = match self {
            FtpClient::Plain(ftp) => ftp.mdtm(path).await,
            FtpClient::Secure(ftp) => ftp.mdtm(path).await,
        };
        Ok(stamp.ok().map(|t| t.to_string()))
    }

    pub async fn quit(&mut self) {
        let _ = match self {
            FtpClient::Plain(ftp) => ftp.quit().await,
            FtpClient::Secure(ftp) => ftp.quit().await,
        };
    }
}

/// Maps suppaftp failures into the engine's error space. 530 is an
/// auth failure, 550 a missing file; the rest stay FTP errors.
pub fn map_ftp_error(err: suppaftp::FtpError) -> FetchError {
    use suppaftp::Status;
    match &err {
        suppaftp::FtpError::UnexpectedResponse(response) => match response.status {
            Status::NotLoggedIn => FetchError::Auth { status: 530 },
            Status::FileUnavailable => FetchError::NotFound {
                url: String::new(),
            },
            _ => FetchError::Ftp {
                message: err.to_string(),
            },
        },
        _ => FetchError::Ftp {
            message: err.to_string(),
        },
    }
}

struct IdleConn {
    client: FtpClient,
    last_used: Instant,
}

type PoolKey = (String, u16, String);

/// The pool. Checkout prefers an idle connection (after a NOOP
/// liveness probe); checkin keeps at most `max_connections_per_host`
/// idle and QUITs the excess.
pub struct FtpPool {
    config: FtpConfig,
    idle: Mutex<HashMap<PoolKey, VecDeque<IdleConn>>>,
}

/// A checked-out connection. Return it with [`FtpPool::checkin`]; a
/// drop without checkin simply closes the control socket.
pub struct FtpConnection {
    pub client: FtpClient,
    key: PoolKey,
    /// Whether this connection came from the idle set.
    pub reused: bool,
}

impl std::fmt::Debug for FtpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpConnection")
            .field("key", &self.key)
            .field("reused", &self.reused)
            .finish()
    }
}

impl FtpPool {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            idle: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FtpConfig {
        &self.config
    }

    /// Obtains a logged-in connection for `target`.
    pub async fn checkout(&self, target: &FtpTarget) -> Result<FtpConnection, FetchError> {
        let key = target.pool_key();

        // Reuse an idle connection if one still answers.
        loop {
            let candidate = { self.idle.lock().get_mut(&key).and_then(VecDeque::pop_front) };
            match candidate {
                Some(mut idle) => {
                    if idle.client.noop().await.is_ok() {
                        tracing::trace!(host = %target.host, "reusing pooled FTP connection");
                        return Ok(FtpConnection {
                            client: idle.client,
                            key,
                            reused: true,
                        });
                    }
                    // Dead connection; fall through and try the next.
                }
                None => break,
            }
        }

        let client = self.connect(target).await?;
        Ok(FtpConnection {
            client,
            key,
            reused: false,
        })
    }

    /// Returns a connection to the idle set, quitting it instead when
    /// the per-host cap is already met.
    pub async fn checkin(&self, mut conn: FtpConnection) {
        let over_cap = {
            let idle = self.idle.lock();
            idle.get(&conn.key)
                .map(|q| q.len() >= self.config.max_connections_per_host)
                .unwrap_or(false)
        };
        if over_cap {
            conn.client.quit().await;
            return;
        }
        self.idle.lock().entry(conn.key).or_default().push_back(IdleConn {
            client: conn.client,
            last_used: Instant::now(),
        });
    }

    async fn connect(&self, target: &FtpTarget) -> Result<FtpClient, FetchError> {
        let addr = target.addr();
        let mut client = if target.secure {
            let plain = tokio::time::timeout(
                self.config.connect_timeout,
                AsyncNativeTlsFtpStream::connect(&addr),
            )
            .await
            .map_err(|_| FetchError::Timeout {
                elapsed: self.config.connect_timeout,
            })?
            .map_err(map_ftp_error)?;

            let connector =
                AsyncNativeTlsConnector::from(suppaftp::async_native_tls::TlsConnector::new());
            let secured = plain
                .into_secure(connector, &target.host)
                .await
                .map_err(|e| FetchError::Tls {
                    message: e.to_string(),
                })?;
            FtpClient::Secure(secured)
        } else {
            let plain = tokio::time::timeout(
                self.config.connect_timeout,
                AsyncFtpStream::connect(&addr),
            )
            .await
            .map_err(|_| FetchError::Timeout {
                elapsed: self.config.connect_timeout,
            })?
            .map_err(map_ftp_error)?;
            FtpClient::Plain(plain)
        };

        self.login(&mut client, target).await?;
        Ok(client)
    }

    async fn login(&self, client: &mut FtpClient, target: &FtpTarget) -> Result<(), FetchError> {
        let file_type = match self.config.transfer_type {
            TransferType::Binary => FileType::Binary,
            TransferType::Ascii => FileType::Ascii(FormatControl::Default),
        };
        let mode = if self.config.passive {
            Mode::Passive
        } else {
            Mode::Active
        };

        match client {
            FtpClient::Plain(ftp) => {
                ftp.login(&target.username, &target.password)
                    .await
                    .map_err(map_ftp_error)?;
                ftp.transfer_type(file_type).await.map_err(map_ftp_error)?;
                ftp.set_mode(mode);
            }
            FtpClient::Secure(ftp) => {
                ftp.login(&target.username, &target.password)
                    .await
                    .map_err(map_ftp_error)?;
                ftp.transfer_type(file_type).await.map_err(map_ftp_error)?;
                ftp.set_mode(mode);
            }
        }
        Ok(())
    }

    /// Quits idle connections past the idle timeout; returns how many.
    pub async fn evict_idle(&self) -> usize {
        let timeout = self.config.idle_timeout;
        let stale: Vec<IdleConn> = {
            let mut idle = self.idle.lock();
            let mut stale = Vec::new();
            for queue in idle.values_mut() {
                while queue
                    .front()
                    .is_some_and(|c| c.last_used.elapsed() > timeout)
                {
                    if let Some(conn) = queue.pop_front() {
                        stale.push(conn);
                    }
                }
            }
            idle.retain(|_, q| !q.is_empty());
            stale
        };
        let evicted = stale.len();
        for mut conn in stale {
            conn.client.quit().await;
        }
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle FTP connections");
        }
        evicted
    }

    /// Spawns the idle sweeper; runs until the handle is dropped by the
    /// owning engine.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                pool.evict_idle().await;
            }
        })
    }

    /// Idle connections currently pooled for a target's key.
    pub fn idle_count(&self, target: &FtpTarget) -> usize {
        self.idle
            .lock()
            .get(&target.pool_key())
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}
