//! FTP(S) support: a pooled, authenticated control-connection layer
//! and the three operations the engine exposes over it (download with
//! resume, directory listing, SIZE/MDTM metadata).
//!
//! Connections are keyed by `(host, port, username)`; anonymous logins
//! use `anonymous` / `anonymous@`. FTPS upgrades the control channel
//! via TLS before login. A background sweeper quits connections idle
//! past the configured timeout.

mod ops;
mod pool;
mod target;

pub use ops::{download, info, list, FtpEntry, FtpFileInfo};
pub use pool::{map_ftp_error, FtpClient, FtpConfig, FtpConnection, FtpPool, TransferType};
pub use target::FtpTarget;
