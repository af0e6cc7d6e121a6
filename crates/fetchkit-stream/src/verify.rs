//! Post-download integrity verification.

use std::path::Path;

use fetchkit_core::FetchError;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// How (and against what) a finished download is checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VerificationMethod {
    #[default]
    None,
    /// Exact size in bytes.
    Size(u64),
    /// Lowercase-hex MD5 digest.
    Md5(String),
    /// Lowercase-hex SHA-256 digest.
    Sha256(String),
}

/// Verifies `path` against `method`, failing with
/// [`FetchError::Verification`] on mismatch. The file is left in place
/// either way so a later attempt can resume or retry.
pub async fn verify_file(path: &Path, method: &VerificationMethod) -> Result<(), FetchError> {
    match method {
        VerificationMethod::None => Ok(()),
        VerificationMethod::Size(expected) => {
            let actual = tokio::fs::metadata(path).await?.len();
            if actual == *expected {
                Ok(())
            } else {
                Err(FetchError::Verification {
                    expected: format!("{expected} bytes"),
                    actual: format!("{actual} bytes"),
                })
            }
        }
        VerificationMethod::Md5(expected) => {
            let actual = file_md5(path).await?;
            let expected = expected.to_ascii_lowercase();
            if actual == expected {
                Ok(())
            } else {
                Err(FetchError::Verification {
                    expected,
                    actual,
                })
            }
        }
        VerificationMethod::Sha256(expected) => {
            let actual = file_sha256(path).await?;
            let expected = expected.to_ascii_lowercase();
            if actual == expected {
                Ok(())
            } else {
                Err(FetchError::Verification {
                    expected,
                    actual,
                })
            }
        }
    }
}

async fn file_sha256(path: &Path) -> Result<String, FetchError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

async fn file_md5(path: &Path) -> Result<String, FetchError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

fn hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
