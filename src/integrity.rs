use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use sha2::{Sha256, Digest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Downloaded file size is smaller than expected")]
    SizeMismatch { actual: u64, expected: u64 },
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Accepts a finished file whose size is strictly above `ratio` of the
/// expected size. Quantized artifacts drift a little from the advertised size.
pub fn verify_size(actual: u64, expected: u64, ratio: f64) -> Result<(), IntegrityError> {
    if actual as f64 > expected as f64 * ratio {
        Ok(())
    } else {
        Err(IntegrityError::SizeMismatch { actual, expected })
    }
}

/// Compute SHA256 hash of a file asynchronously.
pub async fn sha256_sum(path: &Path) -> Result<String, IntegrityError> {
    let file = File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 64];
    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 { break; }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Compares the file's digest against a hex string, ignoring case.
pub async fn verify_sha256(path: &Path, expected: &str) -> Result<(), IntegrityError> {
    let actual = sha256_sum(path).await?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(IntegrityError::ChecksumMismatch {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}
