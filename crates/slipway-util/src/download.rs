//! HTTP download with progress reporting and digest verification.

use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::UtilError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Download a URL to a file, showing progress on stderr.
///
/// The content is hashed while it streams; the hex-encoded SHA-256 of what
/// was written is returned.
///
/// # Errors
/// Returns an error if the HTTP request fails, the file cannot be written,
/// or a read error occurs during streaming.
pub fn download_with_progress(url: &str, dest: &Path, label: &str) -> Result<String, UtilError> {
    let agent = ureq::Agent::new_with_config(
        ureq::config::Config::builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_global(Some(TRANSFER_TIMEOUT))
            .build(),
    );

    let response = agent.get(url).call().map_err(|e| UtilError::Download {
        message: e.to_string(),
    })?;

    let total: Option<u64> = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());

    let mut reader = response.into_body().into_reader();
    let mut file = std::fs::File::create(dest).map_err(|source| UtilError::Io {
        path: dest.display().to_string(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    let mut next_report: u64 = 1;
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf).map_err(|e| UtilError::Download {
            message: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        let Some(chunk) = buf.get(..n) else {
            break; // unreachable: n is bounded by buf.len()
        };

        file.write_all(chunk).map_err(|source| UtilError::Io {
            path: dest.display().to_string(),
            source,
        })?;
        hasher.update(chunk);
        written = written.saturating_add(n as u64);

        // Report at each 10% boundary when the size is known.
        if let Some(total) = total.filter(|t| *t > 0) {
            while next_report <= 10
                && written.saturating_mul(10) >= next_report.saturating_mul(total)
            {
                let pct = next_report.saturating_mul(10);
                eprint!("\r    Fetching {label}... {pct}%");
                next_report = next_report.saturating_add(1);
            }
        }
    }

    if total.is_some() {
        eprintln!("\r    Fetching {label}... done   ");
    } else {
        let mb = written / (1024 * 1024);
        eprintln!("    Fetched {label} ({mb} MB)");
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Download a URL and verify its SHA-256 digest against `expected`.
///
/// The comparison is case-insensitive on the hex encoding. The destination
/// file is removed on mismatch so a corrupt download never survives.
///
/// # Errors
/// Returns an error if the download fails or the digest does not match.
pub fn download_verified(
    url: &str,
    dest: &Path,
    label: &str,
    expected: &str,
) -> Result<String, UtilError> {
    let actual = download_with_progress(url, dest, label)?;
    if !actual.eq_ignore_ascii_case(expected) {
        let _ = std::fs::remove_file(dest);
        return Err(UtilError::DigestMismatch {
            path: dest.display().to_string(),
            expected: expected.to_ascii_lowercase(),
            actual,
        });
    }
    Ok(actual)
}
