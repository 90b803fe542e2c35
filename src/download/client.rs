use crate::error::{AppError, AppResult};
use crate::events::ProgressBus;
use futures_util::StreamExt;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Hash algorithm to use for verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Guess the algorithm from the length of a hex digest
    pub fn from_hex_len(hash: &str) -> Option<Self> {
        match hash.trim().len() {
            40 => Some(HashAlgorithm::Sha1),
            64 => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Configuration for download retry behavior
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// A transfer receiving nothing for this long is abandoned
    pub stall_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2000,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
            stall_timeout_ms: 30_000,
        }
    }
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

fn classify_request_error(url: &str, e: reqwest::Error) -> AppError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        AppError::TransientNetwork(format!("Failed to download {}: {}", url, e))
    } else {
        AppError::Network(format!("Failed to download {}: {}", url, e))
    }
}

/// Download a file from URL to the specified path, verifying the hash if given.
///
/// The destination is always rewritten. On a hash mismatch the file is
/// deleted and an integrity error returned.
pub async fn download_file_with_hash(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    expected_hash: Option<&str>,
    algorithm: HashAlgorithm,
    stall_timeout: Duration,
    progress: Option<&ProgressBus>,
) -> AppResult<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            AppError::Io(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_request_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        let message = format!("Failed to download {}: HTTP {}", url, status);
        return Err(if status.is_server_error() {
            AppError::TransientNetwork(message)
        } else {
            AppError::Network(message)
        });
    }

    let total = response.content_length();
    let mut file = File::create(dest).await.map_err(|e| {
        AppError::Io(format!("Failed to create file {}: {}", dest.display(), e))
    })?;

    let mut stream = response.bytes_stream();
    let mut hasher = Hasher::new(algorithm);
    let mut downloaded: u64 = 0;
    let started = Instant::now();
    let mut last_report = started;

    loop {
        let next = tokio::time::timeout(stall_timeout, stream.next())
            .await
            .map_err(|_| {
                AppError::TransientNetwork(format!(
                    "Download of {} stalled: no data for {}s",
                    url,
                    stall_timeout.as_secs_f32()
                ))
            })?;
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| {
            AppError::TransientNetwork(format!("Error downloading {}: {}", url, e))
        })?;

        hasher.update(&chunk);
        file.write_all(&chunk).await.map_err(|e| {
            AppError::Io(format!("Failed to write to {}: {}", dest.display(), e))
        })?;
        downloaded += chunk.len() as u64;

        if let Some(bus) = progress {
            if last_report.elapsed() >= PROGRESS_INTERVAL {
                let elapsed = started.elapsed().as_secs_f64().max(0.001);
                bus.download(downloaded, total, downloaded as f64 / elapsed);
                last_report = Instant::now();
            }
        }
    }

    file.flush().await.map_err(|e| {
        AppError::Io(format!("Failed to flush {}: {}", dest.display(), e))
    })?;

    if let Some(total) = total {
        if downloaded < total {
            return Err(AppError::TransientNetwork(format!(
                "Download of {} ended early: {} of {} bytes",
                url, downloaded, total
            )));
        }
    }
    if let Some(bus) = progress {
        let elapsed = started.elapsed().as_secs_f64().max(0.001);
        bus.download(downloaded, total.or(Some(downloaded)), downloaded as f64 / elapsed);
    }

    if let Some(expected) = expected_hash {
        let hash = hasher.finish();
        if !hash.eq_ignore_ascii_case(expected.trim()) {
            let _ = fs::remove_file(dest).await;
            return Err(AppError::Integrity(format!(
                "Hash mismatch for {}: expected {}, got {}",
                dest.display(),
                expected,
                hash
            )));
        }
    }

    debug!("Downloaded {} ({} bytes)", url, downloaded);
    Ok(downloaded)
}

/// Hex digest of a file, read in chunks
pub async fn hash_file(path: &Path, algorithm: HashAlgorithm) -> AppResult<String> {
    let mut file = File::open(path).await.map_err(|e| {
        AppError::Io(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| {
            AppError::Io(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Verify SHA1 hash of a file
pub async fn verify_sha1(path: &Path, expected: &str) -> AppResult<bool> {
    Ok(hash_file(path, HashAlgorithm::Sha1)
        .await?
        .eq_ignore_ascii_case(expected.trim()))
}

/// Verify SHA256 hash of a file
pub async fn verify_sha256(path: &Path, expected: &str) -> AppResult<bool> {
    Ok(hash_file(path, HashAlgorithm::Sha256)
        .await?
        .eq_ignore_ascii_case(expected.trim()))
}

/// Download a file with automatic retry on transient failure.
///
/// Partial files are removed between attempts. Errors that are not worth
/// retrying (4xx, hash mismatch, local IO) are returned immediately.
pub async fn download_file_with_retry(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    expected_hash: Option<&str>,
    algorithm: HashAlgorithm,
    config: RetryConfig,
    progress: Option<&ProgressBus>,
) -> AppResult<u64> {
    let attempts = config.max_attempts.max(1);
    let stall_timeout = Duration::from_millis(config.stall_timeout_ms);
    let mut delay = config.initial_delay_ms;

    for attempt in 1..=attempts {
        match download_file_with_hash(
            client,
            url,
            dest,
            expected_hash,
            algorithm,
            stall_timeout,
            progress,
        )
        .await
        {
            Ok(size) => {
                if attempt > 1 {
                    info!("Successfully downloaded {} after {} attempts", url, attempt);
                }
                return Ok(size);
            }
            Err(e) => {
                let _ = fs::remove_file(dest).await;
                if !e.is_retryable() || attempt == attempts {
                    warn!("Download of {} failed on attempt {}: {}", url, attempt, e);
                    return Err(e);
                }
                warn!(
                    "Download attempt {}/{} failed for {}: {}, retrying in {}ms",
                    attempt, attempts, url, e, delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = ((delay as f64) * config.backoff_multiplier) as u64;
                delay = delay.min(config.max_delay_ms);
            }
        }
    }

    Err(AppError::Network(format!(
        "Failed to download {} after {} attempts",
        url, attempts
    )))
}
