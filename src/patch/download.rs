use super::MIN_PATCH_SIZE;
use crate::download::client::{download_file_with_retry, hash_file};
use crate::download::{HashAlgorithm, RetryConfig};
use crate::error::{AppError, AppResult};
use crate::events::ProgressBus;
use crate::platform::PlatformInfo;
use crate::version::{patch_url, VersionDescriptor};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// Cache file for a full archive, keyed by `(branch, version)`
pub fn cached_patch_path(cache_dir: &Path, branch: &str, version: &str) -> PathBuf {
    cache_dir.join(format!("{}_{}", branch, version))
}

fn cached_differential_path(cache_dir: &Path, branch: &str, version: &str, source: &str) -> PathBuf {
    cache_dir.join(format!("{}_{}_from_{}", branch, version, source))
}

async fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).await.ok().map(|m| m.len())
}

/// Fetches patch archives into the cache directory
pub struct PatchDownloader<'a> {
    pub client: &'a reqwest::Client,
    pub patch_base: &'a str,
    pub platform: PlatformInfo,
    pub cache_dir: &'a Path,
    pub retry: RetryConfig,
    pub progress: Option<&'a ProgressBus>,
}

impl PatchDownloader<'_> {
    /// Full archive for `version`. A valid cached copy is returned without
    /// touching the network.
    pub async fn download_patch(&self, branch: &str, version: &str) -> AppResult<PathBuf> {
        self.platform.ensure_game_supported()?;

        let dest = cached_patch_path(self.cache_dir, branch, version);
        if let Some(size) = file_size(&dest).await {
            if size >= MIN_PATCH_SIZE {
                info!("Patch archive found in cache: {}", dest.display());
                return Ok(dest);
            }
            warn!(
                "Cached patch archive {} is too small ({} bytes), re-downloading",
                dest.display(),
                size
            );
            fs::remove_file(&dest).await.map_err(|e| {
                AppError::Io(format!("Failed to remove {}: {}", dest.display(), e))
            })?;
        }

        let url = patch_url(self.patch_base, &self.platform, branch, version);
        info!("Fetching patch archive: {}", url);
        download_file_with_retry(
            self.client,
            &url,
            &dest,
            None,
            HashAlgorithm::Sha1,
            self.retry,
            self.progress,
        )
        .await?;

        let size = file_size(&dest).await.unwrap_or(0);
        info!(
            "Patch archive downloaded, size: {:.2} MB",
            size as f64 / 1024.0 / 1024.0
        );
        if size < MIN_PATCH_SIZE {
            let _ = fs::remove_file(&dest).await;
            return Err(AppError::Integrity(format!(
                "Downloaded patch archive is corrupted (file too small: {} bytes)",
                size
            )));
        }
        Ok(dest)
    }

    /// Differential archive named by `descriptor`, verified against its checksum
    pub async fn download_differential(&self, descriptor: &VersionDescriptor) -> AppResult<PathBuf> {
        self.platform.ensure_game_supported()?;

        let (Some(url), Some(source)) = (
            descriptor.differential_archive_url.as_deref(),
            descriptor.source_version.as_deref(),
        ) else {
            return Err(AppError::Configuration(format!(
                "No differential archive for {}",
                descriptor.version
            )));
        };
        let algorithm = match descriptor.checksum.as_deref() {
            Some(hash) => Some(HashAlgorithm::from_hex_len(hash).ok_or_else(|| {
                AppError::Integrity(format!("Unrecognized patch checksum: {}", hash))
            })?),
            None => None,
        };

        let dest = cached_differential_path(
            self.cache_dir,
            &descriptor.branch,
            &descriptor.version,
            source,
        );
        if dest.exists() {
            match (descriptor.checksum.as_deref(), algorithm) {
                (Some(expected), Some(algorithm)) => {
                    if hash_file(&dest, algorithm).await?.eq_ignore_ascii_case(expected) {
                        info!("Differential archive found in cache: {}", dest.display());
                        return Ok(dest);
                    }
                    warn!("Cached differential archive failed verification, re-downloading");
                }
                _ => {
                    info!("Differential archive found in cache: {}", dest.display());
                    return Ok(dest);
                }
            }
        }

        info!("Fetching differential archive {} -> {}: {}", source, descriptor.version, url);
        download_file_with_retry(
            self.client,
            url,
            &dest,
            descriptor.checksum.as_deref(),
            algorithm.unwrap_or(HashAlgorithm::Sha256),
            self.retry,
            self.progress,
        )
        .await?;
        Ok(dest)
    }
}
