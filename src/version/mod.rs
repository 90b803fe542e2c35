//! Latest/installed version lookup and patch-addressable build descriptors.

use crate::config::{ConfigStore, Endpoints};
use crate::error::{AppError, AppResult};
use crate::platform::PlatformInfo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Last known good build, used whenever the version service is unusable
pub const FALLBACK_VERSION: &str = "4.pwr";

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct VersionResponse {
    client_version: Option<String>,
}

/// One patch-addressable build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionDescriptor {
    pub version: String,
    pub build_number: u32,
    pub branch: String,
    pub full_archive_url: String,
    pub differential_archive_url: Option<String>,
    pub checksum: Option<String>,
    pub source_version: Option<String>,
}

impl VersionDescriptor {
    /// Descriptor with only the full archive
    pub fn full(patch_base: &str, platform: &PlatformInfo, branch: &str, version: &str) -> Self {
        Self {
            version: version.to_string(),
            build_number: parse_build_number(version).unwrap_or(0),
            branch: branch.to_string(),
            full_archive_url: patch_url(patch_base, platform, branch, version),
            differential_archive_url: None,
            checksum: None,
            source_version: None,
        }
    }

    /// A differential archive is only valid against the exact version it was built from
    pub fn differential_applies_to(&self, installed: Option<&str>) -> bool {
        match (&self.differential_archive_url, &self.source_version, installed) {
            (Some(_), Some(source), Some(installed)) => source == installed,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatchManifestEntry {
    #[serde(default)]
    pub original_url: Option<String>,
    #[serde(default)]
    pub patch_url: Option<String>,
    #[serde(default)]
    pub patch_hash: Option<String>,
    #[serde(default)]
    pub from: Option<u32>,
    #[serde(default)]
    pub proper_patch: bool,
    #[serde(default)]
    pub patch_note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatchManifest {
    #[serde(default)]
    pub patches: HashMap<String, PatchManifestEntry>,
}

impl PatchManifest {
    pub fn entry_for(&self, build_number: u32) -> Option<&PatchManifestEntry> {
        self.patches.get(&build_number.to_string())
    }
}

/// Leading integer of a version string, `"6.pwr"` -> 6
pub fn parse_build_number(version: &str) -> Option<u32> {
    let digits: String = version
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// `{base}/{os}/{arch}/{branch}/0/{version}`
pub fn patch_url(patch_base: &str, platform: &PlatformInfo, branch: &str, version: &str) -> String {
    format!(
        "{}/{}/{}/{}/0/{}",
        patch_base.trim_end_matches('/'),
        platform.os,
        platform.arch,
        urlencoding::encode(branch),
        urlencoding::encode(version)
    )
}

/// Latest client version for `branch`. Never fails: any problem yields
/// [`FALLBACK_VERSION`].
pub async fn get_latest_version(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    branch: &str,
) -> String {
    let url = format!("{}/api/version_client", endpoints.version_api);
    info!("Fetching latest client version (branch: {})", branch);

    let result: AppResult<VersionResponse> = async {
        let response = client
            .get(&url)
            .query(&[("branch", branch)])
            .timeout(VERSION_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "Version service returned HTTP {}",
                response.status()
            )));
        }
        Ok::<_, AppError>(response.json::<VersionResponse>().await?)
    }
    .await;

    match result {
        Ok(VersionResponse {
            client_version: Some(version),
        }) if !version.trim().is_empty() => {
            info!("Latest client version for {}: {}", branch, version);
            version.trim().to_string()
        }
        Ok(_) => {
            warn!("Invalid version response, falling back to {}", FALLBACK_VERSION);
            FALLBACK_VERSION.to_string()
        }
        Err(e) => {
            warn!(
                "Version service unavailable ({}), falling back to {}",
                e, FALLBACK_VERSION
            );
            FALLBACK_VERSION.to_string()
        }
    }
}

/// Version recorded as installed. `None` means not installed, or a legacy
/// install from before versions were tracked.
pub fn get_installed_version(config: &dyn ConfigStore) -> Option<String> {
    config.installed_version()
}

/// Opaque string comparison, no ordering is implied
pub fn needs_update(installed: Option<&str>, latest: &str) -> bool {
    match installed {
        None => true,
        Some(installed) => installed != latest,
    }
}

pub async fn fetch_patch_manifest(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    platform: &PlatformInfo,
    branch: &str,
) -> AppResult<PatchManifest> {
    let url = format!("{}/api/patch_manifest", endpoints.version_api);
    let response = client
        .get(&url)
        .query(&[
            ("branch", branch),
            ("os", platform.os.as_str()),
            ("arch", platform.arch.as_str()),
        ])
        .timeout(VERSION_TIMEOUT)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(AppError::Network(format!(
            "Patch manifest returned HTTP {}",
            response.status()
        )));
    }
    Ok(response.json::<PatchManifest>().await?)
}

/// Descriptor for `version`, enriched with differential data from the patch
/// manifest when available.
pub async fn describe_version(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    platform: &PlatformInfo,
    branch: &str,
    version: &str,
) -> VersionDescriptor {
    let mut descriptor = VersionDescriptor::full(&endpoints.patch_base, platform, branch, version);

    let manifest = match fetch_patch_manifest(client, endpoints, platform, branch).await {
        Ok(manifest) => manifest,
        Err(e) => {
            debug!("No patch manifest for {} ({}), using full archive", branch, e);
            return descriptor;
        }
    };

    if let Some(entry) = manifest.entry_for(descriptor.build_number) {
        let patch_url = entry.patch_url.as_deref().filter(|u| !u.is_empty());
        if let (true, Some(patch_url), Some(from)) = (entry.proper_patch, patch_url, entry.from) {
            descriptor.differential_archive_url = Some(patch_url.to_string());
            descriptor.checksum = entry.patch_hash.clone().filter(|h| !h.is_empty());
            descriptor.source_version = Some(format!("{}.pwr", from));
            if let Some(note) = &entry.patch_note {
                debug!("Patch note for {}: {}", version, note);
            }
        }
    }
    descriptor
}

/// Latest version for `branch` as a full descriptor
pub async fn get_latest_descriptor(
    client: &reqwest::Client,
    endpoints: &Endpoints,
    platform: &PlatformInfo,
    branch: &str,
) -> VersionDescriptor {
    let version = get_latest_version(client, endpoints, branch).await;
    describe_version(client, endpoints, platform, branch, &version).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigStore;
    use crate::platform::{Arch, Os};
    use crate::test_support::{Reply, TestServer};

    fn linux() -> PlatformInfo {
        PlatformInfo::new(Os::Linux, Arch::Amd64)
    }

    #[tokio::test]
    async fn test_latest_version_from_service() {
        let server = TestServer::start(vec![(
            "/api/version_client",
            Reply::Ok(br#"{"client_version":"7.pwr"}"#.to_vec()),
        )])
        .await;
        let endpoints = Endpoints::local(&server.base_url());

        let version = get_latest_version(&reqwest::Client::new(), &endpoints, "pre-release").await;
        assert_eq!(version, "7.pwr");
        let request = &server.requests()[0];
        assert_eq!(request.query.as_deref(), Some("branch=pre-release"));
    }

    #[tokio::test]
    async fn test_latest_version_falls_back() {
        let server = TestServer::start(vec![
            ("/api/version_client", Reply::Status(500)),
        ])
        .await;
        let endpoints = Endpoints::local(&server.base_url());
        let client = reqwest::Client::new();
        assert_eq!(get_latest_version(&client, &endpoints, "release").await, FALLBACK_VERSION);

        let malformed = TestServer::start(vec![(
            "/api/version_client",
            Reply::Ok(br#"{"something":"else"}"#.to_vec()),
        )])
        .await;
        let endpoints = Endpoints::local(&malformed.base_url());
        assert_eq!(get_latest_version(&client, &endpoints, "release").await, FALLBACK_VERSION);
    }

    #[test]
    fn test_needs_update_is_opaque_equality() {
        assert!(needs_update(None, "4.pwr"));
        assert!(needs_update(Some("5.pwr"), "6.pwr"));
        // No ordering: a "newer" install still differs
        assert!(needs_update(Some("7.pwr"), "6.pwr"));
        assert!(!needs_update(Some("6.pwr"), "6.pwr"));
    }

    #[test]
    fn test_installed_version_from_config() {
        let store = MemoryConfigStore::default();
        assert_eq!(get_installed_version(&store), None);
        store.record_installed_version("5.pwr", "release").unwrap();
        assert_eq!(get_installed_version(&store), Some("5.pwr".to_string()));
    }

    #[test]
    fn test_patch_url_layout() {
        assert_eq!(
            patch_url("https://patches.example/patches/", &linux(), "release", "6.pwr"),
            "https://patches.example/patches/linux/amd64/release/0/6.pwr"
        );
        assert_eq!(parse_build_number("12.pwr"), Some(12));
        assert_eq!(parse_build_number("pwr"), None);
    }

    #[tokio::test]
    async fn test_descriptor_uses_manifest_entry() {
        let manifest = br#"{"patches":{"6":{"original_url":"x","patch_url":"http://cdn/5-6.pwr","patch_hash":"abcd","from":5,"proper_patch":true,"patch_note":"fixes"}}}"#;
        let server = TestServer::start(vec![(
            "/api/patch_manifest",
            Reply::Ok(manifest.to_vec()),
        )])
        .await;
        let endpoints = Endpoints::local(&server.base_url());

        let descriptor =
            describe_version(&reqwest::Client::new(), &endpoints, &linux(), "release", "6.pwr")
                .await;
        assert_eq!(descriptor.build_number, 6);
        assert_eq!(descriptor.source_version.as_deref(), Some("5.pwr"));
        assert_eq!(descriptor.checksum.as_deref(), Some("abcd"));
        assert!(descriptor.differential_applies_to(Some("5.pwr")));
        assert!(!descriptor.differential_applies_to(Some("4.pwr")));
        assert!(!descriptor.differential_applies_to(None));
        assert!(descriptor.full_archive_url.ends_with("/patches/linux/amd64/release/0/6.pwr"));
    }

    #[tokio::test]
    async fn test_descriptor_degrades_without_manifest() {
        let server = TestServer::start(vec![]).await;
        let endpoints = Endpoints::local(&server.base_url());
        let descriptor =
            describe_version(&reqwest::Client::new(), &endpoints, &linux(), "release", "6.pwr")
                .await;
        assert_eq!(descriptor.differential_archive_url, None);
        assert!(!descriptor.differential_applies_to(Some("5.pwr")));
    }
}
