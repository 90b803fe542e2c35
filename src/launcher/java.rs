use crate::download::{download_file_with_retry, HashAlgorithm, RetryConfig};
use crate::download::client::verify_sha256;
use crate::error::{AppError, AppResult};
use crate::events::{ProgressBus, Stage};
use crate::platform::{Os, PlatformInfo};
use crate::utils::archive::{extract_archive, flatten_single_dir, ArchiveKind};
use crate::utils::fs::{find_first, make_executable, remove_dir_if_exists};
use crate::utils::paths::expand_home;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JavaSource {
    Configured,
    Bundled,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedJava {
    pub path: PathBuf,
    pub source: JavaSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct JavaStatus {
    pub path: PathBuf,
    pub source: JavaSource,
    pub version: Option<String>,
    pub major_version: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct JreManifest {
    download_url: HashMap<String, HashMap<String, JreDownload>>,
}

#[derive(Debug, Clone, Deserialize)]
struct JreDownload {
    url: String,
    sha256: Option<String>,
}

pub fn java_executable_name(os: Os) -> &'static str {
    match os {
        Os::Windows => "java.exe",
        _ => "java",
    }
}

/// Executable inside a JDK/JRE root
fn java_in_root(root: &Path, os: Os) -> Option<PathBuf> {
    let exe = java_executable_name(os);
    [
        root.join("bin").join(exe),
        root.join("Contents").join("Home").join("bin").join(exe),
    ]
    .into_iter()
    .find(|p| p.is_file())
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Turn a user-supplied Java location into an executable path.
///
/// Accepts the executable itself, a JDK/JRE root, or a bare command name
/// found on `PATH`. A leading `~` is expanded.
pub fn resolve_java_path(configured: &str, os: Os) -> Option<PathBuf> {
    let trimmed = configured.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = expand_home(trimmed);
    if path.is_file() {
        return Some(path);
    }
    if path.is_dir() {
        return java_in_root(&path, os);
    }
    if path.components().count() == 1 {
        return find_on_path(trimmed);
    }
    None
}

fn command_stdout(program: &str, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

fn detect_system_java_from(java_home: Option<&str>, os: Os) -> Option<PathBuf> {
    if let Some(home) = java_home.map(str::trim).filter(|h| !h.is_empty()) {
        if let Some(java) = java_in_root(Path::new(home), os) {
            debug!("Found Java via JAVA_HOME: {}", java.display());
            return Some(java);
        }
    }

    if os == Os::Darwin {
        if let Some(home) = command_stdout("/usr/libexec/java_home", &[]) {
            if let Some(java) = java_in_root(Path::new(home.trim()), os) {
                return Some(java);
            }
        }
    }

    let (finder, name) = match os {
        Os::Windows => ("where", "java"),
        _ => ("which", "java"),
    };
    command_stdout(finder, &[name])?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// `JAVA_HOME`, then `/usr/libexec/java_home` on macOS, then `which`/`where`
pub fn detect_system_java(os: Os) -> Option<PathBuf> {
    detect_system_java_from(std::env::var("JAVA_HOME").ok().as_deref(), os)
}

/// Bundled runtime under `jre_dir`, if one has been installed
pub fn get_bundled_java_path(jre_dir: &Path, os: Os) -> Option<PathBuf> {
    if let Some(java) = java_in_root(jre_dir, os) {
        return Some(java);
    }
    let exe = java_executable_name(os);
    find_first(jre_dir, |e| {
        e.file_type().is_file()
            && e.file_name() == exe
            && e.path()
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|n| n == "bin")
    })
}

/// Get Java version from executable
pub fn get_java_version(java_path: &Path) -> Option<String> {
    let output = std::process::Command::new(java_path)
        .arg("-version")
        .output()
        .ok()?;

    // Java outputs version to stderr
    let stderr = String::from_utf8_lossy(&output.stderr);

    // Parse version from output like: openjdk version "21.0.1" 2023-10-17
    for line in stderr.lines() {
        if line.contains("version") {
            if let Some(start) = line.find('"') {
                if let Some(end) = line[start + 1..].find('"') {
                    return Some(line[start + 1..start + 1 + end].to_string());
                }
            }
        }
    }

    None
}

/// Extract major version from version string (e.g., "21.0.1" -> 21, "1.8.0_362" -> 8)
fn extract_major_version(version: &str) -> Option<u32> {
    let mut parts = version.split(['.', '_', '+', '-']);
    let first = parts.next()?.parse::<u32>().ok()?;
    if first == 1 {
        // Java 8 and earlier report "1.x"
        if let Some(actual) = parts.next().and_then(|p| p.parse::<u32>().ok()) {
            return Some(actual);
        }
    }
    Some(first)
}

/// Pick the Java executable for a launch.
///
/// An explicit override or configured path must exist; there is no silent
/// fallback when one was given. Otherwise bundled, then system Java.
pub fn resolve_runtime(
    override_path: Option<&str>,
    configured_path: Option<&str>,
    jre_dir: &Path,
    os: Os,
) -> AppResult<ResolvedJava> {
    let requested = override_path
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or_else(|| configured_path.map(str::trim).filter(|p| !p.is_empty()));

    if let Some(requested) = requested {
        return resolve_java_path(requested, os)
            .map(|path| ResolvedJava {
                path,
                source: JavaSource::Configured,
            })
            .ok_or_else(|| {
                AppError::Configuration(format!("Configured Java path not found: {}", requested))
            });
    }

    if let Some(path) = get_bundled_java_path(jre_dir, os) {
        return Ok(ResolvedJava {
            path,
            source: JavaSource::Bundled,
        });
    }
    if let Some(path) = detect_system_java(os) {
        info!("Using system Java: {}", path.display());
        return Ok(ResolvedJava {
            path,
            source: JavaSource::System,
        });
    }
    Err(AppError::Configuration(
        "Java runtime not found. Please install the game first or configure Java path."
            .to_string(),
    ))
}

/// Resolved runtime and the version it reports, `None` when nothing resolves
pub fn java_status(configured_path: Option<&str>, jre_dir: &Path, os: Os) -> Option<JavaStatus> {
    let resolved = resolve_runtime(None, configured_path, jre_dir, os).ok()?;
    let version = get_java_version(&resolved.path);
    Some(JavaStatus {
        major_version: version.as_deref().and_then(extract_major_version),
        path: resolved.path,
        source: resolved.source,
        version,
    })
}

fn archive_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("jre")
        .to_string()
}

#[cfg(unix)]
fn normalize_permissions(root: &Path) -> AppResult<()> {
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let in_bin = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .is_some_and(|n| n == "bin");
        if in_bin || entry.file_name() == "jspawnhelper" {
            make_executable(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn normalize_permissions(_root: &Path) -> AppResult<()> {
    Ok(())
}

/// Make sure a bundled runtime exists in `jre_dir`, downloading it from the
/// runtime manifest if needed. The archive is checked against its SHA-256
/// before anything is extracted.
pub async fn download_jre(
    client: &reqwest::Client,
    manifest_url: &str,
    platform: &PlatformInfo,
    cache_dir: &Path,
    jre_dir: &Path,
    retry: RetryConfig,
    progress: Option<&ProgressBus>,
) -> AppResult<PathBuf> {
    if let Some(existing) = get_bundled_java_path(jre_dir, platform.os) {
        debug!("Bundled Java already present: {}", existing.display());
        return Ok(existing);
    }

    if let Some(bus) = progress {
        bus.emit(Stage::Java, None, "Fetching Java runtime information...");
    }
    let response = client.get(manifest_url).send().await.map_err(|e| {
        AppError::Network(format!("Failed to fetch Java runtime manifest: {}", e))
    })?;
    if !response.status().is_success() {
        return Err(AppError::Network(format!(
            "Java runtime manifest returned HTTP {}",
            response.status()
        )));
    }
    let manifest: JreManifest = response.json().await.map_err(|e| {
        AppError::Network(format!("Failed to parse Java runtime manifest: {}", e))
    })?;

    let entry = manifest
        .download_url
        .get(platform.os.as_str())
        .and_then(|arches| arches.get(platform.arch.as_str()))
        .cloned()
        .ok_or_else(|| {
            AppError::Platform(format!("No Java runtime published for {}", platform))
        })?;

    let name = archive_name(&entry.url);
    if ArchiveKind::from_name(&name).is_none() {
        return Err(AppError::Integrity(format!(
            "Unsupported Java runtime archive: {}",
            name
        )));
    }
    let archive = cache_dir.join(&name);

    let Some(expected) = entry.sha256.as_deref().filter(|s| !s.trim().is_empty()) else {
        let _ = fs::remove_file(&archive).await;
        return Err(AppError::Integrity(format!(
            "Java runtime manifest has no checksum for {}",
            platform
        )));
    };

    let cached_ok =
        archive.is_file() && verify_sha256(&archive, expected).await.unwrap_or(false);
    if !cached_ok {
        info!("Downloading Java runtime from {}", entry.url);
        if let Some(bus) = progress {
            bus.emit(Stage::Java, None, "Downloading Java runtime...");
        }
        download_file_with_retry(
            client,
            &entry.url,
            &archive,
            Some(expected),
            HashAlgorithm::Sha256,
            retry,
            progress,
        )
        .await?;
    }
    if let Some(bus) = progress {
        bus.emit(Stage::Java, None, "Extracting Java runtime...");
    }
    remove_dir_if_exists(jre_dir).await?;
    fs::create_dir_all(jre_dir).await.map_err(|e| {
        AppError::Io(format!("Failed to create {}: {}", jre_dir.display(), e))
    })?;

    let archive_path = archive.clone();
    let target = jre_dir.to_path_buf();
    tokio::task::spawn_blocking(move || -> AppResult<()> {
        extract_archive(&archive_path, &target)?;
        flatten_single_dir(&target)?;
        normalize_permissions(&target)
    })
    .await
    .map_err(|e| AppError::Custom(format!("Java extraction task failed: {}", e)))??;
    let _ = fs::remove_file(&archive).await;

    let java = get_bundled_java_path(jre_dir, platform.os).ok_or_else(|| {
        AppError::Integrity("Java runtime archive did not contain a java executable".to_string())
    })?;
    info!("Java runtime installed at {}", java.display());
    Ok(java)
}
