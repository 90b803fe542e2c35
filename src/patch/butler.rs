use crate::download::{download_file_with_retry, HashAlgorithm, RetryConfig};
use crate::error::{AppError, AppResult};
use crate::platform::{Arch, Os, PlatformInfo};
use crate::utils::archive::extract_zip;
use crate::utils::fs::{find_file_named, make_executable};
use std::path::{Path, PathBuf};
use tracing::info;

pub fn butler_executable_name(os: Os) -> &'static str {
    match os {
        Os::Windows => "butler.exe",
        _ => "butler",
    }
}

pub fn butler_path(tools_dir: &Path, os: Os) -> PathBuf {
    tools_dir.join(butler_executable_name(os))
}

/// `{base}/{os}-{arch}/LATEST/archive/default`. There is no native Apple
/// Silicon build, the amd64 one runs under Rosetta.
pub fn butler_download_url(butler_base: &str, platform: &PlatformInfo) -> String {
    let arch = match (platform.os, platform.arch) {
        (Os::Darwin, Arch::Arm64) => Arch::Amd64,
        (_, arch) => arch,
    };
    format!(
        "{}/{}-{}/LATEST/archive/default",
        butler_base.trim_end_matches('/'),
        platform.os,
        arch
    )
}

/// Make sure butler is present in `tools_dir`, downloading it if needed
pub async fn install_butler(
    client: &reqwest::Client,
    butler_base: &str,
    platform: &PlatformInfo,
    tools_dir: &Path,
    retry: RetryConfig,
) -> AppResult<PathBuf> {
    let binary = butler_path(tools_dir, platform.os);
    if binary.is_file() {
        return Ok(binary);
    }

    let url = butler_download_url(butler_base, platform);
    info!("Installing butler from {}", url);
    let archive = tools_dir.join("butler.zip");
    download_file_with_retry(client, &url, &archive, None, HashAlgorithm::Sha1, retry, None)
        .await?;

    let extract_into = tools_dir.to_path_buf();
    let archive_path = archive.clone();
    tokio::task::spawn_blocking(move || extract_zip(&archive_path, &extract_into))
        .await
        .map_err(|e| AppError::Custom(format!("Butler extraction task failed: {}", e)))??;
    let _ = tokio::fs::remove_file(&archive).await;

    if !binary.is_file() {
        // Some archives nest the binary one level down
        let name = butler_executable_name(platform.os);
        let nested = find_file_named(tools_dir, name).ok_or_else(|| {
            AppError::Patch(format!("Butler tool not found in archive from {}", url))
        })?;
        tokio::fs::rename(&nested, &binary).await?;
    }
    make_executable(&binary)?;
    info!("Butler installed at {}", binary.display());
    Ok(binary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, TestServer};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_apple_silicon_uses_amd64_build() {
        let mac = PlatformInfo::new(Os::Darwin, Arch::Arm64);
        assert_eq!(
            butler_download_url("https://broth.example/butler/", &mac),
            "https://broth.example/butler/darwin-amd64/LATEST/archive/default"
        );
        let linux_arm = PlatformInfo::new(Os::Linux, Arch::Arm64);
        assert!(butler_download_url("b", &linux_arm).starts_with("b/linux-arm64/"));
    }

    fn zip_with(name: &str, content: &[u8]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn test_install_downloads_once() {
        let platform = PlatformInfo::new(Os::Linux, Arch::Amd64);
        let server = TestServer::start(vec![(
            "/butler/linux-amd64/LATEST/archive/default",
            Reply::Ok(zip_with("butler", b"#!/bin/sh\n")),
        )])
        .await;
        let base = format!("{}/butler", server.base_url());
        let temp = tempdir().unwrap();
        let client = reqwest::Client::new();

        let path = install_butler(&client, &base, &platform, temp.path(), RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(path, temp.path().join("butler"));
        assert!(!temp.path().join("butler.zip").exists());

        install_butler(&client, &base, &platform, temp.path(), RetryConfig::default())
            .await
            .unwrap();
        assert_eq!(server.total_hits(), 1);
    }

    #[tokio::test]
    async fn test_nested_binary_is_moved_up() {
        let platform = PlatformInfo::new(Os::Linux, Arch::Amd64);
        let server = TestServer::start(vec![(
            "/butler/linux-amd64/LATEST/archive/default",
            Reply::Ok(zip_with("dist/butler", b"bin")),
        )])
        .await;
        let base = format!("{}/butler", server.base_url());
        let temp = tempdir().unwrap();

        let path = install_butler(
            &reqwest::Client::new(),
            &base,
            &platform,
            temp.path(),
            RetryConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"bin");
    }
}
