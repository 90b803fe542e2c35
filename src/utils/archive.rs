use crate::error::{AppError, AppResult};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Relative path with no `..`, root or prefix components
pub fn safe_relative_path(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

pub fn extract_zip(archive_path: &Path, dest: &Path) -> AppResult<()> {
    let file = File::open(archive_path).map_err(|e| {
        AppError::Io(format!("Failed to open {}: {}", archive_path.display(), e))
    })?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
    std::fs::create_dir_all(dest)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            AppError::Integrity(format!(
                "Archive entry escapes the destination: {}",
                entry.name()
            ))
        })?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path).map_err(|e| {
            AppError::Io(format!("Failed to create {}: {}", out_path.display(), e))
        })?;
        std::io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }
    }
    debug!("Extracted {} to {}", archive_path.display(), dest.display());
    Ok(())
}

pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> AppResult<()> {
    let file = File::open(archive_path).map_err(|e| {
        AppError::Io(format!("Failed to open {}: {}", archive_path.display(), e))
    })?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    std::fs::create_dir_all(dest)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if safe_relative_path(&path).is_none() {
            return Err(AppError::Integrity(format!(
                "Archive entry escapes the destination: {}",
                path.display()
            )));
        }
        entry.unpack_in(dest)?;
    }
    debug!("Extracted {} to {}", archive_path.display(), dest.display());
    Ok(())
}

pub fn extract_archive(archive_path: &Path, dest: &Path) -> AppResult<()> {
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match ArchiveKind::from_name(&name) {
        Some(ArchiveKind::Zip) => extract_zip(archive_path, dest),
        Some(ArchiveKind::TarGz) => extract_tar_gz(archive_path, dest),
        None => Err(AppError::Integrity(format!(
            "Unsupported archive format: {}",
            name
        ))),
    }
}

/// If `dir` holds exactly one directory and nothing else, move that
/// directory's children up one level.
pub fn flatten_single_dir(dir: &Path) -> AppResult<bool> {
    let entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    if entries.len() != 1 || !entries[0].path().is_dir() {
        return Ok(false);
    }

    // Rename first so a child sharing the wrapper's name cannot collide
    let wrapper = dir.join(format!(".flatten-{}", uuid::Uuid::new_v4()));
    std::fs::rename(entries[0].path(), &wrapper)?;
    for child in std::fs::read_dir(&wrapper)? {
        let child = child?;
        std::fs::rename(child.path(), dir.join(child.file_name()))?;
    }
    std::fs::remove_dir(&wrapper)?;
    Ok(true)
}
