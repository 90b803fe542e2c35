use crate::error::{AppError, AppResult};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// First entry under `root` (depth-first, root excluded) matching `predicate`
pub fn find_first<P>(root: &Path, predicate: P) -> Option<PathBuf>
where
    P: Fn(&DirEntry) -> bool,
{
    if !root.exists() {
        return None;
    }
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| predicate(e))
        .map(|e| e.into_path())
}

pub fn find_file_named(root: &Path, name: &str) -> Option<PathBuf> {
    find_first(root, |e| e.file_type().is_file() && e.file_name() == name)
}

pub fn find_dir_named(root: &Path, name: &str) -> Option<PathBuf> {
    find_first(root, |e| e.file_type().is_dir() && e.file_name() == name)
}

/// True when `path` is missing or has no entries
pub fn dir_is_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Replace destination files
    Overwrite,
    /// Leave destination files untouched
    KeepExisting,
}

/// Deep copy of `src` into `dst`, following symlinks so the copy holds the
/// link targets. Returns the number of files written.
pub fn copy_dir_recursive(src: &Path, dst: &Path, mode: CopyMode) -> AppResult<u64> {
    std::fs::create_dir_all(dst)
        .map_err(|e| AppError::Io(format!("Failed to create {}: {}", dst.display(), e)))?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry = entry.map_err(|e| {
            AppError::Io(format!("Failed to walk {}: {}", src.display(), e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::Io(format!("Unexpected path during copy: {}", e)))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| {
                AppError::Io(format!("Failed to create {}: {}", target.display(), e))
            })?;
            continue;
        }

        if mode == CopyMode::KeepExisting && target.exists() {
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::copy(entry.path(), &target).map_err(|e| {
            AppError::Io(format!(
                "Failed to copy {} to {}: {}",
                entry.path().display(),
                target.display(),
                e
            ))
        })?;
        copied += 1;
    }
    Ok(copied)
}

/// Async wrapper running [`copy_dir_recursive`] off the runtime threads
pub async fn copy_dir(src: &Path, dst: &Path, mode: CopyMode) -> AppResult<u64> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst, mode))
        .await
        .map_err(|e| AppError::Custom(format!("Copy task failed: {}", e)))?
}

pub async fn remove_dir_if_exists(path: &Path) -> AppResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Io(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(unix)]
pub fn make_executable(path: &Path) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        AppError::Io(format!("Failed to set permissions on {}: {}", path.display(), e))
    })
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> AppResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::snapshot_tree;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_find_first_walks_nested_dirs() {
        let temp = tempdir().unwrap();
        write(&temp.path().join("a/b/HomePage.ui"), "ui");
        std::fs::create_dir_all(temp.path().join("x/UserData")).unwrap();

        assert_eq!(
            find_file_named(temp.path(), "HomePage.ui"),
            Some(temp.path().join("a/b/HomePage.ui"))
        );
        assert_eq!(
            find_dir_named(temp.path(), "UserData"),
            Some(temp.path().join("x/UserData"))
        );
        assert!(find_file_named(temp.path(), "Logo@2x.png").is_none());
        assert!(find_file_named(&temp.path().join("missing"), "HomePage.ui").is_none());
    }

    #[test]
    fn test_copy_preserves_tree() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        write(&src.join("Saves/world1/level.dat"), "level");
        write(&src.join("Settings.json"), "{}");
        std::fs::create_dir_all(src.join("EmptyDir")).unwrap();

        let dst = temp.path().join("dst");
        let copied = copy_dir_recursive(&src, &dst, CopyMode::Overwrite).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(snapshot_tree(&src), snapshot_tree(&dst));
        assert!(dst.join("EmptyDir").is_dir());
    }

    #[test]
    fn test_keep_existing_never_overwrites() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        write(&src.join("a.txt"), "new");
        write(&src.join("b.txt"), "new");
        write(&dst.join("a.txt"), "old");

        copy_dir_recursive(&src, &dst, CopyMode::KeepExisting).unwrap();
        assert_eq!(std::fs::read_to_string(dst.join("a.txt")).unwrap(), "old");
        assert_eq!(std::fs::read_to_string(dst.join("b.txt")).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_dereferences_symlinks() {
        let temp = tempdir().unwrap();
        let outside = temp.path().join("outside.txt");
        write(&outside, "target");
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::os::unix::fs::symlink(&outside, src.join("link.txt")).unwrap();

        let dst = temp.path().join("dst");
        copy_dir_recursive(&src, &dst, CopyMode::Overwrite).unwrap();

        let copied = dst.join("link.txt");
        assert!(!std::fs::symlink_metadata(&copied).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "target");
    }

    #[test]
    fn test_dir_is_empty() {
        let temp = tempdir().unwrap();
        assert!(dir_is_empty(temp.path()));
        assert!(dir_is_empty(&temp.path().join("missing")));
        write(&temp.path().join("f"), "x");
        assert!(!dir_is_empty(temp.path()));
    }
}
