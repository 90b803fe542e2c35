//! Per-platform adjustments applied right before the client is spawned.
//!
//! Each shim declares the OS it belongs to and either contributes
//! environment variables, swaps the Java executable, or performs a
//! filesystem fix. A failing shim is logged and skipped.

use super::display::{is_wayland_session, loginctl_session_type, wayland_env};
use super::gpu::{detect_gpu, gpu_env, GpuInfo, GpuPreference, NVIDIA_EGL_VENDOR_FILE};
use super::Os;
use crate::error::{AppError, AppResult};
use crate::utils::fs::make_executable;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

pub const LIBZSTD_OPT_OUT_VAR: &str = "HYTALE_NO_LIBZSTD_FIX";

const JAVA_WRAPPER_TEMPLATE: &str = r#"#!/bin/bash
# Adds --disable-sentry after the server jar argument
REAL_JAVA="__REAL_JAVA__"
ARGS=("$@")
for i in "${!ARGS[@]}"; do
  if [[ "${ARGS[$i]}" == *"HytaleServer.jar"* ]]; then
    ARGS=("${ARGS[@]:0:$((i+1))}" "--disable-sentry" "${ARGS[@]:$((i+1))}")
    break
  fi
done
exec "$REAL_JAVA" "${ARGS[@]}"
"#;

/// What the launcher knows about the launch being prepared
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub os: Os,
    pub game_dir: PathBuf,
    pub client_path: PathBuf,
    pub java_path: PathBuf,
    /// Snapshot of the launcher's own environment
    pub env: HashMap<String, String>,
    pub gpu_preference: GpuPreference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimEffect {
    Env(Vec<(String, String)>),
    ReplaceJava(PathBuf),
    Nothing,
}

pub trait LaunchShim: Send + Sync {
    fn name(&self) -> &'static str;

    fn os(&self) -> Os;

    fn applies(&self, _ctx: &LaunchContext) -> bool {
        true
    }

    fn apply(&self, ctx: &LaunchContext) -> AppResult<ShimEffect>;
}

/// Run every shim matching `ctx.os` in order. Returns the extra environment;
/// `ctx.java_path` is updated in place when a shim replaces it.
pub fn apply_shims(shims: &[Box<dyn LaunchShim>], ctx: &mut LaunchContext) -> Vec<(String, String)> {
    let mut env = Vec::new();
    for shim in shims {
        if shim.os() != ctx.os || !shim.applies(ctx) {
            continue;
        }
        match shim.apply(ctx) {
            Ok(ShimEffect::Env(vars)) => {
                debug!("{} shim set {} variable(s)", shim.name(), vars.len());
                env.extend(vars);
            }
            Ok(ShimEffect::ReplaceJava(path)) => {
                info!("{} shim: launching Java through {}", shim.name(), path.display());
                ctx.java_path = path;
            }
            Ok(ShimEffect::Nothing) => {}
            Err(e) => warn!("{} shim failed, continuing launch: {}", shim.name(), e),
        }
    }
    env
}

pub fn default_shims() -> Vec<Box<dyn LaunchShim>> {
    vec![
        Box::new(MacSigningShim),
        Box::new(JavaWrapperShim),
        Box::new(WaylandShim::default()),
        Box::new(GpuShim::default()),
        Box::new(LibzstdShim::default()),
    ]
}

fn run_quiet(program: &str, args: &[&str], target: &Path) {
    match Command::new(program).args(args).arg(target).output() {
        Ok(output) if !output.status.success() => debug!(
            "{} {} exited with {}: {}",
            program,
            target.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Ok(_) => {}
        Err(e) => debug!("Could not run {}: {}", program, e),
    }
}

/// Clear quarantine attributes and ad-hoc sign `target`
fn sign_path(target: &Path, deep: bool) {
    run_quiet("xattr", &["-cr"], target);
    if deep {
        run_quiet("codesign", &["--force", "--deep", "--sign", "-"], target);
    } else {
        run_quiet("codesign", &["--force", "--sign", "-"], target);
    }
}

/// Root of a JRE given its `bin/java`, stepping out of `Contents/Home` bundles
fn jre_root(java: &Path) -> Option<PathBuf> {
    let root = java.parent()?.parent()?;
    if root.ends_with("Home") {
        return root.parent()?.parent().map(Path::to_path_buf);
    }
    Some(root.to_path_buf())
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(_path: &Path) -> bool {
    false
}

/// Patched binaries lose their signature; re-sign client, Java and server ad hoc
pub struct MacSigningShim;

impl LaunchShim for MacSigningShim {
    fn name(&self) -> &'static str {
        "macos-signing"
    }

    fn os(&self) -> Os {
        Os::Darwin
    }

    fn apply(&self, ctx: &LaunchContext) -> AppResult<ShimEffect> {
        let app_bundle = ctx.game_dir.join("Client").join("Hytale.app");
        if app_bundle.exists() {
            sign_path(&app_bundle, true);
            info!("Signed macOS app bundle");
        } else if let Some(client_dir) = ctx.client_path.parent() {
            sign_path(client_dir, true);
            info!("Signed macOS client binary");
        }

        if ctx.java_path.is_file() {
            if let Some(root) = jre_root(&ctx.java_path) {
                sign_path(&root, true);
            }
            sign_path(&ctx.java_path, false);
            info!("Signed Java runtime");
        }

        let server_dir = ctx.game_dir.join("Server");
        if server_dir.is_dir() {
            run_quiet("xattr", &["-cr"], &server_dir);
            walkdir::WalkDir::new(&server_dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| is_executable_file(e.path()))
                .for_each(|e| run_quiet("codesign", &["--force", "--sign", "-"], e.path()));
            info!("Signed server binaries");
        }
        Ok(ShimEffect::Nothing)
    }
}

pub fn java_wrapper_script(real_java: &Path) -> String {
    JAVA_WRAPPER_TEMPLATE.replace("__REAL_JAVA__", &real_java.to_string_lossy())
}

/// Launch Java through a wrapper that disables Sentry in the embedded server
pub struct JavaWrapperShim;

impl LaunchShim for JavaWrapperShim {
    fn name(&self) -> &'static str {
        "java-wrapper"
    }

    fn os(&self) -> Os {
        Os::Darwin
    }

    fn applies(&self, ctx: &LaunchContext) -> bool {
        ctx.java_path.is_file()
    }

    fn apply(&self, ctx: &LaunchContext) -> AppResult<ShimEffect> {
        let dir = ctx.java_path.parent().ok_or_else(|| {
            AppError::Platform(format!("Java path has no parent: {}", ctx.java_path.display()))
        })?;
        let wrapper = dir.join("java-wrapper");
        std::fs::write(&wrapper, java_wrapper_script(&ctx.java_path))
            .map_err(|e| AppError::Platform(format!("Failed to write java wrapper: {}", e)))?;
        make_executable(&wrapper)?;
        sign_path(&wrapper, false);
        Ok(ShimEffect::ReplaceJava(wrapper))
    }
}

pub struct WaylandShim {
    session_type: fn(&str) -> Option<String>,
}

impl Default for WaylandShim {
    fn default() -> Self {
        Self {
            session_type: loginctl_session_type,
        }
    }
}

impl LaunchShim for WaylandShim {
    fn name(&self) -> &'static str {
        "wayland"
    }

    fn os(&self) -> Os {
        Os::Linux
    }

    fn apply(&self, ctx: &LaunchContext) -> AppResult<ShimEffect> {
        let wayland = is_wayland_session(&ctx.env, self.session_type);
        Ok(ShimEffect::Env(wayland_env(&ctx.env, wayland)))
    }
}

pub struct GpuShim {
    detect: fn(Os) -> GpuInfo,
}

impl Default for GpuShim {
    fn default() -> Self {
        Self { detect: detect_gpu }
    }
}

impl LaunchShim for GpuShim {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn os(&self) -> Os {
        Os::Linux
    }

    fn apply(&self, ctx: &LaunchContext) -> AppResult<ShimEffect> {
        info!("GPU preference: {:?}", ctx.gpu_preference);
        let detected = (self.detect)(ctx.os);
        let egl_present = Path::new(NVIDIA_EGL_VENDOR_FILE).exists();
        Ok(ShimEffect::Env(gpu_env(ctx.gpu_preference, &detected, egl_present)))
    }
}

/// Swap the bundled `libzstd.so` for the system one, which newer glibc
/// releases need to avoid a crash on start.
pub struct LibzstdShim {
    pub system_candidates: Vec<PathBuf>,
}

impl Default for LibzstdShim {
    fn default() -> Self {
        Self {
            system_candidates: vec![
                PathBuf::from("/usr/lib/libzstd.so.1"),
                PathBuf::from("/usr/lib/x86_64-linux-gnu/libzstd.so.1"),
                PathBuf::from("/usr/lib64/libzstd.so.1"),
            ],
        }
    }
}

impl LaunchShim for LibzstdShim {
    fn name(&self) -> &'static str {
        "libzstd"
    }

    fn os(&self) -> Os {
        Os::Linux
    }

    fn applies(&self, ctx: &LaunchContext) -> bool {
        ctx.env.get(LIBZSTD_OPT_OUT_VAR).map(String::as_str) != Some("1")
    }

    #[cfg(unix)]
    fn apply(&self, ctx: &LaunchContext) -> AppResult<ShimEffect> {
        let Some(client_dir) = ctx.client_path.parent() else {
            return Ok(ShimEffect::Nothing);
        };
        let bundled = client_dir.join("libzstd.so");
        let backup = client_dir.join("libzstd.so.bundled");

        let Some(system) = self.system_candidates.iter().find(|p| p.exists()) else {
            return Ok(ShimEffect::Nothing);
        };
        let Ok(meta) = std::fs::symlink_metadata(&bundled) else {
            return Ok(ShimEffect::Nothing);
        };

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(&bundled)?;
            debug!("libzstd.so already linked to {}", target.display());
            return Ok(ShimEffect::Nothing);
        }

        if backup.exists() {
            std::fs::remove_file(&bundled)?;
        } else {
            std::fs::rename(&bundled, &backup)?;
            info!("Backed up bundled libzstd.so");
        }
        std::os::unix::fs::symlink(system, &bundled)?;
        info!("Linked libzstd.so to system version ({})", system.display());
        Ok(ShimEffect::Nothing)
    }

    #[cfg(not(unix))]
    fn apply(&self, _ctx: &LaunchContext) -> AppResult<ShimEffect> {
        Ok(ShimEffect::Nothing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_file;
    use tempfile::tempdir;

    fn context(os: Os, root: &Path) -> LaunchContext {
        let game_dir = root.join("game");
        LaunchContext {
            os,
            client_path: game_dir.join("Client/HytaleClient"),
            game_dir,
            java_path: root.join("jre/bin/java"),
            env: HashMap::new(),
            gpu_preference: GpuPreference::Auto,
        }
    }

    struct Fixed(Os, ShimEffect);

    impl LaunchShim for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn os(&self) -> Os {
            self.0
        }
        fn apply(&self, _ctx: &LaunchContext) -> AppResult<ShimEffect> {
            Ok(self.1.clone())
        }
    }

    struct Failing;

    impl LaunchShim for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn os(&self) -> Os {
            Os::Linux
        }
        fn apply(&self, _ctx: &LaunchContext) -> AppResult<ShimEffect> {
            Err(AppError::Platform("boom".into()))
        }
    }

    #[test]
    fn test_only_matching_os_shims_run() {
        let temp = tempdir().unwrap();
        let mut ctx = context(Os::Linux, temp.path());
        let shims: Vec<Box<dyn LaunchShim>> = vec![
            Box::new(Fixed(Os::Darwin, ShimEffect::ReplaceJava("/wrapper".into()))),
            Box::new(Failing),
            Box::new(Fixed(Os::Linux, ShimEffect::Env(vec![("A".into(), "1".into())]))),
        ];

        let env = apply_shims(&shims, &mut ctx);
        assert_eq!(env, vec![("A".to_string(), "1".to_string())]);
        assert_eq!(ctx.java_path, temp.path().join("jre/bin/java"));
    }

    #[test]
    fn test_replace_java_updates_context() {
        let temp = tempdir().unwrap();
        let mut ctx = context(Os::Darwin, temp.path());
        let shims: Vec<Box<dyn LaunchShim>> =
            vec![Box::new(Fixed(Os::Darwin, ShimEffect::ReplaceJava("/wrapper".into())))];
        apply_shims(&shims, &mut ctx);
        assert_eq!(ctx.java_path, PathBuf::from("/wrapper"));
    }

    #[test]
    fn test_java_wrapper_written_next_to_java() {
        let temp = tempdir().unwrap();
        let ctx = context(Os::Darwin, temp.path());
        write_file(&ctx.java_path, b"java");

        let effect = JavaWrapperShim.apply(&ctx).unwrap();
        let wrapper = temp.path().join("jre/bin/java-wrapper");
        assert_eq!(effect, ShimEffect::ReplaceJava(wrapper.clone()));

        let script = std::fs::read_to_string(&wrapper).unwrap();
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains(&format!("REAL_JAVA=\"{}\"", ctx.java_path.display())));
        assert!(script.contains("--disable-sentry"));
        assert!(script.contains("*\"HytaleServer.jar\"*"));
    }

    #[test]
    fn test_jre_root_steps_out_of_bundle() {
        assert_eq!(
            jre_root(Path::new("/j/zulu.jdk/Contents/Home/bin/java")),
            Some(PathBuf::from("/j/zulu.jdk"))
        );
        assert_eq!(jre_root(Path::new("/j/latest/bin/java")), Some(PathBuf::from("/j/latest")));
    }

    #[test]
    fn test_wayland_shim_uses_session_detection() {
        let temp = tempdir().unwrap();
        let mut ctx = context(Os::Linux, temp.path());
        ctx.env.insert("XDG_SESSION_ID".into(), "2".into());
        ctx.env.insert("SteamDeck".into(), "1".into());
        let shim = WaylandShim {
            session_type: |_| Some("Type=wayland".to_string()),
        };

        match shim.apply(&ctx).unwrap() {
            ShimEffect::Env(vars) => {
                assert!(vars.contains(&("SDL_VIDEODRIVER".to_string(), "x11".to_string())))
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }

    #[test]
    fn test_gpu_shim_respects_preference() {
        let temp = tempdir().unwrap();
        let mut ctx = context(Os::Linux, temp.path());
        ctx.gpu_preference = GpuPreference::Dedicated;
        let shim = GpuShim {
            detect: |_| GpuInfo::default(),
        };
        assert_eq!(
            shim.apply(&ctx).unwrap(),
            ShimEffect::Env(vec![("DRI_PRIME".to_string(), "1".to_string())])
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_libzstd_swapped_for_system_copy() {
        let temp = tempdir().unwrap();
        let ctx = context(Os::Linux, temp.path());
        let system = temp.path().join("usr/lib/libzstd.so.1");
        write_file(&system, b"system");
        let bundled = ctx.game_dir.join("Client/libzstd.so");
        write_file(&bundled, b"bundled");
        let shim = LibzstdShim {
            system_candidates: vec![temp.path().join("missing.so"), system.clone()],
        };

        shim.apply(&ctx).unwrap();
        assert!(std::fs::symlink_metadata(&bundled).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&bundled).unwrap(), system);
        assert_eq!(
            std::fs::read(ctx.game_dir.join("Client/libzstd.so.bundled")).unwrap(),
            b"bundled"
        );

        // Already linked: left alone
        shim.apply(&ctx).unwrap();
        assert_eq!(std::fs::read_link(&bundled).unwrap(), system);
    }

    #[test]
    fn test_libzstd_opt_out() {
        let temp = tempdir().unwrap();
        let mut ctx = context(Os::Linux, temp.path());
        assert!(LibzstdShim::default().applies(&ctx));
        ctx.env.insert(LIBZSTD_OPT_OUT_VAR.into(), "1".into());
        assert!(!LibzstdShim::default().applies(&ctx));
    }
}
