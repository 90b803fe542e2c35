use std::collections::HashMap;
use tracing::{debug, info};

/// Whether the session is Wayland, judged from the environment first and
/// `loginctl` (through `session_type`) as a last resort.
pub fn is_wayland_session(
    env: &HashMap<String, String>,
    session_type: impl Fn(&str) -> Option<String>,
) -> bool {
    let xdg_session = env.get("XDG_SESSION_TYPE").map(|s| s.to_lowercase());
    debug!(
        "Checking Wayland: XDG_SESSION_TYPE={:?}, WAYLAND_DISPLAY={:?}",
        xdg_session,
        env.get("WAYLAND_DISPLAY")
    );

    if xdg_session.as_deref() == Some("wayland") {
        return true;
    }
    if env.get("WAYLAND_DISPLAY").is_some_and(|d| !d.is_empty()) {
        return true;
    }
    if let Some(session_id) = env.get("XDG_SESSION_ID").filter(|s| !s.is_empty()) {
        if let Some(kind) = session_type(session_id) {
            return kind.to_lowercase().contains("wayland");
        }
    }
    false
}

/// `loginctl show-session <id> -p Type`
pub fn loginctl_session_type(session_id: &str) -> Option<String> {
    let output = std::process::Command::new("loginctl")
        .args(["show-session", session_id, "-p", "Type"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Extra environment for a Wayland session.
///
/// A user-set `SDL_VIDEODRIVER` always wins and disables every adjustment.
/// Gamescope (Steam Deck gaming mode) is forced onto XWayland.
pub fn wayland_env(env: &HashMap<String, String>, is_wayland: bool) -> Vec<(String, String)> {
    if let Some(driver) = env.get("SDL_VIDEODRIVER").filter(|d| !d.is_empty()) {
        info!(
            "User set SDL_VIDEODRIVER={}, skipping Wayland configuration",
            driver
        );
        return Vec::new();
    }
    if !is_wayland {
        return Vec::new();
    }

    let mut vars = Vec::new();
    if !env.contains_key("ELECTRON_OZONE_PLATFORM_HINT") {
        vars.push((
            "ELECTRON_OZONE_PLATFORM_HINT".to_string(),
            "wayland".to_string(),
        ));
    }

    let desktop = env
        .get("XDG_CURRENT_DESKTOP")
        .map(|d| d.to_lowercase())
        .unwrap_or_default();
    let gamescope = desktop == "gamescope" || env.get("SteamDeck").map(String::as_str) == Some("1");
    if gamescope {
        info!("Gamescope / Steam Deck detected, forcing SDL_VIDEODRIVER=x11");
        vars.push(("SDL_VIDEODRIVER".to_string(), "x11".to_string()));
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_detects_wayland_from_env() {
        assert!(is_wayland_session(&env(&[("XDG_SESSION_TYPE", "Wayland")]), |_| None));
        assert!(is_wayland_session(&env(&[("WAYLAND_DISPLAY", "wayland-0")]), |_| None));
        assert!(!is_wayland_session(&env(&[("XDG_SESSION_TYPE", "x11")]), |_| None));
    }

    #[test]
    fn test_falls_back_to_loginctl() {
        let vars = env(&[("XDG_SESSION_ID", "3")]);
        assert!(is_wayland_session(&vars, |id| {
            assert_eq!(id, "3");
            Some("Type=wayland".to_string())
        }));
        assert!(!is_wayland_session(&vars, |_| Some("Type=x11".to_string())));
    }

    #[test]
    fn test_user_video_driver_is_respected() {
        let vars = env(&[("SDL_VIDEODRIVER", "x11"), ("XDG_CURRENT_DESKTOP", "gamescope")]);
        assert!(wayland_env(&vars, true).is_empty());
    }

    #[test]
    fn test_gamescope_forces_x11() {
        let vars = env(&[("SteamDeck", "1")]);
        let out = wayland_env(&vars, true);
        assert!(out.contains(&("SDL_VIDEODRIVER".to_string(), "x11".to_string())));
        assert!(out.contains(&(
            "ELECTRON_OZONE_PLATFORM_HINT".to_string(),
            "wayland".to_string()
        )));
    }

    #[test]
    fn test_plain_wayland_lets_sdl_decide() {
        let vars = env(&[("XDG_CURRENT_DESKTOP", "GNOME"), ("ELECTRON_OZONE_PLATFORM_HINT", "auto")]);
        assert!(wayland_env(&vars, true).is_empty());
        assert!(wayland_env(&env(&[]), false).is_empty());
    }
}
