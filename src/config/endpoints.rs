//! Remote service locations.
//!
//! Defaults are compiled in (optionally from a local `.env` via `build.rs`)
//! and can be overridden at runtime with `HF2P_*` environment variables.

macro_rules! compiled_or {
    ($key:literal, $default:expr) => {
        match option_env!($key) {
            Some(value) => value,
            None => $default,
        }
    };
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Version service, `GET {version_api}/api/version_client?branch=`
    pub version_api: String,
    /// Patch storage, already including the `/patches` prefix
    pub patch_base: String,
    pub jre_manifest: String,
    pub butler_base: String,
    pub auth_domain: String,
    pub auth_server: String,
    pub server_list: String,
    pub ui_assets: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        let auth_domain = compiled_or!("HF2P_AUTH_DOMAIN", "sanasol.ws").to_string();
        Self {
            version_api: compiled_or!("HF2P_VERSION_API", "https://files.hytalef2p.com").to_string(),
            patch_base: compiled_or!("HF2P_PATCH_BASE", "https://game-patches.hytale.com/patches")
                .to_string(),
            jre_manifest: compiled_or!(
                "HF2P_JRE_MANIFEST",
                "https://launcher.hytale.com/version/release/jre.json"
            )
            .to_string(),
            butler_base: compiled_or!("HF2P_BUTLER_BASE", "https://broth.itch.zone/butler")
                .to_string(),
            auth_server: match option_env!("HF2P_AUTH_SERVER") {
                Some(url) => url.to_string(),
                None => auth_server_for(&auth_domain),
            },
            auth_domain,
            server_list: compiled_or!("HF2P_SERVER_LIST", "https://assets.authbp.xyz/server.json")
                .to_string(),
            ui_assets: compiled_or!("HF2P_UI_ASSETS", "http://3.10.208.30:3002/api").to_string(),
        }
    }
}

/// Session service URL for an auth domain
pub fn auth_server_for(domain: &str) -> String {
    format!("https://sessions.{}", domain)
}

impl Endpoints {
    /// Compiled defaults with `HF2P_*` process environment applied on top
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let slots: [(&str, &mut String); 8] = [
            ("HF2P_VERSION_API", &mut self.version_api),
            ("HF2P_PATCH_BASE", &mut self.patch_base),
            ("HF2P_JRE_MANIFEST", &mut self.jre_manifest),
            ("HF2P_BUTLER_BASE", &mut self.butler_base),
            ("HF2P_AUTH_DOMAIN", &mut self.auth_domain),
            ("HF2P_AUTH_SERVER", &mut self.auth_server),
            ("HF2P_SERVER_LIST", &mut self.server_list),
            ("HF2P_UI_ASSETS", &mut self.ui_assets),
        ];
        for (key, slot) in slots {
            if let Some(value) = lookup(key).map(|v| v.trim().to_string()) {
                if !value.is_empty() {
                    *slot = value.trim_end_matches('/').to_string();
                }
            }
        }
        // A domain override without an explicit server follows the domain
        if lookup("HF2P_AUTH_SERVER").is_none() && lookup("HF2P_AUTH_DOMAIN").is_some() {
            self.auth_server = auth_server_for(&self.auth_domain);
        }
        self
    }

    /// Every endpoint rooted at a single base URL. Used by local mirrors and tests.
    pub fn local(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            version_api: base.to_string(),
            patch_base: format!("{}/patches", base),
            jre_manifest: format!("{}/version/release/jre.json", base),
            butler_base: format!("{}/butler", base),
            auth_domain: "sanasol.ws".to_string(),
            auth_server: base.to_string(),
            server_list: format!("{}/server.json", base),
            ui_assets: format!("{}/api", base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_defaults() {
        let endpoints = Endpoints::default().with_overrides(|key| match key {
            "HF2P_VERSION_API" => Some("http://mirror.local/".to_string()),
            _ => None,
        });
        assert_eq!(endpoints.version_api, "http://mirror.local");
        assert_eq!(endpoints.patch_base, Endpoints::default().patch_base);
    }

    #[test]
    fn test_auth_server_follows_domain_override() {
        let endpoints = Endpoints::default().with_overrides(|key| match key {
            "HF2P_AUTH_DOMAIN" => Some("example.org".to_string()),
            _ => None,
        });
        assert_eq!(endpoints.auth_domain, "example.org");
        assert_eq!(endpoints.auth_server, "https://sessions.example.org");
    }
}
