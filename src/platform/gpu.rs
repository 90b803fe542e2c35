use super::Os;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const NVIDIA_EGL_VENDOR_FILE: &str = "/usr/share/glvnd/egl_vendor.d/10_nvidia.json";

static PCI_VENDOR_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([0-9a-fA-F]{4}):[0-9a-fA-F]{4}\]").expect("valid regex"));
static PCI_DEVICE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\]:\s*(.+?)\s*\[[0-9a-fA-F]{4}:[0-9a-fA-F]{4}\]").expect("valid regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuPreference {
    #[default]
    Auto,
    Dedicated,
    Integrated,
}

impl FromStr for GpuPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(GpuPreference::Auto),
            "dedicated" => Ok(GpuPreference::Dedicated),
            "integrated" => Ok(GpuPreference::Integrated),
            other => Err(format!("Unknown GPU preference: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuMode {
    Dedicated,
    Integrated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuInfo {
    pub mode: GpuMode,
    pub vendor: GpuVendor,
    pub integrated_name: String,
    pub dedicated_name: Option<String>,
}

impl Default for GpuInfo {
    fn default() -> Self {
        Self {
            mode: GpuMode::Integrated,
            vendor: GpuVendor::Intel,
            integrated_name: "Unknown".to_string(),
            dedicated_name: None,
        }
    }
}

#[derive(Default)]
struct Findings {
    nvidia: Option<String>,
    amd: Option<String>,
    integrated: Option<String>,
}

impl Findings {
    fn into_info(self, integrated_fallback: &str) -> GpuInfo {
        let integrated_name = self
            .integrated
            .unwrap_or_else(|| integrated_fallback.to_string());
        if let Some(name) = self.nvidia {
            GpuInfo {
                mode: GpuMode::Dedicated,
                vendor: GpuVendor::Nvidia,
                integrated_name,
                dedicated_name: Some(name),
            }
        } else if let Some(name) = self.amd {
            GpuInfo {
                mode: GpuMode::Dedicated,
                vendor: GpuVendor::Amd,
                integrated_name,
                dedicated_name: Some(name),
            }
        } else {
            GpuInfo {
                mode: GpuMode::Integrated,
                vendor: GpuVendor::Intel,
                integrated_name,
                dedicated_name: None,
            }
        }
    }
}

/// Parse `lspci -nn` output
pub fn parse_lspci(output: &str) -> GpuInfo {
    let mut findings = Findings::default();

    for line in output.lines() {
        if !(line.contains("VGA") || line.contains("3D")) {
            continue;
        }
        let lower = line.to_lowercase();
        let vendor_id = PCI_VENDOR_ID
            .captures(line)
            .map(|c| c[1].to_lowercase())
            .unwrap_or_default();
        let device = PCI_DEVICE_NAME.captures(line).map(|c| c[1].to_string());

        if vendor_id == "10de" || lower.contains("nvidia") {
            findings.nvidia = Some(device.unwrap_or_else(|| "NVIDIA GPU".to_string()));
        } else if vendor_id == "1002" || lower.contains("amd") || lower.contains("radeon") {
            findings.amd = Some(device.unwrap_or_else(|| "AMD GPU".to_string()));
        } else if vendor_id == "8086" || lower.contains("intel") {
            findings.integrated = Some(device.unwrap_or_else(|| "Intel GPU".to_string()));
        }
    }

    findings.into_info("Intel GPU")
}

/// Parse `wmic path win32_VideoController get name` output
pub fn parse_wmic(output: &str) -> GpuInfo {
    let mut findings = Findings::default();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || line == "Name" {
            continue;
        }
        let lower = line.to_lowercase();
        if lower.contains("nvidia") {
            findings.nvidia = Some(line.to_string());
        } else if lower.contains("amd") || lower.contains("radeon") {
            findings.amd = Some(line.to_string());
        } else if lower.contains("intel") {
            findings.integrated = Some(line.to_string());
        }
    }
    findings.into_info("Intel GPU")
}

/// Parse `system_profiler SPDisplaysDataType` output
pub fn parse_system_profiler(output: &str) -> GpuInfo {
    let mut findings = Findings::default();
    for line in output.lines() {
        let Some((_, name)) = line.split_once("Chipset Model:") else {
            continue;
        };
        let name = name.trim().to_string();
        let lower = name.to_lowercase();
        if lower.contains("nvidia") {
            findings.nvidia = Some(name);
        } else if lower.contains("amd") || lower.contains("radeon") {
            findings.amd = Some(name);
        } else if lower.contains("intel") || lower.contains("iris") || lower.contains("uhd") {
            findings.integrated = Some(name);
        } else if findings.integrated.is_none() && findings.nvidia.is_none() && findings.amd.is_none() {
            // Apple Silicon and friends
            findings.integrated = Some(name);
        }
    }
    findings.into_info("Integrated GPU")
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = std::process::Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        debug!("{} exited with {}", program, output.status);
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Detect the GPUs present; falls back to "integrated Intel" on any failure
pub fn detect_gpu(os: Os) -> GpuInfo {
    let detected = match os {
        Os::Linux => command_output("lspci", &["-nn"]).map(|out| parse_lspci(&out)),
        Os::Windows => command_output("wmic", &["path", "win32_VideoController", "get", "name"])
            .map(|out| parse_wmic(&out)),
        Os::Darwin => command_output("system_profiler", &["SPDisplaysDataType"])
            .map(|out| parse_system_profiler(&out)),
    };
    match detected {
        Some(info) => {
            info!("Detected GPU: {:?} ({:?})", info.vendor, info.mode);
            info
        }
        None => {
            warn!("GPU detection failed, falling back to integrated");
            GpuInfo::default()
        }
    }
}

/// Environment needed to run on the preferred GPU (Linux PRIME offload)
pub fn gpu_env(
    preference: GpuPreference,
    detected: &GpuInfo,
    nvidia_egl_present: bool,
) -> Vec<(String, String)> {
    let wants_dedicated = match preference {
        GpuPreference::Auto => detected.mode == GpuMode::Dedicated,
        GpuPreference::Dedicated => true,
        GpuPreference::Integrated => false,
    };
    if !wants_dedicated {
        return Vec::new();
    }

    let mut env = Vec::new();
    if detected.vendor == GpuVendor::Nvidia {
        env.push(("__NV_PRIME_RENDER_OFFLOAD".to_string(), "1".to_string()));
        env.push(("__GLX_VENDOR_LIBRARY_NAME".to_string(), "nvidia".to_string()));
        if nvidia_egl_present {
            env.push((
                "__EGL_VENDOR_LIBRARY_FILENAMES".to_string(),
                NVIDIA_EGL_VENDOR_FILE.to_string(),
            ));
        } else {
            warn!("NVIDIA EGL vendor file not found, not setting __EGL_VENDOR_LIBRARY_FILENAMES");
        }
    } else {
        env.push(("DRI_PRIME".to_string(), "1".to_string()));
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    const HYBRID_NVIDIA: &str = "\
00:02.0 VGA compatible controller [0300]: Intel Corporation UHD Graphics 620 [8086:5917] (rev 07)
01:00.0 3D controller [0302]: NVIDIA Corporation GP108M [GeForce MX150] [10de:1d10] (rev a1)
";

    #[test]
    fn test_lspci_hybrid_nvidia() {
        let info = parse_lspci(HYBRID_NVIDIA);
        assert_eq!(info.vendor, GpuVendor::Nvidia);
        assert_eq!(info.mode, GpuMode::Dedicated);
        assert_eq!(info.integrated_name, "Intel Corporation UHD Graphics 620");
        assert_eq!(
            info.dedicated_name.as_deref(),
            Some("NVIDIA Corporation GP108M [GeForce MX150]")
        );
    }

    #[test]
    fn test_lspci_amd_and_intel_only() {
        let amd = parse_lspci(
            "03:00.0 VGA compatible controller [0300]: Advanced Micro Devices, Inc. [AMD/ATI] Navi 23 [1002:73ff] (rev c1)\n",
        );
        assert_eq!(amd.vendor, GpuVendor::Amd);

        let intel = parse_lspci(
            "00:02.0 VGA compatible controller [0300]: Intel Corporation Iris Xe [8086:9a49] (rev 01)\n",
        );
        assert_eq!(intel.mode, GpuMode::Integrated);
        assert_eq!(intel.dedicated_name, None);
    }

    #[test]
    fn test_wmic_and_system_profiler() {
        let win = parse_wmic("Name\r\nIntel(R) UHD Graphics\r\nNVIDIA GeForce RTX 3060\r\n");
        assert_eq!(win.vendor, GpuVendor::Nvidia);
        assert_eq!(win.integrated_name, "Intel(R) UHD Graphics");

        let mac = parse_system_profiler("Graphics/Displays:\n    Apple M2:\n      Chipset Model: Apple M2\n");
        assert_eq!(mac.mode, GpuMode::Integrated);
        assert_eq!(mac.integrated_name, "Apple M2");
    }

    #[test]
    fn test_gpu_env_nvidia_offload() {
        let info = parse_lspci(HYBRID_NVIDIA);
        let env = gpu_env(GpuPreference::Auto, &info, true);
        assert!(env.contains(&("__NV_PRIME_RENDER_OFFLOAD".into(), "1".into())));
        assert!(env.contains(&("__GLX_VENDOR_LIBRARY_NAME".into(), "nvidia".into())));
        assert!(env
            .iter()
            .any(|(k, v)| k == "__EGL_VENDOR_LIBRARY_FILENAMES" && v == NVIDIA_EGL_VENDOR_FILE));

        let without_egl = gpu_env(GpuPreference::Auto, &info, false);
        assert!(!without_egl
            .iter()
            .any(|(k, _)| k == "__EGL_VENDOR_LIBRARY_FILENAMES"));
    }

    #[test]
    fn test_gpu_env_respects_preference() {
        let info = parse_lspci(HYBRID_NVIDIA);
        assert!(gpu_env(GpuPreference::Integrated, &info, true).is_empty());

        let intel_only = GpuInfo::default();
        assert!(gpu_env(GpuPreference::Auto, &intel_only, false).is_empty());
        assert_eq!(
            gpu_env(GpuPreference::Dedicated, &intel_only, false),
            vec![("DRI_PRIME".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!("Dedicated".parse::<GpuPreference>(), Ok(GpuPreference::Dedicated));
        assert!("fastest".parse::<GpuPreference>().is_err());
    }
}
