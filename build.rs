use std::fs;
use std::path::Path;

fn main() {
    // Load .env file for local development (endpoint overrides)
    let env_path = Path::new(".env");
    if env_path.exists() {
        if let Ok(contents) = fs::read_to_string(env_path) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().trim_matches('"');
                    // Only forward launcher endpoint keys
                    if key.starts_with("HF2P_") {
                        println!("cargo:rustc-env={}={}", key, value);
                    }
                }
            }
        }
        println!("cargo:rerun-if-changed=.env");
    }
    println!("cargo:rerun-if-changed=build.rs");
}
