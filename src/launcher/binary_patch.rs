//! Point the client and server binaries at the configured auth domain.
//!
//! Replacements are same-length byte substitutions, so offsets inside the
//! executable and string lengths inside class files stay valid.

use crate::error::{AppError, AppResult};
use crate::utils::paths::{find_client_path, server_jar_path};
use regex::bytes::{NoExpand, Regex};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;

pub const ORIGINAL_DOMAIN: &str = "hytale.com";

/// Last domain written into the binaries of a game directory
const DOMAIN_RECORD_FILE: &str = ".patched_auth_domain";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BinaryPatchReport {
    pub client_replacements: usize,
    pub server_replacements: usize,
}

impl BinaryPatchReport {
    pub fn total(&self) -> usize {
        self.client_replacements + self.server_replacements
    }
}

struct Substitution {
    pattern: Regex,
    replacement: Vec<u8>,
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn literal_bytes_regex(bytes: &[u8]) -> AppResult<Regex> {
    let mut pattern = String::from("(?-u)");
    for b in bytes {
        pattern.push_str(&format!("\\x{:02x}", b));
    }
    Regex::new(&pattern).map_err(|e| AppError::Custom(format!("Invalid byte pattern: {}", e)))
}

fn substitutions(sources: &[String], target: &str) -> AppResult<Vec<Substitution>> {
    let mut out = Vec::new();
    for source in sources.iter().filter(|s| s.as_str() != target) {
        out.push(Substitution {
            pattern: literal_bytes_regex(source.as_bytes())?,
            replacement: target.as_bytes().to_vec(),
        });
        out.push(Substitution {
            pattern: literal_bytes_regex(&utf16le(source))?,
            replacement: utf16le(target),
        });
    }
    Ok(out)
}

fn count_matches(data: &[u8], subs: &[Substitution]) -> usize {
    subs.iter().map(|s| s.pattern.find_iter(data).count()).sum()
}

fn apply_substitutions(data: &[u8], subs: &[Substitution]) -> (Vec<u8>, usize) {
    let mut current = data.to_vec();
    let mut count = 0;
    for sub in subs {
        let found = sub.pattern.find_iter(&current).count();
        if found > 0 {
            count += found;
            current = sub
                .pattern
                .replace_all(&current, NoExpand(&sub.replacement))
                .into_owned();
        }
    }
    (current, count)
}

fn patch_file(path: &Path, subs: &[Substitution]) -> AppResult<usize> {
    let data = std::fs::read(path)
        .map_err(|e| AppError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
    let (patched, count) = apply_substitutions(&data, subs);
    if count > 0 {
        let tmp = path.with_extension("patching");
        std::fs::write(&tmp, &patched)
            .map_err(|e| AppError::Io(format!("Failed to write {}: {}", tmp.display(), e)))?;
        #[cfg(unix)]
        {
            let perms = std::fs::metadata(path)?.permissions();
            std::fs::set_permissions(&tmp, perms)?;
        }
        std::fs::rename(&tmp, path)?;
    }
    Ok(count)
}

fn patch_jar(path: &Path, subs: &[Substitution]) -> AppResult<usize> {
    let mut archive = zip::ZipArchive::new(BufReader::new(File::open(path)?))?;

    let mut pending = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        pending += count_matches(&data, subs);
    }
    if pending == 0 {
        return Ok(0);
    }

    let tmp = path.with_extension("jar.patching");
    let mut writer = zip::ZipWriter::new(File::create(&tmp)?);
    let mut total = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        let mut options = SimpleFileOptions::default().compression_method(entry.compression());
        if let Some(mode) = entry.unix_mode() {
            options = options.unix_permissions(mode);
        }
        if entry.is_dir() {
            writer.add_directory(name, options)?;
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        let (patched, count) = apply_substitutions(&data, subs);
        total += count;
        writer.start_file(name, options)?;
        writer.write_all(&patched)?;
    }
    writer.finish()?;
    std::fs::rename(&tmp, path)?;
    Ok(total)
}

/// Rewrite every occurrence of the stock domain (and of a domain patched in
/// earlier) to `auth_domain`, in UTF-8 and UTF-16LE. Safe to run on every launch.
pub fn patch_game_binaries(game_dir: &Path, auth_domain: &str) -> AppResult<BinaryPatchReport> {
    let auth_domain = auth_domain.trim();
    if auth_domain.len() != ORIGINAL_DOMAIN.len() {
        return Err(AppError::Configuration(format!(
            "Auth domain '{}' must be exactly {} characters to patch the game binaries",
            auth_domain,
            ORIGINAL_DOMAIN.len()
        )));
    }

    let record = game_dir.join(DOMAIN_RECORD_FILE);
    let mut sources = vec![ORIGINAL_DOMAIN.to_string()];
    if let Ok(previous) = std::fs::read_to_string(&record) {
        let previous = previous.trim().to_string();
        if previous.len() == ORIGINAL_DOMAIN.len() && !sources.contains(&previous) {
            sources.push(previous);
        }
    }
    let subs = substitutions(&sources, auth_domain)?;

    let mut report = BinaryPatchReport::default();
    if !subs.is_empty() {
        if let Some(client) = find_client_path(game_dir) {
            report.client_replacements = patch_file(&client, &subs)?;
        }
        let server = server_jar_path(game_dir);
        if server.is_file() {
            report.server_replacements = patch_jar(&server, &subs)?;
        }
    }

    std::fs::write(&record, auth_domain)?;
    if report.total() > 0 {
        info!(
            "Patched game binaries for {} (client: {}, server: {})",
            auth_domain, report.client_replacements, report.server_replacements
        );
    } else {
        debug!("Game binaries already point at {}", auth_domain);
    }
    Ok(report)
}
