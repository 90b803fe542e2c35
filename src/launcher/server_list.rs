use crate::error::AppResult;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

const SERVER_LIST_TIMEOUT: Duration = Duration::from_secs(40);
const SAVED_SERVERS: &str = "SavedServers";

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteServer {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteServerList {
    #[serde(rename = "SavedServers", default)]
    saved_servers: Vec<RemoteServer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub added: usize,
    pub total: usize,
}

/// Timestamp in the format the client writes itself (7 fractional digits)
pub fn format_date_saved(date: DateTime<Local>) -> String {
    date.format("%Y-%m-%dT%H:%M:%S%.3f0000%:z").to_string()
}

fn address_of(server: &Value) -> Option<String> {
    server
        .get("Address")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
}

/// Remote servers first (prefixed `@ `, fresh ids), then every local entry
/// whose address the remote list does not cover. Other top-level keys of
/// `local` are kept.
pub fn merge_server_lists(local: Value, remote: &[RemoteServer], date_saved: &str) -> Value {
    let mut document = match local {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let local_servers = match document.remove(SAVED_SERVERS) {
        Some(Value::Array(servers)) => servers,
        _ => Vec::new(),
    };

    let remote_addresses: HashSet<String> =
        remote.iter().map(|s| s.address.to_lowercase()).collect();

    let mut merged: Vec<Value> = remote
        .iter()
        .map(|server| {
            json!({
                "Id": uuid::Uuid::new_v4().to_string(),
                "Name": format!("@ {}", server.name),
                "Address": server.address,
                "DateSaved": date_saved,
            })
        })
        .collect();
    merged.extend(local_servers.into_iter().filter(|server| {
        address_of(server)
            .map(|address| !remote_addresses.contains(&address))
            .unwrap_or(true)
    }));

    document.insert(SAVED_SERVERS.to_string(), Value::Array(merged));
    Value::Object(document)
}

async fn fetch_remote_servers(client: &reqwest::Client, url: &str) -> Vec<RemoteServer> {
    let result = async {
        let response = client
            .get(url)
            .header("User-Agent", "Hytale-F2P-Launcher")
            .timeout(SERVER_LIST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        response.json::<RemoteServerList>().await
    }
    .await;

    match result {
        Ok(list) => list.saved_servers,
        Err(e) => {
            warn!("Failed to fetch remote server list: {}", e);
            Vec::new()
        }
    }
}

fn read_local_list(path: &Path) -> Value {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Value>(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse local server list, creating new one: {}", e);
                json!({ "SavedServers": [] })
            }
        },
        Err(_) => {
            info!("Local server list does not exist, creating new one");
            json!({ "SavedServers": [] })
        }
    }
}

/// Merge the published server list into the client's `ServerList.json`
pub async fn sync_server_list(
    client: &reqwest::Client,
    url: &str,
    server_list_path: &Path,
) -> AppResult<SyncSummary> {
    info!("Fetching server list from {}", url);
    let remote = fetch_remote_servers(client, url).await;
    let local = read_local_list(server_list_path);

    let merged = merge_server_lists(local, &remote, &format_date_saved(Local::now()));
    let total = merged[SAVED_SERVERS].as_array().map(Vec::len).unwrap_or(0);

    if let Some(parent) = server_list_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(server_list_path, serde_json::to_string_pretty(&merged)?).await?;

    let summary = SyncSummary {
        added: remote.len(),
        total,
    };
    info!(
        "Server list synchronized: {} API servers added, total: {}",
        summary.added, summary.total
    );
    Ok(summary)
}
