//! Fixtures shared by unit tests: a loopback HTTP server with canned
//! replies and a few filesystem helpers.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Ok(Vec<u8>),
    Status(u16),
    /// Fail with `status` for the first `failures` requests, then serve `body`
    FailThen {
        failures: usize,
        status: u16,
        body: Vec<u8>,
    },
    /// Promise `declared` bytes, send `sent`, then hang
    Stall { declared: usize, sent: Vec<u8> },
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: Vec<u8>,
}

type Requests = Arc<Mutex<Vec<RecordedRequest>>>;

pub(crate) struct TestServer {
    addr: SocketAddr,
    requests: Requests,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(routes: Vec<(&str, Reply)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<String, Reply>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, reply)| (path.to_string(), reply))
                .collect(),
        );
        let requests: Requests = Arc::default();

        let task = {
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let routes = routes.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let _ = handle(stream, routes, requests).await;
                    });
                }
            })
        };

        Self {
            addr,
            requests,
            task,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }

    pub fn total_hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

async fn handle(
    mut stream: TcpStream,
    routes: Arc<HashMap<String, Reply>>,
    requests: Requests,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = find_header_end(&buf) {
            break end;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or("GET").to_string();
    let target = request_line.next().unwrap_or("/").to_string();
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.clone(), None),
    };
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let previous = {
        let mut recorded = requests.lock().unwrap();
        let previous = recorded.iter().filter(|r| r.path == path).count();
        recorded.push(RecordedRequest {
            method,
            path: path.clone(),
            query,
            body,
        });
        previous
    };

    match routes.get(&path) {
        None => write_response(&mut stream, 404, b"not found").await,
        Some(Reply::Ok(body)) => write_response(&mut stream, 200, body).await,
        Some(Reply::Status(code)) => write_response(&mut stream, *code, b"").await,
        Some(Reply::FailThen {
            failures,
            status,
            body,
        }) => {
            if previous < *failures {
                write_response(&mut stream, *status, b"").await
            } else {
                write_response(&mut stream, 200, body).await
            }
        }
        Some(Reply::Stall { declared, sent }) => {
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                declared
            );
            stream.write_all(header.as_bytes()).await?;
            stream.write_all(sent).await?;
            stream.flush().await?;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }
}

async fn write_response(stream: &mut TcpStream, status: u16, body: &[u8]) -> std::io::Result<()> {
    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        if status < 400 { "OK" } else { "Error" },
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    stream.shutdown().await
}

/// Every file under `root`, keyed by relative path
pub(crate) fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_path_buf();
            (relative, std::fs::read(e.path()).unwrap())
        })
        .collect()
}

pub(crate) fn write_file(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Executable `/bin/sh` script at `path`
#[cfg(unix)]
pub(crate) fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    write_file(path, format!("#!/bin/sh\n{}\n", body).as_bytes());
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Payload large enough to pass the patch archive size check
pub(crate) fn patch_payload(tag: &str) -> Vec<u8> {
    let mut data = tag.as_bytes().to_vec();
    data.resize(crate::patch::MIN_PATCH_SIZE as usize + 512, b'p');
    data
}
