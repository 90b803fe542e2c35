use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_LIFETIME_SECS: i64 = 36_000;

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub identity_token: String,
    pub session_token: String,
    /// True when the auth service was unreachable and tokens were made up locally
    pub local: bool,
}

#[derive(Debug, Deserialize)]
struct ChildSessionResponse {
    #[serde(rename = "IdentityToken", alias = "identityToken")]
    identity_token: Option<String>,
    #[serde(rename = "SessionToken", alias = "sessionToken")]
    session_token: Option<String>,
}

/// Ask the auth service for a child game session. Any failure falls back to
/// locally generated, unsigned tokens so offline play keeps working.
pub async fn fetch_auth_tokens(
    client: &reqwest::Client,
    auth_server: &str,
    uuid: &str,
    name: &str,
) -> AuthTokens {
    let url = format!("{}/game-session/child", auth_server.trim_end_matches('/'));
    info!("Fetching auth tokens from {}", url);

    let result = async {
        let response = client
            .post(&url)
            .json(&json!({
                "uuid": uuid,
                "name": name,
                "scopes": ["hytale:server", "hytale:client"],
            }))
            .timeout(AUTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("Auth server returned {}", response.status()));
        }
        let body: ChildSessionResponse = response.json().await.map_err(|e| e.to_string())?;
        match (body.identity_token, body.session_token) {
            (Some(identity), Some(session)) if !identity.is_empty() && !session.is_empty() => {
                Ok((identity, session))
            }
            _ => Err("Auth server response is missing tokens".to_string()),
        }
    }
    .await;

    match result {
        Ok((identity_token, session_token)) => {
            info!("Auth tokens received from server");
            AuthTokens {
                identity_token,
                session_token,
                local: false,
            }
        }
        Err(e) => {
            warn!("Failed to fetch auth tokens: {}", e);
            generate_local_tokens(uuid, name, auth_server)
        }
    }
}

fn encode_json(value: &serde_json::Value) -> String {
    URL_SAFE_NO_PAD.encode(value.to_string())
}

/// JWT-shaped tokens with a random signature. They will not pass server
/// validation but let the client start.
pub fn generate_local_tokens(uuid: &str, name: &str, issuer: &str) -> AuthTokens {
    info!("Using locally generated tokens (fallback mode)");
    let now = chrono::Utc::now().timestamp();
    let exp = now + TOKEN_LIFETIME_SECS;

    let header = encode_json(&json!({
        "alg": "EdDSA",
        "kid": "2025-10-01",
        "typ": "JWT",
    }));
    let identity = encode_json(&json!({
        "sub": uuid,
        "name": name,
        "username": name,
        "entitlements": ["game.base"],
        "scope": "hytale:server hytale:client",
        "iat": now,
        "exp": exp,
        "iss": issuer,
        "jti": uuid::Uuid::new_v4().to_string(),
    }));
    let session = encode_json(&json!({
        "sub": uuid,
        "scope": "hytale:server",
        "iat": now,
        "exp": exp,
        "iss": issuer,
        "jti": uuid::Uuid::new_v4().to_string(),
    }));

    let mut signature = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut signature);
    let signature = URL_SAFE_NO_PAD.encode(signature);

    AuthTokens {
        identity_token: format!("{}.{}.{}", header, identity, signature),
        session_token: format!("{}.{}.{}", header, session, signature),
        local: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, TestServer};

    fn decode_part(token: &str, index: usize) -> serde_json::Value {
        let part = token.split('.').nth(index).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(part).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_tokens_from_server() {
        let server = TestServer::start(vec![(
            "/game-session/child",
            Reply::Ok(br#"{"IdentityToken":"id.tok.en","sessionToken":"se.ss.ion"}"#.to_vec()),
        )])
        .await;

        let tokens =
            fetch_auth_tokens(&reqwest::Client::new(), &server.base_url(), "u-1", "Steve").await;
        assert!(!tokens.local);
        assert_eq!(tokens.identity_token, "id.tok.en");
        assert_eq!(tokens.session_token, "se.ss.ion");

        let request = &server.requests()[0];
        assert_eq!(request.method, "POST");
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["uuid"], "u-1");
        assert_eq!(body["name"], "Steve");
        assert_eq!(body["scopes"], json!(["hytale:server", "hytale:client"]));
    }

    #[tokio::test]
    async fn test_falls_back_to_local_tokens() {
        let server = TestServer::start(vec![("/game-session/child", Reply::Status(502))]).await;
        let tokens =
            fetch_auth_tokens(&reqwest::Client::new(), &server.base_url(), "u-1", "Steve").await;
        assert!(tokens.local);
        assert_eq!(decode_part(&tokens.identity_token, 1)["sub"], "u-1");
    }

    #[test]
    fn test_local_token_shape() {
        let tokens = generate_local_tokens("u-2", "Alex", "https://sessions.example.org");

        let header = decode_part(&tokens.identity_token, 0);
        assert_eq!(header["alg"], "EdDSA");
        assert_eq!(header["kid"], "2025-10-01");

        let identity = decode_part(&tokens.identity_token, 1);
        assert_eq!(identity["username"], "Alex");
        assert_eq!(identity["entitlements"], json!(["game.base"]));
        assert_eq!(identity["scope"], "hytale:server hytale:client");
        assert_eq!(identity["iss"], "https://sessions.example.org");
        assert_eq!(
            identity["exp"].as_i64().unwrap() - identity["iat"].as_i64().unwrap(),
            TOKEN_LIFETIME_SECS
        );

        let session = decode_part(&tokens.session_token, 1);
        assert_eq!(session["scope"], "hytale:server");

        let signature = tokens.identity_token.split('.').nth(2).unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(signature).unwrap().len(), 64);
    }
}
